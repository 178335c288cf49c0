use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{Engine, LedgerClient, SwapVenue};

mod http;

pub struct Api<L, V> {
    engine: Arc<Engine<L, V>>,
}

#[derive(Clone)]
struct OriginConfig {
    allowed_origins: Arc<HashSet<String>>,
    allow_any_origin: bool,
    allow_no_origin: bool,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn default_governor_config() -> Option<IpGovernorConfig> {
    GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .finish()
}

fn governor_for(period: Duration, burst_size: u32) -> Option<Arc<IpGovernorConfig>> {
    GovernorConfigBuilder::default()
        .period(period)
        .burst_size(burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .or_else(|| {
            tracing::warn!("invalid rate-limit config; falling back to defaults");
            default_governor_config()
        })
        .map(Arc::new)
}

impl<L: LedgerClient, V: SwapVenue> Api<L, V> {
    pub fn new(engine: Arc<Engine<L, V>>) -> Self {
        Self { engine }
    }

    pub fn router(&self) -> Router {
        let allowed_origins = parse_allowed_origins("ALLOWED_HTTP_ORIGINS");
        let allow_any_origin = allowed_origins.contains("*");
        let allow_no_origin = parse_allow_no_origin("ALLOW_HTTP_NO_ORIGIN");
        if allowed_origins.is_empty() {
            tracing::warn!("ALLOWED_HTTP_ORIGINS is empty; all browser origins will be rejected");
        }
        let cors_origins = allowed_origins
            .iter()
            .filter(|origin| *origin != "*")
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Invalid origin in ALLOWED_HTTP_ORIGINS: {}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();
        let origin_config = OriginConfig {
            allowed_origins: Arc::new(allowed_origins),
            allow_any_origin,
            allow_no_origin,
        };

        let cors = if allow_any_origin {
            CorsLayer::new().allow_origin(AllowOrigin::any())
        } else {
            CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins))
        }
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-admin-token"),
            header::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([header::HeaderName::from_static("x-request-id")]);

        // Environment variables override config for both rate limiters.
        let config = &self.engine.config;
        let http_rate_per_sec =
            parse_env_u64("RATE_LIMIT_HTTP_PER_SEC").or(config.http_rate_limit_per_second);
        let http_rate_burst =
            parse_env_u32("RATE_LIMIT_HTTP_BURST").or(config.http_rate_limit_burst);
        let admit_rate_per_min =
            parse_env_u64("RATE_LIMIT_ADMIT_PER_MIN").or(config.admit_rate_limit_per_minute);
        let admit_rate_burst =
            parse_env_u32("RATE_LIMIT_ADMIT_BURST").or(config.admit_rate_limit_burst);

        let governor_conf = match (http_rate_per_sec, http_rate_burst) {
            (Some(rate_per_second), Some(burst_size))
                if rate_per_second > 0 && burst_size > 0 =>
            {
                let nanos_per_request = (1_000_000_000u64 / rate_per_second).max(1);
                governor_for(Duration::from_nanos(nanos_per_request), burst_size)
            }
            _ => None,
        };

        // Admission carries ledger lookups, so it gets its own per-minute
        // limiter on top of the global one.
        let admit_governor_conf = match (admit_rate_per_min, admit_rate_burst) {
            (Some(rate_per_minute), Some(burst_size))
                if rate_per_minute > 0 && burst_size > 0 =>
            {
                let nanos_per_request = (60_000_000_000u64 / rate_per_minute).max(1);
                let period = Duration::from_nanos(nanos_per_request);
                tracing::info!(
                    rate_per_minute = rate_per_minute,
                    burst_size = burst_size,
                    period_ms = period.as_millis(),
                    "Admit endpoint rate limit configured"
                );
                governor_for(period, burst_size)
            }
            _ => None,
        };

        let admit_route = match admit_governor_conf {
            Some(config) => Router::new()
                .route("/admit", post(http::admit::<L, V>))
                .layer(GovernorLayer { config }),
            None => Router::new().route("/admit", post(http::admit::<L, V>)),
        };

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/config", get(http::config::<L, V>))
            .route("/round", get(http::round::<L, V>))
            .route("/history", get(http::history::<L, V>))
            .route("/burns", get(http::burns::<L, V>))
            .route("/payouts", get(http::payouts::<L, V>))
            .route("/admin/reconcile", post(http::reconcile::<L, V>));

        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };

        let router = router.merge(admit_route);

        let router = router.layer(cors);
        let router = router.layer(middleware::from_fn(move |req, next| {
            let origin_config = origin_config.clone();
            async move { enforce_origin(origin_config, req, next).await }
        }));
        let router = router.layer(DefaultBodyLimit::max(config.http_body_limit_bytes()));
        let router = router.layer(middleware::from_fn(request_id_middleware));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.engine.clone())
    }
}

fn parse_allowed_origins(var: &str) -> HashSet<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn parse_allow_no_origin(var: &str) -> bool {
    matches!(
        std::env::var(var).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    )
}

fn parse_env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

async fn enforce_origin(config: OriginConfig, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if let Some(origin) = origin {
        if !config.allow_any_origin && !config.allowed_origins.contains(origin) {
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    } else if !config.allow_no_origin {
        return (StatusCode::FORBIDDEN, "Origin required").into_response();
    }
    next.run(req).await
}

async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(header::HeaderName::from_static("x-request-id"), header_value);
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
