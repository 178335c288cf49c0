use axum::{
    extract::{Query, State as AxumState},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use burnflip_types::{AdmissionError, AdmitRequest};

use crate::{Engine, LedgerClient, ReconcileError, ReconcileOutcome, SwapVenue};

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    reason: &'static str,
}

#[derive(Deserialize)]
pub(super) struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub(super) struct ReconcileRequest {
    round_id: u64,
    #[serde(flatten)]
    outcome: ReconcileOutcome,
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn config<L: LedgerClient, V: SwapVenue>(
    AxumState(engine): AxumState<Arc<Engine<L, V>>>,
) -> Response {
    Json(engine.config.clone()).into_response()
}

pub(super) async fn round<L: LedgerClient, V: SwapVenue>(
    AxumState(engine): AxumState<Arc<Engine<L, V>>>,
) -> Response {
    Json(engine.current_summary().await).into_response()
}

pub(super) async fn history<L: LedgerClient, V: SwapVenue>(
    AxumState(engine): AxumState<Arc<Engine<L, V>>>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(engine.config.history_cap());
    Json(engine.history(limit).await).into_response()
}

pub(super) async fn burns<L: LedgerClient, V: SwapVenue>(
    AxumState(engine): AxumState<Arc<Engine<L, V>>>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(engine.config.feed_cap());
    Json(engine.recent_burns(limit).await).into_response()
}

pub(super) async fn payouts<L: LedgerClient, V: SwapVenue>(
    AxumState(engine): AxumState<Arc<Engine<L, V>>>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(engine.config.feed_cap());
    Json(engine.recent_payouts(limit).await).into_response()
}

pub(super) async fn admit<L: LedgerClient, V: SwapVenue>(
    AxumState(engine): AxumState<Arc<Engine<L, V>>>,
    Json(request): Json<AdmitRequest>,
) -> Response {
    match engine
        .admit(&request.reference, request.expected_amount)
        .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => admission_error_response(err),
    }
}

fn admission_error_response(err: AdmissionError) -> Response {
    let status = match &err {
        AdmissionError::InvalidReference | AdmissionError::InvalidAmount => {
            StatusCode::BAD_REQUEST
        }
        AdmissionError::DuplicateReference => StatusCode::CONFLICT,
        AdmissionError::Ledger(_) => StatusCode::SERVICE_UNAVAILABLE,
        AdmissionError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AdmissionError::PaymentNotFound
        | AdmissionError::PaymentFailed
        | AdmissionError::NoMatchingTransfer
        | AdmissionError::AmountMismatch { .. }
        | AdmissionError::RoundClosed => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            reason: err.reason(),
        }),
    )
        .into_response()
}

pub(super) async fn reconcile<L: LedgerClient, V: SwapVenue>(
    AxumState(engine): AxumState<Arc<Engine<L, V>>>,
    headers: HeaderMap,
    Json(request): Json<ReconcileRequest>,
) -> Response {
    if let Some(status) = admin_auth_error(&headers) {
        return (
            status,
            Json(ErrorResponse {
                error: "Unauthorized: Invalid or missing admin token".to_string(),
                reason: "unauthorized",
            }),
        )
            .into_response();
    }
    match engine.reconcile(request.round_id, request.outcome).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => {
            let (status, reason) = match &err {
                ReconcileError::SettlementInProgress => {
                    (StatusCode::CONFLICT, "settlement_in_progress")
                }
                ReconcileError::Persistence(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "persistence")
                }
                ReconcileError::NotCurrentRound => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "not_current_round")
                }
                ReconcileError::NotSettling => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "not_settling")
                }
                ReconcileError::UnknownParticipant => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "unknown_participant")
                }
            };
            (
                status,
                Json(ErrorResponse {
                    error: err.to_string(),
                    reason,
                }),
            )
                .into_response()
        }
    }
}

/// Validates admin authentication via x-admin-token header or Bearer token.
/// Uses the ADMIN_AUTH_TOKEN environment variable. If not set, blocks all
/// admin access.
fn admin_auth_error(headers: &HeaderMap) -> Option<StatusCode> {
    let token = std::env::var("ADMIN_AUTH_TOKEN").unwrap_or_default();
    if token.is_empty() {
        return Some(StatusCode::UNAUTHORIZED);
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let header_token = headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if bearer.as_deref() == Some(token.as_str()) || header_token.as_deref() == Some(token.as_str())
    {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}
