use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use burnflip_engine::{
    api::Api, now_ms, spawn_settlement_task, Engine, EngineConfig, HttpLedgerClient,
    HttpSwapVenue, Store, StoreCaps,
};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Address contributions must be paid to, and the account payouts are
    /// drawn from.
    #[arg(long)]
    receiving_address: String,

    /// Token the buyback converts into before burning.
    #[arg(long)]
    burn_token: String,

    /// Base URL of the ledger gateway.
    #[arg(long)]
    ledger_url: String,

    /// Base URL of the swap venue.
    #[arg(long)]
    venue_url: String,

    /// Path to the SQLite store.
    #[arg(long, default_value = "burnflip.sqlite")]
    store_path: PathBuf,

    /// Round duration in seconds.
    #[arg(long)]
    round_interval_secs: Option<u64>,

    /// Settlement poll interval in seconds.
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Deferral interval after a transient settlement failure, in seconds.
    #[arg(long)]
    retry_interval_secs: Option<u64>,

    /// Minimum distinct participants required to settle.
    #[arg(long)]
    min_participants: Option<usize>,

    /// Winner share of the pot in basis points.
    #[arg(long)]
    payout_share_bps: Option<u64>,

    /// Per-participant weight cap in basis points of the pot.
    #[arg(long)]
    concentration_cap_bps: Option<u64>,

    /// Balance that must remain on the receiving account after a payout.
    #[arg(long)]
    min_reserve_lamports: Option<u64>,

    /// Headroom reserved for transaction fees.
    #[arg(long)]
    fee_buffer_lamports: Option<u64>,

    /// Cap on the amount converted per buyback cycle (unlimited when omitted).
    #[arg(long)]
    max_buyback_per_cycle: Option<u64>,

    /// Swap slippage tolerance in basis points.
    #[arg(long)]
    slippage_bps: Option<u64>,

    /// Maximum consumed payment references retained (0 uses default).
    #[arg(long)]
    replay_guard_cap: Option<usize>,

    /// Maximum completed rounds retained (0 uses default).
    #[arg(long)]
    history_cap: Option<usize>,

    /// Maximum burn/payout feed entries retained (0 uses default).
    #[arg(long)]
    feed_cap: Option<usize>,

    /// Ledger and venue request timeout in seconds.
    #[arg(long)]
    ledger_timeout_secs: Option<u64>,

    /// HTTP rate limit per IP in requests per second (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_per_second: Option<u64>,

    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,

    /// Admit endpoint rate limit per IP in requests per minute (default: 100).
    #[arg(long)]
    admit_rate_limit_per_minute: Option<u64>,

    /// Admit endpoint rate limit burst size (default: 10).
    #[arg(long)]
    admit_rate_limit_burst: Option<u32>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let defaults = EngineConfig::default();
    if args.receiving_address.trim().is_empty() {
        anyhow::bail!("receiving_address must not be empty");
    }
    if args.burn_token.trim().is_empty() {
        anyhow::bail!("burn_token must not be empty");
    }
    if let Some(0) = args.round_interval_secs {
        anyhow::bail!("round_interval_secs must be > 0 when set");
    }
    if let Some(bps) = args.payout_share_bps {
        if bps > burnflip_types::BPS_DENOMINATOR {
            anyhow::bail!("payout_share_bps must be <= {}", burnflip_types::BPS_DENOMINATOR);
        }
    }
    if let Some(bps) = args.concentration_cap_bps {
        if bps > burnflip_types::BPS_DENOMINATOR {
            anyhow::bail!(
                "concentration_cap_bps must be <= {}",
                burnflip_types::BPS_DENOMINATOR
            );
        }
    }

    Ok(EngineConfig {
        receiving_address: args.receiving_address.trim().to_string(),
        burn_token: args.burn_token.trim().to_string(),
        store_path: Some(args.store_path.clone()),
        round_interval_secs: args.round_interval_secs.or(defaults.round_interval_secs),
        poll_interval_secs: args.poll_interval_secs.or(defaults.poll_interval_secs),
        retry_interval_secs: args.retry_interval_secs.or(defaults.retry_interval_secs),
        min_participants: args.min_participants.or(defaults.min_participants),
        payout_share_bps: args.payout_share_bps.or(defaults.payout_share_bps),
        concentration_cap_bps: args
            .concentration_cap_bps
            .or(defaults.concentration_cap_bps),
        min_reserve_lamports: args
            .min_reserve_lamports
            .or(defaults.min_reserve_lamports),
        fee_buffer_lamports: args.fee_buffer_lamports.or(defaults.fee_buffer_lamports),
        max_buyback_per_cycle: args.max_buyback_per_cycle,
        slippage_bps: args.slippage_bps.or(defaults.slippage_bps),
        replay_guard_cap: map_optional_limit(args.replay_guard_cap, defaults.replay_guard_cap),
        history_cap: map_optional_limit(args.history_cap, defaults.history_cap),
        feed_cap: map_optional_limit(args.feed_cap, defaults.feed_cap),
        ledger_timeout_secs: args.ledger_timeout_secs.or(defaults.ledger_timeout_secs),
        http_rate_limit_per_second: map_optional_limit(
            args.http_rate_limit_per_second,
            defaults.http_rate_limit_per_second,
        ),
        http_rate_limit_burst: map_optional_limit(
            args.http_rate_limit_burst,
            defaults.http_rate_limit_burst,
        ),
        admit_rate_limit_per_minute: map_optional_limit(
            args.admit_rate_limit_per_minute,
            defaults.admit_rate_limit_per_minute,
        ),
        admit_rate_limit_burst: map_optional_limit(
            args.admit_rate_limit_burst,
            defaults.admit_rate_limit_burst,
        ),
        http_body_limit_bytes: map_optional_limit(
            args.http_body_limit_bytes,
            defaults.http_body_limit_bytes,
        ),
    })
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

fn require_positive_u64(var: &str) -> Result<()> {
    let value = require_env(var)?;
    let parsed: u64 = value
        .parse()
        .with_context(|| format!("Invalid {var}: {value}"))?;
    if parsed == 0 {
        anyhow::bail!("Invalid {var}: {value}");
    }
    Ok(())
}

fn ensure_production_env() -> Result<()> {
    if !is_production() {
        return Ok(());
    }

    require_env("ALLOWED_HTTP_ORIGINS")?;
    require_env("ADMIN_AUTH_TOKEN")?;
    require_positive_u64("RATE_LIMIT_HTTP_PER_SEC")?;
    require_positive_u64("RATE_LIMIT_HTTP_BURST")?;
    require_positive_u64("RATE_LIMIT_ADMIT_PER_MIN")?;
    require_positive_u64("RATE_LIMIT_ADMIT_BURST")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing();

    ensure_production_env()?;

    let config = build_config(&args)?;
    let caps = StoreCaps {
        replay_guard_cap: config.replay_guard_cap(),
        history_cap: config.history_cap(),
        feed_cap: config.feed_cap(),
    };
    let (store, loaded) = Store::open(&args.store_path, caps)
        .with_context(|| format!("open store at {}", args.store_path.display()))?;
    info!(
        path = %args.store_path.display(),
        references = loaded.references.len(),
        history = loaded.history.len(),
        "store loaded"
    );

    let ledger = HttpLedgerClient::new(&args.ledger_url, config.ledger_timeout())
        .map_err(|err| anyhow::anyhow!("ledger client: {err}"))?;
    let venue = HttpSwapVenue::new(&args.venue_url, config.ledger_timeout())
        .map_err(|err| anyhow::anyhow!("swap venue: {err}"))?;

    let engine = Arc::new(Engine::new(config, store, loaded, ledger, venue));
    let summary = engine.current_summary().await;
    info!(
        round_id = summary.id,
        status = ?summary.status,
        pot = summary.pot_total,
        now_ms = now_ms(),
        "engine started"
    );

    spawn_settlement_task(engine.clone());

    let api = Api::new(engine);
    let app = api.router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
