use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ROUND_INTERVAL_SECS: u64 = 600;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 60;
const DEFAULT_MIN_PARTICIPANTS: usize = 2;
const DEFAULT_PAYOUT_SHARE_BPS: u64 = 5_000;
const DEFAULT_CONCENTRATION_CAP_BPS: u64 = 2_500;
const DEFAULT_FEE_BUFFER_LAMPORTS: u64 = 10_000;
const DEFAULT_SLIPPAGE_BPS: u64 = 100;
const DEFAULT_REPLAY_GUARD_CAP: usize = 5_000;
const DEFAULT_HISTORY_CAP: usize = 20;
const DEFAULT_FEED_CAP: usize = 50;
const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 1_000;
const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 5_000;
const DEFAULT_ADMIT_RATE_LIMIT_PER_MINUTE: u64 = 100;
const DEFAULT_ADMIT_RATE_LIMIT_BURST: u32 = 10;
const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 64 * 1024;

/// Engine configuration. Read-only once the engine is constructed; the
/// settlement and admission paths only ever read from it.
#[derive(Clone, Debug, Serialize)]
pub struct EngineConfig {
    /// Address contributions must be paid to, and the account payouts are
    /// drawn from.
    pub receiving_address: String,
    /// Token the buyback converts into before burning.
    pub burn_token: String,
    pub store_path: Option<PathBuf>,
    pub round_interval_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub retry_interval_secs: Option<u64>,
    pub min_participants: Option<usize>,
    pub payout_share_bps: Option<u64>,
    pub concentration_cap_bps: Option<u64>,
    pub min_reserve_lamports: Option<u64>,
    pub fee_buffer_lamports: Option<u64>,
    pub max_buyback_per_cycle: Option<u64>,
    pub slippage_bps: Option<u64>,
    pub replay_guard_cap: Option<usize>,
    pub history_cap: Option<usize>,
    pub feed_cap: Option<usize>,
    pub ledger_timeout_secs: Option<u64>,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub admit_rate_limit_per_minute: Option<u64>,
    pub admit_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            receiving_address: String::new(),
            burn_token: String::new(),
            store_path: None,
            round_interval_secs: Some(DEFAULT_ROUND_INTERVAL_SECS),
            poll_interval_secs: Some(DEFAULT_POLL_INTERVAL_SECS),
            retry_interval_secs: Some(DEFAULT_RETRY_INTERVAL_SECS),
            min_participants: Some(DEFAULT_MIN_PARTICIPANTS),
            payout_share_bps: Some(DEFAULT_PAYOUT_SHARE_BPS),
            concentration_cap_bps: Some(DEFAULT_CONCENTRATION_CAP_BPS),
            min_reserve_lamports: Some(0),
            fee_buffer_lamports: Some(DEFAULT_FEE_BUFFER_LAMPORTS),
            max_buyback_per_cycle: None,
            slippage_bps: Some(DEFAULT_SLIPPAGE_BPS),
            replay_guard_cap: Some(DEFAULT_REPLAY_GUARD_CAP),
            history_cap: Some(DEFAULT_HISTORY_CAP),
            feed_cap: Some(DEFAULT_FEED_CAP),
            ledger_timeout_secs: Some(DEFAULT_LEDGER_TIMEOUT_SECS),
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            admit_rate_limit_per_minute: Some(DEFAULT_ADMIT_RATE_LIMIT_PER_MINUTE),
            admit_rate_limit_burst: Some(DEFAULT_ADMIT_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
        }
    }
}

impl EngineConfig {
    pub fn round_interval_ms(&self) -> u64 {
        self.round_interval_secs
            .unwrap_or(DEFAULT_ROUND_INTERVAL_SECS)
            .max(1)
            * 1_000
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn retry_interval_ms(&self) -> u64 {
        self.retry_interval_secs
            .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS)
            .max(1)
            * 1_000
    }

    pub fn min_participants(&self) -> usize {
        self.min_participants
            .unwrap_or(DEFAULT_MIN_PARTICIPANTS)
            .max(1)
    }

    pub fn payout_share_bps(&self) -> u64 {
        self.payout_share_bps
            .unwrap_or(DEFAULT_PAYOUT_SHARE_BPS)
            .min(burnflip_types::BPS_DENOMINATOR)
    }

    pub fn concentration_cap_bps(&self) -> u64 {
        self.concentration_cap_bps
            .unwrap_or(DEFAULT_CONCENTRATION_CAP_BPS)
            .min(burnflip_types::BPS_DENOMINATOR)
    }

    pub fn min_reserve_lamports(&self) -> u64 {
        self.min_reserve_lamports.unwrap_or(0)
    }

    pub fn fee_buffer_lamports(&self) -> u64 {
        self.fee_buffer_lamports
            .unwrap_or(DEFAULT_FEE_BUFFER_LAMPORTS)
    }

    pub fn slippage_bps(&self) -> u64 {
        self.slippage_bps.unwrap_or(DEFAULT_SLIPPAGE_BPS)
    }

    pub fn replay_guard_cap(&self) -> usize {
        self.replay_guard_cap
            .unwrap_or(DEFAULT_REPLAY_GUARD_CAP)
            .max(1)
    }

    pub fn history_cap(&self) -> usize {
        self.history_cap.unwrap_or(DEFAULT_HISTORY_CAP).max(1)
    }

    pub fn feed_cap(&self) -> usize {
        self.feed_cap.unwrap_or(DEFAULT_FEED_CAP).max(1)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(
            self.ledger_timeout_secs
                .unwrap_or(DEFAULT_LEDGER_TIMEOUT_SECS)
                .max(1),
        )
    }

    pub fn http_body_limit_bytes(&self) -> usize {
        self.http_body_limit_bytes
            .unwrap_or(DEFAULT_HTTP_BODY_LIMIT_BYTES)
            .max(1)
    }
}
