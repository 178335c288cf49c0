//! Wire types for the engine's HTTP surface and auxiliary feeds.

use serde::{Deserialize, Serialize};

use crate::round::{RoundStatus, Winner};

/// Body of `POST /admit`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmitRequest {
    /// External payment reference (the admission key).
    pub reference: String,
    /// Amount the caller claims was transferred, in the ledger's smallest
    /// unit. Verified against the resolved on-ledger transfer.
    pub expected_amount: u64,
}

/// Client-facing projection of a round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundSummary {
    pub id: u64,
    pub status: RoundStatus,
    pub pot_total: u64,
    pub participant_count: usize,
    pub entry_count: usize,
    pub closes_at_ms: u64,
    pub seconds_remaining: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_reference: Option<String>,
    pub buyback_amount: u64,
}

/// One executed buyback-and-burn, kept in the bounded burn feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRecord {
    /// External reference of the swap transaction.
    pub reference: String,
    pub timestamp_ms: u64,
    /// Native-currency amount swapped.
    pub amount: u64,
    /// Token amount delivered to the burn address.
    pub output_amount: u64,
}

/// One winner payout, kept in the bounded payout feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub round_id: u64,
    pub participant: String,
    pub amount: u64,
    /// External reference of the payout transaction.
    pub reference: String,
    pub timestamp_ms: u64,
}
