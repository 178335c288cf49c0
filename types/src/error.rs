//! Error taxonomy for admission, ledger access, and buyback.

use thiserror::Error;

/// Failures talking to the external ledger. All variants are retryable from
/// the caller's perspective; a timeout is never treated as success.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger request timed out")]
    Timeout,
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

/// Why a contribution was not admitted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// The reference was already consumed (possibly in an earlier process
    /// lifetime). Safe to treat as "already credited".
    #[error("reference already admitted")]
    DuplicateReference,
    /// The payment is not yet visible on the ledger; the caller may retry.
    #[error("payment not found")]
    PaymentNotFound,
    /// The payment settled with an on-ledger error.
    #[error("payment failed on ledger")]
    PaymentFailed,
    /// The payment contains no transfer to the receiving address.
    #[error("no transfer to the receiving address")]
    NoMatchingTransfer,
    /// The matched transfer total differs from what the caller claimed.
    #[error("amount mismatch: expected {expected}, found {actual}")]
    AmountMismatch { expected: u64, actual: u64 },
    /// The current round is settling or complete; no queuing.
    #[error("round is closed to new contributions")]
    RoundClosed,
    #[error("reference must be non-empty")]
    InvalidReference,
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    /// The durable write failed; the contribution was not admitted.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl AdmissionError {
    /// Stable machine-readable reason string for API responses.
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::DuplicateReference => "duplicate_reference",
            AdmissionError::PaymentNotFound => "payment_not_found",
            AdmissionError::PaymentFailed => "payment_failed",
            AdmissionError::NoMatchingTransfer => "no_matching_transfer",
            AdmissionError::AmountMismatch { .. } => "amount_mismatch",
            AdmissionError::RoundClosed => "round_closed",
            AdmissionError::InvalidReference => "invalid_reference",
            AdmissionError::InvalidAmount => "invalid_amount",
            AdmissionError::Ledger(_) => "ledger_unavailable",
            AdmissionError::Persistence(_) => "persistence_failure",
        }
    }
}

/// Why a buyback cycle did not complete. Buyback is best-effort relative to
/// payout: any of these is logged and retried on a later cycle.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BuybackError {
    #[error("no quote returned by the swap venue")]
    QuoteUnavailable,
    #[error("swap rejected: {0}")]
    SwapFailed(String),
    #[error("burn account setup failed: {0}")]
    AccountSetup(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
