//! Common types for the burnflip round settlement engine.

pub mod api;
pub mod error;
pub mod round;
pub mod selection;

pub use api::{AdmitRequest, BurnRecord, PayoutRecord, RoundSummary};
pub use error::{AdmissionError, BuybackError, LedgerError};
pub use round::{Contribution, Round, RoundStatus, Winner};
pub use selection::{select_winner, split_pot, PotSplit, SelectionOutcome};

/// Denominator for basis-point fractions (payout share, concentration cap,
/// slippage tolerance).
pub const BPS_DENOMINATOR: u64 = 10_000;
