//! Operator reconciliation for rounds stuck in `Settling`.
//!
//! A round lands here when a payout submission failed with an unknown
//! outcome, or when the process died mid-settlement. The engine will not
//! guess: the operator checks the ledger and reports what actually happened.

use burnflip_types::{PayoutRecord, RoundStatus, RoundSummary, Winner};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use thiserror::Error;
use tracing::{info, warn};

use crate::{now_ms, Engine, LedgerClient, SwapVenue};

/// What the operator found on the ledger for the stuck round.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The payout did land: complete the round with the given winner.
    Paid {
        participant: String,
        payout_reference: String,
    },
    /// The payout never landed: reopen the round for another attempt.
    Unpaid,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("round id does not match the current round")]
    NotCurrentRound,
    #[error("current round is not in settling")]
    NotSettling,
    #[error("a settlement is in flight")]
    SettlementInProgress,
    #[error("participant has no contribution in this round")]
    UnknownParticipant,
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl<L: LedgerClient, V: SwapVenue> Engine<L, V> {
    /// Applies the operator's verdict to the stuck round.
    pub async fn reconcile(
        &self,
        round_id: u64,
        outcome: ReconcileOutcome,
    ) -> Result<RoundSummary, ReconcileError> {
        // Take the busy flag so neither the timer nor a second reconcile can
        // interleave with us.
        if self
            .settling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ReconcileError::SettlementInProgress);
        }
        let result = self.reconcile_inner(round_id, outcome).await;
        self.settling.store(false, Ordering::SeqCst);
        result
    }

    async fn reconcile_inner(
        &self,
        round_id: u64,
        outcome: ReconcileOutcome,
    ) -> Result<RoundSummary, ReconcileError> {
        let now = now_ms();
        let completed = {
            let mut state = self.state.write().await;
            if state.current.id != round_id {
                return Err(ReconcileError::NotCurrentRound);
            }
            if state.current.status != RoundStatus::Settling {
                return Err(ReconcileError::NotSettling);
            }

            match outcome {
                ReconcileOutcome::Unpaid => {
                    let mut updated = state.current.clone();
                    updated.status = RoundStatus::Open;
                    updated.closes_at_ms = now.saturating_add(self.config.retry_interval_ms());
                    self.store
                        .save_round(&updated)
                        .await
                        .map_err(|err| ReconcileError::Persistence(err.to_string()))?;
                    info!(
                        round_id,
                        closes_at_ms = updated.closes_at_ms,
                        "round reconciled as unpaid and reopened"
                    );
                    state.current = updated;
                    return Ok(state.current.summary(now));
                }
                ReconcileOutcome::Paid {
                    participant,
                    payout_reference,
                } => {
                    let first = state
                        .current
                        .first_contribution_of(&participant)
                        .ok_or(ReconcileError::UnknownParticipant)?;
                    let split = burnflip_types::split_pot(
                        state.current.pot_total(),
                        self.config.payout_share_bps(),
                    );
                    let mut completed = state.current.clone();
                    completed.winner = Some(Winner {
                        participant: participant.clone(),
                        contribution_amount: first.amount,
                        payout_amount: split.payout,
                    });
                    completed.payout_reference = Some(payout_reference.clone());
                    completed.buyback_amount = split.buyback;
                    completed.status = RoundStatus::Complete;
                    info!(
                        round_id,
                        winner = %participant,
                        payout = split.payout,
                        payout_reference = %payout_reference,
                        "round reconciled as paid"
                    );

                    let record = PayoutRecord {
                        round_id,
                        participant,
                        amount: split.payout,
                        reference: payout_reference,
                        timestamp_ms: now,
                    };
                    self.payout_feed.append(record.clone()).await;
                    self.store.append_payout(record);
                    completed
                }
            }
        };

        if completed.buyback_amount > 0 {
            if let Err(err) = self.run_buyback(completed.buyback_amount, now).await {
                warn!(round_id, %err, "buyback failed during reconciliation");
            }
        }

        self.finalize_round(completed, now).await;
        Ok(self.current_summary().await)
    }
}
