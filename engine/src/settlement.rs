//! The round state machine: timer-driven settlement checks, quorum gating,
//! winner draw, payout, and archival.

use burnflip_types::{select_winner, split_pot, PayoutRecord, Round, RoundStatus, Winner};
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

use crate::{EngineState, Engine, LedgerClient, SwapVenue};

impl<L: LedgerClient, V: SwapVenue> Engine<L, V> {
    /// One settlement poll. Called by the timer task; also callable directly
    /// with an explicit clock for tests.
    pub async fn check_round(&self, now: u64) {
        {
            let state = self.state.read().await;
            match state.current.status {
                RoundStatus::Open => {
                    if now < state.current.closes_at_ms {
                        return;
                    }
                }
                RoundStatus::Settling => {
                    // Flag set: a settlement is in flight in this process.
                    // Flag clear: the round was recovered mid-settlement (or
                    // a payout submission failed); only reconciliation may
                    // move it.
                    if !self.settling.load(Ordering::SeqCst) {
                        warn!(
                            round_id = state.current.id,
                            "round stuck in settling; awaiting reconciliation"
                        );
                    }
                    return;
                }
                RoundStatus::Complete => {
                    // A previous archive write failed; retry it.
                    let completed = state.current.clone();
                    drop(state);
                    self.finalize_round(completed, now).await;
                    return;
                }
            }
        }

        // Timer polls are not mutually exclusive with an in-flight
        // settlement of the same round; the busy flag is.
        if self
            .settling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let snapshot = {
            let mut state = self.state.write().await;
            if state.current.status != RoundStatus::Open || now < state.current.closes_at_ms {
                self.settling.store(false, Ordering::SeqCst);
                return;
            }
            if state.current.participant_count() < self.config.min_participants() {
                self.defer_locked(
                    &mut state,
                    now,
                    self.config.round_interval_ms(),
                    "quorum not met",
                )
                .await;
                self.settling.store(false, Ordering::SeqCst);
                return;
            }

            // Freeze the round: from here no admission may append.
            let mut updated = state.current.clone();
            updated.status = RoundStatus::Settling;
            if let Err(err) = self.store.save_round(&updated).await {
                error!(round_id = updated.id, %err, "failed to persist settling status");
                self.settling.store(false, Ordering::SeqCst);
                return;
            }
            state.current = updated.clone();
            updated
        };

        self.settle_round(snapshot, now).await;
        self.settling.store(false, Ordering::SeqCst);
    }

    async fn settle_round(&self, round: Round, now: u64) {
        let outcome = {
            let mut rng = rand::thread_rng();
            select_winner(
                &round.contributions,
                self.config.concentration_cap_bps(),
                &mut rng,
            )
        };
        let Some(outcome) = outcome else {
            info!(round_id = round.id, "no positive contribution; deferring round");
            self.reopen_current(now, self.config.round_interval_ms())
                .await;
            return;
        };

        let pot = round.pot_total();
        let split = split_pot(pot, self.config.payout_share_bps());

        // The payout must leave the minimum reserve and a fee buffer behind.
        let required = split.payout as u128
            + self.config.min_reserve_lamports() as u128
            + self.config.fee_buffer_lamports() as u128;
        match self.ledger.balance(&self.config.receiving_address).await {
            Ok(balance) if (balance as u128) >= required => {}
            Ok(balance) => {
                info!(
                    round_id = round.id,
                    balance,
                    payout = split.payout,
                    "reserve shortfall; deferring round"
                );
                self.reopen_current(now, self.config.retry_interval_ms())
                    .await;
                return;
            }
            Err(err) => {
                warn!(round_id = round.id, %err, "balance check failed; deferring round");
                self.reopen_current(now, self.config.retry_interval_ms())
                    .await;
                return;
            }
        }

        let payout_reference = match self
            .ledger
            .submit_payout(&outcome.participant, split.payout)
            .await
        {
            Ok(reference) => reference,
            Err(err) => {
                // The transfer may or may not have been broadcast. Blind
                // retry risks a double payout, so the round stays in
                // settling until an operator reconciles it against the
                // ledger.
                error!(
                    round_id = round.id,
                    winner = %outcome.participant,
                    amount = split.payout,
                    %err,
                    "payout submission failed; round left in settling for reconciliation"
                );
                return;
            }
        };

        let mut completed = round;
        completed.winner = Some(Winner {
            participant: outcome.participant.clone(),
            contribution_amount: outcome.first_contribution.amount,
            payout_amount: split.payout,
        });
        completed.payout_reference = Some(payout_reference.clone());
        completed.buyback_amount = split.buyback;
        completed.status = RoundStatus::Complete;

        info!(
            round_id = completed.id,
            winner = %outcome.participant,
            pot,
            payout = split.payout,
            buyback = split.buyback,
            payout_reference = %payout_reference,
            "round settled"
        );

        let record = PayoutRecord {
            round_id: completed.id,
            participant: outcome.participant.clone(),
            amount: split.payout,
            reference: payout_reference,
            timestamp_ms: now,
        };
        self.payout_feed.append(record.clone()).await;
        self.store.append_payout(record);

        if split.buyback > 0 {
            match self.run_buyback(split.buyback, now).await {
                Ok(Some(burn)) => {
                    info!(
                        round_id = completed.id,
                        amount = burn.amount,
                        output_amount = burn.output_amount,
                        reference = %burn.reference,
                        "buyback executed"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    // Best-effort relative to payout: the unconverted
                    // balance is simply picked up by a later cycle.
                    warn!(round_id = completed.id, %err, "buyback failed");
                }
            }
        }

        self.finalize_round(completed, now).await;
    }

    /// Returns the current round to `Open` with a new deadline.
    pub(crate) async fn reopen_current(&self, now: u64, interval_ms: u64) {
        let mut state = self.state.write().await;
        self.defer_locked(&mut state, now, interval_ms, "settlement deferred")
            .await;
    }

    async fn defer_locked(
        &self,
        state: &mut EngineState,
        now: u64,
        interval_ms: u64,
        reason: &str,
    ) {
        let mut updated = state.current.clone();
        updated.status = RoundStatus::Open;
        updated.closes_at_ms = now.saturating_add(interval_ms);
        match self.store.save_round(&updated).await {
            Ok(()) => {
                info!(
                    round_id = updated.id,
                    closes_at_ms = updated.closes_at_ms,
                    reason,
                    "round deferred"
                );
                state.current = updated;
            }
            Err(err) => {
                // Leave state untouched; the next poll retries the deferral.
                error!(round_id = state.current.id, %err, "failed to persist deferral");
            }
        }
    }

    /// Archives a completed round and opens its successor atomically.
    pub(crate) async fn finalize_round(&self, completed: Round, now: u64) {
        let mut state = self.state.write().await;
        let next = Round::new(completed.id + 1, now, self.config.round_interval_ms());
        match self.store.archive(&completed, &next).await {
            Ok(()) => {
                state.history.push_front(completed);
                state.history.truncate(self.config.history_cap());
                info!(round_id = next.id, closes_at_ms = next.closes_at_ms, "round opened");
                state.current = next;
            }
            Err(err) => {
                // Keep the completed round current (and closed to
                // admission); the next poll retries the archive.
                error!(round_id = completed.id, %err, "failed to archive round");
                state.current = completed;
            }
        }
    }
}
