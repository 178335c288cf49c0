//! Idempotent admission of contributions into the open round.

use burnflip_types::{AdmissionError, Contribution, RoundSummary};
use tracing::info;

use crate::{now_ms, Engine, LedgerClient, SwapVenue};

impl<L: LedgerClient, V: SwapVenue> Engine<L, V> {
    /// Verifies the referenced payment against the ledger and credits it to
    /// the open round, at most once per reference.
    ///
    /// The ledger lookup runs outside the state lock; the duplicate and
    /// round-open checks are repeated under the write lock before anything
    /// is mutated, so two concurrent calls for one reference cannot both
    /// succeed. The in-memory mutation is committed only after the store has
    /// acknowledged the durable write.
    pub async fn admit(
        &self,
        reference: &str,
        expected_amount: u64,
    ) -> Result<RoundSummary, AdmissionError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AdmissionError::InvalidReference);
        }
        if expected_amount == 0 {
            return Err(AdmissionError::InvalidAmount);
        }

        // Cheap precheck before any network I/O.
        {
            let state = self.state.read().await;
            if state.replay_guard.contains(reference) {
                return Err(AdmissionError::DuplicateReference);
            }
            if !state.current.is_open() {
                return Err(AdmissionError::RoundClosed);
            }
        }

        let payment = match self.ledger.resolve_payment(reference).await? {
            Some(payment) => payment,
            None => return Err(AdmissionError::PaymentNotFound),
        };
        if !payment.succeeded {
            return Err(AdmissionError::PaymentFailed);
        }
        let receiving = self.config.receiving_address.as_str();
        let matched: Vec<_> = payment
            .transfers
            .iter()
            .filter(|transfer| transfer.destination == receiving)
            .collect();
        if matched.is_empty() {
            return Err(AdmissionError::NoMatchingTransfer);
        }
        let actual_total: u128 = matched.iter().map(|transfer| transfer.amount as u128).sum();
        let actual = u64::try_from(actual_total).unwrap_or(u64::MAX);
        if actual != expected_amount {
            return Err(AdmissionError::AmountMismatch {
                expected: expected_amount,
                actual,
            });
        }

        let now = now_ms();
        let mut state = self.state.write().await;
        // Re-check under the write lock: another task may have admitted this
        // reference or settlement may have frozen the round in the meantime.
        if state.replay_guard.contains(reference) {
            return Err(AdmissionError::DuplicateReference);
        }
        if !state.current.is_open() {
            return Err(AdmissionError::RoundClosed);
        }

        let mut updated = state.current.clone();
        updated.contributions.push(Contribution {
            reference: reference.to_string(),
            participant: payment.sender.clone(),
            amount: actual,
            admitted_at_ms: now,
        });

        // Durable before visible: reference registration and the round
        // update land in one store transaction.
        self.store
            .persist_admission(&updated, reference)
            .await
            .map_err(|err| AdmissionError::Persistence(err.to_string()))?;

        state.current = updated;
        state.replay_guard.insert(reference.to_string());

        info!(
            round_id = state.current.id,
            reference,
            participant = %payment.sender,
            amount = actual,
            pot = state.current.pot_total(),
            "contribution admitted"
        );
        Ok(state.current.summary(now))
    }
}
