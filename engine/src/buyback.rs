//! Buyback-and-burn: converts the retained share of a settled pot into the
//! burn token and records the burn.

use burnflip_types::{BurnRecord, BuybackError};
use tracing::debug;

use crate::{Engine, LedgerClient, SwapVenue};

impl<L: LedgerClient, V: SwapVenue> Engine<L, V> {
    /// Converts up to `amount` lamports into the burn token and delivers the
    /// output to the burn account. Returns the burn record, or `None` when
    /// the clamped amount is zero.
    ///
    /// Failures here never touch round state; the caller logs and moves on,
    /// leaving the unconverted balance for a later cycle.
    pub(crate) async fn run_buyback(
        &self,
        amount: u64,
        now: u64,
    ) -> Result<Option<BurnRecord>, BuybackError> {
        let amount = match self.config.max_buyback_per_cycle {
            Some(cap) => amount.min(cap),
            None => amount,
        };
        if amount == 0 {
            return Ok(None);
        }

        let destination = self
            .venue
            .ensure_burn_account(&self.config.burn_token)
            .await?;
        let quote = self
            .venue
            .quote(amount, &self.config.burn_token, self.config.slippage_bps())
            .await?;
        debug!(
            quote_id = %quote.quote_id,
            amount_in = quote.amount_in,
            expected_out = quote.expected_out,
            "buyback quoted"
        );
        let receipt = self.venue.execute_swap(&quote, &destination).await?;

        let record = BurnRecord {
            reference: receipt.reference,
            timestamp_ms: now,
            amount,
            output_amount: receipt.output_amount,
        };
        self.burn_feed.append(record.clone()).await;
        self.store.append_burn(record.clone());
        Ok(Some(record))
    }
}
