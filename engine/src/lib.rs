//! Round settlement engine for burnflip.
//!
//! The engine owns the authoritative round record (current + bounded
//! history) and the replay guard of consumed payment references. All
//! mutation flows through two paths: admission (`Engine::admit`) and the
//! timer-driven settlement check (`Engine::check_round`); both serialize on
//! one `RwLock` over the shared state, and every mutation is made durable in
//! the sqlite store before it is acknowledged.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use burnflip_types::{BurnRecord, PayoutRecord, Round, RoundStatus, RoundSummary};
use tokio::sync::RwLock;
use tracing::warn;

mod admission;
pub mod api;
mod buyback;
mod config;
mod feeds;
mod ledger;
mod reconcile;
mod settlement;
mod store;
mod venue;

#[cfg(test)]
mod tests;

pub use config::EngineConfig;
pub use ledger::{HttpLedgerClient, LedgerClient, ResolvedPayment, TransferRecord};
pub use reconcile::{ReconcileError, ReconcileOutcome};
pub use store::{LoadedState, Store, StoreCaps};
pub use venue::{HttpSwapVenue, Quote, SwapReceipt, SwapVenue};

use feeds::Feed;

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Bounded set of consumed payment references, oldest-first eviction.
/// The durable copy lives in the store; this mirror makes duplicate checks
/// cheap and survives only as long as the process.
pub struct ReplayGuard {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl ReplayGuard {
    /// `references` must be oldest first, as loaded from the store.
    pub fn new(cap: usize, references: Vec<String>) -> Self {
        let mut guard = Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap: cap.max(1),
        };
        for reference in references {
            guard.insert(reference);
        }
        guard
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.seen.contains(reference)
    }

    pub fn insert(&mut self, reference: String) {
        if !self.seen.insert(reference.clone()) {
            return;
        }
        self.order.push_back(reference);
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub(crate) struct EngineState {
    pub current: Round,
    /// Completed rounds, newest first, truncated to the history cap.
    pub history: VecDeque<Round>,
    pub replay_guard: ReplayGuard,
}

pub struct Engine<L, V> {
    pub config: EngineConfig,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) store: Store,
    pub(crate) ledger: L,
    pub(crate) venue: V,
    /// Busy flag for in-flight settlement. Distinguishes a live settlement
    /// (flag set) from a round left in `Settling` by a crash or a failed
    /// payout (flag clear), which must wait for operator reconciliation.
    pub(crate) settling: AtomicBool,
    pub(crate) burn_feed: Feed<BurnRecord>,
    pub(crate) payout_feed: Feed<PayoutRecord>,
}

impl<L: LedgerClient, V: SwapVenue> Engine<L, V> {
    pub fn new(
        config: EngineConfig,
        store: Store,
        loaded: LoadedState,
        ledger: L,
        venue: V,
    ) -> Self {
        let now = now_ms();
        let current = match loaded.current {
            Some(round) => {
                if round.status == RoundStatus::Settling {
                    warn!(
                        round_id = round.id,
                        "recovered a round mid-settlement; payout outcome unknown, \
                         awaiting reconciliation"
                    );
                }
                round
            }
            None => Round::new(1, now, config.round_interval_ms()),
        };
        let state = EngineState {
            current,
            history: loaded.history,
            replay_guard: ReplayGuard::new(config.replay_guard_cap(), loaded.references),
        };
        let burn_feed = Feed::new(config.feed_cap(), loaded.burns);
        let payout_feed = Feed::new(config.feed_cap(), loaded.payouts);
        Self {
            config,
            state: RwLock::new(state),
            store,
            ledger,
            venue,
            settling: AtomicBool::new(false),
            burn_feed,
            payout_feed,
        }
    }

    /// Summary of the open/settling round. Never errors; a fresh engine
    /// returns a zero-valued summary for the newly created round.
    pub async fn current_summary(&self) -> RoundSummary {
        let state = self.state.read().await;
        state.current.summary(now_ms())
    }

    /// The most recently completed rounds, newest first. `limit` is clamped
    /// to the history cap.
    pub async fn history(&self, limit: usize) -> Vec<RoundSummary> {
        let now = now_ms();
        let state = self.state.read().await;
        state
            .history
            .iter()
            .take(limit.min(self.config.history_cap()))
            .map(|round| round.summary(now))
            .collect()
    }

    pub async fn recent_burns(&self, limit: usize) -> Vec<BurnRecord> {
        self.burn_feed.recent(limit).await
    }

    pub async fn recent_payouts(&self, limit: usize) -> Vec<PayoutRecord> {
        self.payout_feed.recent(limit).await
    }
}

/// Spawns the periodic settlement check. The tick interval is independent of
/// request traffic; overlapping settlement of one round is prevented by the
/// engine's busy flag, not by tick spacing.
pub fn spawn_settlement_task<L: LedgerClient, V: SwapVenue>(
    engine: Arc<Engine<L, V>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(engine.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            engine.check_round(now_ms()).await;
        }
    })
}
