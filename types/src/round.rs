use serde::{Deserialize, Serialize};

/// Lifecycle of a single round.
///
/// A round moves `Open -> Settling -> Complete` exactly once. `Settling` is
/// normally transient, but a round left in `Settling` after a restart (or a
/// failed payout submission) stays there until an operator reconciles it
/// against the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Open,
    Settling,
    Complete,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Open => "open",
            RoundStatus::Settling => "settling",
            RoundStatus::Complete => "complete",
        }
    }
}

/// One admitted payment credited toward a round's pot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// External payment reference. Globally unique across the lifetime of the
    /// service; the replay guard enforces at-most-once admission.
    pub reference: String,
    pub participant: String,
    /// Amount in the ledger's smallest unit. Always positive.
    pub amount: u64,
    pub admitted_at_ms: u64,
}

/// Winner record, set exactly once when a round completes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub participant: String,
    /// The winner's first contribution amount (their original entry), not the
    /// aggregated total.
    pub contribution_amount: u64,
    pub payout_amount: u64,
}

/// One timed cycle of pooled contributions ending in a single weighted payout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: u64,
    pub start_time_ms: u64,
    /// When the round becomes eligible to settle. Pushed forward when the
    /// round defers (thin participation, reserve shortfall, empty draw).
    pub closes_at_ms: u64,
    pub status: RoundStatus,
    /// Append-only while `status == Open`; frozen the instant settlement
    /// begins. Insertion order is admission order.
    pub contributions: Vec<Contribution>,
    pub winner: Option<Winner>,
    pub payout_reference: Option<String>,
    /// Amount routed to the buyback venue; 0 until settlement.
    pub buyback_amount: u64,
}

impl Round {
    pub fn new(id: u64, now_ms: u64, interval_ms: u64) -> Self {
        Self {
            id,
            start_time_ms: now_ms,
            closes_at_ms: now_ms.saturating_add(interval_ms),
            status: RoundStatus::Open,
            contributions: Vec::new(),
            winner: None,
            payout_reference: None,
            buyback_amount: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == RoundStatus::Open
    }

    /// Total pot in the ledger's smallest unit. Saturating on the (absurd)
    /// overflow path rather than wrapping.
    pub fn pot_total(&self) -> u64 {
        let total: u128 = self.contributions.iter().map(|c| c.amount as u128).sum();
        u64::try_from(total).unwrap_or(u64::MAX)
    }

    /// Number of distinct participants, used for quorum gating.
    pub fn participant_count(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        self.contributions
            .iter()
            .filter(|c| seen.insert(c.participant.as_str()))
            .count()
    }

    /// The first contribution admitted for `participant`, if any.
    pub fn first_contribution_of(&self, participant: &str) -> Option<&Contribution> {
        self.contributions
            .iter()
            .find(|c| c.participant == participant)
    }

    pub fn summary(&self, now_ms: u64) -> crate::api::RoundSummary {
        crate::api::RoundSummary {
            id: self.id,
            status: self.status,
            pot_total: self.pot_total(),
            participant_count: self.participant_count(),
            entry_count: self.contributions.len(),
            closes_at_ms: self.closes_at_ms,
            seconds_remaining: self.closes_at_ms.saturating_sub(now_ms) / 1_000,
            winner: self.winner.clone(),
            payout_reference: self.payout_reference.clone(),
            buyback_amount: self.buyback_amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(reference: &str, participant: &str, amount: u64) -> Contribution {
        Contribution {
            reference: reference.to_string(),
            participant: participant.to_string(),
            amount,
            admitted_at_ms: 0,
        }
    }

    #[test]
    fn test_round_status_roundtrip() {
        for status in [RoundStatus::Open, RoundStatus::Settling, RoundStatus::Complete] {
            let encoded = serde_json::to_string(&status).unwrap();
            let decoded: RoundStatus = serde_json::from_str(&encoded).unwrap();
            assert_eq!(status, decoded);
            assert_eq!(encoded, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_round_json_roundtrip() {
        let mut round = Round::new(7, 1_000, 600_000);
        round.contributions.push(contribution("ref-1", "alice", 100));
        round.contributions.push(contribution("ref-2", "bob", 250));
        let encoded = serde_json::to_string(&round).unwrap();
        let decoded: Round = serde_json::from_str(&encoded).unwrap();
        assert_eq!(round, decoded);
    }

    #[test]
    fn test_pot_total_and_participant_count() {
        let mut round = Round::new(1, 0, 600_000);
        round.contributions.push(contribution("r1", "alice", 100));
        round.contributions.push(contribution("r2", "bob", 50));
        round.contributions.push(contribution("r3", "alice", 25));
        assert_eq!(round.pot_total(), 175);
        assert_eq!(round.participant_count(), 2);
        assert_eq!(round.contributions.len(), 3);
    }

    #[test]
    fn test_first_contribution_is_admission_order() {
        let mut round = Round::new(1, 0, 600_000);
        round.contributions.push(contribution("r1", "alice", 100));
        round.contributions.push(contribution("r2", "alice", 900));
        let first = round.first_contribution_of("alice").unwrap();
        assert_eq!(first.reference, "r1");
        assert_eq!(first.amount, 100);
        assert!(round.first_contribution_of("bob").is_none());
    }

    #[test]
    fn test_summary_time_remaining() {
        let round = Round::new(1, 10_000, 600_000);
        let summary = round.summary(110_000);
        assert_eq!(summary.seconds_remaining, 500);
        // Past the deadline the summary clamps to zero rather than wrapping.
        let summary = round.summary(700_000);
        assert_eq!(summary.seconds_remaining, 0);
    }
}
