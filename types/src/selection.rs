//! Weighted winner selection with an anti-concentration cap, and the pot
//! split arithmetic used at settlement.
//!
//! Everything here is pure: aggregation, capping, and the split are
//! deterministic given their inputs; only the single uniform draw consumes
//! the caller-supplied rng, so tests can seed it.

use rand::Rng;

use crate::round::Contribution;
use crate::BPS_DENOMINATOR;

/// Result of a winner draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionOutcome {
    pub participant: String,
    /// The winner's first admitted contribution (their original entry), kept
    /// for display of the entry signature.
    pub first_contribution: Contribution,
    /// The capped weight the winner was drawn with.
    pub effective_weight: u128,
    /// Sum of all raw contributions in the round.
    pub total_raw: u128,
}

/// Exact split of a settled pot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PotSplit {
    pub payout: u64,
    pub buyback: u64,
}

/// Splits `total` into the winner payout (floor of the configured share) and
/// the buyback remainder. `payout + buyback == total` always.
pub fn split_pot(total: u64, payout_share_bps: u64) -> PotSplit {
    let payout = (total as u128 * payout_share_bps as u128 / BPS_DENOMINATOR as u128) as u64;
    PotSplit {
        payout,
        buyback: total - payout,
    }
}

/// Draws a single winner from one round's contributions.
///
/// Contributions are aggregated per participant, each aggregate is clamped to
/// `cap_bps` of the raw total (no single participant's selection weight may
/// exceed that fraction of the pot), and a uniform draw over the clamped
/// weights picks the winner. Participants are walked in the order of their
/// first contribution, so the draw-to-winner mapping is deterministic for a
/// given random value.
///
/// Returns `None` when the round has no positive contribution.
pub fn select_winner<R: Rng + ?Sized>(
    contributions: &[Contribution],
    cap_bps: u64,
    rng: &mut R,
) -> Option<SelectionOutcome> {
    // Aggregate per participant, preserving first-contribution order.
    let mut order: Vec<&str> = Vec::new();
    let mut weights: std::collections::HashMap<&str, u128> = std::collections::HashMap::new();
    for contribution in contributions {
        match weights.entry(contribution.participant.as_str()) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(contribution.amount as u128);
                order.push(contribution.participant.as_str());
            }
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                *entry.get_mut() += contribution.amount as u128;
            }
        }
    }

    let total_raw: u128 = weights.values().sum();
    if total_raw == 0 {
        return None;
    }

    // Floor the cap at one unit so dust pots (total below the bps
    // granularity) still draw a winner instead of clamping everyone to 0.
    let cap = if cap_bps == 0 {
        0
    } else {
        (total_raw * cap_bps as u128 / BPS_DENOMINATOR as u128).max(1)
    };
    let clamped: Vec<(&str, u128)> = order
        .iter()
        .map(|participant| (*participant, weights[participant].min(cap)))
        .collect();

    let effective_total: u128 = clamped.iter().map(|(_, weight)| weight).sum();
    if effective_total == 0 {
        return None;
    }

    let mut remainder = rng.gen_range(0..effective_total);
    let mut winner = None;
    for (participant, weight) in &clamped {
        if remainder < *weight {
            winner = Some(*participant);
            break;
        }
        remainder -= weight;
    }
    // The draw is strictly below the effective total, so the walk always
    // lands; keep the last participant as a fallback anyway.
    let winner = winner.or_else(|| clamped.last().map(|(participant, _)| *participant))?;

    let first_contribution = contributions
        .iter()
        .find(|c| c.participant == winner)?
        .clone();
    let effective_weight = clamped
        .iter()
        .find(|(participant, _)| *participant == winner)
        .map(|(_, weight)| *weight)?;

    Some(SelectionOutcome {
        participant: winner.to_string(),
        first_contribution,
        effective_weight,
        total_raw,
    })
}
