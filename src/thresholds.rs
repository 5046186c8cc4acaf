use crate::allocatable::{Allocatable, AllocatableData, BidConstraintRule};
use crate::comments::BidChangeComment;
use crate::config::{AutopilotConfig, BiddingMode};
use crate::utils::{round_half_up, round_toward_zero};

/// Apply one set of externally configured constraint rules to a bid
fn apply_rules(value: f64, source_id: Option<u64>, rules: &[BidConstraintRule]) -> f64 {
    let mut constrained = value;
    for rule in rules {
        let applies = match source_id {
            Some(id) => rule.applies_to(id),
            // No concrete source: only account-wide rules apply
            None => rule.source_id.is_none(),
        };
        if !applies {
            continue;
        }
        if let Some(min) = rule.min_bid {
            if constrained < min {
                constrained = min;
            }
        }
        if let Some(max) = rule.max_bid {
            if constrained > max {
                constrained = max;
            }
        }
    }
    constrained
}

/// Run the ordered threshold stages over a proposed bid
///
/// Stages: precision rounding, ad-group ceiling, cross-source constraint
/// rules, source-type floor/ceiling, then the comment-gated rollback. Each
/// stage is pure; comments accumulate and the final gate reverts to the old
/// bid when any comment is outside the apply allow-list.
///
/// # Arguments
/// * `allocatable` - The unit being adjusted (grouped bids aggregate member constraints)
/// * `proposed` - The bid produced by the calculator
/// * `old_bid` - The live bid, used as the rollback target
/// * `comments` - Comments emitted by the calculator; threshold comments are appended
pub fn apply_thresholds(
    allocatable: &Allocatable,
    proposed: f64,
    old_bid: f64,
    data: &AllocatableData,
    ad_group_max_bid: Option<f64>,
    rules: &[BidConstraintRule],
    mode: BiddingMode,
    cfg: &AutopilotConfig,
    mut comments: Vec<BidChangeComment>,
) -> (f64, Vec<BidChangeComment>) {
    let bid_cfg = cfg.bid(mode);
    let decimal_places = data.source_decimal_places.min(bid_cfg.decimal_places);

    // Stage 1: quantize to the source's accepted precision
    let mut value = round_half_up(proposed, decimal_places);

    // Stage 2: ad-group ceiling, rounding toward zero so the clamp never
    // rounds back above the ceiling
    if let Some(max) = ad_group_max_bid {
        if value > max {
            value = round_toward_zero(max, decimal_places);
            comments.push(BidChangeComment::OverAdGroupMaxBid);
        }
    }

    // Stage 3: externally configured bid constraint rules
    let constrained = match allocatable {
        Allocatable::Source { id } => apply_rules(value, Some(*id), rules),
        Allocatable::AdGroup { .. } => apply_rules(value, None, rules),
        Allocatable::GroupedRtb { member_ids } => {
            // Constrain for every member and keep the group consistent with
            // its tightest member: min across members when the bid went down,
            // max when it went up
            let candidates: Vec<f64> = member_ids
                .iter()
                .map(|id| apply_rules(value, Some(*id), rules))
                .collect();
            if candidates.is_empty() {
                value
            } else if value < old_bid {
                candidates.iter().cloned().fold(f64::INFINITY, f64::min)
            } else {
                candidates.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            }
        }
    };
    if constrained != value {
        value = constrained;
        comments.push(BidChangeComment::BidConstraintApplied);
    }

    // Stage 4: media source type floor/ceiling
    if value < data.source_min_bid {
        value = data.source_min_bid;
        comments.push(BidChangeComment::UnderSourceMinBid);
    } else if value > data.source_max_bid {
        value = data.source_max_bid;
        comments.push(BidChangeComment::OverSourceMaxBid);
    }

    // Stage 5: comment-gated rollback; a disallowed comment means the
    // computed bid is unsafe to push live
    let disallowed: Vec<BidChangeComment> = comments
        .iter()
        .filter(|c| !c.is_allowed_to_apply())
        .cloned()
        .collect();
    if !disallowed.is_empty() {
        return (old_bid, disallowed);
    }

    (value, comments)
}
