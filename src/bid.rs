use crate::allocatable::AllocatableData;
use crate::comments::BidChangeComment;
use crate::config::{AutopilotConfig, BidConfig, BiddingMode};
use crate::goals::{CampaignGoal, KpiType};
use crate::utils::round_half_up;

/// A computed bid change with the comment trail explaining it
#[derive(Debug, Clone, PartialEq)]
pub struct BidChange {
    pub old_bid: f64,
    pub new_bid: f64,
    pub comments: Vec<BidChangeComment>,
}

/// Validate the current bid and budget before any adjustment
///
/// Returns the clamped bid and the comments that fired; if any comment fired
/// the caller returns immediately with the clamped value and no further
/// adjustment is attempted.
fn precheck(data: &AllocatableData, bid_cfg: &BidConfig) -> (f64, Vec<BidChangeComment>) {
    let mut comments = Vec::new();
    let mut bid = data.current_bid;

    if data.current_budget <= 0.0 {
        comments.push(BidChangeComment::BudgetNotSet);
    }
    if bid <= 0.0 {
        comments.push(BidChangeComment::BidNotSet);
    }
    if bid > bid_cfg.max_bid {
        bid = bid_cfg.max_bid;
        comments.push(BidChangeComment::CurrentBidTooHigh);
    }
    if bid < bid_cfg.min_bid {
        bid = bid_cfg.min_bid;
        comments.push(BidChangeComment::CurrentBidTooLow);
    }

    (bid, comments)
}

/// Look up the underspend adjustment factor; the first matching interval
/// wins, no match means no adjustment
fn underspend_factor(underspend_perc: f64, bid_cfg: &BidConfig) -> f64 {
    bid_cfg
        .change_intervals
        .iter()
        .find(|interval| interval.contains(underspend_perc))
        .map(|interval| interval.factor)
        .unwrap_or(0.0)
}

/// Bound a proposed bid change between the configured minimum and maximum
/// step for its direction
///
/// Every non-degenerate change moves by at least the minimum step (no
/// negligible churn) and at most the maximum step (no runaway jumps).
pub fn clamp_change(reducing: bool, current: f64, new: f64, bid_cfg: &BidConfig) -> f64 {
    let delta = (current - new).abs();
    if reducing {
        if delta < bid_cfg.min_reducing_change {
            current - bid_cfg.min_reducing_change
        } else if delta > bid_cfg.max_reducing_change {
            current - bid_cfg.max_reducing_change
        } else {
            new
        }
    } else if delta < bid_cfg.min_increasing_change {
        current + bid_cfg.min_increasing_change
    } else if delta > bid_cfg.max_increasing_change {
        current + bid_cfg.max_increasing_change
    } else {
        new
    }
}

/// Clamp to the mode's global autopilot bounds
fn clamp_to_autopilot_bounds(
    new_bid: f64,
    bid_cfg: &BidConfig,
    comments: &mut Vec<BidChangeComment>,
) -> f64 {
    if new_bid < bid_cfg.min_bid {
        comments.push(BidChangeComment::UnderAutopilotMinBid);
        return bid_cfg.min_bid;
    }
    if new_bid > bid_cfg.max_bid {
        comments.push(BidChangeComment::OverAutopilotMaxBid);
        return bid_cfg.max_bid;
    }
    new_bid
}

/// Compute a new bid for an individual allocatable from yesterday's spend
/// against its daily budget
///
/// # Arguments
/// * `data` - The allocatable's working data (bid, budget, spend)
/// * `goal` - The campaign's primary goal, if set
/// * `mode` - Active bidding mode of the ad group
/// * `cfg` - Autopilot policy constants
pub fn compute_new_bid(
    data: &AllocatableData,
    goal: Option<&CampaignGoal>,
    mode: BiddingMode,
    cfg: &AutopilotConfig,
) -> BidChange {
    let bid_cfg = cfg.bid(mode);
    let (clamped_bid, comments) = precheck(data, bid_cfg);
    if !comments.is_empty() {
        return BidChange {
            old_bid: data.current_bid,
            new_bid: clamped_bid,
            comments,
        };
    }

    let current = data.current_bid;
    let underspend_perc = data.yesterdays_spend / data.current_budget - 1.0;
    let factor = underspend_factor(underspend_perc, bid_cfg);
    if factor == 0.0 {
        return BidChange {
            old_bid: current,
            new_bid: current,
            comments: vec![BidChangeComment::OptimalSpend],
        };
    }

    let mut comments = Vec::new();
    let proposed = current + current * factor;
    let mut new_bid = clamp_change(factor < 0.0, current, proposed, bid_cfg);
    new_bid = round_half_up(new_bid, bid_cfg.decimal_places);
    new_bid = clamp_to_autopilot_bounds(new_bid, bid_cfg, &mut comments);

    // A CPC goal floors the bid so autopilot cannot starve a converting source
    if mode == BiddingMode::Cpc {
        if let Some(goal) = goal {
            if goal.kpi == KpiType::Cpc {
                let floor = goal.value * cfg.goal_bid_threshold_ratio;
                if new_bid < floor {
                    new_bid = floor;
                    comments.push(BidChangeComment::UnderGoalBid);
                }
            }
        }
    }

    BidChange {
        old_bid: current,
        new_bid,
        comments,
    }
}

/// Compute a new bid for the grouped RTB-as-one allocatable
///
/// Same pre-check and underspend factor as the individual variant, but a
/// second piecewise table keyed by the [0, 1] performance ratio multiplies
/// the result, and negligible spend forces a minimum increase. The CPC goal
/// floor is not applied to the grouped variant.
pub fn compute_new_bid_grouped(
    data: &AllocatableData,
    performance_ratio: Option<f64>,
    mode: BiddingMode,
    cfg: &AutopilotConfig,
) -> BidChange {
    let bid_cfg = cfg.bid(mode);
    let (clamped_bid, comments) = precheck(data, bid_cfg);
    if !comments.is_empty() {
        return BidChange {
            old_bid: data.current_bid,
            new_bid: clamped_bid,
            comments,
        };
    }

    let current = data.current_bid;
    let underspend_perc = data.yesterdays_spend / data.current_budget - 1.0;
    let mut factor = underspend_factor(underspend_perc, bid_cfg);

    // With no spend or negligible spend the underspend signal is
    // meaningless; force the configured probe increase instead
    if (data.no_spend || data.yesterdays_spend < cfg.low_spend_daily_threshold)
        && factor < cfg.no_spend_change
    {
        factor = cfg.no_spend_change;
    }

    let performance_factor = performance_ratio
        .and_then(|ratio| {
            cfg.performance_intervals
                .iter()
                .find(|interval| interval.contains(ratio))
                .map(|interval| interval.factor)
        })
        .unwrap_or(1.0);

    let proposed = (current + current * factor) * performance_factor;
    if (proposed - current).abs() < f64::EPSILON {
        return BidChange {
            old_bid: current,
            new_bid: current,
            comments: vec![BidChangeComment::OptimalSpend],
        };
    }

    let mut comments = Vec::new();
    let mut new_bid = clamp_change(proposed < current, current, proposed, bid_cfg);
    new_bid = round_half_up(new_bid, bid_cfg.decimal_places);
    new_bid = clamp_to_autopilot_bounds(new_bid, bid_cfg, &mut comments);

    BidChange {
        old_bid: current,
        new_bid,
        comments,
    }
}
