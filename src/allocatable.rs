use std::fmt;

/// The unit being bid and budgeted
///
/// Either one media source attached to an ad group, all RTB sources bid as a
/// single aggregate, or a whole ad group attached to a campaign, depending on
/// which autopilot variant runs. Ordered so allocation maps iterate stably.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Allocatable {
    Source { id: u64 },
    GroupedRtb { member_ids: Vec<u64> },
    AdGroup { id: u64 },
}

impl Allocatable {
    pub fn is_grouped(&self) -> bool {
        matches!(self, Allocatable::GroupedRtb { .. })
    }
}

impl fmt::Display for Allocatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allocatable::Source { id } => write!(f, "source {}", id),
            Allocatable::GroupedRtb { member_ids } => {
                write!(f, "rtb group ({} sources)", member_ids.len())
            }
            Allocatable::AdGroup { id } => write!(f, "ad group {}", id),
        }
    }
}

/// An externally configured per-account/ad-group/source bid override
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BidConstraintRule {
    /// Which source the rule applies to; None applies to every source
    pub source_id: Option<u64>,
    pub min_bid: Option<f64>,
    pub max_bid: Option<f64>,
}

impl BidConstraintRule {
    /// Whether this rule applies to the given source
    pub fn applies_to(&self, source_id: u64) -> bool {
        self.source_id.map_or(true, |id| id == source_id)
    }
}

/// The per-allocatable working data both the bid calculator and the budget
/// allocator consume, assembled fresh on every run from external stats
#[derive(Debug, Clone)]
pub struct AllocatableData {
    pub current_bid: f64,
    pub current_budget: f64,
    pub yesterdays_spend: f64,
    /// Yesterday's spend relative to the budget floor, precomputed once
    pub spend_perc: f64,
    /// Raw goal metric over the lookback window, if any rows existed
    pub goal_performance: Option<f64>,
    /// Media source type effective bid bounds (fee/margin already applied)
    pub source_min_bid: f64,
    pub source_max_bid: f64,
    /// Media source type budget bounds
    pub source_min_budget: f64,
    pub source_max_budget: Option<f64>,
    /// Decimal precision the source accepts for bids
    pub source_decimal_places: u32,
    /// Set when the source recorded no spend at all yesterday
    pub no_spend: bool,
}

impl AllocatableData {
    /// A neutral row for tests and for allocatables with no history
    pub fn empty() -> Self {
        Self {
            current_bid: 0.0,
            current_budget: 0.0,
            yesterdays_spend: 0.0,
            spend_perc: 0.0,
            goal_performance: None,
            source_min_bid: 0.01,
            source_max_bid: f64::MAX,
            source_min_budget: 0.0,
            source_max_budget: None,
            source_decimal_places: 4,
            no_spend: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_stable() {
        let mut keys = vec![
            Allocatable::Source { id: 7 },
            Allocatable::Source { id: 2 },
            Allocatable::GroupedRtb {
                member_ids: vec![1, 2],
            },
        ];
        keys.sort();
        let sorted = keys.clone();
        keys.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_constraint_rule_scope() {
        let rule = BidConstraintRule {
            source_id: Some(3),
            min_bid: Some(0.2),
            max_bid: None,
        };
        assert!(rule.applies_to(3));
        assert!(!rule.applies_to(4));

        let global = BidConstraintRule {
            source_id: None,
            min_bid: None,
            max_bid: Some(1.0),
        };
        assert!(global.applies_to(3));
    }
}
