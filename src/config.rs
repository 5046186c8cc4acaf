/// Bidding mode active for an ad group; exactly one is active at a time and
/// every constant table is mode-specific
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BiddingMode {
    Cpc,
    Cpm,
}

/// One row of a piecewise underspend lookup table
///
/// `underspend_upper_limit` is the more-negative bound (deeper underspend),
/// `underspend_lower_limit` the less-negative one. Bounds are inclusive on
/// both ends; tables are scanned in order and the first matching row wins.
#[derive(Debug, Clone, Copy)]
pub struct ChangeInterval {
    pub underspend_upper_limit: f64,
    pub underspend_lower_limit: f64,
    /// Relative bid change; exactly zero means spend is optimal
    pub factor: f64,
}

impl ChangeInterval {
    pub fn contains(&self, underspend_perc: f64) -> bool {
        underspend_perc >= self.underspend_upper_limit
            && underspend_perc <= self.underspend_lower_limit
    }
}

/// One row of the grouped-RTB performance factor table, keyed by a [0, 1]
/// performance ratio against the campaign-optimal goal value
#[derive(Debug, Clone, Copy)]
pub struct PerformanceInterval {
    pub ratio_lower_limit: f64,
    pub ratio_upper_limit: f64,
    /// Multiplier applied on top of the underspend adjustment
    pub factor: f64,
}

impl PerformanceInterval {
    pub fn contains(&self, ratio: f64) -> bool {
        ratio >= self.ratio_lower_limit && ratio <= self.ratio_upper_limit
    }
}

/// Per-mode bid policy: global autopilot bounds, rate-of-change limits and
/// decimal precision
#[derive(Debug, Clone)]
pub struct BidConfig {
    pub min_bid: f64,
    pub max_bid: f64,
    pub min_reducing_change: f64,
    pub max_reducing_change: f64,
    pub min_increasing_change: f64,
    pub max_increasing_change: f64,
    pub decimal_places: u32,
    /// Ordered underspend table, first match wins
    pub change_intervals: Vec<ChangeInterval>,
}

/// Budget allocator policy
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Optimistic per-allocatable ceiling: ceil(old_budget * max_budget_gain)
    pub max_budget_gain: f64,
    /// Optimistic per-allocatable floor: ceil(old_budget * max_budget_loss)
    pub max_budget_loss: f64,
    /// Hard platform floor for any allocatable's daily budget
    pub platform_min_budget: f64,
    /// yesterday_spend / min_budget must reach this for an allocatable to
    /// qualify for bandit allocation
    pub min_spend_perc_threshold: f64,
    /// Success probability is dampened by this factor at or below the
    /// low-spend threshold
    pub low_spend_prob_factor: f64,
    pub low_spend_threshold: f64,
    /// Cap on the spend component of the success probability
    pub goal_spend_weight_cap: f64,
    /// Weight of the normalized goal value in the success probability
    pub goal_importance: f64,
    /// Uniform Beta prior (alpha, beta) for the bandit
    pub bandit_prior: (f64, f64),
    /// Synthetic trials fed per qualifying allocatable before allocation
    pub bandit_training_trials: u32,
}

/// All autopilot policy constants, bundled so computations receive them
/// explicitly and tests can substitute tables freely
#[derive(Debug, Clone)]
pub struct AutopilotConfig {
    pub cpc: BidConfig,
    pub cpm: BidConfig,
    pub budget: BudgetConfig,
    /// CPC goal floor ratio: floor = goal_value * goal_bid_threshold_ratio
    pub goal_bid_threshold_ratio: f64,
    /// Grouped variant: forced minimum increase when spend is negligible
    pub no_spend_change: f64,
    /// Grouped variant: spend below this counts as negligible
    pub low_spend_daily_threshold: f64,
    /// Grouped variant performance factor table
    pub performance_intervals: Vec<PerformanceInterval>,
}

impl AutopilotConfig {
    pub fn bid(&self, mode: BiddingMode) -> &BidConfig {
        match mode {
            BiddingMode::Cpc => &self.cpc,
            BiddingMode::Cpm => &self.cpm,
        }
    }
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            cpc: BidConfig {
                min_bid: 0.1,
                max_bid: 20.0,
                min_reducing_change: 0.01,
                max_reducing_change: 0.5,
                min_increasing_change: 0.01,
                max_increasing_change: 0.5,
                decimal_places: 3,
                change_intervals: vec![
                    // Barely spending: raise gently, the source may be broken
                    ChangeInterval { underspend_upper_limit: -1.00, underspend_lower_limit: -0.80, factor: 0.10 },
                    ChangeInterval { underspend_upper_limit: -0.80, underspend_lower_limit: -0.50, factor: 0.25 },
                    // Moderately under: push hard to close the gap
                    ChangeInterval { underspend_upper_limit: -0.50, underspend_lower_limit: -0.10, factor: 0.50 },
                    ChangeInterval { underspend_upper_limit: -0.10, underspend_lower_limit: 0.10, factor: 0.0 },
                    ChangeInterval { underspend_upper_limit: 0.10, underspend_lower_limit: 0.50, factor: -0.10 },
                    ChangeInterval { underspend_upper_limit: 0.50, underspend_lower_limit: 10.0, factor: -0.30 },
                ],
            },
            cpm: BidConfig {
                min_bid: 0.5,
                max_bid: 25.0,
                min_reducing_change: 0.05,
                max_reducing_change: 3.0,
                min_increasing_change: 0.05,
                max_increasing_change: 3.0,
                decimal_places: 2,
                change_intervals: vec![
                    ChangeInterval { underspend_upper_limit: -1.00, underspend_lower_limit: -0.80, factor: 0.10 },
                    ChangeInterval { underspend_upper_limit: -0.80, underspend_lower_limit: -0.50, factor: 0.20 },
                    ChangeInterval { underspend_upper_limit: -0.50, underspend_lower_limit: -0.10, factor: 0.40 },
                    ChangeInterval { underspend_upper_limit: -0.10, underspend_lower_limit: 0.10, factor: 0.0 },
                    ChangeInterval { underspend_upper_limit: 0.10, underspend_lower_limit: 0.50, factor: -0.10 },
                    ChangeInterval { underspend_upper_limit: 0.50, underspend_lower_limit: 10.0, factor: -0.25 },
                ],
            },
            budget: BudgetConfig {
                max_budget_gain: 1.2,
                max_budget_loss: 0.7,
                platform_min_budget: 5.0,
                min_spend_perc_threshold: 0.3,
                low_spend_prob_factor: 0.25,
                low_spend_threshold: 0.1,
                goal_spend_weight_cap: 0.3,
                goal_importance: 0.7,
                bandit_prior: (1.0, 1.0),
                bandit_training_trials: 5,
            },
            goal_bid_threshold_ratio: 0.8,
            no_spend_change: 0.25,
            low_spend_daily_threshold: 0.5,
            performance_intervals: vec![
                PerformanceInterval { ratio_lower_limit: 0.95, ratio_upper_limit: 1.00, factor: 1.05 },
                PerformanceInterval { ratio_lower_limit: 0.80, ratio_upper_limit: 0.95, factor: 1.00 },
                PerformanceInterval { ratio_lower_limit: 0.50, ratio_upper_limit: 0.80, factor: 0.95 },
                PerformanceInterval { ratio_lower_limit: 0.00, ratio_upper_limit: 0.50, factor: 0.85 },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every underspend value an ad group can produce must hit some interval
    #[test]
    fn test_cpc_table_is_exhaustive_over_domain() {
        let cfg = AutopilotConfig::default();
        let mut perc = -1.0;
        while perc <= 2.0 {
            assert!(
                cfg.cpc.change_intervals.iter().any(|i| i.contains(perc)),
                "no interval for underspend {}",
                perc
            );
            perc += 0.01;
        }
    }

    #[test]
    fn test_cpc_bracket_factors() {
        let cfg = AutopilotConfig::default();
        let first = cfg
            .cpc
            .change_intervals
            .iter()
            .find(|i| i.contains(-1.0))
            .unwrap();
        assert_eq!(first.factor, 0.10);
        let mid = cfg
            .cpc
            .change_intervals
            .iter()
            .find(|i| i.contains(-0.2))
            .unwrap();
        assert_eq!(mid.factor, 0.50);
        let optimal = cfg
            .cpc
            .change_intervals
            .iter()
            .find(|i| i.contains(0.0))
            .unwrap();
        assert_eq!(optimal.factor, 0.0);
    }

    #[test]
    fn test_performance_table_covers_unit_interval() {
        let cfg = AutopilotConfig::default();
        let mut ratio = 0.0;
        while ratio <= 1.0 {
            assert!(cfg.performance_intervals.iter().any(|i| i.contains(ratio)));
            ratio += 0.01;
        }
    }
}
