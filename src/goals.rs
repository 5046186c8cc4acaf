use crate::errors::AutopilotError;

/// KPI kinds a campaign can optimize towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KpiType {
    Cpc,
    Cpa,
    Cpv,
    TimeOnSite,
    PagesPerSession,
    BounceRate,
    NewUsersPerc,
    CostPerNonBouncedVisit,
    CostPerNewVisitor,
    CostPerPageview,
    CostPerCompletedVideoView,
    /// Exists in the product but has no autopilot weighting
    Roas,
    /// Exists in the product but has no autopilot weighting
    VideoCompletionRate,
}

/// The campaign's primary goal: a KPI kind and its target value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CampaignGoal {
    pub kpi: KpiType,
    pub value: f64,
}

/// Min/max goal-metric values observed across an entity's allocatables,
/// used to normalize unbounded KPIs into [0, 1]
#[derive(Debug, Clone, Copy, Default)]
pub struct GoalValueRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl GoalValueRange {
    /// Compute the observed range over a set of goal metric values
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut range = GoalValueRange::default();
        for v in values {
            range.min = Some(match range.min {
                Some(m) => m.min(v),
                None => v,
            });
            range.max = Some(match range.max {
                Some(m) => m.max(v),
                None => v,
            });
        }
        range
    }
}

/// Map a raw goal metric to a normalized [0, 1] success weight
///
/// Percentage KPIs map directly; unbounded higher-is-better KPIs are scaled
/// by the best observed value; cost-per-outcome KPIs are scaled by the best
/// (lowest) observed cost. KPIs without autopilot support fail fast.
pub fn normalize_goal_value(
    kpi: KpiType,
    value: f64,
    range: &GoalValueRange,
) -> Result<f64, AutopilotError> {
    let normalized = match kpi {
        KpiType::BounceRate => (100.0 - value) / 100.0,
        KpiType::NewUsersPerc => value / 100.0,
        KpiType::TimeOnSite | KpiType::PagesPerSession | KpiType::Cpa => match range.max {
            Some(max) if max > 0.0 => value / max,
            _ => 0.0,
        },
        KpiType::Cpc
        | KpiType::Cpv
        | KpiType::CostPerNonBouncedVisit
        | KpiType::CostPerNewVisitor
        | KpiType::CostPerPageview
        | KpiType::CostPerCompletedVideoView => match range.min {
            Some(min) if value > 0.0 && min.is_finite() => min / value,
            _ => 0.0,
        },
        KpiType::Roas | KpiType::VideoCompletionRate => {
            return Err(AutopilotError::UnsupportedKpi(kpi));
        }
    };
    Ok(normalized.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounce_rate_lower_is_better() {
        let range = GoalValueRange::default();
        assert_eq!(
            normalize_goal_value(KpiType::BounceRate, 25.0, &range).unwrap(),
            0.75
        );
        assert_eq!(
            normalize_goal_value(KpiType::BounceRate, 100.0, &range).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_new_users_percentage() {
        let range = GoalValueRange::default();
        assert_eq!(
            normalize_goal_value(KpiType::NewUsersPerc, 40.0, &range).unwrap(),
            0.4
        );
    }

    #[test]
    fn test_unbounded_scaled_by_max() {
        let range = GoalValueRange {
            min: Some(10.0),
            max: Some(200.0),
        };
        assert_eq!(
            normalize_goal_value(KpiType::TimeOnSite, 50.0, &range).unwrap(),
            0.25
        );
        // No positive max observed -> 0
        let empty = GoalValueRange::default();
        assert_eq!(
            normalize_goal_value(KpiType::TimeOnSite, 50.0, &empty).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_cost_per_outcome_scaled_by_min() {
        let range = GoalValueRange {
            min: Some(0.2),
            max: Some(1.5),
        };
        assert_eq!(
            normalize_goal_value(KpiType::Cpc, 0.4, &range).unwrap(),
            0.5
        );
        // Zero value -> 0 rather than a division by zero
        assert_eq!(
            normalize_goal_value(KpiType::Cpc, 0.0, &range).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_unsupported_kpi_fails_fast() {
        let range = GoalValueRange::default();
        assert!(normalize_goal_value(KpiType::Roas, 2.0, &range).is_err());
    }

    #[test]
    fn test_observed_range() {
        let range = GoalValueRange::from_values(vec![3.0, 1.0, 2.0]);
        assert_eq!(range.min, Some(1.0));
        assert_eq!(range.max, Some(3.0));
    }
}
