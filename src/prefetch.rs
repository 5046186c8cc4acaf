use crate::allocatable::{Allocatable, AllocatableData};
use crate::config::AutopilotConfig;
use crate::errors::AutopilotError;
use crate::goals::{CampaignGoal, GoalValueRange, KpiType};
use std::collections::BTreeMap;

/// One aggregated analytics row for an allocatable over a period
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsRow {
    pub spend: f64,
    pub clicks: u64,
    /// The goal-relevant metric for the campaign's KPI, when any rows existed
    pub goal_metric: Option<f64>,
}

/// Aggregation window requested from the analytics store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Yesterday,
    Lookback,
    /// Longer window matching the conversion attribution lag
    ConversionLookback,
}

/// Read side of the external analytics store
///
/// Fetches are batched over all allocatables of a run at once; callers must
/// never loop allocatables around a fetch.
pub trait StatsSource {
    fn fetch_period_stats(
        &self,
        allocatables: &[Allocatable],
        period: StatsPeriod,
        kpi: Option<KpiType>,
    ) -> BTreeMap<Allocatable, StatsRow>;

    /// Whether the analytics rows for the run date exist at all; a run must
    /// not start against an empty store
    fn materialized(&self) -> bool;
}

/// Per-allocatable settings and raw constraint values as stored externally
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub current_bid: f64,
    pub current_budget: f64,
    /// Source-type bid bounds before fee/margin modifiers
    pub min_bid: f64,
    pub max_bid: f64,
    pub min_budget: f64,
    pub max_budget: Option<f64>,
    pub decimal_places: u32,
    /// Platform fee fraction taken off the top of spend
    pub fee: f64,
    /// Agency margin fraction
    pub margin: f64,
}

impl SourceSettings {
    /// Multiplier converting source-facing bid bounds to the client-facing
    /// values autopilot works with
    pub fn fee_margin_factor(&self) -> f64 {
        1.0 / ((1.0 - self.fee) * (1.0 - self.margin))
    }
}

/// Read side of the external settings/constraints store
pub trait SettingsSource {
    fn settings(&self, allocatable: &Allocatable) -> Option<SourceSettings>;
}

/// Assemble the per-allocatable working data both calculators consume
///
/// Performs exactly two batched stats fetches (yesterday plus one history
/// window) regardless of how many allocatables the entity has. CPA goals
/// read the conversion attribution window; every other KPI reads the plain
/// lookback.
///
/// # Returns
/// The data map and the observed goal-metric range used for normalization
pub fn assemble_data(
    allocatables: &[Allocatable],
    stats: &dyn StatsSource,
    settings: &dyn SettingsSource,
    goal: Option<&CampaignGoal>,
    cfg: &AutopilotConfig,
) -> Result<(BTreeMap<Allocatable, AllocatableData>, GoalValueRange), AutopilotError> {
    if !stats.materialized() {
        return Err(AutopilotError::MissingRunData(
            "daily statistics not materialized yet".to_string(),
        ));
    }

    let kpi = goal.map(|g| g.kpi);
    let yesterday = stats.fetch_period_stats(allocatables, StatsPeriod::Yesterday, kpi);
    let history_period = match kpi {
        Some(KpiType::Cpa) => StatsPeriod::ConversionLookback,
        _ => StatsPeriod::Lookback,
    };
    let history = stats.fetch_period_stats(allocatables, history_period, kpi);

    let mut data_map = BTreeMap::new();
    for allocatable in allocatables {
        let source_settings = settings.settings(allocatable).ok_or_else(|| {
            AutopilotError::MissingRunData(format!("no settings for {}", allocatable))
        })?;
        let yesterday_row = yesterday.get(allocatable).copied().unwrap_or_default();
        let history_row = history.get(allocatable).copied().unwrap_or_default();

        let factor = source_settings.fee_margin_factor();
        let spend_perc = yesterday_row.spend
            / source_settings
                .current_budget
                .max(cfg.budget.platform_min_budget);

        // A CPC goal can fall back to the realized cost per click when the
        // store returned no precomputed metric
        let goal_performance = history_row.goal_metric.or_else(|| {
            if kpi == Some(KpiType::Cpc) && history_row.clicks > 0 {
                Some(history_row.spend / history_row.clicks as f64)
            } else {
                None
            }
        });

        data_map.insert(
            allocatable.clone(),
            AllocatableData {
                current_bid: source_settings.current_bid,
                current_budget: source_settings.current_budget,
                yesterdays_spend: yesterday_row.spend,
                spend_perc,
                goal_performance,
                source_min_bid: source_settings.min_bid * factor,
                source_max_bid: source_settings.max_bid * factor,
                source_min_budget: source_settings.min_budget,
                source_max_budget: source_settings.max_budget,
                source_decimal_places: source_settings.decimal_places,
                no_spend: yesterday_row.spend <= 0.0,
            },
        );
    }

    let goal_range = GoalValueRange::from_values(
        data_map.values().filter_map(|data| data.goal_performance),
    );
    Ok((data_map, goal_range))
}

/// In-memory stats source for scenarios and tests
#[derive(Default)]
pub struct StaticStats {
    pub yesterday: BTreeMap<Allocatable, StatsRow>,
    pub lookback: BTreeMap<Allocatable, StatsRow>,
    pub conversion_lookback: BTreeMap<Allocatable, StatsRow>,
    pub materialized: bool,
}

impl StatsSource for StaticStats {
    fn fetch_period_stats(
        &self,
        allocatables: &[Allocatable],
        period: StatsPeriod,
        _kpi: Option<KpiType>,
    ) -> BTreeMap<Allocatable, StatsRow> {
        let table = match period {
            StatsPeriod::Yesterday => &self.yesterday,
            StatsPeriod::Lookback => &self.lookback,
            StatsPeriod::ConversionLookback => &self.conversion_lookback,
        };
        allocatables
            .iter()
            .filter_map(|a| table.get(a).map(|row| (a.clone(), *row)))
            .collect()
    }

    fn materialized(&self) -> bool {
        self.materialized
    }
}

/// In-memory settings source for scenarios and tests
#[derive(Default)]
pub struct StaticSettings {
    pub rows: BTreeMap<Allocatable, SourceSettings>,
}

impl SettingsSource for StaticSettings {
    fn settings(&self, allocatable: &Allocatable) -> Option<SourceSettings> {
        self.rows.get(allocatable).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: u64) -> Allocatable {
        Allocatable::Source { id }
    }

    fn plain_settings() -> SourceSettings {
        SourceSettings {
            current_bid: 0.5,
            current_budget: 10.0,
            min_bid: 0.05,
            max_bid: 5.0,
            min_budget: 2.0,
            max_budget: Some(500.0),
            decimal_places: 2,
            fee: 0.0,
            margin: 0.0,
        }
    }

    fn fixture() -> (StaticStats, StaticSettings, Vec<Allocatable>) {
        let mut stats = StaticStats {
            materialized: true,
            ..StaticStats::default()
        };
        stats.yesterday.insert(
            source(1),
            StatsRow {
                spend: 8.0,
                clicks: 40,
                goal_metric: None,
            },
        );
        stats.lookback.insert(
            source(1),
            StatsRow {
                spend: 50.0,
                clicks: 250,
                goal_metric: Some(0.2),
            },
        );
        stats.conversion_lookback.insert(
            source(1),
            StatsRow {
                spend: 120.0,
                clicks: 600,
                goal_metric: Some(12.0),
            },
        );
        let mut settings = StaticSettings::default();
        settings.rows.insert(source(1), plain_settings());
        (stats, settings, vec![source(1)])
    }

    #[test]
    fn test_assembles_spend_and_history() {
        let (stats, settings, allocatables) = fixture();
        let (data_map, range) = assemble_data(
            &allocatables,
            &stats,
            &settings,
            Some(&CampaignGoal {
                kpi: KpiType::Cpc,
                value: 0.3,
            }),
            &AutopilotConfig::default(),
        )
        .unwrap();
        let data = &data_map[&source(1)];
        assert_eq!(data.yesterdays_spend, 8.0);
        assert_eq!(data.spend_perc, 0.8);
        assert_eq!(data.goal_performance, Some(0.2));
        assert!(!data.no_spend);
        assert_eq!(range.min, Some(0.2));
    }

    #[test]
    fn test_cpa_goal_reads_conversion_window() {
        let (stats, settings, allocatables) = fixture();
        let (data_map, _) = assemble_data(
            &allocatables,
            &stats,
            &settings,
            Some(&CampaignGoal {
                kpi: KpiType::Cpa,
                value: 10.0,
            }),
            &AutopilotConfig::default(),
        )
        .unwrap();
        assert_eq!(data_map[&source(1)].goal_performance, Some(12.0));
    }

    #[test]
    fn test_cpc_metric_derived_from_spend_and_clicks() {
        let (mut stats, settings, allocatables) = fixture();
        stats.lookback.get_mut(&source(1)).unwrap().goal_metric = None;
        let (data_map, _) = assemble_data(
            &allocatables,
            &stats,
            &settings,
            Some(&CampaignGoal {
                kpi: KpiType::Cpc,
                value: 0.3,
            }),
            &AutopilotConfig::default(),
        )
        .unwrap();
        // 50.0 spend over 250 clicks
        assert_eq!(data_map[&source(1)].goal_performance, Some(0.2));
    }

    #[test]
    fn test_fee_and_margin_raise_bid_bounds() {
        let (stats, mut settings, allocatables) = fixture();
        let row = settings.rows.get_mut(&source(1)).unwrap();
        row.fee = 0.2;
        row.margin = 0.5;
        let (data_map, _) = assemble_data(
            &allocatables,
            &stats,
            &settings,
            None,
            &AutopilotConfig::default(),
        )
        .unwrap();
        let data = &data_map[&source(1)];
        // 1 / ((1 - 0.2) * (1 - 0.5)) = 2.5
        assert_eq!(data.source_min_bid, 0.05 * 2.5);
        assert_eq!(data.source_max_bid, 5.0 * 2.5);
    }

    #[test]
    fn test_unmaterialized_store_aborts() {
        let (mut stats, settings, allocatables) = fixture();
        stats.materialized = false;
        let result = assemble_data(
            &allocatables,
            &stats,
            &settings,
            None,
            &AutopilotConfig::default(),
        );
        assert!(matches!(result, Err(AutopilotError::MissingRunData(_))));
    }

    #[test]
    fn test_allocatable_without_history_gets_neutral_row() {
        let (mut stats, mut settings, mut allocatables) = fixture();
        allocatables.push(source(2));
        settings.rows.insert(source(2), plain_settings());
        stats
            .yesterday
            .insert(source(2), StatsRow::default());
        let (data_map, _) = assemble_data(
            &allocatables,
            &stats,
            &settings,
            None,
            &AutopilotConfig::default(),
        )
        .unwrap();
        let data = &data_map[&source(2)];
        assert_eq!(data.yesterdays_spend, 0.0);
        assert!(data.no_spend);
        assert_eq!(data.goal_performance, None);
    }
}
