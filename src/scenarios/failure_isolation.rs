/// This scenario runs the full orchestrator over three ad groups with a
/// settings store that rejects the second one's transaction, and validates
/// the per-entity isolation boundary: the failure is alerted, the other two
/// ad groups are persisted and audited, and the run completes normally.
use crate::allocatable::Allocatable;
use crate::config::{AutopilotConfig, BiddingMode};
use crate::errln;
use crate::logger::{LogEvent, Logger};
use crate::logln;
use crate::orchestrator::{
    Autopilot, AutopilotMode, Entity, EntityState, MemoryAlerts, MemoryAudit, MemoryStore,
    RunMode, RunOptions,
};
use crate::prefetch::{SourceSettings, StaticSettings, StaticStats, StatsRow};

// Register this scenario in the catalog
inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "failure_isolation",
    run,
});

fn source(id: u64) -> Allocatable {
    Allocatable::Source { id }
}

fn build_world(source_ids: &[u64]) -> (StaticStats, StaticSettings) {
    let mut stats = StaticStats {
        materialized: true,
        ..StaticStats::default()
    };
    let mut settings = StaticSettings::default();
    for &id in source_ids {
        stats.yesterday.insert(
            source(id),
            StatsRow {
                spend: 18.0,
                clicks: 90,
                goal_metric: None,
            },
        );
        stats.lookback.insert(source(id), StatsRow::default());
        settings.rows.insert(
            source(id),
            SourceSettings {
                current_bid: 0.5,
                current_budget: 20.0,
                min_bid: 0.05,
                max_bid: 5.0,
                min_budget: 2.0,
                max_budget: None,
                decimal_places: 3,
                fee: 0.0,
                margin: 0.0,
            },
        );
    }
    (stats, settings)
}

fn ad_group(id: u64, source_id: u64) -> Entity {
    Entity {
        id,
        name: format!("ad group {}", id),
        state: EntityState::Active,
        autopilot: AutopilotMode::BidAndBudget,
        campaign_stopped: false,
        mode: BiddingMode::Cpc,
        total_daily_budget: 20.0,
        ad_group_max_bid: None,
        goal: None,
        allocatables: vec![source(source_id)],
        rules: vec![],
    }
}

pub fn run(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    logln!(
        logger,
        LogEvent::Scenario,
        "=== Scenario: Per-Entity Failure Isolation ==="
    );

    let (stats, settings) = build_world(&[1, 2, 3]);
    let entities = [ad_group(10, 1), ad_group(11, 2), ad_group(12, 3)];

    let mut store = MemoryStore {
        fail_entities: vec![11],
        ..MemoryStore::default()
    };
    let mut audit = MemoryAudit::default();
    let mut alerts = MemoryAlerts::default();

    let summary = {
        let mut autopilot = Autopilot {
            stats: &stats,
            settings: &settings,
            store: &mut store,
            audit: &mut audit,
            alerts: &mut alerts,
            cfg: AutopilotConfig::default(),
        };
        autopilot.run(&entities, RunMode::Scheduled, RunOptions::default(), logger)?
    };

    for record in &audit.records {
        logln!(
            logger,
            LogEvent::Entity,
            "audit ({:?}): entity {} {} bid {} -> {}, budget {:?} -> {:?}, goal {:?}, comments: {}",
            record.run_mode,
            record.entity_id,
            record.allocatable,
            record.old_bid,
            record.new_bid,
            record.old_budget,
            record.new_budget,
            record.goal,
            record.comments
        );
    }

    // Validate expected behavior
    logln!(logger, LogEvent::Scenario, "");
    logln!(logger, LogEvent::Scenario, "=== Validation Results ===");

    let mut errors: Vec<String> = Vec::new();

    let msg = format!(
        "Run continued past the failure: {} processed, {} failed",
        summary.processed, summary.failed
    );
    if summary.processed == 2 && summary.failed == 1 {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    let msg = "Healthy ad groups were persisted, the failing one was not".to_string();
    if store.persisted.contains_key(&10)
        && store.persisted.contains_key(&12)
        && !store.persisted.contains_key(&11)
    {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    let msg = "The failure was reported to the alert sink exactly once".to_string();
    if alerts.failures.len() == 1 && alerts.failures[0].0 == 11 {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    let msg = format!(
        "Audit rows exist only for persisted ad groups: {} rows",
        audit.records.len()
    );
    if audit.records.len() == 2
        && audit.records.iter().all(|record| record.entity_id != 11)
    {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Scenario '{}' validation failed:\n{}",
            scenario_name,
            errors.join("\n")
        )
        .into())
    }
}
