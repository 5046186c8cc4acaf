/// This scenario exercises the budget allocator's two degraded paths:
///
/// - A total daily budget that exactly covers the hard floors with no source
///   qualifying for the bandit: every budget lands on its floor and the
///   NO_ACTIVE_SOURCES_WITH_SPEND comment is attached.
/// - A total below the floor sum: the allocator warns and keeps the floors
///   rather than rolling back, a deliberate best-effort policy.
use crate::allocatable::{Allocatable, AllocatableData};
use crate::budgets::allocate_daily_budget;
use crate::comments::BudgetChangeComment;
use crate::config::AutopilotConfig;
use crate::errln;
use crate::goals::GoalValueRange;
use crate::logger::{LogEvent, Logger};
use crate::logln;
use crate::utils::get_seed;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

// Register this scenario in the catalog
inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "budget_shortfall",
    run,
});

fn fresh_sources(count: u64) -> BTreeMap<Allocatable, AllocatableData> {
    (1..=count)
        .map(|id| (Allocatable::Source { id }, AllocatableData::empty()))
        .collect()
}

pub fn run(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    logln!(
        logger,
        LogEvent::Scenario,
        "=== Scenario: Budget Shortfall and Floor Fallback ==="
    );

    let cfg = AutopilotConfig::default();
    let floor = cfg.budget.platform_min_budget;
    let mut rng = StdRng::seed_from_u64(get_seed(1));

    // Four sources with no history: floors consume the total exactly
    let data_map = fresh_sources(4);
    let exact_total = floor * 4.0;
    let exact = allocate_daily_budget(
        exact_total,
        &data_map,
        None,
        &GoalValueRange::default(),
        &cfg,
        &mut rng,
        logger,
    )?;

    // Three sources but only two floors' worth of budget
    let data_map = fresh_sources(3);
    let short_total = floor * 2.0;
    let short = allocate_daily_budget(
        short_total,
        &data_map,
        None,
        &GoalValueRange::default(),
        &cfg,
        &mut rng,
        logger,
    )?;

    // Validate expected behavior
    logln!(logger, LogEvent::Scenario, "");
    logln!(logger, LogEvent::Scenario, "=== Validation Results ===");

    let mut errors: Vec<String> = Vec::new();

    let msg = format!(
        "Exact-floor total {}: every budget equals the platform floor {}",
        exact_total, floor
    );
    if exact.values().all(|change| change.new_budget == floor) {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    let msg = "Exact-floor total: changes carry NO_ACTIVE_SOURCES_WITH_SPEND".to_string();
    if exact.values().all(|change| {
        change
            .comments
            .contains(&BudgetChangeComment::NoActiveSourcesWithSpend)
    }) {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    let msg = format!(
        "Shortfall total {}: floors are kept (best effort, no rollback)",
        short_total
    );
    if short.values().all(|change| {
        change.new_budget == floor
            && !change
                .comments
                .contains(&BudgetChangeComment::NewBudgetNotEqualDailyBudget)
    }) {
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
