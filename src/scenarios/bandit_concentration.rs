/// This scenario validates the budget allocator's bandit behavior: with one
/// source spending its whole budget and two barely spending, the leftover
/// budget should concentrate on the strong spender in a clear majority of
/// seeded runs.
///
/// This is a statistical property, not an exact one: Thompson sampling keeps
/// exploring the weak sources, so the threshold is deliberately loose (60%).
use crate::allocatable::{Allocatable, AllocatableData};
use crate::budgets::allocate_daily_budget;
use crate::config::AutopilotConfig;
use crate::errln;
use crate::goals::GoalValueRange;
use crate::logger::{LogEvent, Logger};
use crate::logln;
use crate::utils::{get_seed, lognormal_dist};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use std::collections::BTreeMap;

// Register this scenario in the catalog
inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "bandit_concentration",
    run,
});

const TOTAL_BUDGET: f64 = 60.0;
const RUNS: u32 = 50;

fn source_data(spend: f64) -> AllocatableData {
    AllocatableData {
        current_bid: 0.5,
        current_budget: 20.0,
        yesterdays_spend: spend,
        spend_perc: spend / 20.0,
        no_spend: spend <= 0.0,
        ..AllocatableData::empty()
    }
}

pub fn run(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    logln!(
        logger,
        LogEvent::Scenario,
        "=== Scenario: Bandit Budget Concentration ==="
    );

    let cfg = AutopilotConfig::default();
    let strong = Allocatable::Source { id: 1 };

    // Weak sources get noisy low spend so runs are not all identical
    let weak_spend_dist = lognormal_dist(7.0, 1.0);

    let mut wins = 0;
    let mut conservation_holds = true;
    for iteration in 0..RUNS {
        let mut rng = StdRng::seed_from_u64(get_seed(iteration as u64));

        let mut data_map = BTreeMap::new();
        data_map.insert(strong.clone(), source_data(20.0));
        for id in 2..=3 {
            let spend = weak_spend_dist.sample(&mut rng).min(10.0);
            data_map.insert(Allocatable::Source { id }, source_data(spend));
        }
        let changes = allocate_daily_budget(
            TOTAL_BUDGET,
            &data_map,
            None,
            &GoalValueRange::default(),
            &cfg,
            &mut rng,
            logger,
        )?;

        let allocated: f64 = changes.values().map(|c| c.new_budget).sum();
        if allocated != TOTAL_BUDGET {
            conservation_holds = false;
        }

        let strong_budget = changes[&strong].new_budget;
        if changes
            .iter()
            .all(|(allocatable, change)| *allocatable == strong || change.new_budget <= strong_budget)
        {
            wins += 1;
        }
    }

    let win_rate = wins as f64 / RUNS as f64;
    logln!(
        logger,
        LogEvent::Scenario,
        "strong spender received the largest share in {}/{} runs ({:.0}%)",
        wins,
        RUNS,
        win_rate * 100.0
    );

    // Validate expected behavior
    logln!(logger, LogEvent::Scenario, "");
    logln!(logger, LogEvent::Scenario, "=== Validation Results ===");

    let mut errors: Vec<String> = Vec::new();

    let msg = format!(
        "Strong spender wins the largest share in a clear majority of runs: {:.0}% > 60%",
        win_rate * 100.0
    );
    if win_rate > 0.6 {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    let msg = format!(
        "Allocated budgets summed to the daily total ({}) in every run",
        TOTAL_BUDGET
    );
    if conservation_holds {
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
