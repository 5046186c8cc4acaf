/// This scenario simulates an underspending source over consecutive days and
/// validates that the bid calculator walks the bid up until spend lands in
/// the optimal band.
///
/// The source has a fixed click capacity per day, so its daily spend is
/// min(budget, bid * capacity). Starting from the minimum bid the calculator
/// should raise the bid day after day (respecting the rate-of-change limits)
/// until the underspend signal falls inside the no-adjustment interval and
/// the calculator reports optimal spend.
use crate::allocatable::AllocatableData;
use crate::bid::compute_new_bid;
use crate::comments::BidChangeComment;
use crate::config::{AutopilotConfig, BiddingMode};
use crate::errln;
use crate::logger::{LogEvent, Logger};
use crate::logln;

// Register this scenario in the catalog
inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "underspend_recovery",
    run,
});

const DAILY_BUDGET: f64 = 10.0;
const CLICK_CAPACITY: f64 = 50.0;
const DAYS: usize = 15;

fn simulated_spend(bid: f64) -> f64 {
    (bid * CLICK_CAPACITY).min(DAILY_BUDGET)
}

pub fn run(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    logln!(
        logger,
        LogEvent::Scenario,
        "=== Scenario: Underspend Recovery (CPC) ==="
    );

    let cfg = AutopilotConfig::default();
    let mut bid = cfg.cpc.min_bid;
    let mut last_change = None;
    let mut last_underspend = -1.0;
    let mut bids_in_bounds = true;

    for day in 1..=DAYS {
        let spend = simulated_spend(bid);
        let data = AllocatableData {
            current_bid: bid,
            current_budget: DAILY_BUDGET,
            yesterdays_spend: spend,
            no_spend: spend <= 0.0,
            ..AllocatableData::empty()
        };
        let change = compute_new_bid(&data, None, BiddingMode::Cpc, &cfg);
        last_underspend = spend / DAILY_BUDGET - 1.0;

        logln!(
            logger,
            LogEvent::Entity,
            "day {}: bid {:.3}, spend {:.2}, underspend {:.2}, new bid {:.3}",
            day,
            bid,
            spend,
            last_underspend,
            change.new_bid
        );

        if change.new_bid < cfg.cpc.min_bid || change.new_bid > cfg.cpc.max_bid {
            bids_in_bounds = false;
        }
        bid = change.new_bid;
        last_change = Some(change);
    }

    // Validate expected behavior
    logln!(logger, LogEvent::Scenario, "");
    logln!(logger, LogEvent::Scenario, "=== Validation Results ===");

    let mut errors: Vec<String> = Vec::new();

    let msg = format!(
        "Spend settled in the optimal band after {} days: |{:.2}| <= 0.1",
        DAYS, last_underspend
    );
    if last_underspend.abs() <= 0.1 {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    let settled = last_change
        .map(|change| change.comments.contains(&BidChangeComment::OptimalSpend))
        .unwrap_or(false);
    let msg = "Final day reported optimal spend (no further adjustment)".to_string();
    if settled {
        logln!(logger, LogEvent::Scenario, "✓ {}", msg);
    } else {
        errors.push(msg.clone());
        errln!(logger, LogEvent::Scenario, "✗ {}", msg);
    }

    let msg = "Every computed bid stayed within the autopilot bounds".to_string();
    if bids_in_bounds {
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
