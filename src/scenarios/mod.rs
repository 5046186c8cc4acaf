use crate::logger::Logger;
use std::error::Error;

/// Function type for scenario entry functions
pub type ScenarioFn = fn(scenario_name: &str, logger: &mut Logger) -> Result<(), Box<dyn Error>>;

/// Entry in the scenario catalog
#[derive(Clone)]
pub struct ScenarioEntry {
    pub short_name: &'static str,
    pub run: ScenarioFn,
}

// Create an inventory collection for scenario entries
inventory::collect!(ScenarioEntry);

/// Get all registered scenarios from the catalog
pub fn get_scenario_catalog() -> Vec<ScenarioEntry> {
    inventory::iter::<ScenarioEntry>
        .into_iter()
        .map(|entry| entry.clone())
        .collect()
}

// Users can register scenarios directly using inventory::submit!
// Example:
// inventory::submit!(scenarios::ScenarioEntry {
//     short_name: "name",
//     run: function,
// });

// Scenario modules
pub mod bandit_concentration;
pub mod budget_shortfall;
pub mod failure_isolation;
pub mod underspend_recovery;
