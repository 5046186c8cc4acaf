use crate::goals::KpiType;
use thiserror::Error;

/// Error taxonomy for the autopilot core
///
/// Data-quality conditions (missing bids, zero budgets) never surface here;
/// they are recovered locally and produce comments instead. These variants
/// cover configuration bugs and run/entity level failures only.
#[derive(Debug, Error)]
pub enum AutopilotError {
    /// A campaign goal KPI with no autopilot support reached the core.
    /// This is a programming/configuration error, not a runtime condition.
    #[error("no autopilot support for KPI {0:?}")]
    UnsupportedKpi(KpiType),

    /// Required input data for the run is not materialized yet; the whole
    /// run is aborted before any entity is processed.
    #[error("run preconditions not met: {0}")]
    MissingRunData(String),

    /// Persisting or computing changes for a single entity failed; caught
    /// at the orchestrator level and isolated from other entities.
    #[error("processing entity '{entity}' failed: {reason}")]
    EntityFailed { entity: String, reason: String },
}
