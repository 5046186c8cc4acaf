use crate::allocatable::{Allocatable, BidConstraintRule};
use crate::bid::{compute_new_bid, compute_new_bid_grouped, BidChange};
use crate::budgets::{allocate_daily_budget, BudgetChange};
use crate::comments::comments_text;
use crate::config::{AutopilotConfig, BiddingMode};
use crate::errors::AutopilotError;
use crate::goals::{normalize_goal_value, CampaignGoal};
use crate::logger::{LogEvent, Logger};
use crate::prefetch::{assemble_data, SettingsSource, StatsSource};
use crate::thresholds::apply_thresholds;
use crate::utils::{get_seed, TOTAL_ENTITY_RUNS};
use crate::{errln, logln};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Whether this run came from the scheduler or a manual trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Scheduled,
    AdHoc,
}

/// Which autopilot features are enabled on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutopilotMode {
    Inactive,
    Bid,
    BidAndBudget,
}

/// Lifecycle state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Active,
    Paused,
    Archived,
}

/// One ad group (or campaign) the orchestrator may process
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u64,
    pub name: String,
    pub state: EntityState,
    pub autopilot: AutopilotMode,
    /// Set by an upstream campaign-stop decision; overrides everything else
    pub campaign_stopped: bool,
    pub mode: BiddingMode,
    pub total_daily_budget: f64,
    pub ad_group_max_bid: Option<f64>,
    pub goal: Option<CampaignGoal>,
    pub allocatables: Vec<Allocatable>,
    pub rules: Vec<BidConstraintRule>,
}

impl Entity {
    fn is_eligible(&self) -> bool {
        self.state == EntityState::Active
            && self.autopilot != AutopilotMode::Inactive
            && !self.campaign_stopped
            && !self.allocatables.is_empty()
    }
}

/// The final change computed for one allocatable in one run
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub allocatable: Allocatable,
    pub bid: BidChange,
    pub budget: Option<BudgetChange>,
}

/// Write side of the external settings store
///
/// One call per entity; the implementation persists all of the entity's
/// changes in a single transaction, tagged with the system actor identity
/// so automation hooks do not re-enter.
pub trait SettingsStore {
    fn persist_entity(&mut self, entity_id: u64, changes: &[AppliedChange]) -> Result<(), String>;
}

/// One immutable audit row per allocatable per run
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub entity_id: u64,
    pub allocatable: Allocatable,
    pub old_bid: f64,
    pub new_bid: f64,
    pub old_budget: Option<f64>,
    pub new_budget: Option<f64>,
    pub comments: String,
    pub goal: Option<CampaignGoal>,
    pub run_mode: RunMode,
}

pub trait AuditLog {
    fn append(&mut self, record: AuditRecord);
}

/// Failure notification and run digest channel
pub trait AlertSink {
    fn entity_failed(&mut self, entity_id: u64, name: &str, reason: &str);
    fn run_completed(&mut self, summary: &RunSummary);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Compute everything but skip persistence, audit and notifications
    pub dry_run: bool,
    /// Entities not reached within this wall-clock budget are skipped and
    /// picked up by the next run
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub eligible: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped_deadline: usize,
    pub total_budget_allocated: f64,
}

/// The top-level autopilot control loop over its external collaborators
pub struct Autopilot<'a> {
    pub stats: &'a dyn StatsSource,
    pub settings: &'a dyn SettingsSource,
    pub store: &'a mut dyn SettingsStore,
    pub audit: &'a mut dyn AuditLog,
    pub alerts: &'a mut dyn AlertSink,
    pub cfg: AutopilotConfig,
}

impl Autopilot<'_> {
    /// Run autopilot over a set of entities
    ///
    /// Aborts before touching any entity when run preconditions fail. A
    /// failure inside one entity's pipeline is logged, alerted and isolated;
    /// the run continues with the remaining entities.
    pub fn run(
        &mut self,
        entities: &[Entity],
        run_mode: RunMode,
        options: RunOptions,
        logger: &mut Logger,
    ) -> Result<RunSummary, AutopilotError> {
        if !self.stats.materialized() {
            errln!(
                logger,
                LogEvent::Run,
                "aborting run: daily statistics not materialized yet"
            );
            return Err(AutopilotError::MissingRunData(
                "daily statistics not materialized yet".to_string(),
            ));
        }

        let eligible: Vec<&Entity> = entities.iter().filter(|e| e.is_eligible()).collect();
        let mut summary = RunSummary {
            eligible: eligible.len(),
            ..RunSummary::default()
        };
        logln!(
            logger,
            LogEvent::Run,
            "starting {:?} run over {} eligible entities ({} total)",
            run_mode,
            eligible.len(),
            entities.len()
        );

        let started = Instant::now();
        for (index, entity) in eligible.iter().enumerate() {
            if let Some(deadline) = options.deadline {
                if started.elapsed() >= deadline {
                    summary.skipped_deadline = eligible.len() - index;
                    logln!(
                        logger,
                        LogEvent::Run,
                        "deadline reached; skipping {} remaining entities",
                        summary.skipped_deadline
                    );
                    break;
                }
            }

            match self.process_entity(entity, run_mode, options, logger) {
                Ok(changes) => {
                    summary.processed += 1;
                    summary.total_budget_allocated += changes
                        .iter()
                        .filter_map(|c| c.budget.as_ref())
                        .map(|b| b.new_budget)
                        .sum::<f64>();
                }
                Err(error) => {
                    summary.failed += 1;
                    errln!(
                        logger,
                        LogEvent::Entity,
                        "entity '{}' ({}) failed: {}",
                        entity.name,
                        entity.id,
                        error
                    );
                    if !options.dry_run {
                        self.alerts
                            .entity_failed(entity.id, &entity.name, &error.to_string());
                    }
                }
            }
        }

        logln!(
            logger,
            LogEvent::Run,
            "run finished: {} processed, {} failed, {} skipped",
            summary.processed,
            summary.failed,
            summary.skipped_deadline
        );
        if !options.dry_run {
            self.alerts.run_completed(&summary);
        }
        Ok(summary)
    }

    /// The full pipeline for one entity: assemble data, allocate budgets,
    /// compute bids, apply thresholds, persist and audit
    fn process_entity(
        &mut self,
        entity: &Entity,
        run_mode: RunMode,
        options: RunOptions,
        logger: &mut Logger,
    ) -> Result<Vec<AppliedChange>, AutopilotError> {
        TOTAL_ENTITY_RUNS.fetch_add(1, Ordering::Relaxed);
        let mut rng = StdRng::seed_from_u64(get_seed(entity.id));

        let (data_map, goal_range) = assemble_data(
            &entity.allocatables,
            self.stats,
            self.settings,
            entity.goal.as_ref(),
            &self.cfg,
        )
        .map_err(|error| AutopilotError::EntityFailed {
            entity: entity.name.clone(),
            reason: error.to_string(),
        })?;

        let budget_changes: Option<BTreeMap<Allocatable, BudgetChange>> =
            if entity.autopilot == AutopilotMode::BidAndBudget {
                Some(
                    allocate_daily_budget(
                        entity.total_daily_budget,
                        &data_map,
                        entity.goal.as_ref(),
                        &goal_range,
                        &self.cfg,
                        &mut rng,
                        logger,
                    )
                    .map_err(|error| AutopilotError::EntityFailed {
                        entity: entity.name.clone(),
                        reason: error.to_string(),
                    })?,
                )
            } else {
                None
            };

        let mut changes = Vec::with_capacity(data_map.len());
        for (allocatable, data) in &data_map {
            // New budgets feed into bid calculation as the denominator
            let mut working = data.clone();
            let budget_change = budget_changes
                .as_ref()
                .and_then(|map| map.get(allocatable))
                .cloned();
            if let Some(budget) = &budget_change {
                if budget.new_budget > 0.0 {
                    working.current_budget = budget.new_budget;
                }
            }

            let proposed = if allocatable.is_grouped() {
                let performance_ratio = match (&entity.goal, data.goal_performance) {
                    (Some(goal), Some(metric)) => Some(
                        normalize_goal_value(goal.kpi, metric, &goal_range).map_err(|error| {
                            AutopilotError::EntityFailed {
                                entity: entity.name.clone(),
                                reason: error.to_string(),
                            }
                        })?,
                    ),
                    _ => None,
                };
                compute_new_bid_grouped(&working, performance_ratio, entity.mode, &self.cfg)
            } else {
                compute_new_bid(&working, entity.goal.as_ref(), entity.mode, &self.cfg)
            };

            let (final_bid, comments) = apply_thresholds(
                allocatable,
                proposed.new_bid,
                proposed.old_bid,
                data,
                entity.ad_group_max_bid,
                &entity.rules,
                entity.mode,
                &self.cfg,
                proposed.comments,
            );

            logln!(
                logger,
                LogEvent::Allocation,
                "{}: bid {} -> {} [{}]",
                allocatable,
                proposed.old_bid,
                final_bid,
                comments_text(&comments)
            );

            changes.push(AppliedChange {
                allocatable: allocatable.clone(),
                bid: BidChange {
                    old_bid: proposed.old_bid,
                    new_bid: final_bid,
                    comments,
                },
                budget: budget_change,
            });
        }

        if options.dry_run {
            logln!(
                logger,
                LogEvent::Entity,
                "entity '{}': dry run, {} changes computed but not persisted",
                entity.name,
                changes.len()
            );
            return Ok(changes);
        }

        self.store
            .persist_entity(entity.id, &changes)
            .map_err(|reason| AutopilotError::EntityFailed {
                entity: entity.name.clone(),
                reason,
            })?;

        for change in &changes {
            let mut comment_parts = comments_text(&change.bid.comments);
            if let Some(budget) = &change.budget {
                let budget_text = comments_text(&budget.comments);
                if !budget_text.is_empty() {
                    if !comment_parts.is_empty() {
                        comment_parts.push_str("; ");
                    }
                    comment_parts.push_str(&budget_text);
                }
            }
            self.audit.append(AuditRecord {
                entity_id: entity.id,
                allocatable: change.allocatable.clone(),
                old_bid: change.bid.old_bid,
                new_bid: change.bid.new_bid,
                old_budget: change.budget.as_ref().map(|b| b.old_budget),
                new_budget: change.budget.as_ref().map(|b| b.new_budget),
                comments: comment_parts,
                goal: entity.goal,
                run_mode,
            });
        }

        logln!(
            logger,
            LogEvent::Entity,
            "entity '{}': {} changes persisted",
            entity.name,
            changes.len()
        );
        Ok(changes)
    }
}

/// In-memory settings store for scenarios and tests; can be told to fail
/// specific entities to exercise the isolation boundary
#[derive(Default)]
pub struct MemoryStore {
    pub persisted: BTreeMap<u64, Vec<AppliedChange>>,
    pub fail_entities: Vec<u64>,
}

impl SettingsStore for MemoryStore {
    fn persist_entity(&mut self, entity_id: u64, changes: &[AppliedChange]) -> Result<(), String> {
        if self.fail_entities.contains(&entity_id) {
            return Err("settings store transaction rejected".to_string());
        }
        self.persisted.insert(entity_id, changes.to_vec());
        Ok(())
    }
}

/// In-memory audit log for scenarios and tests
#[derive(Default)]
pub struct MemoryAudit {
    pub records: Vec<AuditRecord>,
}

impl AuditLog for MemoryAudit {
    fn append(&mut self, record: AuditRecord) {
        self.records.push(record);
    }
}

/// In-memory alert sink for scenarios and tests
#[derive(Default)]
pub struct MemoryAlerts {
    pub failures: Vec<(u64, String)>,
    pub completions: usize,
}

impl AlertSink for MemoryAlerts {
    fn entity_failed(&mut self, entity_id: u64, _name: &str, reason: &str) {
        self.failures.push((entity_id, reason.to_string()));
    }

    fn run_completed(&mut self, _summary: &RunSummary) {
        self.completions += 1;
    }
}
