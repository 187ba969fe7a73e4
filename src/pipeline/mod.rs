//! End-to-end plan runs
//!
//! Each run holds the plan's lock from load to commit: documents are built
//! from the stored plan, the engine is invoked once, and its answer is
//! reconciled and announced. Engine failures leave the plan untouched.

mod candidates;
mod queries;

pub use candidates::select_best_candidate;

use crate::catalog::CropCatalog;
use crate::codec::rules::{continuous_cultivation_rules, rules_document};
use crate::codec::{
    CropsDocument, ExchangeFileSet, FieldsDocument, InteractionRule, MovesDocument, WeatherSeries,
};
use crate::config::OptimizationConfig;
use crate::error::PipelineError;
use crate::extract::{decode_optimizer_result, extract_json};
use crate::gateway::{CommandArgs, EngineCommand, Gateway};
use crate::model::{AllocationId, MoveAction, MoveInstruction, OptimizerResult, Plan, PlanId, PlanStatus};
use crate::notify::{publish_best_effort, CompletionEvent, Notifier};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::snapshot::{build_snapshot, effective_planning_period, planning_horizon};
use crate::store::{PlanLocks, PlanStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Allocations left out of the adjust snapshot
    pub exclude_allocation_ids: HashSet<AllocationId>,

    /// Extra rules; these win over generated ones for the same group pairing
    pub interaction_rules: Vec<InteractionRule>,

    pub objective: Option<String>,
    pub max_time_sec: Option<u64>,
    pub enable_parallel: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdjustOutcome {
    /// Nothing to move; the engine was not called
    Skipped,
    Applied(ReconcileReport),
}

pub struct PlanPipeline {
    gateway: Arc<Gateway>,
    store: Arc<dyn PlanStore>,
    catalog: Arc<dyn CropCatalog>,
    locks: Arc<PlanLocks>,
    reconciler: Reconciler,
    notifier: Arc<dyn Notifier>,
    optimization: OptimizationConfig,
}

impl PlanPipeline {
    pub fn new(
        gateway: Gateway,
        store: Arc<dyn PlanStore>,
        catalog: Arc<dyn CropCatalog>,
        notifier: Arc<dyn Notifier>,
        optimization: OptimizationConfig,
    ) -> Self {
        let locks = Arc::new(PlanLocks::new());
        let reconciler = Reconciler::new(store.clone(), catalog.clone(), locks.clone());

        Self {
            gateway: Arc::new(gateway),
            store,
            catalog,
            locks,
            reconciler,
            notifier,
            optimization,
        }
    }

    /// Replace the in-process plan locks, e.g. with file-backed ones.
    pub fn with_plan_locks(mut self, locks: PlanLocks) -> Self {
        self.locks = Arc::new(locks);
        self.reconciler =
            Reconciler::new(self.store.clone(), self.catalog.clone(), self.locks.clone());
        self
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Optimize the plan from scratch over its planning horizon.
    pub async fn allocate(
        &self,
        plan_id: PlanId,
        weather: &WeatherSeries,
        options: &PipelineOptions,
    ) -> Result<ReconcileReport, PipelineError> {
        let _guard = self.locks.lock(plan_id).await?;
        let plan = self.load_plan(plan_id).await?;

        info!(
            "Allocating plan {} ({} parcels, {} crops)",
            plan.id,
            plan.parcels.len(),
            plan.crops.len()
        );

        let result = self.run_allocate(&plan, weather, options).await;
        self.finish(&plan, "allocate", result).await
    }

    /// Apply user moves to the current allocations.
    pub async fn adjust(
        &self,
        plan_id: PlanId,
        moves: &[MoveInstruction],
        weather: &WeatherSeries,
        options: &PipelineOptions,
    ) -> Result<AdjustOutcome, PipelineError> {
        if moves.is_empty() {
            info!("No moves for plan {}, skipping adjust", plan_id);
            return Ok(AdjustOutcome::Skipped);
        }

        let _guard = self.locks.lock(plan_id).await?;
        let plan = self.load_plan(plan_id).await?;

        info!("Adjusting plan {} with {} move(s)", plan.id, moves.len());

        let result = self.run_adjust(&plan, moves, weather, options).await;
        self.finish(&plan, "adjust", result)
            .await
            .map(AdjustOutcome::Applied)
    }

    async fn run_allocate(
        &self,
        plan: &Plan,
        weather: &WeatherSeries,
        options: &PipelineOptions,
    ) -> Result<ReconcileReport, PipelineError> {
        let (start, end) = planning_horizon(plan);
        let mut files = ExchangeFileSet::new();

        let args = self
            .write_plan_documents(plan, weather, options, &mut files)?
            .set("planning-start", start)
            .set("planning-end", end)
            .set("objective", self.objective(options));
        let args = self.with_tuning(args, options);

        let result = self.optimize(EngineCommand::OptimizeAllocate, &args).await?;
        files.release();

        Ok(self.reconciler.reconcile_locked(plan.id, &result).await?)
    }

    async fn run_adjust(
        &self,
        plan: &Plan,
        moves: &[MoveInstruction],
        weather: &WeatherSeries,
        options: &PipelineOptions,
    ) -> Result<ReconcileReport, PipelineError> {
        validate_moves(plan, moves)?;

        let snapshot = build_snapshot(plan, &options.exclude_allocation_ids);
        let (start, end) = effective_planning_period(plan, &snapshot, moves);
        info!(
            "Adjust snapshot {} for plan {}: {} allocation(s), period {} to {}",
            snapshot.fingerprint(),
            plan.id,
            snapshot.allocation_count(),
            start,
            end
        );

        let mut files = ExchangeFileSet::new();
        let current = files.write_json("current_allocation", &snapshot)?;
        let moves_path = files.write_json("moves", &MovesDocument { moves })?;

        let args = self
            .write_plan_documents(plan, weather, options, &mut files)?
            .set("current-allocation", current.display())
            .set("moves", moves_path.display())
            .set("planning-start", start)
            .set("planning-end", end)
            .set("objective", self.objective(options));
        let args = self.with_tuning(args, options);

        let result = self.optimize(EngineCommand::OptimizeAdjust, &args).await?;
        files.release();

        Ok(self.reconciler.reconcile_locked(plan.id, &result).await?)
    }

    async fn load_plan(&self, plan_id: PlanId) -> Result<Plan, PipelineError> {
        self.store
            .load(plan_id)
            .await?
            .ok_or(PipelineError::PlanNotFound(plan_id))
    }

    /// Fields, crops, weather and (when any) interaction rules
    fn write_plan_documents(
        &self,
        plan: &Plan,
        weather: &WeatherSeries,
        options: &PipelineOptions,
        files: &mut ExchangeFileSet,
    ) -> Result<CommandArgs, PipelineError> {
        let crops = CropsDocument::from_plan(plan, self.catalog.as_ref());
        if crops.crops.is_empty() {
            return Err(PipelineError::InvalidRequest(format!(
                "plan {} has no crops the engine can plan",
                plan.id
            )));
        }
        if plan.parcels.is_empty() {
            return Err(PipelineError::InvalidRequest(format!(
                "plan {} has no parcels",
                plan.id
            )));
        }

        let fields_path = files.write_json("fields", &FieldsDocument::from_plan(plan))?;
        let crops_path = files.write_json("crops", &crops)?;
        let weather_path = files.write_json("weather", weather)?;

        let mut rules = options.interaction_rules.clone();
        rules.extend(continuous_cultivation_rules(
            plan,
            self.catalog.as_ref(),
            self.optimization.continuous_cultivation_impact,
        ));
        let rules_path = match rules_document(rules)? {
            Some(doc) => Some(files.write_json("rules", &doc)?),
            None => None,
        };

        Ok(CommandArgs::new()
            .set("fields-file", fields_path.display())
            .set("crops-file", crops_path.display())
            .set("weather-file", weather_path.display())
            .set_opt(
                "interaction-rules-file",
                rules_path.map(|p| p.display().to_string()),
            ))
    }

    fn objective(&self, options: &PipelineOptions) -> String {
        options
            .objective
            .clone()
            .unwrap_or_else(|| self.optimization.objective.clone())
    }

    fn with_tuning(&self, args: CommandArgs, options: &PipelineOptions) -> CommandArgs {
        args.set_opt(
            "max-time",
            options.max_time_sec.or(self.optimization.max_time_sec),
        )
        .switch_if(
            "enable-parallel",
            options
                .enable_parallel
                .unwrap_or(self.optimization.enable_parallel),
        )
        .set("format", "json")
    }

    async fn optimize(
        &self,
        command: EngineCommand,
        args: &CommandArgs,
    ) -> Result<OptimizerResult, PipelineError> {
        let raw = self.gateway.invoke(command, args).await?;
        let value = extract_json(command, &raw)?;
        Ok(decode_optimizer_result(value)?)
    }

    /// Announce the outcome of a run; the result passes through unchanged.
    async fn finish(
        &self,
        plan: &Plan,
        operation: &str,
        result: Result<ReconcileReport, PipelineError>,
    ) -> Result<ReconcileReport, PipelineError> {
        let event = match &result {
            Ok(report) => CompletionEvent {
                topic: CompletionEvent::topic_for(plan.id),
                plan_id: plan.id,
                status: PlanStatus::Completed,
                total_cost: report.total_cost,
                total_revenue: report.total_revenue,
                total_profit: report.total_profit,
                allocation_count: report.allocation_count,
                message: Some(format!("{} completed", operation)),
            },
            Err(e) => {
                warn!(
                    "Plan {} {} failed ({:?}): {}",
                    plan.id,
                    operation,
                    e.outcome(),
                    e
                );
                CompletionEvent::failed(plan, format!("{} failed: {}", operation, e))
            }
        };

        publish_best_effort(self.notifier.as_ref(), event).await;
        result
    }
}

/// Reject moves that point at allocations, parcels or crops the plan lacks.
fn validate_moves(plan: &Plan, moves: &[MoveInstruction]) -> Result<(), PipelineError> {
    for (index, mv) in moves.iter().enumerate() {
        let invalid = |reason: String| {
            PipelineError::InvalidRequest(format!("move #{}: {}", index + 1, reason))
        };

        match mv.action {
            MoveAction::Move | MoveAction::Remove => {
                let id = mv
                    .allocation_id
                    .ok_or_else(|| invalid("allocation_id is required".to_string()))?;
                if !plan.allocations.iter().any(|a| a.id == id) {
                    return Err(invalid(format!("allocation {} is not in the plan", id)));
                }
            }
            MoveAction::Add => {
                let crop_id = mv
                    .crop_id
                    .ok_or_else(|| invalid("crop_id is required to add".to_string()))?;
                if plan.crop_snapshot_for_master(crop_id).is_none() {
                    return Err(invalid(format!("crop {} is not in the plan", crop_id)));
                }
                if mv.to_parcel_id.is_none() || mv.to_start_date.is_none() {
                    return Err(invalid(
                        "to_field_id and to_start_date are required to add".to_string(),
                    ));
                }
            }
        }

        if let Some(parcel_id) = mv.to_parcel_id {
            if plan.parcel(parcel_id).is_none() {
                return Err(invalid(format!("parcel {} is not in the plan", parcel_id)));
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::error::{EngineError, FailureOutcome};
    use crate::gateway::testing::FakeTransport;
    use crate::snapshot::fixtures::{date, two_parcel_plan};

    fn relocate() -> Vec<MoveInstruction> {
        vec![MoveInstruction::relocate(1, 2, date("2025-05-01"), None)]
    }

    #[tokio::test]
    async fn test_adjust_relocates_and_notifies() {
        let h = harness(
            FakeTransport::new()
                .ok(&format!("[solver] done\n{}\n", relocated_answer()))
                .capture(&["current-allocation", "moves", "interaction-rules-file"]),
        );
        let mut events = h.notifier.subscribe();

        let outcome = h
            .pipeline
            .adjust(1, &relocate(), &weather(), &PipelineOptions::default())
            .await
            .unwrap();
        let AdjustOutcome::Applied(report) = outcome else {
            panic!("expected an applied adjust");
        };
        assert_eq!(report.allocation_count, 1);

        let (command, args) = &h.fake.calls()[0];
        assert_eq!(*command, EngineCommand::OptimizeAdjust);
        assert_eq!(args.get("planning-start"), Some("2024-01-01"));
        assert_eq!(args.get("planning-end"), Some("2026-12-31"));
        assert_eq!(args.get("objective"), Some("maximize_profit"));
        assert_eq!(args.get("format"), Some("json"));

        let captured = h.fake.captured();
        let snapshot: serde_json::Value = serde_json::from_str(&captured[0].1).unwrap();
        assert_eq!(
            snapshot["optimization_result"]["field_schedules"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        let moves: serde_json::Value = serde_json::from_str(&captured[1].1).unwrap();
        assert_eq!(moves["moves"][0]["to_field_id"], "2");
        let rules: serde_json::Value = serde_json::from_str(&captured[2].1).unwrap();
        assert_eq!(rules["rules"][0]["source_group"], "Solanaceae");

        let plan = h.store.load(1).await.unwrap().unwrap();
        assert_eq!(plan.allocations_on(2).count(), 1);
        assert_eq!(plan.status, PlanStatus::Completed);

        let event = events.recv().await.unwrap();
        assert_eq!(event.topic, "cultivation_plan:1");
        assert_eq!(event.status, PlanStatus::Completed);
        assert_eq!(event.total_profit, 550.0);
    }

    #[tokio::test]
    async fn test_empty_moves_skip_engine() {
        let h = harness(FakeTransport::new());
        let outcome = h
            .pipeline
            .adjust(1, &[], &weather(), &PipelineOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome, AdjustOutcome::Skipped);
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_file_locks_serialize_runs_across_pipelines() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(FakeTransport::new().ok(&relocated_answer()));
        let pipeline = h.pipeline.with_plan_locks(PlanLocks::in_dir(dir.path()));

        let other_process = PlanLocks::in_dir(dir.path());
        let held = other_process.lock(1).await.unwrap();

        let run = tokio::spawn(async move {
            pipeline
                .adjust(1, &relocate(), &weather(), &PipelineOptions::default())
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!run.is_finished());
        assert!(h.fake.calls().is_empty());

        drop(held);
        let outcome = run.await.unwrap().unwrap();
        assert!(matches!(outcome, AdjustOutcome::Applied(_)));
        assert_eq!(h.fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_excluded_allocations_left_out_of_snapshot() {
        let h = harness(
            FakeTransport::new()
                .ok(&relocated_answer())
                .capture(&["current-allocation"]),
        );
        let options = PipelineOptions {
            exclude_allocation_ids: [1].into_iter().collect(),
            ..PipelineOptions::default()
        };

        h.pipeline
            .adjust(1, &relocate(), &weather(), &options)
            .await
            .unwrap();

        let snapshot: serde_json::Value =
            serde_json::from_str(&h.fake.captured()[0].1).unwrap();
        let schedules = snapshot["optimization_result"]["field_schedules"]
            .as_array()
            .unwrap();
        assert!(schedules
            .iter()
            .all(|s| s["allocations"].as_array().unwrap().is_empty()));
    }

    #[tokio::test]
    async fn test_engine_failure_leaves_plan_and_reports_failure() {
        let h = harness(FakeTransport::new().ok(
            "No valid allocation candidates could be generated for cropA",
        ));
        let mut events = h.notifier.subscribe();

        let err = h
            .pipeline
            .adjust(1, &relocate(), &weather(), &PipelineOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Engine(EngineError::NoAllocationCandidates(_))
        ));
        assert_eq!(err.outcome(), FailureOutcome::Infeasible);
        assert_eq!(h.store.load(1).await.unwrap().unwrap(), two_parcel_plan());

        let event = events.recv().await.unwrap();
        assert_eq!(event.status, PlanStatus::Failed);
    }

    #[tokio::test]
    async fn test_invalid_moves_rejected_before_engine() {
        let h = harness(FakeTransport::new());
        let moves = vec![MoveInstruction::relocate(99, 2, date("2025-05-01"), None)];

        let err = h
            .pipeline
            .adjust(1, &moves, &weather(), &PipelineOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert!(h.fake.calls().is_empty());

        let moves = vec![MoveInstruction::relocate(1, 7, date("2025-05-01"), None)];
        let err = h
            .pipeline
            .adjust(1, &moves, &weather(), &PipelineOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), FailureOutcome::InvalidRequest);
    }

    #[tokio::test]
    async fn test_allocate_uses_plan_horizon_and_tuning() {
        let h = harness(FakeTransport::new().ok(&relocated_answer()));
        {
            let mut plan = h.store.load(1).await.unwrap().unwrap();
            plan.planning_start = Some(date("2025-01-01"));
            plan.planning_end = Some(date("2025-12-31"));
            h.store.save(&plan).await.unwrap();
        }

        let options = PipelineOptions {
            max_time_sec: Some(30),
            enable_parallel: Some(true),
            ..PipelineOptions::default()
        };
        let report = h.pipeline.allocate(1, &weather(), &options).await.unwrap();
        assert_eq!(report.allocation_count, 1);

        let (command, args) = &h.fake.calls()[0];
        assert_eq!(*command, EngineCommand::OptimizeAllocate);
        assert_eq!(args.get("planning-start"), Some("2025-01-01"));
        assert_eq!(args.get("planning-end"), Some("2025-12-31"));
        assert_eq!(args.get("max-time"), Some("30"));
        assert!(args.contains("enable-parallel"));
    }

    #[tokio::test]
    async fn test_missing_plan() {
        let h = harness(FakeTransport::new());
        let err = h
            .pipeline
            .allocate(9, &weather(), &PipelineOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PlanNotFound(9)));
    }

    #[tokio::test]
    async fn test_negative_rule_is_internal() {
        let h = harness(FakeTransport::new());
        let options = PipelineOptions {
            interaction_rules: vec![InteractionRule {
                rule_id: "bad".to_string(),
                rule_type: "allelopathy".to_string(),
                source_group: "Solanaceae".to_string(),
                target_group: "Brassicaceae".to_string(),
                impact_ratio: -1.0,
                is_directional: true,
                description: String::new(),
            }],
            ..PipelineOptions::default()
        };

        let err = h
            .pipeline
            .allocate(1, &weather(), &options)
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), FailureOutcome::Internal);
        assert!(h.fake.calls().is_empty());
    }
}
