//! Apply an optimizer result to the stored plan
//!
//! The engine's answer replaces the plan's allocations wholesale. All changes
//! are made on a working copy that is committed with one `PlanStore::save`;
//! any failure before that leaves the stored plan exactly as it was.

use crate::catalog::CropCatalog;
use crate::error::ReconcileError;
use crate::extract::normalize_date;
use crate::model::{
    Allocation, CropSnapshotId, EngineAllocation, OptimizerResult, Plan, PlanId, PlanRollup,
    PlanStatus,
};
use crate::store::{PlanLocks, PlanStore};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// What a successful reconciliation changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub plan_id: PlanId,
    pub allocation_count: usize,
    pub removed_allocations: usize,
    pub removed_crops: Vec<CropSnapshotId>,
    pub total_cost: f64,
    pub total_revenue: f64,
    pub total_profit: f64,
}

pub struct Reconciler {
    store: Arc<dyn PlanStore>,
    catalog: Arc<dyn CropCatalog>,
    locks: Arc<PlanLocks>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PlanStore>,
        catalog: Arc<dyn CropCatalog>,
        locks: Arc<PlanLocks>,
    ) -> Self {
        Self {
            store,
            catalog,
            locks,
        }
    }

    /// Reconcile under the plan's lock.
    pub async fn reconcile(
        &self,
        plan_id: PlanId,
        result: &OptimizerResult,
    ) -> Result<ReconcileReport, ReconcileError> {
        let _guard = self.locks.lock(plan_id).await?;
        self.reconcile_locked(plan_id, result).await
    }

    /// Reconcile when the caller already holds the plan's lock.
    pub async fn reconcile_locked(
        &self,
        plan_id: PlanId,
        result: &OptimizerResult,
    ) -> Result<ReconcileReport, ReconcileError> {
        check_preconditions(result)?;

        let mut plan = self
            .store
            .load(plan_id)
            .await?
            .ok_or(ReconcileError::PlanNotFound(plan_id))?;

        let report = apply(&mut plan, result, self.catalog.as_ref())?;
        self.store.save(&plan).await?;

        info!(
            "Reconciled plan {}: {} allocation(s) committed, {} replaced, {} crop(s) removed",
            plan_id,
            report.allocation_count,
            report.removed_allocations,
            report.removed_crops.len()
        );

        Ok(report)
    }
}

/// Checks that need no plan state and must pass before anything is touched
pub fn check_preconditions(result: &OptimizerResult) -> Result<(), ReconcileError> {
    if result.schedules.is_empty() {
        return Err(ReconcileError::EmptyResult);
    }

    let duplicates = result.duplicate_allocation_ids();
    if !duplicates.is_empty() {
        return Err(ReconcileError::DuplicateAllocationIds(duplicates));
    }

    Ok(())
}

/// Replace the plan's allocations with the result's.
fn apply(
    plan: &mut Plan,
    result: &OptimizerResult,
    catalog: &dyn CropCatalog,
) -> Result<ReconcileReport, ReconcileError> {
    let removed_allocations = plan.clear_allocations();

    // nothing placed: keep every crop
    let referenced = result.referenced_crop_ids();
    let removed_crops = if referenced.is_empty() {
        Vec::new()
    } else {
        plan.retain_crops(|crop| referenced.iter().any(|id| id.matches(crop.crop_id)))
    };
    if !removed_crops.is_empty() {
        debug!("Removing unreferenced crop snapshots {:?}", removed_crops);
    }

    for schedule in &result.schedules {
        let parcel_id = plan
            .parcels
            .iter()
            .find(|p| schedule.parcel_id.matches(p.id))
            .map(|p| p.id)
            .ok_or_else(|| ReconcileError::UnknownParcel {
                plan_id: plan.id,
                parcel_id: schedule.parcel_id.clone(),
            })?;

        for engine_allocation in &schedule.allocations {
            let allocation = build_allocation(plan, parcel_id, engine_allocation, catalog)?;
            plan.allocations.push(allocation);
        }
    }

    let summed_cost: f64 = plan.allocations.iter().map(|a| a.cost).sum();
    let summed_revenue: f64 = plan.allocations.iter().map(|a| a.revenue).sum();
    let total_cost = result.total_cost.unwrap_or(summed_cost);
    let total_revenue = result.total_revenue.unwrap_or(summed_revenue);
    let total_profit = result.total_profit.unwrap_or(total_revenue - total_cost);

    plan.rollup = PlanRollup {
        total_cost,
        total_revenue,
        total_profit,
        optimization_time: result.optimization_time,
        algorithm_used: result.algorithm_used.clone(),
        is_optimal: result.is_optimal,
        summary: result.summary.clone(),
    };
    plan.status = PlanStatus::Completed;

    Ok(ReconcileReport {
        plan_id: plan.id,
        allocation_count: plan.allocations.len(),
        removed_allocations,
        removed_crops,
        total_cost,
        total_revenue,
        total_profit,
    })
}

fn build_allocation(
    plan: &mut Plan,
    parcel_id: u64,
    engine: &EngineAllocation,
    catalog: &dyn CropCatalog,
) -> Result<Allocation, ReconcileError> {
    let master = engine
        .crop_id
        .as_str()
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|id| catalog.crop(id))
        .ok_or_else(|| ReconcileError::UnknownCrop(engine.crop_id.clone()))?;

    let crop_snapshot_id = plan
        .crop_snapshot_for_master(master.id)
        .map(|c| c.id)
        .ok_or_else(|| ReconcileError::UnknownPlanCrop {
            plan_id: plan.id,
            crop_id: engine.crop_id.clone(),
        })?;

    let label = engine
        .allocation_id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("for crop {}", engine.crop_id));
    let start_date = parse_date("start_date", &engine.start_date, &label)?;
    let completion_date = parse_date("completion_date", &engine.completion_date, &label)?;
    if completion_date < start_date {
        return Err(ReconcileError::InvalidDate {
            field: "completion_date",
            value: engine.completion_date.clone(),
            allocation: label,
        });
    }

    Ok(Allocation {
        id: plan.next_allocation_id(),
        parcel_id,
        crop_snapshot_id,
        start_date,
        completion_date,
        area: engine.area_used,
        cost: engine.total_cost,
        revenue: engine.expected_revenue,
        accumulated_gdd: engine.accumulated_gdd,
    })
}

fn parse_date(
    field: &'static str,
    value: &str,
    allocation: &str,
) -> Result<NaiveDate, ReconcileError> {
    normalize_date(value.to_string())
        .parse()
        .map_err(|_| ReconcileError::InvalidDate {
            field,
            value: value.to_string(),
            allocation: allocation.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, MasterCrop};
    use crate::error::StoreError;
    use crate::model::EngineId;
    use crate::snapshot::fixtures::{crop, date, two_parcel_plan};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    fn master(id: u64, name: &str) -> MasterCrop {
        MasterCrop {
            id,
            name: name.to_string(),
            variety: None,
            area_per_unit: 0.5,
            revenue_per_area: 20.0,
            groups: vec![],
            requirement: None,
        }
    }

    fn catalog() -> Arc<InMemoryCatalog> {
        Arc::new(InMemoryCatalog::new(vec![master(101, "cropA"), master(102, "cropB")]).unwrap())
    }

    fn result(value: serde_json::Value) -> OptimizerResult {
        serde_json::from_value(value).unwrap()
    }

    /// cropA moved from P1 to P2 starting 2025-05-01
    fn relocated() -> OptimizerResult {
        result(json!({
            "algorithm_used": "dp",
            "is_optimal": true,
            "optimization_time": 0.8,
            "field_schedules": [
                {"field_id": 1, "allocations": []},
                {"field_id": "2", "allocations": [{
                    "allocation_id": 1,
                    "crop_id": "101",
                    "area_used": 50.0,
                    "start_date": "2025-05-01",
                    "completion_date": "2025-08-31T00:00:00",
                    "total_cost": 450.0,
                    "expected_revenue": 1000.0,
                    "accumulated_gdd": 1300.0
                }]}
            ]
        }))
    }

    fn reconciler(store: Arc<dyn PlanStore>) -> Reconciler {
        Reconciler::new(store, catalog(), Arc::new(PlanLocks::new()))
    }

    #[tokio::test]
    async fn test_relocate_scenario() {
        let store = Arc::new(InMemoryStore::with_plans([two_parcel_plan()]));
        let report = reconciler(store.clone())
            .reconcile(1, &relocated())
            .await
            .unwrap();

        assert_eq!(report.allocation_count, 1);
        assert_eq!(report.removed_allocations, 1);
        assert!(report.removed_crops.is_empty());

        let plan = store.load(1).await.unwrap().unwrap();
        assert_eq!(plan.allocations_on(1).count(), 0);

        let moved: Vec<_> = plan.allocations_on(2).collect();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].start_date, date("2025-05-01"));
        assert_eq!(moved[0].completion_date, date("2025-08-31"));
        assert_eq!(moved[0].crop_snapshot_id, 1);
        assert_ne!(moved[0].id, 1);

        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(plan.rollup.total_cost, 450.0);
        assert_eq!(plan.rollup.total_profit, 550.0);
        assert_eq!(plan.rollup.algorithm_used.as_deref(), Some("dp"));
        assert_eq!(plan.rollup.is_optimal, Some(true));
    }

    #[tokio::test]
    async fn test_engine_totals_win_over_sums() {
        let store = Arc::new(InMemoryStore::with_plans([two_parcel_plan()]));
        let mut answer = relocated();
        answer.total_cost = Some(999.0);
        answer.total_revenue = Some(2000.0);
        answer.total_profit = Some(1001.0);

        reconciler(store.clone()).reconcile(1, &answer).await.unwrap();
        let plan = store.load(1).await.unwrap().unwrap();
        assert_eq!(plan.rollup.total_cost, 999.0);
        assert_eq!(plan.rollup.total_profit, 1001.0);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected_before_mutation() {
        let store = Arc::new(InMemoryStore::with_plans([two_parcel_plan()]));
        let answer = result(json!({"field_schedules": [
            {"field_id": 1, "allocations": [
                {"allocation_id": 7, "crop_id": "101", "start_date": "2025-04-01", "completion_date": "2025-05-01"}
            ]},
            {"field_id": 2, "allocations": [
                {"allocation_id": "7", "crop_id": "101", "start_date": "2025-06-01", "completion_date": "2025-07-01"}
            ]}
        ]}));

        let err = reconciler(store.clone()).reconcile(1, &answer).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::DuplicateAllocationIds(ids) if ids == vec![EngineId::new("7")]
        ));
        assert_eq!(store.load(1).await.unwrap().unwrap(), two_parcel_plan());
    }

    #[tokio::test]
    async fn test_empty_result_rejected() {
        let store = Arc::new(InMemoryStore::with_plans([two_parcel_plan()]));
        let err = reconciler(store.clone())
            .reconcile(1, &OptimizerResult::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::EmptyResult));
    }

    #[tokio::test]
    async fn test_unknown_parcel_leaves_plan_untouched() {
        let store = Arc::new(InMemoryStore::with_plans([two_parcel_plan()]));
        let answer = result(json!({"field_schedules": [
            {"field_id": 2, "allocations": [
                {"allocation_id": 1, "crop_id": "101", "start_date": "2025-05-01", "completion_date": "2025-08-31"}
            ]},
            {"field_id": 99, "allocations": []}
        ]}));

        let err = reconciler(store.clone()).reconcile(1, &answer).await.unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownParcel { .. }));
        assert_eq!(store.load(1).await.unwrap().unwrap(), two_parcel_plan());
    }

    #[tokio::test]
    async fn test_unknown_crop_and_bad_dates_abort() {
        let store = Arc::new(InMemoryStore::with_plans([two_parcel_plan()]));
        let unknown = result(json!({"field_schedules": [{"field_id": 1, "allocations": [
            {"crop_id": "555", "start_date": "2025-05-01", "completion_date": "2025-08-31"}
        ]}]}));
        let err = reconciler(store.clone()).reconcile(1, &unknown).await.unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownCrop(_)));

        let not_in_plan = result(json!({"field_schedules": [{"field_id": 1, "allocations": [
            {"crop_id": "102", "start_date": "2025-05-01", "completion_date": "2025-08-31"}
        ]}]}));
        let err = reconciler(store.clone()).reconcile(1, &not_in_plan).await.unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownPlanCrop { .. }));

        let bad_date = result(json!({"field_schedules": [{"field_id": 1, "allocations": [
            {"allocation_id": 3, "crop_id": "101", "start_date": "May 1st", "completion_date": "2025-08-31"}
        ]}]}));
        let err = reconciler(store.clone()).reconcile(1, &bad_date).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidDate { field: "start_date", .. }));

        assert_eq!(store.load(1).await.unwrap().unwrap(), two_parcel_plan());
    }

    #[tokio::test]
    async fn test_orphan_crops_removed() {
        let mut plan = two_parcel_plan();
        plan.crops.push(crop(2, 102, "cropB"));
        let store = Arc::new(InMemoryStore::with_plans([plan]));

        let report = reconciler(store.clone())
            .reconcile(1, &relocated())
            .await
            .unwrap();
        assert_eq!(report.removed_crops, vec![2]);

        let plan = store.load(1).await.unwrap().unwrap();
        assert_eq!(plan.crops.len(), 1);
        assert_eq!(plan.crops[0].crop_id, 101);
    }

    #[tokio::test]
    async fn test_crops_kept_when_nothing_placed() {
        let mut plan = two_parcel_plan();
        plan.crops.push(crop(2, 102, "cropB"));
        let store = Arc::new(InMemoryStore::with_plans([plan]));
        let answer = result(json!({"field_schedules": [{"field_id": 1, "allocations": []}]}));

        let report = reconciler(store.clone()).reconcile(1, &answer).await.unwrap();
        assert_eq!(report.allocation_count, 0);
        assert_eq!(report.removed_allocations, 1);
        assert!(report.removed_crops.is_empty());

        let plan = store.load(1).await.unwrap().unwrap();
        assert_eq!(plan.total_area(), 200.0);
        assert_eq!(plan.crops.len(), 2);
        assert!(plan.allocations.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_second_crop_aborts_whole_result() {
        let store = Arc::new(InMemoryStore::with_plans([two_parcel_plan()]));
        let answer = result(json!({"field_schedules": [
            {"field_id": 1, "allocations": [
                {"allocation_id": 1, "crop_id": "101", "start_date": "2025-04-01", "completion_date": "2025-07-31"}
            ]},
            {"field_id": 2, "allocations": [
                {"allocation_id": 2, "crop_id": "555", "start_date": "2025-05-01", "completion_date": "2025-08-31"}
            ]}
        ]}));

        let err = reconciler(store.clone()).reconcile(1, &answer).await.unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownCrop(id) if id == EngineId::new("555")));
        assert_eq!(store.load(1).await.unwrap().unwrap(), two_parcel_plan());
    }

    #[tokio::test]
    async fn test_missing_plan() {
        let store = Arc::new(InMemoryStore::new());
        let err = reconciler(store).reconcile(42, &relocated()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::PlanNotFound(42)));
    }

    struct ReadOnlyStore(InMemoryStore);

    #[async_trait]
    impl PlanStore for ReadOnlyStore {
        async fn load(&self, plan_id: PlanId) -> Result<Option<Plan>, StoreError> {
            self.0.load(plan_id).await
        }

        async fn save(&self, _plan: &Plan) -> Result<(), StoreError> {
            Err(StoreError::Internal("read-only".to_string()))
        }

        async fn list(&self) -> Result<Vec<PlanId>, StoreError> {
            self.0.list().await
        }
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_plan_untouched() {
        let store = Arc::new(ReadOnlyStore(InMemoryStore::with_plans([two_parcel_plan()])));
        let err = reconciler(store.clone())
            .reconcile(1, &relocated())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Store(_)));
        assert_eq!(store.load(1).await.unwrap().unwrap(), two_parcel_plan());
    }
}
