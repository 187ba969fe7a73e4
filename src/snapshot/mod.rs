//! Engine-ready view of a plan's current allocations
//!
//! Snapshots are rebuilt for every engine call and never persisted. Every
//! parcel appears in the output, even when nothing is planted on it, so the
//! engine always sees the full land inventory.

mod period;

pub use period::{effective_planning_period, planning_horizon};

use crate::model::{Allocation, AllocationId, Plan};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

/// Allocation snapshot document (`--current-allocation` / `--allocation`)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    pub optimization_result: SnapshotBody,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SnapshotBody {
    pub optimization_id: String,
    pub total_cost: f64,
    pub total_revenue: f64,
    pub total_profit: f64,
    pub field_schedules: Vec<ParcelSchedule>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParcelSchedule {
    pub field_id: u64,
    pub field_name: String,
    pub area: f64,
    pub used_area: f64,
    pub total_cost: f64,
    pub total_revenue: f64,
    pub total_profit: f64,
    pub utilization_rate: f64,
    pub allocations: Vec<SnapshotAllocation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SnapshotAllocation {
    pub allocation_id: AllocationId,
    /// Master crop id, the id space the engine works in
    pub crop_id: String,
    pub crop_name: String,
    pub variety: Option<String>,
    pub area_used: f64,
    pub start_date: String,
    pub completion_date: String,
    pub growth_days: i64,
    pub accumulated_gdd: f64,
    pub total_cost: f64,
    pub expected_revenue: f64,
    pub profit: f64,
}

impl Snapshot {
    pub fn schedules(&self) -> &[ParcelSchedule] {
        &self.optimization_result.field_schedules
    }

    pub fn allocation_count(&self) -> usize {
        self.schedules().iter().map(|s| s.allocations.len()).sum()
    }

    /// Short content hash, stable for identical snapshots
    pub fn fingerprint(&self) -> String {
        let serialized = serde_json::to_vec(self).unwrap_or_default();
        let hash = Sha256::digest(&serialized);
        format!("{:x}", hash)[..12].to_string()
    }
}

/// Build the allocation snapshot for `plan`, leaving out `exclude` ids.
pub fn build_snapshot(plan: &Plan, exclude: &HashSet<AllocationId>) -> Snapshot {
    let mut field_schedules = Vec::with_capacity(plan.parcels.len());

    for parcel in &plan.parcels {
        let mut current: Vec<&Allocation> = plan
            .allocations_on(parcel.id)
            .filter(|a| !exclude.contains(&a.id))
            .collect();
        current.sort_by_key(|a| (a.start_date, a.id));

        let allocations: Vec<SnapshotAllocation> = current
            .into_iter()
            .map(|a| snapshot_allocation(plan, a))
            .collect();

        let used_area: f64 = allocations.iter().map(|a| a.area_used).sum();
        let total_cost: f64 = allocations.iter().map(|a| a.total_cost).sum();
        let total_revenue: f64 = allocations.iter().map(|a| a.expected_revenue).sum();
        let utilization_rate = if parcel.area > 0.0 {
            used_area / parcel.area
        } else {
            0.0
        };

        field_schedules.push(ParcelSchedule {
            field_id: parcel.id,
            field_name: parcel.name.clone(),
            area: parcel.area,
            used_area,
            total_cost,
            total_revenue,
            total_profit: total_revenue - total_cost,
            utilization_rate,
            allocations,
        });
    }

    let total_cost = field_schedules.iter().map(|s| s.total_cost).sum();
    let total_revenue = field_schedules.iter().map(|s| s.total_revenue).sum();
    let total_profit = field_schedules.iter().map(|s| s.total_profit).sum();

    let snapshot = Snapshot {
        optimization_result: SnapshotBody {
            optimization_id: format!("opt_{}", plan.id),
            total_cost,
            total_revenue,
            total_profit,
            field_schedules,
        },
    };

    debug!(
        "Built snapshot for plan {}: {} parcels, {} allocations ({} excluded)",
        plan.id,
        snapshot.schedules().len(),
        snapshot.allocation_count(),
        exclude.len()
    );

    snapshot
}

fn snapshot_allocation(plan: &Plan, allocation: &Allocation) -> SnapshotAllocation {
    let crop = plan.crop_snapshot(allocation.crop_snapshot_id);

    SnapshotAllocation {
        allocation_id: allocation.id,
        crop_id: crop.map(|c| c.crop_id.to_string()).unwrap_or_default(),
        crop_name: crop.map(|c| c.display_name()).unwrap_or_default(),
        variety: crop.and_then(|c| c.variety.clone()),
        area_used: allocation.area,
        start_date: allocation.start_date.to_string(),
        completion_date: allocation.completion_date.to_string(),
        growth_days: allocation.growth_days(),
        accumulated_gdd: allocation.accumulated_gdd,
        total_cost: allocation.cost,
        expected_revenue: allocation.revenue,
        profit: allocation.profit(),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_every_parcel_is_emitted() {
        let mut plan = two_parcel_plan();
        plan.parcels.push(parcel(3, 40.0));

        let snapshot = build_snapshot(&plan, &HashSet::new());
        let schedules = snapshot.schedules();

        assert_eq!(schedules.len(), 3);
        assert_eq!(schedules[0].allocations.len(), 1);
        assert!(schedules[1].allocations.is_empty());
        assert!(schedules[2].allocations.is_empty());
        assert_eq!(schedules[2].utilization_rate, 0.0);
    }

    #[test]
    fn test_aggregates_are_derived() {
        let plan = two_parcel_plan();
        let snapshot = build_snapshot(&plan, &HashSet::new());
        let first = &snapshot.schedules()[0];

        assert_eq!(first.used_area, 50.0);
        assert_eq!(first.utilization_rate, 0.5);
        assert_eq!(first.total_profit, 500.0);
        assert_eq!(first.allocations[0].crop_id, "101");
        assert_eq!(first.allocations[0].growth_days, 122);
        assert_eq!(snapshot.optimization_result.total_profit, 500.0);
        assert_eq!(snapshot.optimization_result.optimization_id, "opt_1");
    }

    #[test]
    fn test_excluded_allocations_are_left_out() {
        let plan = two_parcel_plan();
        let exclude: HashSet<u64> = [1].into_iter().collect();
        let snapshot = build_snapshot(&plan, &exclude);

        assert_eq!(snapshot.schedules().len(), 2);
        assert_eq!(snapshot.allocation_count(), 0);
        assert_eq!(snapshot.optimization_result.total_cost, 0.0);
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let plan = two_parcel_plan();
        let exclude = HashSet::new();
        let first = build_snapshot(&plan, &exclude);
        let second = build_snapshot(&plan, &exclude);

        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_plan_without_parcels_yields_empty_schedule_list() {
        let plan = Plan::new(9, "empty");
        let snapshot = build_snapshot(&plan, &HashSet::new());
        assert!(snapshot.schedules().is_empty());
        assert_eq!(snapshot.fingerprint().len(), 12);
    }
}
