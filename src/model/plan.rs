use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type PlanId = u64;
pub type ParcelId = u64;
pub type CropSnapshotId = u64;
pub type AllocationId = u64;
/// Identifier of a crop in the master catalog
pub type CropId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    #[default]
    Pending,
    Optimizing,
    Completed,
    Failed,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStatus::Pending => write!(f, "pending"),
            PlanStatus::Optimizing => write!(f, "optimizing"),
            PlanStatus::Completed => write!(f, "completed"),
            PlanStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Plan-scoped land unit
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Parcel {
    pub id: ParcelId,

    #[serde(default)]
    pub name: String,

    pub area: f64,

    #[serde(default)]
    pub daily_fixed_cost: f64,
}

/// Plan-scoped copy of a master crop's commercial attributes
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CropSnapshot {
    pub id: CropSnapshotId,

    /// Master catalog crop this snapshot was taken from
    pub crop_id: CropId,

    pub name: String,

    #[serde(default)]
    pub variety: Option<String>,

    #[serde(default)]
    pub area_per_unit: f64,

    #[serde(default)]
    pub revenue_per_area: f64,
}

impl CropSnapshot {
    pub fn display_name(&self) -> String {
        match &self.variety {
            Some(variety) if !variety.is_empty() => format!("{} ({})", self.name, variety),
            _ => self.name.clone(),
        }
    }
}

/// A crop placed on a parcel for a date range
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub parcel_id: ParcelId,
    pub crop_snapshot_id: CropSnapshotId,
    pub start_date: NaiveDate,
    pub completion_date: NaiveDate,
    pub area: f64,
    pub cost: f64,
    pub revenue: f64,

    #[serde(default)]
    pub accumulated_gdd: f64,
}

impl Allocation {
    /// Profit is always derived, never stored.
    pub fn profit(&self) -> f64 {
        self.revenue - self.cost
    }

    /// Inclusive number of days between start and completion
    pub fn growth_days(&self) -> i64 {
        (self.completion_date - self.start_date).num_days() + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PlanRollup {
    #[serde(default)]
    pub total_cost: f64,

    #[serde(default)]
    pub total_revenue: f64,

    #[serde(default)]
    pub total_profit: f64,

    #[serde(default)]
    pub optimization_time: Option<f64>,

    #[serde(default)]
    pub algorithm_used: Option<String>,

    #[serde(default)]
    pub is_optimal: Option<bool>,

    #[serde(default)]
    pub summary: Option<serde_json::Value>,
}

/// Aggregate root of one cultivation-planning exercise
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Plan {
    pub id: PlanId,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub status: PlanStatus,

    #[serde(default)]
    pub planning_start: Option<NaiveDate>,

    #[serde(default)]
    pub planning_end: Option<NaiveDate>,

    #[serde(default)]
    pub parcels: Vec<Parcel>,

    #[serde(default)]
    pub crops: Vec<CropSnapshot>,

    #[serde(default)]
    pub allocations: Vec<Allocation>,

    #[serde(default)]
    pub rollup: PlanRollup,

    #[serde(default)]
    next_allocation_id: AllocationId,

    #[serde(default)]
    next_crop_snapshot_id: CropSnapshotId,
}

impl Plan {
    pub fn new(id: PlanId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn parcel(&self, id: ParcelId) -> Option<&Parcel> {
        self.parcels.iter().find(|p| p.id == id)
    }

    pub fn crop_snapshot(&self, id: CropSnapshotId) -> Option<&CropSnapshot> {
        self.crops.iter().find(|c| c.id == id)
    }

    pub fn crop_snapshot_for_master(&self, crop_id: CropId) -> Option<&CropSnapshot> {
        self.crops.iter().find(|c| c.crop_id == crop_id)
    }

    pub fn total_area(&self) -> f64 {
        self.parcels.iter().map(|p| p.area).sum()
    }

    /// Allocate an id for a new allocation row.
    pub fn next_allocation_id(&mut self) -> AllocationId {
        let floor = self.allocations.iter().map(|a| a.id).max().unwrap_or(0);
        self.next_allocation_id = self.next_allocation_id.max(floor) + 1;
        self.next_allocation_id
    }

    /// Add a crop snapshot and return its id.
    pub fn add_crop_snapshot(&mut self, mut snapshot: CropSnapshot) -> CropSnapshotId {
        let floor = self.crops.iter().map(|c| c.id).max().unwrap_or(0);
        self.next_crop_snapshot_id = self.next_crop_snapshot_id.max(floor) + 1;
        snapshot.id = self.next_crop_snapshot_id;
        self.crops.push(snapshot);
        self.next_crop_snapshot_id
    }

    /// Drop every allocation, keeping their ids retired.
    pub fn clear_allocations(&mut self) -> usize {
        let floor = self.allocations.iter().map(|a| a.id).max().unwrap_or(0);
        self.next_allocation_id = self.next_allocation_id.max(floor);
        let removed = self.allocations.len();
        self.allocations.clear();
        removed
    }

    /// Keep only crop snapshots matching `keep`; returns the removed ids.
    pub fn retain_crops<F>(&mut self, mut keep: F) -> Vec<CropSnapshotId>
    where
        F: FnMut(&CropSnapshot) -> bool,
    {
        let floor = self.crops.iter().map(|c| c.id).max().unwrap_or(0);
        self.next_crop_snapshot_id = self.next_crop_snapshot_id.max(floor);

        let mut removed = Vec::new();
        self.crops.retain(|crop| {
            let kept = keep(crop);
            if !kept {
                removed.push(crop.id);
            }
            kept
        });
        removed
    }

    pub fn allocations_on(&self, parcel_id: ParcelId) -> impl Iterator<Item = &Allocation> {
        self.allocations
            .iter()
            .filter(move |a| a.parcel_id == parcel_id)
    }
}
