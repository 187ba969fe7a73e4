mod moves;
mod plan;
mod result;

pub use moves::{MoveAction, MoveInstruction};
pub use plan::{
    Allocation, AllocationId, CropId, CropSnapshot, CropSnapshotId, Parcel, ParcelId, Plan,
    PlanId, PlanRollup, PlanStatus,
};
pub use result::{EngineAllocation, EngineId, OptimizerResult, ParcelScheduleResult};
