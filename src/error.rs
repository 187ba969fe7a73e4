use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::model::{EngineId, PlanId};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Plan {0} not found")]
    PlanNotFound(PlanId),

    #[error("Crop {0} not found in catalog")]
    CropNotFound(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// How a failed run should be presented to the user or operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The engine found no feasible placement; inputs can be relaxed
    Infeasible,
    /// Engine or transport failure; retrying may help
    Transient,
    /// Broken invariant or contract violation on our side
    Internal,
    /// The request itself was malformed
    InvalidRequest,
}

impl PipelineError {
    pub fn outcome(&self) -> FailureOutcome {
        match self {
            PipelineError::Engine(EngineError::NoAllocationCandidates(_)) => {
                FailureOutcome::Infeasible
            }
            PipelineError::Engine(EngineError::CallerContract(_)) => FailureOutcome::Internal,
            PipelineError::Engine(_) => FailureOutcome::Transient,
            PipelineError::Store(_) => FailureOutcome::Transient,
            PipelineError::Reconcile(ReconcileError::Store(_)) => FailureOutcome::Transient,
            PipelineError::Reconcile(_) | PipelineError::Codec(_) => FailureOutcome::Internal,
            PipelineError::PlanNotFound(_)
            | PipelineError::CropNotFound(_)
            | PipelineError::InvalidRequest(_) => FailureOutcome::InvalidRequest,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid engine call: {0}")]
    CallerContract(#[from] CallerContractError),

    #[error("Engine transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine reported failure: {0}")]
    Execution(String),

    #[error("Failed to parse engine output: {0}")]
    Parse(String),

    #[error("No valid allocation candidates: {0}")]
    NoAllocationCandidates(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CallerContractError {
    #[error("'{command}' requires --{flag}")]
    MissingArgument { command: String, flag: String },

    #[error("'{command}' does not accept --{flag}")]
    UnknownArgument { command: String, flag: String },

    #[error("--{flag} for '{command}' expects {expected}, got '{value}'")]
    InvalidValue {
        command: String,
        flag: String,
        expected: &'static str,
        value: String,
    },

    #[error("Unsupported engine command: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    EmptyInput(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to start engine '{binary}': {source}")]
    ProcessUnstartable {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine daemon unavailable at '{socket}': {reason}")]
    DaemonUnavailable { socket: PathBuf, reason: String },

    #[error("Malformed daemon reply: {0}")]
    MalformedReply(String),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Interaction rule {source_group}->{target_group} has negative impact ratio {ratio}")]
    NegativeImpactRatio {
        source_group: String,
        target_group: String,
        ratio: f64,
    },

    #[error("Failed to write exchange file '{role}': {source}")]
    WriteFile {
        role: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Optimizer result contains no parcel schedules")]
    EmptyResult,

    #[error("Duplicate allocation ids in optimizer result: {}", join_ids(.0))]
    DuplicateAllocationIds(Vec<EngineId>),

    #[error("Plan {0} not found")]
    PlanNotFound(PlanId),

    #[error("Parcel {parcel_id} referenced by the optimizer is not part of plan {plan_id}")]
    UnknownParcel { plan_id: PlanId, parcel_id: EngineId },

    #[error("Crop {0} referenced by the optimizer is not in the catalog")]
    UnknownCrop(EngineId),

    #[error("Crop {crop_id} referenced by the optimizer has no snapshot in plan {plan_id}")]
    UnknownPlanCrop { plan_id: PlanId, crop_id: EngineId },

    #[error("Invalid {field} '{value}' for allocation {allocation}")]
    InvalidDate {
        field: &'static str,
        value: String,
        allocation: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

fn join_ids(ids: &[EngineId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read store '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write store '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to lock '{path}': {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt store data: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Store internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to deliver event: {0}")]
    Delivery(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read crop catalog '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse crop catalog: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Duplicate crop id {0} in catalog")]
    DuplicateCrop(u64),
}
