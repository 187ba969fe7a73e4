//! Plan persistence
//!
//! A plan is always saved whole, so a single `save` is the commit point for
//! every mutation built on a working copy.

mod file;
mod locks;

pub use file::JsonFileStore;
pub use locks::{PlanGuard, PlanLocks};

use crate::error::StoreError;
use crate::model::{Plan, PlanId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Load a plan by id
    async fn load(&self, plan_id: PlanId) -> Result<Option<Plan>, StoreError>;

    /// Insert or replace a plan in one step
    async fn save(&self, plan: &Plan) -> Result<(), StoreError>;

    /// Ids of all stored plans, ascending
    async fn list(&self) -> Result<Vec<PlanId>, StoreError>;
}

/// In-memory implementation for tests and one-shot runs
pub struct InMemoryStore {
    plans: RwLock<HashMap<PlanId, Plan>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_plans(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: RwLock::new(plans.into_iter().map(|p| (p.id, p)).collect()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanStore for InMemoryStore {
    async fn load(&self, plan_id: PlanId) -> Result<Option<Plan>, StoreError> {
        let plans = self
            .plans
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(plans.get(&plan_id).cloned())
    }

    async fn save(&self, plan: &Plan) -> Result<(), StoreError> {
        let mut plans = self
            .plans
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PlanId>, StoreError> {
        let plans = self
            .plans
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut ids: Vec<PlanId> = plans.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
