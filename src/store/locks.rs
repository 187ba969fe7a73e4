use crate::error::StoreError;
use crate::model::PlanId;
use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// One async mutex per plan
///
/// Holding a plan's guard serializes reconciliation and whole pipeline runs
/// for that plan; other plans proceed independently. With a lock directory the
/// guard also holds an exclusive lock on `plan-<id>.lock`, which serializes
/// separate processes sharing one store.
#[derive(Default)]
pub struct PlanLocks {
    locks: Mutex<HashMap<PlanId, Arc<AsyncMutex<()>>>>,
    dir: Option<PathBuf>,
}

/// Releases the plan when dropped
pub struct PlanGuard<'a> {
    owner: &'a PlanLocks,
    plan_id: PlanId,
    guard: Option<OwnedMutexGuard<()>>,
    file: Option<File>,
}

impl PlanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            locks: Mutex::default(),
            dir: Some(dir.into()),
        }
    }

    pub async fn lock(&self, plan_id: PlanId) -> Result<PlanGuard<'_>, StoreError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(plan_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let mut guard = PlanGuard {
            owner: self,
            plan_id,
            guard: Some(lock.lock_owned().await),
            file: None,
        };

        if let Some(dir) = &self.dir {
            let path = dir.join(format!("plan-{}.lock", plan_id));
            let file = tokio::task::spawn_blocking(move || lock_file(&path))
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))??;
            guard.file = Some(file);
        }

        Ok(guard)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for PlanGuard<'_> {
    fn drop(&mut self) {
        self.file.take();
        self.guard.take();

        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.plan_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.plan_id);
        }
    }
}

/// Open `path` and block until an exclusive lock on it is held.
///
/// The lock lasts as long as the returned file stays open.
pub(crate) fn lock_file(path: &Path) -> Result<File, StoreError> {
    let lock_err = |e: std::io::Error| StoreError::Lock {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(lock_err)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(lock_err)?;
    FileExt::lock_exclusive(&file).map_err(lock_err)?;
    debug!("Locked {}", path.display());
    Ok(file)
}
