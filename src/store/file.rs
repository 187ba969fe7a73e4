use super::locks::lock_file;
use super::PlanStore;
use crate::error::StoreError;
use crate::model::{Plan, PlanId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    plans: Vec<Plan>,
}

/// Whole-file JSON store
///
/// Every save rewrites the file through a temp file in the same directory and
/// renames it into place, so readers never observe a half-written store. The
/// re-read and rename happen under an exclusive lock on `<path>.lock`, so
/// processes saving different plans do not drop each other's updates.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file guarding read-modify-write cycles
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Directory for the per-plan lock files of this store
    pub fn plan_lock_dir(&self) -> PathBuf {
        self.path.with_extension("locks")
    }

    fn read_file(path: &Path) -> Result<StoreFile, StoreError> {
        if !path.exists() {
            return Ok(StoreFile::default());
        }

        let content = fs::read_to_string(path).map_err(|e| StoreError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(StoreFile::default());
        }

        Ok(serde_json::from_str(&content)?)
    }

    fn write_file(path: &Path, file: &StoreFile) -> Result<(), StoreError> {
        let write_err = |e: std::io::Error| StoreError::Write {
            path: path.to_path_buf(),
            source: e,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(write_err)?;

        let json = serde_json::to_string_pretty(file)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || f(path))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }
}

#[async_trait]
impl PlanStore for JsonFileStore {
    async fn load(&self, plan_id: PlanId) -> Result<Option<Plan>, StoreError> {
        self.blocking(move |path| {
            let file = Self::read_file(&path)?;
            Ok(file.plans.into_iter().find(|p| p.id == plan_id))
        })
        .await
    }

    async fn save(&self, plan: &Plan) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let plan = plan.clone();
        let lock_path = self.lock_path();

        self.blocking(move |path| {
            let _lock = lock_file(&lock_path)?;
            let mut file = Self::read_file(&path)?;
            match file.plans.iter_mut().find(|p| p.id == plan.id) {
                Some(existing) => *existing = plan,
                None => file.plans.push(plan),
            }
            file.plans.sort_by_key(|p| p.id);
            Self::write_file(&path, &file)?;
            debug!("Saved {} plan(s) to {}", file.plans.len(), path.display());
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<PlanId>, StoreError> {
        self.blocking(|path| {
            let file = Self::read_file(&path)?;
            let mut ids: Vec<PlanId> = file.plans.iter().map(|p| p.id).collect();
            ids.sort_unstable();
            Ok(ids)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("plans.json"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.load(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_whole_plan() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("plans.json"));

        store.save(&Plan::new(2, "second")).await.unwrap();
        store.save(&Plan::new(1, "first")).await.unwrap();
        store.save(&Plan::new(2, "renamed")).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec![1, 2]);
        assert_eq!(store.load(2).await.unwrap().unwrap().name, "renamed");

        let mut leftovers: Vec<String> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        leftovers.sort();
        assert_eq!(leftovers, vec!["plans.json", "plans.json.lock"]);
    }

    #[tokio::test]
    async fn test_separate_handles_keep_every_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans.json");

        let saves: Vec<_> = (1..=12)
            .map(|id| {
                let store = JsonFileStore::new(&path);
                tokio::spawn(async move { store.save(&Plan::new(id, "plan")).await })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }

        let store = JsonFileStore::new(&path);
        assert_eq!(store.list().await.unwrap(), (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_save_waits_for_store_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::new(dir.path().join("plans.json")));
        let held = lock_file(&store.lock_path()).unwrap();

        let save = {
            let store = store.clone();
            tokio::spawn(async move { store.save(&Plan::new(1, "first")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!save.is_finished());

        drop(held);
        save.await.unwrap().unwrap();
        assert_eq!(store.list().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.load(1).await.unwrap_err(),
            StoreError::Corrupt(_)
        ));
    }
}
