use crate::cli::{print_json, SnapshotArgs};
use planbridge::config::Config;
use planbridge::snapshot::build_snapshot;
use planbridge::store::{JsonFileStore, PlanStore};
use std::collections::HashSet;

pub async fn execute(config: &Config, args: SnapshotArgs) -> anyhow::Result<()> {
    let store = JsonFileStore::new(config.store.path.clone());
    let plan = store
        .load(args.plan_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Plan {} not found in {:?}", args.plan_id, store.path()))?;

    let exclude: HashSet<_> = args.exclude.into_iter().collect();
    let snapshot = build_snapshot(&plan, &exclude);
    eprintln!(
        "Snapshot {}: {} parcel(s), {} allocation(s)",
        snapshot.fingerprint(),
        snapshot.schedules().len(),
        snapshot.allocation_count()
    );
    print_json(&snapshot)
}

pub async fn list(config: &Config) -> anyhow::Result<()> {
    let store = JsonFileStore::new(config.store.path.clone());
    for plan_id in store.list().await? {
        println!("{}", plan_id);
    }
    Ok(())
}
