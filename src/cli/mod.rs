pub mod engine;
pub mod plan;
pub mod query;
pub mod schema;
pub mod snapshot;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use planbridge::catalog::InMemoryCatalog;
use planbridge::codec::WeatherSeries;
use planbridge::config::{Config, ENGINE_PATH_ENV};
use planbridge::gateway::Gateway;
use planbridge::model::{AllocationId, CropId, ParcelId, PlanId};
use planbridge::notify::JsonLinesNotifier;
use planbridge::pipeline::PlanPipeline;
use planbridge::store::{JsonFileStore, PlanLocks};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "planbridge")]
#[command(
    author,
    version,
    about = "Run cultivation plans through the crop-allocation optimizer"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose/debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "planbridge.yaml")]
    pub config: PathBuf,

    /// Override the engine binary
    #[arg(long, global = true, env = ENGINE_PATH_ENV)]
    pub engine_bin: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Optimize a plan from scratch
    Allocate(AllocateArgs),

    /// Apply moves to a plan's current allocations
    Adjust(AdjustArgs),

    /// List placement options for a crop
    Candidates(CandidatesArgs),

    /// Add a crop at its most profitable placement
    AddCrop(AddCropArgs),

    /// Forecast weather from historical records
    Predict(PredictArgs),

    /// Report growth progress for a crop
    Progress(ProgressArgs),

    /// Print the allocation snapshot sent to the engine
    Snapshot(SnapshotArgs),

    /// List stored plan ids
    Plans,

    /// Invoke an engine command directly, e.g. `engine -- optimize period --crop-file ...`
    Engine(EngineArgs),

    /// Print JSON Schema for config validation
    Schema(SchemaArgs),
}

#[derive(Args, Clone)]
pub struct SchemaArgs {
    /// Print the engine command argument table instead
    #[arg(long)]
    pub engine: bool,
}

#[derive(Args, Clone)]
pub struct TuningArgs {
    /// Interaction rules file (`{"rules": [...]}` or a bare list)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Optimization objective (defaults to config)
    #[arg(long)]
    pub objective: Option<String>,

    /// Engine time limit in seconds
    #[arg(long)]
    pub max_time: Option<u64>,

    /// Let the engine solve in parallel
    #[arg(long)]
    pub parallel: bool,
}

#[derive(Args, Clone)]
pub struct AllocateArgs {
    pub plan_id: PlanId,

    /// Weather data file
    #[arg(long)]
    pub weather: PathBuf,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Clone)]
pub struct AdjustArgs {
    pub plan_id: PlanId,

    /// Moves file (`{"moves": [...]}` or a bare list)
    #[arg(long)]
    pub moves: PathBuf,

    /// Weather data file
    #[arg(long)]
    pub weather: PathBuf,

    /// Allocations to leave out of the snapshot (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<AllocationId>,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Clone)]
pub struct CandidatesArgs {
    pub plan_id: PlanId,

    /// Master crop id
    #[arg(long)]
    pub crop: CropId,

    /// Weather data file
    #[arg(long)]
    pub weather: PathBuf,
}

#[derive(Args, Clone)]
pub struct AddCropArgs {
    pub plan_id: PlanId,

    /// Master crop id
    #[arg(long)]
    pub crop: CropId,

    /// Preferred parcel
    #[arg(long)]
    pub parcel: Option<ParcelId>,

    /// Weather data file
    #[arg(long)]
    pub weather: PathBuf,
}

#[derive(Args, Clone)]
pub struct PredictArgs {
    /// Historical weather file
    #[arg(long)]
    pub input: PathBuf,

    /// Days to forecast
    #[arg(long, default_value_t = 30)]
    pub days: u32,

    /// Prediction model
    #[arg(long, default_value = "lightgbm")]
    pub model: String,

    /// Metrics to predict (comma-separated, engine default when omitted)
    #[arg(long)]
    pub metrics: Option<String>,
}

#[derive(Args, Clone)]
pub struct ProgressArgs {
    /// Master crop id
    #[arg(long)]
    pub crop: CropId,

    /// Planting date (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: NaiveDate,

    /// Weather data file
    #[arg(long)]
    pub weather: PathBuf,
}

#[derive(Args, Clone)]
pub struct SnapshotArgs {
    pub plan_id: PlanId,

    /// Allocations to leave out (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<AllocationId>,
}

#[derive(Args, Clone)]
pub struct EngineArgs {
    /// Command words followed by `--flag value` pairs
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub tokens: Vec<String>,
}

/// Load config and apply CLI overrides
pub fn load_config(path: &Path, engine_bin: Option<PathBuf>) -> anyhow::Result<Config> {
    info!("Loading config from {:?}", path);
    let mut config = Config::load_or_default(path)?;
    config.resolve_engine_binary(engine_bin);
    config.validate()?;
    Ok(config)
}

pub fn build_pipeline(config: &Config) -> anyhow::Result<PlanPipeline> {
    let catalog = InMemoryCatalog::load(&config.catalog.path)
        .with_context(|| format!("loading crop catalog {:?}", config.catalog.path))?;
    info!(
        "Loaded {} crop(s); engine via {}",
        catalog.len(),
        config.engine.transport
    );

    let store = JsonFileStore::new(config.store.path.clone());
    let locks = PlanLocks::in_dir(store.plan_lock_dir());

    Ok(PlanPipeline::new(
        Gateway::new(config),
        Arc::new(store),
        Arc::new(catalog),
        Arc::new(JsonLinesNotifier::stderr()),
        config.optimization.clone(),
    )
    .with_plan_locks(locks))
}

pub fn load_weather(path: &Path) -> anyhow::Result<WeatherSeries> {
    WeatherSeries::load(path).with_context(|| format!("reading weather file {:?}", path))
}

/// Read a JSON document that is either a bare list or a list under `key`.
pub fn load_list<T: serde::de::DeserializeOwned>(
    path: &Path,
    key: &str,
) -> anyhow::Result<Vec<T>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let value: Value =
        serde_json::from_str(&content).with_context(|| format!("parsing {:?}", path))?;

    let list = match value {
        Value::Object(mut root) => match root.remove(key) {
            Some(inner) => inner,
            None => Value::Object(root),
        },
        other => other,
    };
    serde_json::from_value(list)
        .with_context(|| format!("expected a list of {} in {:?}", key, path))
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
