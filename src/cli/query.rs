use crate::cli::plan::failed;
use crate::cli::{build_pipeline, load_weather, print_json, PredictArgs, ProgressArgs};
use anyhow::Context;
use planbridge::config::Config;

pub async fn predict(config: &Config, args: PredictArgs) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading history file {:?}", args.input))?;
    let history: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing history file {:?}", args.input))?;

    let pipeline = build_pipeline(config)?;
    let prediction = pipeline
        .predict(&history, args.days, &args.model, args.metrics.as_deref())
        .await
        .map_err(failed)?;
    print_json(&prediction)
}

pub async fn progress(config: &Config, args: ProgressArgs) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config)?;
    let weather = load_weather(&args.weather)?;

    let report = pipeline
        .progress(args.crop, args.start_date, &weather)
        .await
        .map_err(failed)?;
    print_json(&report)
}
