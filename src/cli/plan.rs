use crate::cli::{
    build_pipeline, load_list, load_weather, print_json, AddCropArgs, AdjustArgs, AllocateArgs,
    CandidatesArgs, TuningArgs,
};
use planbridge::codec::InteractionRule;
use planbridge::config::Config;
use planbridge::error::{FailureOutcome, PipelineError};
use planbridge::model::MoveInstruction;
use planbridge::pipeline::{AdjustOutcome, PipelineOptions};
use tracing::info;

pub async fn allocate(config: &Config, args: AllocateArgs) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config)?;
    let weather = load_weather(&args.weather)?;
    let options = options_from(&args.tuning)?;

    let report = pipeline
        .allocate(args.plan_id, &weather, &options)
        .await
        .map_err(failed)?;
    print_json(&report)
}

pub async fn adjust(config: &Config, args: AdjustArgs) -> anyhow::Result<()> {
    let moves: Vec<MoveInstruction> = load_list(&args.moves, "moves")?;
    let pipeline = build_pipeline(config)?;
    let weather = load_weather(&args.weather)?;

    let mut options = options_from(&args.tuning)?;
    options.exclude_allocation_ids = args.exclude.into_iter().collect();

    match pipeline
        .adjust(args.plan_id, &moves, &weather, &options)
        .await
        .map_err(failed)?
    {
        AdjustOutcome::Skipped => {
            info!("No moves given; plan {} unchanged", args.plan_id);
            Ok(())
        }
        AdjustOutcome::Applied(report) => print_json(&report),
    }
}

pub async fn candidates(config: &Config, args: CandidatesArgs) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config)?;
    let weather = load_weather(&args.weather)?;

    let candidates = pipeline
        .candidates(args.plan_id, args.crop, &weather)
        .await
        .map_err(failed)?;
    print_json(&candidates)
}

pub async fn add_crop(config: &Config, args: AddCropArgs) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config)?;
    let weather = load_weather(&args.weather)?;

    let report = pipeline
        .add_crop(args.plan_id, args.crop, args.parcel, &weather)
        .await
        .map_err(failed)?;
    print_json(&report)
}

fn options_from(tuning: &TuningArgs) -> anyhow::Result<PipelineOptions> {
    let interaction_rules: Vec<InteractionRule> = match &tuning.rules {
        Some(path) => load_list(path, "rules")?,
        None => Vec::new(),
    };

    Ok(PipelineOptions {
        interaction_rules,
        objective: tuning.objective.clone(),
        max_time_sec: tuning.max_time,
        enable_parallel: tuning.parallel.then_some(true),
        ..PipelineOptions::default()
    })
}

/// Attach a hint telling the user what to do about a failed run.
pub fn failed(err: PipelineError) -> anyhow::Error {
    let hint = match err.outcome() {
        FailureOutcome::Infeasible => "no feasible placement; relax the inputs and try again",
        FailureOutcome::Transient => "engine or storage failure; retrying may help",
        FailureOutcome::Internal => "internal error",
        FailureOutcome::InvalidRequest => "invalid request",
    };
    anyhow::Error::new(err).context(hint)
}
