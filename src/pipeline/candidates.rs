use super::{PipelineOptions, PlanPipeline};
use crate::codec::{ExchangeFileSet, WeatherSeries};
use crate::error::{EngineError, PipelineError, ReconcileError};
use crate::extract::{decode_candidates, reported_failure, Candidate};
use crate::gateway::EngineCommand;
use crate::model::{CropId, MoveInstruction, ParcelId, Plan, PlanId};
use crate::reconcile::ReconcileReport;
use crate::snapshot::build_snapshot;
use crate::store::PlanStore;
use chrono::{Datelike, Local, NaiveDate};
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl PlanPipeline {
    /// Placement options for one crop on the plan's parcels.
    ///
    /// Works on a copy of the plan; a crop missing from the plan is added to
    /// the copy only.
    pub async fn candidates(
        &self,
        plan_id: PlanId,
        crop_id: CropId,
        weather: &WeatherSeries,
    ) -> Result<Vec<Candidate>, PipelineError> {
        let _guard = self.locks.lock(plan_id).await?;
        let mut plan = self.load_plan(plan_id).await?;
        self.ensure_crop_snapshot(&mut plan, crop_id)?;

        self.run_candidates(&plan, crop_id, weather).await
    }

    /// Add a crop to the plan at the best available placement.
    ///
    /// The plan is restored when no placement is found or the adjust fails.
    pub async fn add_crop(
        &self,
        plan_id: PlanId,
        crop_id: CropId,
        preferred_parcel: Option<ParcelId>,
        weather: &WeatherSeries,
    ) -> Result<ReconcileReport, PipelineError> {
        let _guard = self.locks.lock(plan_id).await?;
        let original = self.load_plan(plan_id).await?;

        if let Some(parcel_id) = preferred_parcel {
            if original.parcel(parcel_id).is_none() {
                return Err(PipelineError::InvalidRequest(format!(
                    "parcel {} is not in plan {}",
                    parcel_id, plan_id
                )));
            }
        }

        let mut plan = original.clone();
        let added = self.ensure_crop_snapshot(&mut plan, crop_id)?;
        if added {
            self.store.save(&plan).await?;
        }

        info!("Adding crop {} to plan {}", crop_id, plan_id);
        let result = self
            .place_crop(&plan, crop_id, preferred_parcel, weather)
            .await;

        if result.is_err() && added {
            if let Err(e) = self.store.save(&original).await {
                warn!("Failed to restore plan {} after add_crop: {}", plan_id, e);
            }
        }

        self.finish(&plan, "add_crop", result).await
    }

    async fn place_crop(
        &self,
        plan: &Plan,
        crop_id: CropId,
        preferred_parcel: Option<ParcelId>,
        weather: &WeatherSeries,
    ) -> Result<ReconcileReport, PipelineError> {
        let candidates = match self.run_candidates(plan, crop_id, weather).await {
            Ok(candidates) => candidates,
            Err(PipelineError::Engine(EngineError::NoAllocationCandidates(msg))) => {
                debug!("Engine found no candidates for crop {}: {}", crop_id, msg);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let today = Local::now().date_naive();
        let best = select_best_candidate(&candidates, preferred_parcel, today).ok_or_else(|| {
            EngineError::NoAllocationCandidates(format!(
                "no upcoming placement found for crop {} in plan {}",
                crop_id, plan.id
            ))
        })?;

        let parcel = plan
            .parcels
            .iter()
            .find(|p| best.field_id.matches(p.id))
            .ok_or_else(|| ReconcileError::UnknownParcel {
                plan_id: plan.id,
                parcel_id: best.field_id.clone(),
            })?;
        let start = best.start().ok_or_else(|| {
            EngineError::Parse(format!("candidate start date {:?}", best.start_date))
        })?;
        let master = self
            .catalog
            .crop(crop_id)
            .ok_or_else(|| PipelineError::CropNotFound(crop_id.to_string()))?;

        info!(
            "Best candidate for crop {}: parcel {} from {} (profit {:?})",
            crop_id, parcel.id, start, best.profit
        );

        let placement = MoveInstruction::add(
            crop_id,
            parcel.id,
            start,
            master.area_per_unit,
            master.variety.clone(),
        );
        self.run_adjust(plan, &[placement], weather, &PipelineOptions::default())
            .await
    }

    async fn run_candidates(
        &self,
        plan: &Plan,
        crop_id: CropId,
        weather: &WeatherSeries,
    ) -> Result<Vec<Candidate>, PipelineError> {
        let (start, end) = candidate_window(plan, Local::now().date_naive());
        let snapshot = build_snapshot(plan, &HashSet::new());

        let mut files = ExchangeFileSet::new();
        let allocation = files.write_json("allocation", &snapshot)?;
        let output = files.reserve_output("candidates")?;

        let args = self
            .write_plan_documents(plan, weather, &PipelineOptions::default(), &mut files)?
            .set("allocation", allocation.display())
            .set("target-crop", crop_id)
            .set("planning-start", start)
            .set("planning-end", end)
            .set("output", output.display())
            .set("format", "json");

        let stdout = self
            .gateway
            .invoke(EngineCommand::OptimizeCandidates, &args)
            .await?;
        if let Some(err) = reported_failure(stdout.trim()) {
            return Err(err.into());
        }

        let content = files
            .read_to_string("candidates")
            .map_err(EngineError::Io)?;
        files.release();

        if content.trim().is_empty() {
            info!("Engine wrote no candidates for crop {}", crop_id);
            return Ok(Vec::new());
        }

        let value = serde_json::from_str(&content)
            .map_err(|e| EngineError::Parse(format!("candidates output: {}", e)))?;
        let candidates = decode_candidates(value)?;
        debug!("Decoded {} candidate(s) for crop {}", candidates.len(), crop_id);
        Ok(candidates)
    }

    /// Add a snapshot of `crop_id` to `plan` when missing; true when added.
    fn ensure_crop_snapshot(&self, plan: &mut Plan, crop_id: CropId) -> Result<bool, PipelineError> {
        if plan.crop_snapshot_for_master(crop_id).is_some() {
            return Ok(false);
        }

        let master = self
            .catalog
            .crop(crop_id)
            .ok_or_else(|| PipelineError::CropNotFound(crop_id.to_string()))?;
        let id = plan.add_crop_snapshot(master.snapshot());
        debug!("Added crop snapshot {} for crop {} to plan {}", id, crop_id, plan.id);
        Ok(true)
    }
}

/// Today through the plan's end, or Dec 31 two years out.
fn candidate_window(plan: &Plan, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let fallback = NaiveDate::from_ymd_opt(today.year() + 2, 12, 31).unwrap_or(today);
    let end = plan
        .planning_end
        .filter(|end| *end >= today)
        .unwrap_or(fallback);
    (today, end)
}

/// Pick the most profitable placement starting on or after `today`.
///
/// Candidates on `preferred` win when there are any; a missing profit counts
/// as zero.
pub fn select_best_candidate(
    candidates: &[Candidate],
    preferred: Option<ParcelId>,
    today: NaiveDate,
) -> Option<&Candidate> {
    let upcoming: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.start().is_some_and(|start| start >= today))
        .collect();

    debug!(
        "Candidates: {} total, {} upcoming from {}",
        candidates.len(),
        upcoming.len(),
        today
    );

    let on_preferred: Vec<&Candidate> = match preferred {
        Some(parcel_id) => upcoming
            .iter()
            .copied()
            .filter(|c| c.field_id.matches(parcel_id))
            .collect(),
        None => Vec::new(),
    };
    let pool = if on_preferred.is_empty() {
        upcoming
    } else {
        on_preferred
    };

    pool.into_iter().max_by(|a, b| {
        a.profit
            .unwrap_or(0.0)
            .total_cmp(&b.profit.unwrap_or(0.0))
    })
}
