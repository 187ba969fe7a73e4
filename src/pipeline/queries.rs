use super::PlanPipeline;
use crate::codec::{with_crop_id, ExchangeFileSet, WeatherSeries};
use crate::error::{CallerContractError, EngineError, PipelineError};
use crate::extract::{extract_json, ProgressReport};
use crate::gateway::{CommandArgs, EngineCommand};
use crate::model::CropId;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info};

impl PlanPipeline {
    /// Forecast `days` ahead from historical weather records.
    ///
    /// Returns the engine's prediction document as written to its output file.
    pub async fn predict(
        &self,
        history: &Value,
        days: u32,
        model: &str,
        metrics: Option<&str>,
    ) -> Result<Value, PipelineError> {
        let records = history_record_count(history);
        if records == 0 {
            return Err(EngineError::from(CallerContractError::EmptyInput(
                "Input historical data is empty".to_string(),
            ))
            .into());
        }
        info!("Predicting {} day(s) with {} from {} record(s)", days, model, records);

        let mut files = ExchangeFileSet::new();
        let input = files.write_json("historical_data", history)?;
        let output = files.reserve_output("prediction")?;

        let args = CommandArgs::new()
            .set("input", input.display())
            .set("output", output.display())
            .set("days", days)
            .set("model", model)
            .set_opt("metrics", metrics);

        self.gateway.invoke(EngineCommand::Predict, &args).await?;

        let content = files
            .read_to_string("prediction")
            .map_err(EngineError::Io)?;
        files.release();

        if content.trim().is_empty() {
            return Err(EngineError::Parse("Prediction output file is empty".to_string()).into());
        }

        let prediction = serde_json::from_str(&content)
            .map_err(|e| EngineError::Parse(format!("prediction output: {}", e)))?;
        Ok(prediction)
    }

    /// Growth progress of a catalog crop planted on `start_date`.
    pub async fn progress(
        &self,
        crop_id: CropId,
        start_date: NaiveDate,
        weather: &WeatherSeries,
    ) -> Result<ProgressReport, PipelineError> {
        let master = self
            .catalog
            .crop(crop_id)
            .ok_or_else(|| PipelineError::CropNotFound(crop_id.to_string()))?;

        let mut files = ExchangeFileSet::new();
        let profile = with_crop_id(master.requirement_profile(), &crop_id.to_string());
        let crop_path = files.write_json("crop", &profile)?;
        let weather_path = files.write_json("weather", weather)?;

        let args = CommandArgs::new()
            .set("crop-file", crop_path.display())
            .set("start-date", start_date)
            .set("weather-file", weather_path.display())
            .set("format", "json");

        let raw = self.gateway.invoke(EngineCommand::Progress, &args).await?;
        files.release();

        let mut report = ProgressReport::decode(extract_json(EngineCommand::Progress, &raw)?)?;
        if report.crop_name.is_none() {
            report.crop_name = Some(master.name.clone());
        }
        if report.variety.is_none() {
            report.variety = master.variety.clone();
        }

        debug!(
            "Progress for crop {}: {} record(s), final {:?}",
            crop_id,
            report.progress_records.len(),
            report.final_progress
        );
        Ok(report)
    }
}

/// Records in a history document: a bare array or one under `data`.
fn history_record_count(history: &Value) -> usize {
    match history {
        Value::Array(records) => records.len(),
        Value::Object(root) => match root.get("data") {
            Some(Value::Array(records)) => records.len(),
            _ => 0,
        },
        _ => 0,
    }
}
