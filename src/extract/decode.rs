use crate::error::EngineError;
use crate::model::{EngineId, OptimizerResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decode an `optimize allocate` / `optimize adjust` answer.
///
/// Accepts both `{"optimization_result": {...}, "summary": ...}` and a bare
/// result object.
pub fn decode_optimizer_result(value: Value) -> Result<OptimizerResult, EngineError> {
    let (inner, summary) = match value {
        Value::Object(mut root) => match root.remove("optimization_result") {
            Some(inner) => (inner, root.remove("summary")),
            None => (Value::Object(root), None),
        },
        other => {
            return Err(EngineError::Parse(format!(
                "expected an optimizer result object, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut result: OptimizerResult = serde_json::from_value(inner)
        .map_err(|e| EngineError::Parse(format!("invalid optimizer result: {}", e)))?;

    if result.summary.is_none() {
        result.summary = summary.filter(|s| !s.is_null());
    }

    Ok(result)
}

/// One placement option proposed by `optimize candidates`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candidate {
    pub field_id: EngineId,

    #[serde(default)]
    pub field_name: Option<String>,

    #[serde(default)]
    pub candidate_type: Option<String>,

    #[serde(default)]
    pub start_date: Option<String>,

    #[serde(default)]
    pub completion_date: Option<String>,

    #[serde(default)]
    pub profit: Option<f64>,

    #[serde(default, skip_serializing)]
    expected_profit: Option<f64>,

    #[serde(default)]
    pub cost: Option<f64>,

    #[serde(default)]
    pub revenue: Option<f64>,

    #[serde(default)]
    pub growth_days: Option<i64>,

    /// Engine-proposed move, passed through untouched
    #[serde(default)]
    pub move_instruction: Option<Value>,
}

impl Candidate {
    pub fn start(&self) -> Option<NaiveDate> {
        self.start_date.as_deref().and_then(|d| d.parse().ok())
    }
}

/// Decode the candidates output file.
///
/// The document is either `{"candidates": [...]}` or a bare array; anything
/// else yields no candidates.
pub fn decode_candidates(value: Value) -> Result<Vec<Candidate>, EngineError> {
    let items = match value {
        Value::Object(mut root) => match root.remove("candidates") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| {
            let mut candidate: Candidate = serde_json::from_value(item)
                .map_err(|e| EngineError::Parse(format!("invalid candidate: {}", e)))?;
            candidate.start_date = candidate.start_date.map(normalize_date);
            candidate.completion_date = candidate.completion_date.map(normalize_date);
            if candidate.profit.is_none() {
                candidate.profit = candidate.expected_profit;
            }
            Ok(candidate)
        })
        .collect()
}

/// `2025-01-01T00:00:00` becomes `2025-01-01`; unparseable values pass through.
pub fn normalize_date(value: String) -> String {
    let head = value.get(..10).unwrap_or(&value);
    match NaiveDate::parse_from_str(head, "%Y-%m-%d") {
        Ok(date) => date.to_string(),
        Err(_) => value,
    }
}

/// `progress` answer
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProgressReport {
    #[serde(default)]
    pub crop_name: Option<String>,

    #[serde(default)]
    pub variety: Option<String>,

    #[serde(default)]
    pub start_date: Option<String>,

    #[serde(default)]
    pub progress_records: Vec<ProgressRecord>,

    #[serde(default)]
    pub yield_factor: Option<f64>,

    #[serde(default)]
    pub yield_loss_percentage: Option<f64>,

    #[serde(default)]
    pub total_gdd: Option<f64>,

    #[serde(default)]
    pub final_progress: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProgressRecord {
    pub date: String,

    #[serde(default)]
    pub cumulative_gdd: f64,

    #[serde(default)]
    pub total_required_gdd: f64,

    /// Fraction in `0.0..=1.0`
    #[serde(default)]
    pub growth_percentage: f64,

    #[serde(default)]
    pub stage_name: Option<String>,

    #[serde(default)]
    pub is_complete: bool,
}

impl ProgressReport {
    pub fn decode(value: Value) -> Result<Self, EngineError> {
        serde_json::from_value(value)
            .map_err(|e| EngineError::Parse(format!("invalid progress report: {}", e)))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
