//! Turn raw engine output into JSON or a classified error
//!
//! Engine stdout may carry log lines around the JSON document, a plain-text
//! failure report, or (for `progress`) a human-readable progress report.

mod decode;
mod progress;

pub use decode::{
    decode_candidates, decode_optimizer_result, normalize_date, Candidate, ProgressRecord,
    ProgressReport,
};

use crate::error::EngineError;
use crate::gateway::EngineCommand;
use serde_json::Value;
use tracing::{debug, error, warn};

const NO_CANDIDATES_MARKER: &str = "No valid allocation candidates could be generated";
const ALLOCATION_ERROR_MARKER: &str = "Error optimizing crop allocation:";
const ERROR_MARKERS: &[&str] = &[
    "Error:",
    "❌",
    ALLOCATION_ERROR_MARKER,
    NO_CANDIDATES_MARKER,
];

/// Extract the JSON document from raw engine output.
pub fn extract_json(command: EngineCommand, raw: &str) -> Result<Value, EngineError> {
    let trimmed = raw.trim();
    debug!("Extracting JSON from '{}' output ({} bytes)", command, raw.len());

    // `[INFO] ...` log prefixes also start with a bracket
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return Ok(value);
        }
    }

    if let Some(err) = reported_failure(trimmed) {
        error!("Engine '{}' reported an error: {}", command, trimmed);
        return Err(err);
    }

    if command == EngineCommand::Progress && progress::is_text_report(trimmed) {
        warn!("Engine returned a text progress report, parsing it");
        return progress::parse_text_report(trimmed).ok_or_else(|| {
            EngineError::Execution("Failed to parse engine text progress report".to_string())
        });
    }

    let text = slice_braces(trimmed)?;

    serde_json::from_str(text).map_err(|e| {
        error!("Engine '{}' output is not valid JSON: {}", command, e);
        EngineError::Parse(format!("{} (output starts with: {})", e, preview(trimmed)))
    })
}

/// Classified error when `text` carries a failure marker.
pub fn reported_failure(text: &str) -> Option<EngineError> {
    ERROR_MARKERS
        .iter()
        .any(|m| text.contains(m))
        .then(|| classify_failure(text))
}

/// Map engine failure text to a typed error.
pub fn classify_failure(message: &str) -> EngineError {
    let message = message.trim();

    if message.contains(NO_CANDIDATES_MARKER) {
        return EngineError::NoAllocationCandidates(message.to_string());
    }

    if let Some(line) = message
        .lines()
        .find(|l| l.contains(ALLOCATION_ERROR_MARKER))
    {
        let detail = line
            .split_once(ALLOCATION_ERROR_MARKER)
            .map(|(_, rest)| rest.trim())
            .filter(|rest| !rest.is_empty())
            .unwrap_or("Unknown allocation error");
        return EngineError::Execution(detail.to_string());
    }

    EngineError::Execution(message.to_string())
}

/// Everything from the first `{` through the last `}`.
fn slice_braces(text: &str) -> Result<&str, EngineError> {
    let start = text
        .find('{')
        .ok_or_else(|| EngineError::Parse("No JSON object found in engine output".to_string()))?;
    let end = text[start..]
        .rfind('}')
        .ok_or_else(|| {
            EngineError::Parse("No closing brace found in engine JSON output".to_string())
        })?;
    Ok(&text[start..=start + end])
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOCATE: EngineCommand = EngineCommand::OptimizeAllocate;

    #[test]
    fn test_pure_json_accepted() {
        let value = extract_json(ALLOCATE, "  {\"a\": 1}\n").unwrap();
        assert_eq!(value["a"], 1);

        let value = extract_json(ALLOCATE, "[1, 2]").unwrap();
        assert_eq!(value[1], 2);
    }

    #[test]
    fn test_json_surrounded_by_logs() {
        let raw = "INFO loading weather\nINFO solving\n{\"optimization_result\": {\"field_schedules\": []}}\nINFO done";
        let value = extract_json(ALLOCATE, raw).unwrap();
        assert!(value["optimization_result"]["field_schedules"].is_array());
    }

    #[test]
    fn test_bracketed_log_prefix_falls_back_to_slicing() {
        let value = extract_json(ALLOCATE, "[INFO] x\n{\"a\":1}").unwrap();
        assert_eq!(value["a"], 1);

        let raw = "[solver] done\n{\"optimization_result\": {\"field_schedules\": []}}";
        let value = extract_json(ALLOCATE, raw).unwrap();
        assert!(value["optimization_result"]["field_schedules"].is_array());

        let err = extract_json(ALLOCATE, "[WARN] no document").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_error_marker_classified_without_json_attempt() {
        let raw = "Error: weather file missing {\"not\": \"parsed\"}";
        let err = extract_json(ALLOCATE, raw).unwrap_err();
        assert!(matches!(err, EngineError::Execution(msg) if msg.starts_with("Error: weather")));

        let err = extract_json(ALLOCATE, "❌ failed").unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));
    }

    #[test]
    fn test_no_candidates_is_domain_infeasible() {
        let raw = "Solving...\nNo valid allocation candidates could be generated for the given fields";
        let err = extract_json(ALLOCATE, raw).unwrap_err();
        assert!(matches!(err, EngineError::NoAllocationCandidates(_)));
    }

    #[test]
    fn test_allocation_error_detail_extracted() {
        let raw = "log line\nError optimizing crop allocation: crop 3 has no stages\ntrailer";
        let err = extract_json(ALLOCATE, raw).unwrap_err();
        assert!(matches!(err, EngineError::Execution(msg) if msg == "crop 3 has no stages"));
    }

    #[test]
    fn test_missing_braces_are_parse_errors() {
        let err = extract_json(ALLOCATE, "nothing useful here").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));

        let err = extract_json(ALLOCATE, "prefix { \"a\": 1").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));

        let err = extract_json(ALLOCATE, "log {\"a\": } more").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_text_progress_only_for_progress_command() {
        let raw = "Final Progress: 50.0%\nTotal GDD Accumulated: 500.0 / 1000.0";
        let value = extract_json(EngineCommand::Progress, raw).unwrap();
        assert_eq!(value["final_progress"], 50.0);

        let err = extract_json(ALLOCATE, raw).unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }
}
