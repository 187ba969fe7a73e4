use regex::Regex;
use serde_json::{json, Value};

const FINAL_PROGRESS: &str = "Final Progress:";
const TOTAL_GDD: &str = "Total GDD Accumulated:";
const STAGE_MARKER: &str = "生育期";
const DEFAULT_REQUIRED_GDD: f64 = 1000.0;

pub(super) fn is_text_report(text: &str) -> bool {
    text.contains(FINAL_PROGRESS) && text.contains(TOTAL_GDD)
}

/// Re-emit a text progress report as the standard progress JSON.
///
/// Returns `None` when the summary lines cannot be read.
pub(super) fn parse_text_report(text: &str) -> Option<Value> {
    let percent_re = Regex::new(r"(\d+\.?\d*)%").ok()?;
    let gdd_re = Regex::new(r"(\d+\.?\d*)\s*/\s*(\d+\.?\d*)").ok()?;
    let date_re = Regex::new(r"^(\d{4}-\d{2}-\d{2})").ok()?;

    let mut final_progress = None;
    let mut total_gdd = None;
    let mut required_gdd = None;

    for line in text.lines() {
        if line.contains(FINAL_PROGRESS) {
            final_progress = percent_re
                .captures(line)
                .and_then(|c| c[1].parse::<f64>().ok());
        } else if line.contains(TOTAL_GDD) {
            if let Some(c) = gdd_re.captures(line) {
                total_gdd = c[1].parse::<f64>().ok();
                required_gdd = c[2].parse::<f64>().ok();
            }
        }
    }

    if final_progress.is_none() && total_gdd.is_none() {
        return None;
    }

    let mut records = Vec::new();
    let mut current_date: Option<String> = None;

    for line in text.lines() {
        if let Some(c) = date_re.captures(line) {
            current_date = Some(c[1].to_string());
        } else if let (Some(date), true) = (&current_date, line.contains(STAGE_MARKER)) {
            if let Some((gdd, percentage)) = stage_row(line) {
                records.push(json!({
                    "date": format!("{}T00:00:00", date),
                    "cumulative_gdd": gdd,
                    "total_required_gdd": required_gdd.unwrap_or(DEFAULT_REQUIRED_GDD),
                    "growth_percentage": percentage / 100.0,
                    "stage_name": STAGE_MARKER,
                    "is_complete": percentage >= 100.0,
                }));
            }
        }
    }

    let start_date = records
        .first()
        .and_then(|r| r["date"].as_str())
        .map(str::to_string);

    Some(json!({
        "crop_name": null,
        "variety": null,
        "start_date": start_date,
        "progress_records": records,
        "yield_factor": 1.0,
        "yield_loss_percentage": 0.0,
        "total_gdd": total_gdd,
        "final_progress": final_progress,
    }))
}

/// Stage rows carry the cumulative GDD immediately before the `NN.N%` column.
fn stage_row(line: &str) -> Option<(f64, f64)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let pct_index = parts.iter().position(|p| p.ends_with('%'))?;
    let percentage = parts[pct_index].trim_end_matches('%').parse::<f64>().ok()?;
    let gdd = pct_index
        .checked_sub(1)
        .and_then(|i| parts[i].parse::<f64>().ok())
        .unwrap_or(0.0);
    Some((gdd, percentage))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Growth progress for Tomato
2025-04-01
  Seedling 生育期 120.5 12.0%
2025-04-15
  Vegetative 生育期 480.0 48.0%
2025-05-30
  Harvest 生育期 1000.0 100.0%

Final Progress: 100.0%
Total GDD Accumulated: 1000.0 / 1000.0
";

    #[test]
    fn test_text_report_parsed() {
        assert!(is_text_report(REPORT));
        let value = parse_text_report(REPORT).unwrap();

        assert_eq!(value["final_progress"], 100.0);
        assert_eq!(value["total_gdd"], 1000.0);
        assert_eq!(value["start_date"], "2025-04-01T00:00:00");

        let records = value["progress_records"].as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["cumulative_gdd"], 120.5);
        assert_eq!(records[0]["growth_percentage"], 0.12);
        assert_eq!(records[1]["is_complete"], false);
        assert_eq!(records[2]["is_complete"], true);
    }

    #[test]
    fn test_required_gdd_defaults() {
        let report = "2025-04-01\n 生育期 10.0 5.0%\nFinal Progress: 5.0%\nTotal GDD Accumulated: n/a";
        let value = parse_text_report(report).unwrap();
        assert_eq!(value["progress_records"][0]["total_required_gdd"], 1000.0);
        assert!(value["total_gdd"].is_null());
    }

    #[test]
    fn test_unreadable_summary_rejected() {
        let report = "Final Progress: unknown\nTotal GDD Accumulated: unknown";
        assert!(parse_text_report(report).is_none());
    }
}
