use chrono::{Datelike, Days, Local, NaiveDate};

use super::Snapshot;
use crate::model::{MoveInstruction, Plan};

const MARGIN_DAYS: u64 = 365;

/// Planning window handed to `optimize adjust`.
///
/// The engine requires a horizon, but an adjust must never be constrained by
/// it, so the window spans one extra year on each side of every date in play,
/// rounded out to whole calendar years.
pub fn effective_planning_period(
    plan: &Plan,
    snapshot: &Snapshot,
    moves: &[MoveInstruction],
) -> (NaiveDate, NaiveDate) {
    let mut dates: Vec<NaiveDate> = Vec::new();

    for schedule in snapshot.schedules() {
        for allocation in &schedule.allocations {
            // snapshot dates are always rendered from NaiveDate, so these parse
            if let Ok(d) = allocation.start_date.parse() {
                dates.push(d);
            }
            if let Ok(d) = allocation.completion_date.parse() {
                dates.push(d);
            }
        }
    }

    dates.extend(moves.iter().filter_map(|m| m.to_start_date));

    if dates.is_empty() {
        dates.extend(
            plan.allocations
                .iter()
                .flat_map(|a| [a.start_date, a.completion_date]),
        );
    }

    match (dates.iter().min(), dates.iter().max()) {
        (Some(min), Some(max)) => {
            let start = min
                .checked_sub_days(Days::new(MARGIN_DAYS))
                .unwrap_or(*min);
            let end = max
                .checked_add_days(Days::new(MARGIN_DAYS))
                .unwrap_or(*max);
            (start_of_year(start), end_of_year(end))
        }
        _ => planning_horizon(plan),
    }
}

/// The plan's own horizon: planning start (else today) through planning end
/// (else Dec 31 two years after the start), never inverted.
pub fn planning_horizon(plan: &Plan) -> (NaiveDate, NaiveDate) {
    let start = plan
        .planning_start
        .unwrap_or_else(|| Local::now().date_naive());
    let two_years_out = end_of_year(
        NaiveDate::from_ymd_opt(start.year() + 2, 1, 1).unwrap_or(start),
    );
    let end = plan.planning_end.unwrap_or(two_years_out);

    if start > end {
        (start, two_years_out)
    } else {
        (start, end)
    }
}

fn start_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

fn end_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date)
}
