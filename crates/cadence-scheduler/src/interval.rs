use chrono::{DateTime, Duration, Months, Utc};

use crate::types::IntervalType;

/// Compute when a task becomes due again, counting from the start of its
/// last run.
///
/// Starting from the run's start (not its finish) keeps a fixed cadence: a
/// run that takes longer than its interval makes the next run due as soon as
/// it finishes. `Startup` and `None` return `run_start` unchanged. Month and
/// year arithmetic clamps to the last day of shorter months; results past
/// chrono's range saturate at the maximum representable instant.
pub fn next_due(run_start: DateTime<Utc>, interval_type: IntervalType, interval: u32) -> DateTime<Utc> {
    let n = i64::from(interval);
    let next = match interval_type {
        IntervalType::None | IntervalType::Startup => Some(run_start),
        IntervalType::Minutes => run_start.checked_add_signed(Duration::minutes(n)),
        IntervalType::Hours => run_start.checked_add_signed(Duration::hours(n)),
        IntervalType::Days => run_start.checked_add_signed(Duration::days(n)),
        IntervalType::Weeks => run_start.checked_add_signed(Duration::days(n * 7)),
        IntervalType::Months => run_start.checked_add_months(Months::new(interval)),
        IntervalType::Years => interval
            .checked_mul(12)
            .and_then(|months| run_start.checked_add_months(Months::new(months))),
    };
    next.unwrap_or(DateTime::<Utc>::MAX_UTC)
}
