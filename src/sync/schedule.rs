//! Cron schedule evaluation
//!
//! Accepts standard five-field cron expressions (a seconds field of `0` is
//! prepended), the six/seven-field form understood by the `cron` crate, and
//! `@hourly`-style shortcuts.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Parse a schedule expression.
pub fn parse_schedule(expression: &str) -> Result<Schedule, cron::error::Error> {
    let expression = expression.trim();
    let fields = expression.split_whitespace().count();
    if fields == 5 && !expression.starts_with('@') {
        Schedule::from_str(&format!("0 {}", expression))
    } else {
        Schedule::from_str(expression)
    }
}

/// Next fire time strictly after `after`, or `None` for an empty or invalid
/// expression. Invalid expressions are logged, not rejected.
pub fn next_run_after(expression: Option<&str>, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expression = expression.map(str::trim).filter(|e| !e.is_empty())?;
    match parse_schedule(expression) {
        Ok(schedule) => schedule.after(&after).next(),
        Err(err) => {
            tracing::warn!(
                schedule = expression,
                error = %err,
                "Could not parse sync schedule, job will only run on demand"
            );
            None
        }
    }
}
