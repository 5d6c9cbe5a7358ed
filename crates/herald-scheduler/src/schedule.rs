use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{Result, SchedulerError};

/// Compute the next fire time after `after` for a five-field cron
/// expression evaluated in `tz_name`.
///
/// The `cron` crate wants a seconds field, so five-field expressions get a
/// literal `0` prepended. Unknown timezones fall back to UTC with a warning.
pub fn next_fire(expr: &str, tz_name: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse(expr)?;
    let tz = resolve_tz(tz_name);
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| SchedulerError::InvalidExpression {
            expr: expr.to_string(),
            reason: "no future fire time".to_string(),
        })
}

pub fn parse(expr: &str) -> Result<cron::Schedule> {
    let normalized = normalize(expr);
    cron::Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

fn normalize(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn resolve_tz(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        warn!(timezone = %name, "unknown timezone, using UTC");
        chrono_tz::UTC
    })
}
