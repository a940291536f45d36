use chrono::{DateTime, Duration, Utc};

use crate::error::AppError;

/// Turns a unique-constraint violation into the supplied domain error.
pub fn map_unique_violation(err: sqlx::Error, on_conflict: impl FnOnce() -> AppError) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => on_conflict(),
        _ => AppError::Database(err),
    }
}

pub fn add_days(start: DateTime<Utc>, days: i32) -> DateTime<Utc> {
    start + Duration::days(i64::from(days))
}
