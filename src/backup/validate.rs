//! Validation for a proposed set of backup schedule rows, applied before a schedule
//! is created or updated. Grounded in `_validate_project_retention_budget`
//! (original_source/src/api/_util/backups.py) for the project-wide retention-budget
//! check, extended with the row-count/interval/uniqueness rules named alongside it.

use std::collections::HashSet;

use crate::db::models::BackupScheduleRow;
use crate::error::{OperationError, Result};

use super::schedule::{max_interval_for_unit, MAX_ROWS_PER_SCHEDULE};

/// Validate a full set of rows for one schedule: row count, per-unit interval bounds,
/// and uniqueness of `(interval, unit)` pairs within the schedule.
pub fn validate_schedule_rows(rows: &[BackupScheduleRow]) -> Result<()> {
    if rows.len() > MAX_ROWS_PER_SCHEDULE {
        return Err(OperationError::validation(format!(
            "schedule has {} rows, exceeding the limit of {MAX_ROWS_PER_SCHEDULE}",
            rows.len()
        )));
    }

    let mut seen = HashSet::new();
    for row in rows {
        let Some(max_interval) = max_interval_for_unit(&row.unit) else {
            return Err(OperationError::validation(format!("unknown backup schedule unit {:?}", row.unit)));
        };
        if row.interval < 1 || row.interval > max_interval {
            return Err(OperationError::validation(format!(
                "interval {} out of range for unit {:?} (max {max_interval})",
                row.interval, row.unit
            )));
        }
        if !seen.insert((row.interval, row.unit.to_lowercase())) {
            return Err(OperationError::validation(format!(
                "duplicate schedule row for interval {} unit {:?}",
                row.interval, row.unit
            )));
        }
    }
    Ok(())
}

/// Validate that adding `new_retention` to a project's existing schedule rows (other
/// than `excluding_schedule`, when replacing one) stays within the project's
/// `max_backups` budget.
pub fn validate_retention_budget(
    existing_retention_total: i64,
    new_retention: i64,
    project_max_backups: Option<i64>,
) -> Result<()> {
    let Some(max_backups) = project_max_backups else { return Ok(()) };
    let combined = existing_retention_total + new_retention;
    if combined > max_backups {
        return Err(OperationError::validation(format!(
            "project max backups {max_backups} exceeded by schedule: total retention {combined}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::BackupScheduleId;

    fn row(interval: i32, unit: &str, retention: i32) -> BackupScheduleRow {
        BackupScheduleRow { schedule_id: BackupScheduleId::new(), row_index: 0, interval, unit: unit.to_string(), retention }
    }

    #[test]
    fn rejects_too_many_rows() {
        let rows: Vec<_> = (0..11).map(|i| row(1 + (i % 5), "h", 3)).collect();
        assert!(validate_schedule_rows(&rows).is_err());
    }

    #[test]
    fn rejects_interval_past_unit_max() {
        assert!(validate_schedule_rows(&[row(24, "h", 3)]).is_err());
        assert!(validate_schedule_rows(&[row(23, "h", 3)]).is_ok());
    }

    #[test]
    fn rejects_duplicate_interval_unit_pairs() {
        assert!(validate_schedule_rows(&[row(1, "d", 3), row(1, "D", 7)]).is_err());
    }

    #[test]
    fn retention_budget_rejects_overflow() {
        assert!(validate_retention_budget(28, 5, Some(30)).is_err());
        assert!(validate_retention_budget(20, 5, Some(30)).is_ok());
        assert!(validate_retention_budget(1000, 1000, None).is_ok());
    }
}
