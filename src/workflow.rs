//! Business rules for records: chassis assignment, status transitions and
//! import planning.
//!
//! Two tiers of duplicate protection apply:
//!
//! - a *soft* check: another record describes the same company, brand and
//!   vehicle type. The write is paused until the operator confirms.
//! - a *hard* check, made once the soft check is passed or overridden: a
//!   chassis number may be attached to one record only. This is never
//!   bypassable; the database `UNIQUE` constraint backs it up against
//!   concurrent assignments.
//!
//! Functions here do not check permissions or send notifications; see
//! [`crate::tracker::Tracker`] for that layer.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::database::Database;
use crate::error::{TrackerError, TrackerResult};
use crate::record::{NewRecord, Record, RecordStatus, normalize_chassis};
use crate::user::canonical_region;

/// Result of a chassis assignment attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignOutcome {
    /// The chassis number was written and the record sent for testing
    Assigned { record: Record },

    /// Other records share company, brand and vehicle type. Nothing was
    /// written; retry with an explicit override to proceed.
    ConfirmationRequired { matches: Vec<Record> },
}

/// Attach a chassis number to a record awaiting one
///
/// # Arguments
/// * `db` - Database holding the record
/// * `record_id` - Record to update
/// * `chassis_no` - Chassis number as typed; surrounding whitespace is ignored
///   and letters are upper-cased
/// * `confirm_override` - Operator has acknowledged the near-duplicate warning
/// * `now` - Timestamp of the write; its date becomes the selection date
///
/// # Errors
/// * `Validation` if the chassis number is empty or the record is not awaiting one
/// * `NotFound` if the record does not exist
/// * `Conflict` if another record already holds the chassis number
pub fn assign_chassis(
    db: &Database,
    record_id: i64,
    chassis_no: &str,
    confirm_override: bool,
    now: NaiveDateTime,
) -> TrackerResult<AssignOutcome> {
    let chassis = normalize_chassis(chassis_no);
    if chassis.is_empty() {
        return Err(TrackerError::validation("Chassis number is required"));
    }

    let record = db
        .get_record(record_id)?
        .ok_or_else(|| TrackerError::NotFound(format!("record {}", record_id)))?;

    if record.status != RecordStatus::AwaitingChassis {
        return Err(TrackerError::validation(format!(
            "Record {} is not awaiting a chassis number (status: {})",
            record_id, record.status
        )));
    }

    if !confirm_override {
        let matches = db.find_same_vehicle(
            &record.company_name,
            record.brand.as_deref(),
            &record.vehicle_type,
            Some(record_id),
        )?;
        if !matches.is_empty() {
            log::info!(
                "chassis assignment for record {} paused: {} record(s) share company, brand and type",
                record_id,
                matches.len()
            );
            return Ok(AssignOutcome::ConfirmationRequired { matches });
        }
    }

    if let Some(holder) = db.find_by_chassis(&chassis)? {
        if holder.id != record_id {
            return Err(TrackerError::conflict(format!(
                "Chassis number {} is already assigned to record {}",
                chassis, holder.id
            )));
        }
    }

    db.set_chassis(record_id, &chassis, now.date(), now)?;
    let record = db
        .get_record(record_id)?
        .ok_or_else(|| TrackerError::NotFound(format!("record {}", record_id)))?;

    log::info!("chassis {} assigned to record {}", chassis, record_id);
    Ok(AssignOutcome::Assigned { record })
}

/// Check that a status update from `from` to `to` is allowed
///
/// `SentForTesting` is only reachable through [`assign_chassis`]. Closed
/// records cannot change. Keeping the current status is allowed for open
/// records, so notes can be amended.
pub fn check_transition(from: RecordStatus, to: RecordStatus) -> TrackerResult<()> {
    if from.is_terminal() {
        return Err(TrackerError::validation(format!(
            "Record is already closed ({})",
            from
        )));
    }
    if from == to {
        return Ok(());
    }

    match (from, to) {
        (_, RecordStatus::SentForTesting) => Err(TrackerError::validation(
            "Assign a chassis number to send a record for testing",
        )),
        (_, RecordStatus::AwaitingChassis) => Err(TrackerError::validation(
            "A record cannot return to awaiting chassis",
        )),
        (RecordStatus::AwaitingChassis, RecordStatus::Rejected) => Ok(()),
        (RecordStatus::AwaitingChassis, _) => Err(TrackerError::validation(
            "Only records sent for testing can be completed",
        )),
        (RecordStatus::SentForTesting, _) => Ok(()),
        _ => Err(TrackerError::validation(format!(
            "Cannot move a record from {} to {}",
            from, to
        ))),
    }
}

/// One data row of an import file
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    /// 1-based line in the source file (the header is line 1)
    pub line: usize,
    pub record: NewRecord,
}

/// An import row resembling stored records or earlier rows of the same file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateRow {
    pub line: usize,
    pub application_no: Option<String>,
    pub company_name: String,
    pub brand: Option<String>,
    pub vehicle_type: String,
    /// Stored records with the same company, brand and vehicle type
    pub matching_ids: Vec<i64>,
    /// Earlier accepted lines of the file with the same vehicle
    pub matching_lines: Vec<usize>,
}

/// Rows of an import sorted into what will be written and what will not
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    /// Rows to insert, normalised and with a canonical region
    pub accepted: Vec<ImportRow>,
    /// Rows dropped because their application number is already known
    pub skipped: usize,
    /// Accepted rows that need the importer's confirmation
    pub duplicates: Vec<DuplicateRow>,
}

/// Sort import rows into accepted, skipped and near-duplicate rows
///
/// # Arguments
/// * `db` - Database to compare against
/// * `rows` - Parsed rows of the import file
/// * `default_region` - Region for rows that do not name one
///
/// # Errors
/// * `Validation` naming the line of the first row that lacks a required
///   field or names an unknown region
pub fn plan_import(
    db: &Database,
    rows: Vec<ImportRow>,
    default_region: &str,
) -> TrackerResult<ImportPlan> {
    let known = db.application_numbers()?;
    let mut seen_in_file: HashSet<String> = HashSet::new();
    let mut vehicles_in_file: HashMap<(String, Option<String>, String), Vec<usize>> =
        HashMap::new();
    let mut plan = ImportPlan::default();

    for row in rows {
        let line = row.line;
        let mut record = row.record.normalized();

        let missing = record.missing_fields();
        if !missing.is_empty() {
            return Err(TrackerError::validation(format!(
                "Line {}: missing {}",
                line,
                missing.join(", ")
            )));
        }

        let region = match record.region.as_deref() {
            Some(name) => canonical_region(name).ok_or_else(|| {
                TrackerError::validation(format!("Line {}: unknown region '{}'", line, name))
            })?,
            None => default_region,
        };
        record.region = Some(region.to_string());

        if let Some(no) = &record.application_no {
            if known.contains(no) || !seen_in_file.insert(no.clone()) {
                plan.skipped += 1;
                continue;
            }
        }

        let matches = db.find_same_vehicle(
            &record.company_name,
            record.brand.as_deref(),
            &record.vehicle_type,
            None,
        )?;
        let earlier_lines = vehicles_in_file
            .entry((
                record.company_name.clone(),
                record.brand.clone(),
                record.vehicle_type.clone(),
            ))
            .or_default();
        if !matches.is_empty() || !earlier_lines.is_empty() {
            plan.duplicates.push(DuplicateRow {
                line,
                application_no: record.application_no.clone(),
                company_name: record.company_name.clone(),
                brand: record.brand.clone(),
                vehicle_type: record.vehicle_type.clone(),
                matching_ids: matches.iter().map(|r| r.id).collect(),
                matching_lines: earlier_lines.clone(),
            });
        }
        earlier_lines.push(line);

        plan.accepted.push(ImportRow { line, record });
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecordStatus::*;

    #[test]
    fn allowed_transitions() {
        assert!(check_transition(SentForTesting, CompletedPositive).is_ok());
        assert!(check_transition(SentForTesting, CompletedNegative).is_ok());
        assert!(check_transition(SentForTesting, Rejected).is_ok());
        assert!(check_transition(AwaitingChassis, Rejected).is_ok());
        assert!(check_transition(AwaitingChassis, AwaitingChassis).is_ok());
    }

    #[test]
    fn refused_transitions() {
        assert!(check_transition(AwaitingChassis, SentForTesting).is_err());
        assert!(check_transition(AwaitingChassis, CompletedPositive).is_err());
        assert!(check_transition(SentForTesting, AwaitingChassis).is_err());
        for closed in [CompletedPositive, CompletedNegative, Rejected] {
            for target in RecordStatus::ALL {
                assert!(check_transition(closed, target).is_err());
            }
        }
    }
}
