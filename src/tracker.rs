//! Application service: permissions, scoping and notifications layered over
//! the record and account repositories.

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::database::Database;
use crate::error::{TrackerError, TrackerResult};
use crate::login::{hash_password, verify_password};
use crate::mailer::{Notice, Notifier, escape};
use crate::record::{NewRecord, Record, RecordStatus};
use crate::user::{ALL_REGIONS, Registration, Role, User, canonical_region, looks_like_email};
use crate::workflow::{self, AssignOutcome, DuplicateRow};

pub use crate::workflow::ImportRow;

/// Username of the administrator seeded into an empty database
pub const DEFAULT_ADMIN: &str = "admin";

/// Region given to imported rows when the importer oversees every region
const FALLBACK_IMPORT_REGION: &str = "Other";

/// Result of a bulk import attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImportOutcome {
    Imported { summary: ImportSummary },

    /// Some rows resemble stored records; nothing was written
    ConfirmationRequired {
        duplicates: Vec<DuplicateRow>,
        skipped: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    /// Rows whose application number was already known
    pub skipped: usize,
    pub per_region: BTreeMap<String, usize>,
    /// `username (region)` of every account that was notified
    pub notified: Vec<String>,
}

/// Headline counts for the main page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dashboard {
    pub total: usize,
    pub awaiting_chassis: usize,
    pub sent_for_testing: usize,
    pub completed_positive: usize,
    /// Only reported to administrators
    pub pending_approvals: Option<i64>,
    /// Only reported to administrators
    pub deletion_requests: Option<i64>,
}

/// Entry point for every user-facing operation
pub struct Tracker {
    db: Database,
    notifier: Arc<dyn Notifier>,
    admin_mail: Option<String>,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn require_admin(actor: &User) -> TrackerResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(TrackerError::Forbidden("administrator role required".to_string()))
    }
}

impl Tracker {
    pub fn new(db: Database, notifier: Arc<dyn Notifier>, admin_mail: Option<String>) -> Self {
        Tracker {
            db,
            notifier,
            admin_mail,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn notify_admin(&self, subject: &str, content: String) {
        match &self.admin_mail {
            Some(to) => self.notifier.notify(Notice::new(to.clone(), subject, content)),
            None => log::debug!("no administrator mail configured; dropping '{}'", subject),
        }
    }

    fn notify_user(&self, user: &User, subject: &str, content: String) {
        if let Some(email) = user.email.as_deref().filter(|e| looks_like_email(e)) {
            self.notifier.notify(Notice::new(email, subject, content));
        }
    }

    /// Tell every approved account responsible for `region` about new records
    ///
    /// Returns `username (region)` for each account that was mailed.
    /// Tell the approved users of `region` about new records
    ///
    /// Runs after the records are committed. A failed lookup is logged and
    /// notifies nobody.
    fn notify_region(&self, region: &str, count: usize) -> Vec<String> {
        let users = match self.db.approved_users_in_region(region) {
            Ok(users) => users,
            Err(e) => {
                log::warn!("cannot look up users to notify for {}: {}", region, e);
                return Vec::new();
            }
        };

        let mut notified = Vec::new();
        for user in users {
            if !user.email.as_deref().is_some_and(looks_like_email) {
                continue;
            }
            let content = format!(
                "Hello <b>{}</b>,<br><br><b>{}</b> new record(s) were added for <b>{}</b>, \
                 the region you are responsible for. Please complete the sample and chassis \
                 assignment in the portal.",
                escape(&user.username),
                count,
                escape(region)
            );
            self.notify_user(&user, &format!("Sample Tracker - new records for {}", region), content);
            notified.push(format!("{} ({})", user.username, region));
        }
        notified
    }

    fn scoped_record(&self, actor: &User, id: i64) -> TrackerResult<Record> {
        let record = self
            .db
            .get_record(id)?
            .ok_or_else(|| TrackerError::NotFound(format!("record {}", id)))?;
        if !actor.can_see(&record.region, record.created_by.as_deref()) {
            return Err(TrackerError::Forbidden(format!(
                "record {} belongs to region {}",
                id, record.region
            )));
        }
        Ok(record)
    }

    fn reload(&self, id: i64) -> TrackerResult<Record> {
        self.db
            .get_record(id)?
            .ok_or_else(|| TrackerError::NotFound(format!("record {}", id)))
    }

    // ── Accounts ─────────────────────────────────────────────────────────

    /// Seed the default administrator when the database has none
    ///
    /// Returns whether an account was created.
    pub fn ensure_default_admin(&self, password: &str) -> TrackerResult<bool> {
        if self.db.count_admins()? > 0 {
            return Ok(false);
        }
        let hash = hash_password(password).map_err(TrackerError::Validation)?;
        self.db.insert_user(
            DEFAULT_ADMIN,
            &hash,
            Role::Admin,
            self.admin_mail.as_deref(),
            ALL_REGIONS,
            true,
            true,
        )?;
        log::warn!(
            "created default administrator '{}'; change its password with reset_password",
            DEFAULT_ADMIN
        );
        Ok(true)
    }

    /// Self-service sign up; the account stays unusable until approved
    ///
    /// # Errors
    /// * `Validation` if a field is empty, the region is unknown or the
    ///   email address is malformed
    /// * `Conflict` if the username is taken
    pub fn register(&self, registration: &Registration) -> TrackerResult<User> {
        let username = registration.username.trim();
        let email = registration.email.trim();
        if username.is_empty() || registration.password.is_empty() || email.is_empty() {
            return Err(TrackerError::validation(
                "Username, password and email cannot be empty",
            ));
        }
        if !looks_like_email(email) {
            return Err(TrackerError::validation(format!(
                "'{}' is not a valid email address",
                email
            )));
        }
        let region = canonical_region(&registration.region).ok_or_else(|| {
            TrackerError::validation(format!("Unknown region '{}'", registration.region))
        })?;

        let hash = hash_password(&registration.password).map_err(TrackerError::Validation)?;
        let user = self.db.insert_user(
            username,
            &hash,
            Role::Operator,
            Some(email),
            region,
            false,
            false,
        )?;

        log::info!("new account request from {} ({})", user.username, region);
        self.notify_admin(
            "New account request",
            format!(
                "New account request: <b>{}</b> ({})",
                escape(&user.username),
                escape(region)
            ),
        );
        Ok(user)
    }

    /// Check credentials and return the account
    ///
    /// # Errors
    /// * `InvalidCredentials` for an unknown user or a wrong password
    /// * `PendingApproval` if the account has not been approved yet
    pub fn login(&self, username: &str, password: &str) -> TrackerResult<User> {
        let user = self
            .db
            .find_user(username.trim())?
            .ok_or(TrackerError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash).map_err(TrackerError::Validation)? {
            return Err(TrackerError::InvalidCredentials);
        }
        if !user.approved {
            return Err(TrackerError::PendingApproval);
        }
        Ok(user)
    }

    pub fn users(&self, admin: &User) -> TrackerResult<Vec<User>> {
        require_admin(admin)?;
        self.db.list_users()
    }

    pub fn pending_users(&self, admin: &User) -> TrackerResult<Vec<User>> {
        require_admin(admin)?;
        self.db.list_pending_users()
    }

    pub fn approve_user(&self, admin: &User, id: i64) -> TrackerResult<User> {
        require_admin(admin)?;
        self.db.set_user_approved(id, true)?;
        let user = self
            .db
            .get_user(id)?
            .ok_or_else(|| TrackerError::NotFound(format!("user {}", id)))?;

        log::info!("{} approved account {}", admin.username, user.username);
        self.notify_user(
            &user,
            "Sample Tracker - account approved",
            format!(
                "Hello <b>{}</b>,<br><br>Your account has been approved. You can now log in.",
                escape(&user.username)
            ),
        );
        Ok(user)
    }

    pub fn delete_user(&self, admin: &User, id: i64) -> TrackerResult<()> {
        require_admin(admin)?;
        if admin.id == id {
            return Err(TrackerError::validation("You cannot delete your own account"));
        }
        if !self.db.delete_user(id)? {
            return Err(TrackerError::NotFound(format!("user {}", id)));
        }
        log::info!("{} deleted account {}", admin.username, id);
        Ok(())
    }

    pub fn set_bulk_import_permission(
        &self,
        admin: &User,
        id: i64,
        allowed: bool,
    ) -> TrackerResult<User> {
        require_admin(admin)?;
        self.db.set_bulk_import_permission(id, allowed)?;
        self.db
            .get_user(id)?
            .ok_or_else(|| TrackerError::NotFound(format!("user {}", id)))
    }

    /// Replace an account's password without knowing the old one
    pub fn reset_password(&self, username: &str, new_password: &str) -> TrackerResult<()> {
        if new_password.is_empty() {
            return Err(TrackerError::validation("Password cannot be empty"));
        }
        let hash = hash_password(new_password).map_err(TrackerError::Validation)?;
        if !self.db.update_password(username, &hash)? {
            return Err(TrackerError::NotFound(format!("user {}", username)));
        }
        Ok(())
    }

    // ── Records ──────────────────────────────────────────────────────────

    /// Every record, newest first, filtered by an optional search query
    pub fn records(&self, query: Option<&str>) -> TrackerResult<Vec<Record>> {
        let today = Local::now().date_naive();
        let mut records = self.db.list_records()?;
        if let Some(query) = query {
            records.retain(|r| r.matches_query(query, today));
        }
        Ok(records)
    }

    /// Records the actor may act on
    pub fn workable_records(&self, actor: &User, query: Option<&str>) -> TrackerResult<Vec<Record>> {
        let mut records = self.records(query)?;
        records.retain(|r| actor.can_see(&r.region, r.created_by.as_deref()));
        Ok(records)
    }

    pub fn dashboard(&self, actor: &User) -> TrackerResult<Dashboard> {
        let records = self.db.list_records()?;
        let count = |status: RecordStatus| records.iter().filter(|r| r.status == status).count();

        let mut dashboard = Dashboard {
            total: records.len(),
            awaiting_chassis: count(RecordStatus::AwaitingChassis),
            sent_for_testing: count(RecordStatus::SentForTesting),
            completed_positive: count(RecordStatus::CompletedPositive),
            ..Dashboard::default()
        };
        if actor.is_admin() {
            dashboard.pending_approvals = Some(self.db.count_pending_users()?);
            dashboard.deletion_requests = Some(self.db.count_deletion_requests()?);
        }
        Ok(dashboard)
    }

    /// Enter a single record by hand
    ///
    /// # Errors
    /// * `Validation` if company or vehicle type is missing, or no usable region is given
    /// * `Conflict` if the application number is already recorded
    pub fn create_record(&self, actor: &User, new: NewRecord) -> TrackerResult<Record> {
        let new = new.normalized();
        let missing = new.missing_fields();
        if !missing.is_empty() {
            return Err(TrackerError::validation(format!(
                "Missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let region = match new.region.as_deref() {
            Some(name) => canonical_region(name)
                .ok_or_else(|| TrackerError::validation(format!("Unknown region '{}'", name)))?,
            None if actor.oversees_all_regions() => {
                return Err(TrackerError::validation("A region is required"));
            }
            None => canonical_region(&actor.responsible_region).ok_or_else(|| {
                TrackerError::validation(format!(
                    "Unknown region '{}'",
                    actor.responsible_region
                ))
            })?,
        };

        if let Some(no) = &new.application_no {
            if self.db.application_no_exists(no)? {
                return Err(TrackerError::conflict(format!(
                    "Application number {} is already recorded",
                    no
                )));
            }
        }

        let record = self.db.insert_record(&new, region, &actor.username, now())?;
        log::info!(
            "{} added record {} for {}",
            actor.username,
            record.id,
            record.region
        );
        self.notify_region(region, 1);
        Ok(record)
    }

    /// Attach a chassis number, pausing for confirmation on near-duplicates
    ///
    /// See [`workflow::assign_chassis`] for the rules.
    pub fn assign_chassis(
        &self,
        actor: &User,
        id: i64,
        chassis_no: &str,
        confirm_override: bool,
    ) -> TrackerResult<AssignOutcome> {
        self.scoped_record(actor, id)?;
        let outcome = workflow::assign_chassis(&self.db, id, chassis_no, confirm_override, now())?;
        if confirm_override {
            if let AssignOutcome::Assigned { record } = &outcome {
                log::info!(
                    "{} confirmed chassis {} for record {} despite matching records",
                    actor.username,
                    record.chassis_no.as_deref().unwrap_or("-"),
                    id
                );
            }
        }
        Ok(outcome)
    }

    pub fn update_status(
        &self,
        actor: &User,
        id: i64,
        status: RecordStatus,
        notes: Option<&str>,
    ) -> TrackerResult<Record> {
        let record = self.scoped_record(actor, id)?;
        workflow::check_transition(record.status, status)?;

        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        self.db.update_status(id, status, notes, now())?;
        log::info!(
            "{} moved record {} from {} to {}",
            actor.username,
            id,
            record.status,
            status
        );
        self.reload(id)
    }

    /// Flag an open record for deletion and alert the administrator
    pub fn request_deletion(&self, actor: &User, id: i64, reason: &str) -> TrackerResult<Record> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TrackerError::validation("A reason is required to request deletion"));
        }
        let record = self.scoped_record(actor, id)?;
        if record.status.is_terminal() {
            return Err(TrackerError::validation(format!(
                "Record {} is closed and cannot be flagged for deletion",
                id
            )));
        }

        self.db.set_deletion_request(id, Some(reason), now())?;
        log::info!("{} requested deletion of record {}", actor.username, id);
        self.notify_admin(
            "New deletion request",
            format!(
                "<b>{}</b> requested deletion of record {} (chassis {}): {}",
                escape(&actor.username),
                id,
                escape(record.chassis_no.as_deref().unwrap_or("-")),
                escape(reason)
            ),
        );
        self.reload(id)
    }

    pub fn deletion_requests(&self, admin: &User) -> TrackerResult<Vec<Record>> {
        require_admin(admin)?;
        self.db.list_deletion_requests()
    }

    /// Purge a record whose deletion was requested; returns the removed record
    pub fn approve_deletion(&self, admin: &User, id: i64) -> TrackerResult<Record> {
        require_admin(admin)?;
        let record = self.reload(id)?;
        if !record.deletion_requested {
            return Err(TrackerError::validation(format!(
                "Record {} has no pending deletion request",
                id
            )));
        }
        self.db.delete_record(id)?;
        log::info!("{} deleted record {}", admin.username, id);
        Ok(record)
    }

    /// Dismiss a deletion request and keep the record
    pub fn reject_deletion(&self, admin: &User, id: i64) -> TrackerResult<Record> {
        require_admin(admin)?;
        let record = self.reload(id)?;
        if !record.deletion_requested {
            return Err(TrackerError::validation(format!(
                "Record {} has no pending deletion request",
                id
            )));
        }
        self.db.set_deletion_request(id, None, now())?;
        self.reload(id)
    }

    /// Insert the rows of an import file
    ///
    /// Rows with a known application number are skipped. If any remaining row
    /// resembles a stored record the import pauses until `confirm_override`.
    pub fn import_records(
        &self,
        actor: &User,
        rows: Vec<ImportRow>,
        confirm_override: bool,
    ) -> TrackerResult<ImportOutcome> {
        if !actor.can_bulk_import() {
            return Err(TrackerError::Forbidden(
                "bulk import permission required".to_string(),
            ));
        }

        let default_region = if actor.oversees_all_regions() {
            FALLBACK_IMPORT_REGION
        } else {
            canonical_region(&actor.responsible_region).unwrap_or(FALLBACK_IMPORT_REGION)
        };

        let plan = workflow::plan_import(&self.db, rows, default_region)?;
        if !plan.duplicates.is_empty() && !confirm_override {
            return Ok(ImportOutcome::ConfirmationRequired {
                duplicates: plan.duplicates,
                skipped: plan.skipped,
            });
        }

        let records: Vec<NewRecord> = plan.accepted.into_iter().map(|row| row.record).collect();
        let mut summary = ImportSummary {
            skipped: plan.skipped,
            ..ImportSummary::default()
        };
        if records.is_empty() {
            return Ok(ImportOutcome::Imported { summary });
        }

        self.db.insert_records(&records, &actor.username, now())?;
        summary.inserted = records.len();
        for record in &records {
            if let Some(region) = &record.region {
                *summary.per_region.entry(region.clone()).or_insert(0) += 1;
            }
        }
        log::info!(
            "{} imported {} record(s), skipped {}",
            actor.username,
            summary.inserted,
            summary.skipped
        );

        let per_region = summary.per_region.clone();
        for (region, count) in per_region {
            summary.notified.extend(self.notify_region(&region, count));
        }
        Ok(ImportOutcome::Imported { summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::LogNotifier;

    fn tracker_without_accounts() -> (Tracker, User) {
        let tracker = Tracker::new(
            Database::open_in_memory().unwrap(),
            Arc::new(LogNotifier),
            None,
        );
        tracker.ensure_default_admin("admin123").unwrap();
        let admin = tracker.database().find_user(DEFAULT_ADMIN).unwrap().unwrap();
        tracker
            .database()
            .conn()
            .execute_batch("DROP TABLE kullanicilar")
            .unwrap();
        (tracker, admin)
    }

    #[test]
    fn failed_region_lookup_keeps_the_new_record() {
        let (tracker, admin) = tracker_without_accounts();
        let new = NewRecord {
            company_name: "Acme".to_string(),
            vehicle_type: "T1".to_string(),
            region: Some("Ankara".to_string()),
            ..NewRecord::default()
        };

        let record = tracker
            .create_record(&admin, new)
            .expect("committed record is reported as created");
        assert!(tracker.database().get_record(record.id).unwrap().is_some());
    }

    #[test]
    fn failed_region_lookup_keeps_the_import() {
        let (tracker, admin) = tracker_without_accounts();
        let rows = vec![ImportRow {
            line: 2,
            record: NewRecord {
                company_name: "Acme".to_string(),
                vehicle_type: "T1".to_string(),
                region: Some("Bursa".to_string()),
                ..NewRecord::default()
            },
        }];

        let summary = match tracker.import_records(&admin, rows, false).unwrap() {
            ImportOutcome::Imported { summary } => summary,
            other => panic!("expected import to complete, got {:?}", other),
        };
        assert_eq!(summary.inserted, 1);
        assert!(summary.notified.is_empty(), "Nobody could be looked up");
        assert_eq!(tracker.database().list_records().unwrap().len(), 1);
    }
}
