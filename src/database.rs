//! SQLite persistence for records (`denetimler`) and accounts (`kullanicilar`).
//!
//! Column names follow the existing deployment's schema so an existing
//! database file can be opened unchanged. The `UNIQUE` constraint on
//! `sasi_no` is the final guard for chassis uniqueness.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{TrackerError, TrackerResult, conflict_on_constraint};
use crate::record::{NewRecord, Record, RecordStatus};
use crate::user::{Role, User};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS denetimler (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    basvuru_no TEXT,
    firma_adi TEXT NOT NULL,
    marka TEXT,
    arac_kategori TEXT,
    arac_tipi TEXT NOT NULL,
    varyant TEXT,
    versiyon TEXT,
    ticari_ad TEXT,
    gtip_no TEXT,
    birim TEXT,
    uretim_ulkesi TEXT,
    arac_sayisi TEXT,
    sasi_no TEXT UNIQUE,
    basvuru_tarihi DATE,
    secim_tarihi DATE,
    il TEXT NOT NULL,
    durum TEXT NOT NULL DEFAULT 'awaiting_chassis',
    notlar TEXT,
    guncelleme_tarihi TEXT,
    ekleyen_kullanici TEXT,
    silme_talebi INTEGER NOT NULL DEFAULT 0,
    silme_nedeni TEXT
);
CREATE INDEX IF NOT EXISTS idx_denetimler_arac ON denetimler (firma_adi, marka, arac_tipi);
CREATE INDEX IF NOT EXISTS idx_denetimler_basvuru ON denetimler (basvuru_no);
CREATE TABLE IF NOT EXISTS kullanicilar (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kullanici_adi TEXT UNIQUE NOT NULL,
    sifre TEXT NOT NULL,
    rol TEXT NOT NULL,
    email TEXT,
    sorumlu_il TEXT NOT NULL,
    onay_durumu INTEGER NOT NULL DEFAULT 0,
    excel_yukleme_yetkisi INTEGER NOT NULL DEFAULT 0
);
";

const RECORD_COLUMNS: &str = "id, basvuru_no, firma_adi, marka, arac_kategori, arac_tipi, \
     varyant, versiyon, ticari_ad, gtip_no, birim, uretim_ulkesi, arac_sayisi, sasi_no, \
     basvuru_tarihi, secim_tarihi, il, durum, notlar, guncelleme_tarihi, ekleyen_kullanici, \
     silme_talebi, silme_nedeni";

const USER_COLUMNS: &str =
    "id, kullanici_adi, sifre, rol, email, sorumlu_il, onay_durumu, excel_yukleme_yetkisi";

/// Handle to the tracker database
///
/// A single connection guarded by a mutex; every call holds the lock for the
/// duration of one statement or one transaction.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path` and apply the schema
    ///
    /// The parent directory is created if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Fresh private database, used by tests and dry runs
    pub fn open_in_memory() -> TrackerResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> TrackerResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // Every write is a single statement or transaction; poisoning leaves no partial state.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Records ──────────────────────────────────────────────────────────

    /// Insert one record in `AwaitingChassis` and return it
    pub fn insert_record(
        &self,
        new: &NewRecord,
        region: &str,
        created_by: &str,
        now: NaiveDateTime,
    ) -> TrackerResult<Record> {
        let conn = self.conn();
        let id = insert_record_row(&conn, new, region, created_by, now)?;
        fetch_record(&conn, id)?.ok_or_else(|| TrackerError::NotFound(format!("record {}", id)))
    }

    /// Insert every row in one transaction, returning the new ids in order
    ///
    /// Each row must already carry its region.
    pub fn insert_records(
        &self,
        rows: &[NewRecord],
        created_by: &str,
        now: NaiveDateTime,
    ) -> TrackerResult<Vec<i64>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let region = row.region.as_deref().unwrap_or_default();
            ids.push(insert_record_row(&tx, row, region, created_by, now)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    pub fn get_record(&self, id: i64) -> TrackerResult<Option<Record>> {
        fetch_record(&self.conn(), id)
    }

    /// All records, newest first
    pub fn list_records(&self) -> TrackerResult<Vec<Record>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM denetimler ORDER BY id DESC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Records describing the same (company, brand, vehicle type), excluding `exclude_id`
    pub fn find_same_vehicle(
        &self,
        company_name: &str,
        brand: Option<&str>,
        vehicle_type: &str,
        exclude_id: Option<i64>,
    ) -> TrackerResult<Vec<Record>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM denetimler \
             WHERE firma_adi = ?1 AND marka IS ?2 AND arac_tipi = ?3 AND id IS NOT ?4 \
             ORDER BY id",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![company_name, brand, vehicle_type, exclude_id],
            record_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn find_by_chassis(&self, chassis_no: &str) -> TrackerResult<Option<Record>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM denetimler WHERE sasi_no = ?1", RECORD_COLUMNS),
                [chassis_no],
                record_from_row,
            )
            .optional()?)
    }

    pub fn application_no_exists(&self, application_no: &str) -> TrackerResult<bool> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT 1 FROM denetimler WHERE basvuru_no = ?1 LIMIT 1",
                [application_no],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    /// Every application number currently stored
    pub fn application_numbers(&self) -> TrackerResult<HashSet<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT basvuru_no FROM denetimler WHERE basvuru_no IS NOT NULL")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    /// Attach a chassis number and move the record to `SentForTesting`
    ///
    /// Only a record still in `AwaitingChassis` is updated; any other status
    /// gives `Validation`. Returns `Conflict` when another record already
    /// holds the chassis number.
    pub fn set_chassis(
        &self,
        id: i64,
        chassis_no: &str,
        selection_date: NaiveDate,
        now: NaiveDateTime,
    ) -> TrackerResult<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE denetimler SET sasi_no = ?1, durum = ?2, secim_tarihi = ?3, \
                 guncelleme_tarihi = ?4 WHERE id = ?5 AND durum = ?6",
                params![
                    chassis_no,
                    RecordStatus::SentForTesting.as_str(),
                    selection_date,
                    now,
                    id,
                    RecordStatus::AwaitingChassis.as_str()
                ],
            )
            .map_err(|e| {
                conflict_on_constraint(
                    e,
                    &format!("Chassis number {} is already assigned to another record", chassis_no),
                )
            })?;
        if changed == 0 {
            return match fetch_record(&conn, id)? {
                Some(record) => Err(TrackerError::validation(format!(
                    "Record {} is not awaiting a chassis number (status: {})",
                    id, record.status
                ))),
                None => Err(TrackerError::NotFound(format!("record {}", id))),
            };
        }
        Ok(())
    }

    pub fn update_status(
        &self,
        id: i64,
        status: RecordStatus,
        notes: Option<&str>,
        now: NaiveDateTime,
    ) -> TrackerResult<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE denetimler SET durum = ?1, notlar = COALESCE(?2, notlar), \
             guncelleme_tarihi = ?3 WHERE id = ?4",
            params![status.as_str(), notes, now, id],
        )?;
        expect_one(changed, id)
    }

    /// Raise (with a reason) or clear a deletion request
    pub fn set_deletion_request(
        &self,
        id: i64,
        reason: Option<&str>,
        now: NaiveDateTime,
    ) -> TrackerResult<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE denetimler SET silme_talebi = ?1, silme_nedeni = ?2, \
             guncelleme_tarihi = ?3 WHERE id = ?4",
            params![reason.is_some(), reason, now, id],
        )?;
        expect_one(changed, id)
    }

    /// Purge a record; returns whether a row was removed
    pub fn delete_record(&self, id: i64) -> TrackerResult<bool> {
        let conn = self.conn();
        Ok(conn.execute("DELETE FROM denetimler WHERE id = ?1", [id])? > 0)
    }

    pub fn list_deletion_requests(&self) -> TrackerResult<Vec<Record>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM denetimler WHERE silme_talebi = 1 ORDER BY id",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_deletion_requests(&self) -> TrackerResult<i64> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM denetimler WHERE silme_talebi = 1",
            [],
            |r| r.get(0),
        )?)
    }

    // ── Users ────────────────────────────────────────────────────────────

    /// Insert an account; a taken username is a `Conflict`
    #[allow(clippy::too_many_arguments)]
    pub fn insert_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
        email: Option<&str>,
        region: &str,
        approved: bool,
        bulk_import_permission: bool,
    ) -> TrackerResult<User> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kullanicilar (kullanici_adi, sifre, rol, email, sorumlu_il, \
             onay_durumu, excel_yukleme_yetkisi) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                username,
                password_hash,
                role.as_str(),
                email,
                region,
                approved,
                bulk_import_permission
            ],
        )
        .map_err(|e| conflict_on_constraint(e, &format!("Username {} already exists", username)))?;
        let id = conn.last_insert_rowid();
        fetch_user(&conn, "id = ?1", id)?
            .ok_or_else(|| TrackerError::NotFound(format!("user {}", id)))
    }

    pub fn get_user(&self, id: i64) -> TrackerResult<Option<User>> {
        fetch_user(&self.conn(), "id = ?1", id)
    }

    pub fn find_user(&self, username: &str) -> TrackerResult<Option<User>> {
        fetch_user(&self.conn(), "kullanici_adi = ?1", username)
    }

    pub fn list_users(&self) -> TrackerResult<Vec<User>> {
        self.query_users("1 = 1", params![])
    }

    pub fn list_pending_users(&self) -> TrackerResult<Vec<User>> {
        self.query_users("onay_durumu = 0", params![])
    }

    /// Approved accounts responsible for `region`
    pub fn approved_users_in_region(&self, region: &str) -> TrackerResult<Vec<User>> {
        self.query_users("sorumlu_il = ?1 AND onay_durumu = 1", params![region])
    }

    fn query_users(&self, condition: &str, args: &[&dyn rusqlite::ToSql]) -> TrackerResult<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM kullanicilar WHERE {} ORDER BY id",
            USER_COLUMNS, condition
        ))?;
        let rows = stmt.query_map(args, user_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_user_approved(&self, id: i64, approved: bool) -> TrackerResult<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE kullanicilar SET onay_durumu = ?1 WHERE id = ?2",
            params![approved, id],
        )?;
        expect_one_user(changed, id)
    }

    pub fn set_bulk_import_permission(&self, id: i64, allowed: bool) -> TrackerResult<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE kullanicilar SET excel_yukleme_yetkisi = ?1 WHERE id = ?2",
            params![allowed, id],
        )?;
        expect_one_user(changed, id)
    }

    /// Replace the stored hash; returns whether the account exists
    pub fn update_password(&self, username: &str, password_hash: &str) -> TrackerResult<bool> {
        let conn = self.conn();
        Ok(conn.execute(
            "UPDATE kullanicilar SET sifre = ?1 WHERE kullanici_adi = ?2",
            params![password_hash, username],
        )? > 0)
    }

    pub fn delete_user(&self, id: i64) -> TrackerResult<bool> {
        let conn = self.conn();
        Ok(conn.execute("DELETE FROM kullanicilar WHERE id = ?1", [id])? > 0)
    }

    pub fn count_admins(&self) -> TrackerResult<i64> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM kullanicilar WHERE rol = 'admin'",
            [],
            |r| r.get(0),
        )?)
    }

    pub fn count_pending_users(&self) -> TrackerResult<i64> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM kullanicilar WHERE onay_durumu = 0",
            [],
            |r| r.get(0),
        )?)
    }
}

fn insert_record_row(
    conn: &Connection,
    new: &NewRecord,
    region: &str,
    created_by: &str,
    now: NaiveDateTime,
) -> TrackerResult<i64> {
    conn.execute(
        "INSERT INTO denetimler (basvuru_no, firma_adi, marka, arac_kategori, arac_tipi, \
         varyant, versiyon, ticari_ad, gtip_no, birim, uretim_ulkesi, arac_sayisi, \
         basvuru_tarihi, il, durum, notlar, guncelleme_tarihi, ekleyen_kullanici) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            new.application_no,
            new.company_name,
            new.brand,
            new.vehicle_category,
            new.vehicle_type,
            new.variant,
            new.version,
            new.trade_name,
            new.gtip_no,
            new.unit,
            new.country_of_origin,
            new.vehicle_count,
            new.submitted_date,
            region,
            RecordStatus::AwaitingChassis.as_str(),
            new.notes,
            now,
            created_by,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn fetch_record(conn: &Connection, id: i64) -> TrackerResult<Option<Record>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM denetimler WHERE id = ?1", RECORD_COLUMNS),
            [id],
            record_from_row,
        )
        .optional()?)
}

fn fetch_user<P: rusqlite::ToSql>(
    conn: &Connection,
    condition: &str,
    key: P,
) -> TrackerResult<Option<User>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM kullanicilar WHERE {}", USER_COLUMNS, condition),
            [key],
            user_from_row,
        )
        .optional()?)
}

fn expect_one(changed: usize, id: i64) -> TrackerResult<()> {
    if changed == 0 {
        return Err(TrackerError::NotFound(format!("record {}", id)));
    }
    Ok(())
}

fn expect_one_user(changed: usize, id: i64) -> TrackerResult<()> {
    if changed == 0 {
        return Err(TrackerError::NotFound(format!("user {}", id)));
    }
    Ok(())
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let status: String = row.get(17)?;
    let status = status
        .parse::<RecordStatus>()
        .map_err(|e| conversion_error(17, e))?;

    Ok(Record {
        id: row.get(0)?,
        application_no: row.get(1)?,
        company_name: row.get(2)?,
        brand: row.get(3)?,
        vehicle_category: row.get(4)?,
        vehicle_type: row.get(5)?,
        variant: row.get(6)?,
        version: row.get(7)?,
        trade_name: row.get(8)?,
        gtip_no: row.get(9)?,
        unit: row.get(10)?,
        country_of_origin: row.get(11)?,
        vehicle_count: row.get(12)?,
        chassis_no: row.get(13)?,
        submitted_date: row.get(14)?,
        selection_date: row.get(15)?,
        region: row.get(16)?,
        status,
        notes: row.get(18)?,
        updated_at: row.get(19)?,
        created_by: row.get(20)?,
        deletion_requested: row.get(21)?,
        deletion_reason: row.get(22)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    let role = role.parse::<Role>().map_err(|e| conversion_error(3, e))?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role,
        email: row.get(4)?,
        responsible_region: row.get(5)?,
        approved: row.get(6)?,
        bulk_import_permission: row.get(7)?,
    })
}
