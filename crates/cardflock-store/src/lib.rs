use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cardflock_core::{MedType, RiskGroupRow, RunStatus, VisitRecord, WindowMeta};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::info;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MODEL_PREFIX: &str = "rsk_crd_gtr";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("bad visit row: {0}")]
    BadRow(String),
}

/// Source of one window's settlement rows, restricted to the processed visit
/// classes.
pub trait VisitSource {
    fn fetch_visits(
        &self,
        begin: NaiveDate,
        end: NaiveDate,
        admdvs: Option<&str>,
    ) -> Result<Vec<VisitRecord>, StoreError>;
}

/// Destination for a window's risk groups. Implementations must be
/// idempotent per model number and window.
pub trait GroupSink {
    fn persist_groups(&self, meta: &WindowMeta, rows: &[RiskGroupRow]) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_visits(&self, visits: &[VisitRecord]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO visits (
                    admdvs, med_clinic_id, person_id, med_type,
                    flx_med_org_id, adm_time, adm_date
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for visit in visits {
                stmt.execute(params![
                    visit.admdvs,
                    visit.med_clinic_id,
                    visit.person_id,
                    visit.med_type.as_code(),
                    visit.flx_med_org_id,
                    visit.adm_time.format(TIME_FORMAT).to_string(),
                    visit.adm_date.format(DATE_FORMAT).to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn visit_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(1) FROM visits", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn group_row_count(&self, model_no: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM risk_groups WHERE model_no = ?1",
            params![model_no],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn record_run_status(
        &self,
        model_no: &str,
        status: RunStatus,
        start_date: NaiveDate,
        end_date: NaiveDate,
        admdvs: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO run_log (model_no, model_status, start_date, end_date, admdvs, logged_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                model_no,
                status.as_code(),
                start_date.format(DATE_FORMAT).to_string(),
                end_date.format(DATE_FORMAT).to_string(),
                admdvs,
                Utc::now().naive_utc().format(TIME_FORMAT).to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_run_status(&self, model_no: &str) -> Result<Option<RunStatus>, StoreError> {
        let code: Option<String> = self
            .conn
            .query_row(
                "SELECT model_status FROM run_log WHERE model_no = ?1 ORDER BY id DESC LIMIT 1",
                params![model_no],
                |row| row.get(0),
            )
            .optional()?;
        Ok(code.as_deref().and_then(RunStatus::from_code))
    }
}

impl VisitSource for SqliteStore {
    fn fetch_visits(
        &self,
        begin: NaiveDate,
        end: NaiveDate,
        admdvs: Option<&str>,
    ) -> Result<Vec<VisitRecord>, StoreError> {
        let begin = begin.format(DATE_FORMAT).to_string();
        let end = end.format(DATE_FORMAT).to_string();
        let admdvs = normalize_admdvs(admdvs);

        let mut raw_rows: Vec<RawVisit> = Vec::new();
        let mut push_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
            raw_rows.push(RawVisit {
                admdvs: row.get(0)?,
                med_clinic_id: row.get(1)?,
                person_id: row.get(2)?,
                med_type: row.get(3)?,
                flx_med_org_id: row.get(4)?,
                adm_time: row.get(5)?,
                adm_date: row.get(6)?,
            });
            Ok(())
        };

        match admdvs {
            Some(admdvs) => {
                let mut stmt = self.conn.prepare(
                    r#"
                    SELECT admdvs, med_clinic_id, person_id, med_type,
                           flx_med_org_id, adm_time, adm_date
                    FROM visits
                    WHERE med_type IN ('11', '41')
                      AND adm_date BETWEEN ?1 AND ?2
                      AND admdvs = ?3
                    ORDER BY adm_time, med_clinic_id
                    "#,
                )?;
                let mut rows = stmt.query(params![begin, end, admdvs])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    r#"
                    SELECT admdvs, med_clinic_id, person_id, med_type,
                           flx_med_org_id, adm_time, adm_date
                    FROM visits
                    WHERE med_type IN ('11', '41')
                      AND adm_date BETWEEN ?1 AND ?2
                    ORDER BY adm_time, med_clinic_id
                    "#,
                )?;
                let mut rows = stmt.query(params![begin, end])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
        }

        raw_rows.into_iter().map(RawVisit::into_record).collect()
    }
}

impl GroupSink for SqliteStore {
    fn persist_groups(&self, meta: &WindowMeta, rows: &[RiskGroupRow]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let begin = meta.begin_date.format(DATE_FORMAT).to_string();
        let end = meta.end_date.format(DATE_FORMAT).to_string();
        let tx = self.conn.unchecked_transaction()?;
        {
            // Re-running a window replaces its rows for the same model.
            tx.execute(
                r#"
                DELETE FROM risk_groups
                WHERE model_no = ?1 AND input_begndate = ?2 AND input_enddate = ?3
                "#,
                params![meta.model_no, begin, end],
            )?;

            let mut stmt = tx.prepare(
                r#"
                INSERT INTO risk_groups (
                    model_no, run_time, input_admdvs, input_begndate, input_enddate,
                    group_id, subgroup_id, risk_clinic_ratio,
                    person_id, med_clinic_id, flx_med_org_id, med_type, adm_date, adm_time
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    meta.model_no,
                    meta.run_time.format(TIME_FORMAT).to_string(),
                    meta.admdvs,
                    begin,
                    end,
                    row.group_id,
                    row.subgroup_id,
                    row.risk_clinic_ratio,
                    row.person_id,
                    row.med_clinic_id,
                    row.flx_med_org_id,
                    row.med_type.as_code(),
                    row.adm_date.format(DATE_FORMAT).to_string(),
                    row.adm_time.format(TIME_FORMAT).to_string(),
                ])?;
            }
        }
        tx.commit()?;
        info!(
            model_no = meta.model_no.as_str(),
            rows = rows.len(),
            "risk groups persisted"
        );
        Ok(())
    }
}

struct RawVisit {
    admdvs: String,
    med_clinic_id: String,
    person_id: String,
    med_type: String,
    flx_med_org_id: String,
    adm_time: String,
    adm_date: String,
}

impl RawVisit {
    fn into_record(self) -> Result<VisitRecord, StoreError> {
        let med_type = MedType::from_code(&self.med_type).ok_or_else(|| {
            StoreError::BadRow(format!(
                "visit {}: unknown med_type '{}'",
                self.med_clinic_id, self.med_type
            ))
        })?;
        let adm_time = NaiveDateTime::parse_from_str(&self.adm_time, TIME_FORMAT).map_err(
            |error| {
                StoreError::BadRow(format!(
                    "visit {}: bad adm_time '{}': {error}",
                    self.med_clinic_id, self.adm_time
                ))
            },
        )?;
        let adm_date = NaiveDate::parse_from_str(&self.adm_date, DATE_FORMAT).map_err(|error| {
            StoreError::BadRow(format!(
                "visit {}: bad adm_date '{}': {error}",
                self.med_clinic_id, self.adm_date
            ))
        })?;

        Ok(VisitRecord {
            admdvs: self.admdvs,
            med_clinic_id: self.med_clinic_id,
            person_id: self.person_id,
            med_type,
            flx_med_org_id: self.flx_med_org_id,
            adm_time,
            adm_date,
        })
    }
}

/// Model numbers tag one detector execution across windows.
pub fn next_model_no() -> String {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    format!("{MODEL_PREFIX}_{epoch}")
}

/// Blank and sentinel jurisdiction values mean "no filter".
fn normalize_admdvs(admdvs: Option<&str>) -> Option<String> {
    let value = admdvs?.trim();
    if value.is_empty() || matches!(value.to_ascii_lowercase().as_str(), "all" | "null" | "none") {
        return None;
    }
    Some(value.to_owned())
}

fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS visits (
            admdvs TEXT NOT NULL,
            med_clinic_id TEXT NOT NULL,
            person_id TEXT NOT NULL,
            med_type TEXT NOT NULL,
            flx_med_org_id TEXT NOT NULL,
            adm_time TEXT NOT NULL,
            adm_date TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_visits_date ON visits (adm_date);
        CREATE INDEX IF NOT EXISTS idx_visits_person ON visits (person_id);

        CREATE TABLE IF NOT EXISTS risk_groups (
            model_no TEXT NOT NULL,
            run_time TEXT NOT NULL,
            input_admdvs TEXT,
            input_begndate TEXT NOT NULL,
            input_enddate TEXT NOT NULL,
            group_id TEXT NOT NULL,
            subgroup_id TEXT NOT NULL,
            risk_clinic_ratio REAL NOT NULL,
            person_id TEXT NOT NULL,
            med_clinic_id TEXT NOT NULL,
            flx_med_org_id TEXT NOT NULL,
            med_type TEXT NOT NULL,
            adm_date TEXT NOT NULL,
            adm_time TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_risk_groups_model ON risk_groups (model_no);

        CREATE TABLE IF NOT EXISTS run_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model_no TEXT NOT NULL,
            model_status TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            admdvs TEXT,
            logged_at TEXT NOT NULL
        );
        "#,
    )
}
