// src/core/store.rs

//! SQLite-backed compliance table, one row per host.
//!
//! The schema is a static, versioned definition shared by the writers (orchestrator and
//! grading tasks) and the semicolon export in [`crate::core::export`]. Every write is a
//! single statement, so each partial update is atomic on its own. Concurrent grading tasks
//! each open their own connection through [`ResultStore::session`].

use crate::core::models::{CheckField, FieldUpdate, FieldValue, HostRecord, Verdict};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use strum::IntoEnumIterator;
use tracing::{debug, info};

pub const DATABASE_FILE: &str = "websites.db";
pub const TABLE: &str = "website_checks";
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: u32, supported: u32 },
    #[error("task join error: {0}")]
    Join(String),
    #[error("no result store at {0}")]
    Missing(PathBuf),
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline_checks",
        sql: "CREATE TABLE IF NOT EXISTS website_checks (\
                host TEXT PRIMARY KEY,\
                robots_check INTEGER,\
                headers_check INTEGER,\
                version_check INTEGER,\
                error_check INTEGER,\
                grade TEXT,\
                grade_check INTEGER,\
                check_date TEXT,\
                security_txt INTEGER\
              );",
    },
    Migration {
        version: 2,
        name: "gates_and_extended_checks",
        sql: "ALTER TABLE website_checks ADD COLUMN https_reachable INTEGER;\
              ALTER TABLE website_checks ADD COLUMN remnants_check INTEGER;\
              ALTER TABLE website_checks ADD COLUMN cert_check INTEGER;\
              ALTER TABLE website_checks ADD COLUMN redirect_check INTEGER;\
              ALTER TABLE website_checks ADD COLUMN debug_check INTEGER;",
    },
];

/// Column order used by readers: key, date, every tri-state field, then the grade text.
pub fn columns() -> Vec<&'static str> {
    let mut cols = vec!["host", FieldUpdate::CHECK_DATE];
    cols.extend(CheckField::iter().map(CheckField::column));
    cols.push(FieldUpdate::GRADE);
    cols
}

#[derive(Clone)]
pub struct ResultStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl ResultStore {
    /// Opens (creating if needed) the store file and brings the schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Self::connect(path)?;
        migrate(&conn)?;
        info!(path = %path.display(), version = SCHEMA_VERSION, "Result store ready.");
        Ok(Self { path: path.to_path_buf(), conn: Arc::new(Mutex::new(conn)) })
    }

    /// Like [`ResultStore::open`], but refuses to create a store that is not there yet.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        Self::open(path)
    }

    /// A second, independent connection to the same database file.
    pub fn session(&self) -> Result<Self, StoreError> {
        let conn = Self::connect(&self.path)?;
        Ok(Self { path: self.path.clone(), conn: Arc::new(Mutex::new(conn)) })
    }

    fn connect(path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA busy_timeout=5000;",
        )?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // The connection stays usable after a panic in another holder.
    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Creates the row for `host` if it is absent. Returns whether a row was inserted.
    pub async fn ensure(&self, host: &str) -> Result<bool, StoreError> {
        let host = host.to_string();
        self.blocking(move |conn| ensure_row(conn, &host)).await
    }

    /// Applies a partial update; columns not named in `update` are left untouched.
    pub async fn update(&self, host: &str, update: FieldUpdate) -> Result<(), StoreError> {
        let host = host.to_string();
        self.blocking(move |conn| apply_update(conn, &host, &update)).await
    }

    #[cfg(test)]
    pub async fn record(&self, host: &str) -> Result<Option<HostRecord>, StoreError> {
        let host = host.to_string();
        self.blocking(move |conn| read_record(conn, &host)).await
    }

    pub async fn records(&self) -> Result<Vec<HostRecord>, StoreError> {
        self.blocking(read_records).await
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_conn(current_version)
    }
}

fn ensure_row(conn: &Connection, host: &str) -> Result<bool, StoreError> {
    let inserted = conn.execute("INSERT OR IGNORE INTO website_checks (host) VALUES (?1)", params![host])?;
    if inserted > 0 {
        debug!(host, "Created compliance record.");
    }
    Ok(inserted > 0)
}

fn apply_update(conn: &Connection, host: &str, update: &FieldUpdate) -> Result<(), StoreError> {
    if update.is_empty() {
        return Ok(());
    }
    let entries = update.entries();
    let names: Vec<&str> = entries.iter().map(|(c, _)| *c).collect();
    let placeholders: Vec<String> = (2..=entries.len() + 1).map(|i| format!("?{i}")).collect();
    let assignments: Vec<String> = names.iter().map(|c| format!("{c} = excluded.{c}")).collect();
    // Upsert keeps the write a single statement even if the row was never ensured.
    let sql = format!(
        "INSERT INTO {TABLE} (host, {}) VALUES (?1, {}) ON CONFLICT(host) DO UPDATE SET {}",
        names.join(", "),
        placeholders.join(", "),
        assignments.join(", "),
    );

    let mut values = vec![Value::Text(host.to_string())];
    values.extend(entries.iter().map(|(_, v)| match v {
        FieldValue::Verdict(verdict) => verdict.as_db().map_or(Value::Null, Value::Integer),
        FieldValue::Text(text) => text.clone().map_or(Value::Null, Value::Text),
    }));
    conn.execute(&sql, params_from_iter(values.iter()))?;
    debug!(host, columns = %names.join(","), "Applied field update.");
    Ok(())
}

fn select_sql() -> String {
    format!("SELECT {} FROM {TABLE}", columns().join(", "))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HostRecord> {
    let host: String = row.get(0)?;
    let mut record = HostRecord::new(&host);
    record.check_date = row.get(1)?;
    for (i, field) in CheckField::iter().enumerate() {
        let value: Option<i64> = row.get(i + 2)?;
        record.verdicts.insert(field, Verdict::from_db(value));
    }
    record.grade = row.get(CheckField::iter().count() + 2)?;
    Ok(record)
}

#[cfg(test)]
fn read_record(conn: &Connection, host: &str) -> Result<Option<HostRecord>, StoreError> {
    let sql = format!("{} WHERE host = ?1", select_sql());
    Ok(conn.query_row(&sql, params![host], row_to_record).optional()?)
}

fn read_records(conn: &Connection) -> Result<Vec<HostRecord>, StoreError> {
    let sql = format!("{} ORDER BY host", select_sql());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_record)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// --- Schema management ---

fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: Option<String> = conn
        .query_row("SELECT value FROM schema_meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()?;
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);")?;
    let current = current_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew { found: current, supported: SCHEMA_VERSION });
    }
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
            params![migration.version.to_string()],
        )?;
        tx.commit()?;
        info!(version = migration.version, name = migration.name, "Applied store migration.");
    }
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('columns', ?1)",
        params![columns().join(",")],
    )?;
    Ok(())
}
