//! Updates the recordings database once a file has been converted.
//!
//! The database side is split into a [`RecordStore`] that opens connections and a
//! [`RecordConnection`] that runs the filename update, so another backend can be
//! plugged in by implementing the two traits. A connection lives for exactly one
//! [`Reconciler::reconcile`] call.

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;
use crate::config::{DatabaseKind, TranscodeConfig};

const UPDATE_FILENAME_SQL: &str =
    "UPDATE scheduled_recording SET filename = ?1 WHERE lower(filename) = lower(?2)";

const DATA_SOURCE_KEYS: &[&str] = &["data source", "datasource", "filename"];

// Keys of the System.Data.SQLite connection string format
const CONNECTION_STRING_KEYS: &[&str] = &[
    "data source",
    "datasource",
    "filename",
    "version",
    "pooling",
    "max pool size",
    "journal mode",
    "synchronous",
    "cache size",
    "page size",
    "password",
    "read only",
    "failifmissing",
    "foreign keys",
    "default timeout",
    "datetimeformat",
    "uri",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("connection string has no `Data Source`: {0}")]
    NoDataSource(String),
}

/// Opens connections to the store holding recording records
pub trait RecordStore {
    type Connection: RecordConnection;

    fn open(&self) -> Result<Self::Connection>;
}

/// A single open connection to the record store
pub trait RecordConnection {
    /// Set the stored filename to `new` for every record whose filename equals
    /// `old` ignoring case. Returns the number of records changed.
    fn update_filename(&mut self, old: &str, new: &str) -> Result<usize>;

    fn close(self) -> Result<()>;
}

/// SQLite database file holding the `scheduled_recording` table
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Accepts either a bare file path or an ADO-style connection string
    /// such as `Data Source=C:\npvr\npvr.db3;Version=3;`
    ///
    /// Only strings naming a known connection key are treated as ADO-style, so
    /// a path like `/data/a=b.db3` is still a bare path.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, ReconcileError> {
        let trimmed = connection_string.trim();
        let pairs: Vec<(String, &str)> = trimmed
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim()))
            .collect();

        if !pairs.iter().any(|(key, _)| CONNECTION_STRING_KEYS.contains(&key.as_str())) {
            return Ok(Self::new(trimmed));
        }

        pairs
            .into_iter()
            .find(|(key, _)| DATA_SOURCE_KEYS.contains(&key.as_str()))
            .map(|(_, value)| Self::new(value))
            .ok_or_else(|| ReconcileError::NoDataSource(connection_string.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for SqliteStore {
    type Connection = SqliteConnection;

    fn open(&self) -> Result<SqliteConnection> {
        // Never create a database; a missing file is a configuration problem
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open database: {}", self.path.display()))?;
        Ok(SqliteConnection { conn })
    }
}

pub struct SqliteConnection {
    conn: Connection,
}

impl RecordConnection for SqliteConnection {
    fn update_filename(&mut self, old: &str, new: &str) -> Result<usize> {
        let rows = self
            .conn
            .execute(UPDATE_FILENAME_SQL, rusqlite::params![new, old])
            .context("Failed to update scheduled_recording")?;
        Ok(rows)
    }

    fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| e)
            .context("Failed to close database connection")
    }
}

/// Build the record store selected by `cfg.database`
pub fn store_from_config(cfg: &TranscodeConfig) -> Result<SqliteStore> {
    match cfg.database {
        DatabaseKind::Sqlite => Ok(SqliteStore::from_connection_string(&cfg.connection_string)?),
    }
}

/// Points a recording record at its converted file
#[derive(Debug, Clone)]
pub struct Reconciler<S> {
    store: S,
}

impl<S: RecordStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns whether any record was updated. Zero matches is not an error:
    /// the recording may not be known to the database.
    pub fn reconcile(&self, old: &str, new: &str) -> Result<bool> {
        debug!("Updating database record {} -> {}", old, new);
        let mut conn = self.store.open()?;
        let rows = conn.update_filename(old, new)?;
        conn.close()?;

        if rows > 0 {
            info!("Successfully updated database ({} record(s))", rows);
        } else {
            warn!("No database record matched {}", old);
        }
        Ok(rows > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Creates a recordings database with one row per filename
    pub(crate) fn recordings_db(path: &Path, filenames: &[&str]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE scheduled_recording (oid INTEGER PRIMARY KEY, name TEXT, filename TEXT);",
        )
        .unwrap();
        for filename in filenames {
            conn.execute(
                "INSERT INTO scheduled_recording (name, filename) VALUES ('show', ?1)",
                [filename],
            )
            .unwrap();
        }
    }

    pub(crate) fn stored_filenames(path: &Path) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare("SELECT filename FROM scheduled_recording ORDER BY oid")
            .unwrap();
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        names
    }

    #[test]
    fn test_connection_string_forms() {
        let store = SqliteStore::from_connection_string(r"Data Source=C:\Users\Public\NPVR\npvr.db3;Version=3;").unwrap();
        assert_eq!(store.path(), Path::new(r"C:\Users\Public\NPVR\npvr.db3"));

        let store = SqliteStore::from_connection_string("version=3; DATASOURCE = /var/lib/npvr.db3").unwrap();
        assert_eq!(store.path(), Path::new("/var/lib/npvr.db3"));

        let store = SqliteStore::from_connection_string("/var/lib/npvr/npvr.db3").unwrap();
        assert_eq!(store.path(), Path::new("/var/lib/npvr/npvr.db3"));

        assert!(matches!(
            SqliteStore::from_connection_string("Version=3;Pooling=True"),
            Err(ReconcileError::NoDataSource(_))
        ));
    }

    #[test]
    fn test_bare_path_with_equals_sign() {
        let store = SqliteStore::from_connection_string("/data/a=b.db3").unwrap();
        assert_eq!(store.path(), Path::new("/data/a=b.db3"));

        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("season=1.db3");
        recordings_db(&db, &["/tv/ep1.ts"]);

        let store = SqliteStore::from_connection_string(db.to_str().unwrap()).unwrap();
        assert_eq!(store.path(), db.as_path());
        assert!(Reconciler::new(store).reconcile("/tv/ep1.ts", "/tv/ep1.mp4").unwrap());
        assert_eq!(stored_filenames(&db), vec!["/tv/ep1.mp4".to_string()]);
    }

    #[test]
    fn test_reconcile_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("npvr.db3");
        recordings_db(&db, &[r"\\SERVER\tv\Show\Ep1.ts", r"\\server\tv\other.ts"]);

        let reconciler = Reconciler::new(SqliteStore::new(&db));
        let updated = reconciler
            .reconcile(r"\\server\tv\show\ep1.ts", r"\\server\tv\show\ep1.mp4")
            .unwrap();

        assert!(updated);
        assert_eq!(
            stored_filenames(&db),
            vec![r"\\server\tv\show\ep1.mp4".to_string(), r"\\server\tv\other.ts".to_string()]
        );
    }

    #[test]
    fn test_reconcile_without_match_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("npvr.db3");
        recordings_db(&db, &["/mnt/tv/kept.ts"]);

        let reconciler = Reconciler::new(SqliteStore::new(&db));
        assert!(!reconciler.reconcile("/mnt/tv/unknown.ts", "/mnt/tv/unknown.mp4").unwrap());
        assert_eq!(stored_filenames(&db), vec!["/mnt/tv/kept.ts".to_string()]);
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("missing.db3");
        let reconciler = Reconciler::new(SqliteStore::new(&db));
        assert!(reconciler.reconcile("a.ts", "a.mp4").is_err());
        assert!(!db.exists());
    }

    #[test]
    fn test_store_from_config() {
        let cfg = TranscodeConfig {
            connection_string: "Data Source=/srv/npvr.db3".to_string(),
            ..TranscodeConfig::default_config()
        };
        assert_eq!(store_from_config(&cfg).unwrap().path(), Path::new("/srv/npvr.db3"));
    }
}
