//! SQLite-backed pref store.
//!
//! One row per pref. The value is stored as text next to a `kind` column
//! so booleans, integers and strings round-trip exactly. Schema versions are
//! tracked with `PRAGMA user_version`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use crossbeam::channel::Receiver;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::PrefsError;
use crate::prefs::{PrefChange, PrefObservers, PrefStore, PrefValue};

/// Current prefs schema version.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS prefs (
    key        TEXT PRIMARY KEY NOT NULL,
    kind       TEXT NOT NULL CHECK (kind IN ('bool', 'int', 'string')),
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

fn db_err(e: &rusqlite::Error) -> PrefsError {
    PrefsError::Database(e.to_string())
}

fn encode(value: &PrefValue) -> (&'static str, String) {
    match value {
        PrefValue::Bool(b) => ("bool", b.to_string()),
        PrefValue::Int(i) => ("int", i.to_string()),
        PrefValue::String(s) => ("string", s.clone()),
    }
}

fn decode(key: &str, kind: &str, raw: String) -> Result<PrefValue, PrefsError> {
    let corrupt = |reason: String| PrefsError::ReadFailed {
        key: key.to_string(),
        reason,
    };
    match kind {
        "bool" => raw
            .parse()
            .map(PrefValue::Bool)
            .map_err(|e| corrupt(format!("bad bool {raw:?}: {e}"))),
        "int" => raw
            .parse()
            .map(PrefValue::Int)
            .map_err(|e| corrupt(format!("bad int {raw:?}: {e}"))),
        "string" => Ok(PrefValue::String(raw)),
        other => Err(corrupt(format!("unknown kind {other:?}"))),
    }
}

/// Create the schema on a fresh database and reject databases from newer
/// versions.
pub fn initialize_schema(conn: &Connection) -> Result<(), PrefsError> {
    let current: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| db_err(&e))?;
    if current > SCHEMA_VERSION {
        return Err(PrefsError::SchemaTooNew {
            current,
            supported: SCHEMA_VERSION,
        });
    }
    conn.execute_batch(SCHEMA_SQL).map_err(|e| db_err(&e))?;
    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| db_err(&e))?;
        debug!(from = current, to = SCHEMA_VERSION, "Prefs schema migrated");
    }
    Ok(())
}

/// Pref store persisted in a SQLite database.
#[derive(Debug)]
pub struct SqlitePrefStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    observers: PrefObservers,
}

impl SqlitePrefStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PrefsError::Database(format!(
                    "create {}: {e}",
                    parent.display()
                )))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| db_err(&e))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| db_err(&e))?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, PrefsError> {
        let conn = Connection::open_in_memory().map_err(|e| db_err(&e))?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, PrefsError> {
        initialize_schema(&conn)?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            observers: PrefObservers::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PrefStore for SqlitePrefStore {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, PrefsError> {
        let row: Option<(String, String)> = self
            .conn()
            .query_row(
                "SELECT kind, value FROM prefs WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| PrefsError::ReadFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        row.map(|(kind, raw)| decode(key, &kind, raw)).transpose()
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        let (kind, raw) = encode(&value);
        self.conn()
            .execute(
                "INSERT INTO prefs (key, kind, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    kind = excluded.kind,
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, kind, raw, Utc::now().timestamp_millis()],
            )
            .map_err(|e| PrefsError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        debug!(pref_key = key, pref_value = %value, "Pref written");
        self.observers.notify(&PrefChange {
            key: key.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        let removed = self
            .conn()
            .execute("DELETE FROM prefs WHERE key = ?1", params![key])
            .map_err(|e| PrefsError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if removed > 0 {
            self.observers.notify(&PrefChange {
                key: key.to_string(),
                value: None,
            });
        }
        Ok(())
    }

    fn entries(&self) -> Result<BTreeMap<String, PrefValue>, PrefsError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT key, kind, value FROM prefs ORDER BY key")
            .map_err(|e| db_err(&e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| db_err(&e))?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (key, kind, raw) = row.map_err(|e| db_err(&e))?;
            let value = decode(&key, &kind, raw)?;
            out.insert(key, value);
        }
        Ok(out)
    }

    fn subscribe(&self) -> Receiver<PrefChange> {
        self.observers.subscribe()
    }
}
