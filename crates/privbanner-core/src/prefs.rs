//! Preference store abstraction.
//!
//! The governor reads the feature flag and the persisted show count through
//! the [`PrefStore`] trait and never assumes it owns the values: any other
//! process or tool may rewrite them between calls. Three backends exist:
//!
//! - [`MemoryPrefStore`]: volatile map, used in tests and by the `memory` backend
//! - [`crate::prefs_file::FilePrefStore`]: TOML file with advisory locking
//! - [`crate::prefs_sqlite::SqlitePrefStore`]: SQLite table
//!
//! Every successful write is committed before observers are notified, so a
//! test harness waiting on [`PrefStore::subscribe`] sees the durable value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::PrefsError;

/// Pref key of the feature flag gating the separate private search UI.
pub const PREF_UI_ENABLED: &str = "browser.search.separatePrivateDefault.ui.enabled";

/// Pref key of the persisted banner show count.
pub const PREF_BANNER_SHOWN: &str = "browser.search.separatePrivateDefault.ui.banner.shown";

/// Pref key consulted by the telemetry recorder before accepting pings.
pub const PREF_UPLOAD_ENABLED: &str = "datareporting.healthreport.uploadEnabled";

/// A single stored preference value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl PrefValue {
    /// Short type name used in mismatch errors and the sqlite `kind` column.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::String(_) => "string",
        }
    }
}

impl fmt::Display for PrefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for PrefValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PrefValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for PrefValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Notification sent to subscribers after a pref write commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefChange {
    pub key: String,
    /// New value, or `None` when the pref was removed.
    pub value: Option<PrefValue>,
}

/// Read/write access to persisted preferences.
pub trait PrefStore: Send + Sync {
    /// Read a pref. `Ok(None)` means the pref is not set.
    fn get(&self, key: &str) -> Result<Option<PrefValue>, PrefsError>;

    /// Write a pref and notify subscribers once the write is durable.
    fn set(&self, key: &str, value: PrefValue) -> Result<(), PrefsError>;

    /// Remove a pref. Removing a missing pref is not an error.
    fn remove(&self, key: &str) -> Result<(), PrefsError>;

    /// All stored prefs, sorted by key.
    fn entries(&self) -> Result<BTreeMap<String, PrefValue>, PrefsError>;

    /// Subscribe to committed changes.
    fn subscribe(&self) -> Receiver<PrefChange>;

    /// Read a boolean pref, falling back to `default` when unset.
    fn get_bool(&self, key: &str, default: bool) -> Result<bool, PrefsError> {
        match self.get(key)? {
            None => Ok(default),
            Some(PrefValue::Bool(b)) => Ok(b),
            Some(other) => Err(PrefsError::TypeMismatch {
                key: key.to_string(),
                expected: "bool",
                actual: other.type_name(),
            }),
        }
    }

    /// Read an integer pref, falling back to `default` when unset.
    fn get_int(&self, key: &str, default: i64) -> Result<i64, PrefsError> {
        match self.get(key)? {
            None => Ok(default),
            Some(PrefValue::Int(i)) => Ok(i),
            Some(other) => Err(PrefsError::TypeMismatch {
                key: key.to_string(),
                expected: "int",
                actual: other.type_name(),
            }),
        }
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), PrefsError> {
        self.set(key, PrefValue::Int(value))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), PrefsError> {
        self.set(key, PrefValue::Bool(value))
    }
}

/// Fan-out of committed pref changes to any number of subscribers.
#[derive(Debug, Default)]
pub struct PrefObservers {
    senders: Mutex<Vec<Sender<PrefChange>>>,
}

impl PrefObservers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PrefChange> {
        let (tx, rx) = channel::unbounded();
        let mut senders = match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        senders.push(tx);
        rx
    }

    /// Deliver a change; subscribers whose receiver was dropped are pruned.
    pub fn notify(&self, change: &PrefChange) {
        let mut senders = match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        senders.retain(|tx| tx.send(change.clone()).is_ok());
        trace!(
            pref_key = %change.key,
            subscribers = senders.len(),
            "Pref change delivered"
        );
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.senders.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory pref store.
///
/// Reads and writes can be forced to fail to exercise the governor's
/// degraded paths.
#[derive(Debug, Default)]
pub struct MemoryPrefStore {
    values: RwLock<BTreeMap<String, PrefValue>>,
    observers: PrefObservers,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryPrefStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given prefs.
    #[must_use]
    pub fn with_prefs<I, K, V>(prefs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PrefValue>,
    {
        let values = prefs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: RwLock::new(values),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self, key: &str) -> Result<(), PrefsError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PrefsError::ReadFailed {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            });
        }
        Ok(())
    }

    fn check_write(&self, key: &str) -> Result<(), PrefsError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PrefsError::WriteFailed {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

impl PrefStore for MemoryPrefStore {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, PrefsError> {
        self.check_read(key)?;
        let values = match self.values.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        self.check_write(key)?;
        {
            let mut values = match self.values.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            values.insert(key.to_string(), value.clone());
        }
        self.observers.notify(&PrefChange {
            key: key.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.check_write(key)?;
        let removed = {
            let mut values = match self.values.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            values.remove(key).is_some()
        };
        if removed {
            self.observers.notify(&PrefChange {
                key: key.to_string(),
                value: None,
            });
        }
        Ok(())
    }

    fn entries(&self) -> Result<BTreeMap<String, PrefValue>, PrefsError> {
        self.check_read("*")?;
        let values = match self.values.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(values.clone())
    }

    fn subscribe(&self) -> Receiver<PrefChange> {
        self.observers.subscribe()
    }
}
