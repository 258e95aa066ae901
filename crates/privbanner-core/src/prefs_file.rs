//! TOML-file pref store.
//!
//! Layout on disk:
//!
//! ```toml
//! [prefs]
//! "browser.search.separatePrivateDefault.ui.enabled" = true
//! "browser.search.separatePrivateDefault.ui.banner.shown" = 2
//! ```
//!
//! Writers take an exclusive advisory lock on `<file>.lock`, re-read the
//! file so out-of-band edits are not clobbered, and replace the file via
//! temp-file + rename. Readers parse the current file without locking.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crossbeam::channel::Receiver;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PrefsError;
use crate::prefs::{PrefChange, PrefObservers, PrefStore, PrefValue};

#[derive(Debug, Default, Deserialize)]
struct PrefsFile {
    #[serde(default)]
    prefs: BTreeMap<String, PrefValue>,
}

/// Parse the text of a prefs file.
pub fn parse_prefs(text: &str) -> Result<BTreeMap<String, PrefValue>, toml::de::Error> {
    toml::from_str::<PrefsFile>(text).map(|file| file.prefs)
}

/// Render prefs in the on-disk layout.
pub fn render_prefs(prefs: &BTreeMap<String, PrefValue>) -> Result<String, toml::ser::Error> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        prefs: &'a BTreeMap<String, PrefValue>,
    }
    toml::to_string_pretty(&Borrowed { prefs })
}

/// Pref store persisted as a TOML file.
#[derive(Debug)]
pub struct FilePrefStore {
    path: PathBuf,
    lock_path: PathBuf,
    observers: PrefObservers,
}

impl FilePrefStore {
    /// Open (or lazily create) the prefs file at `path`.
    ///
    /// The file itself is only created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PrefsError::WriteFailed {
                    key: "*".to_string(),
                    reason: format!("create {}: {e}", parent.display()),
                })?;
            }
        }
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Ok(Self {
            lock_path: PathBuf::from(lock_name),
            path,
            observers: PrefObservers::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self, key: &str) -> Result<BTreeMap<String, PrefValue>, PrefsError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(PrefsError::ReadFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        parse_prefs(&text).map_err(|e| PrefsError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn lock(&self) -> Result<File, PrefsError> {
        let lock_err = |e: io::Error| PrefsError::Lock {
            path: self.lock_path.display().to_string(),
            reason: e.to_string(),
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;
        Ok(file)
    }

    fn write_file(
        &self,
        key: &str,
        prefs: &BTreeMap<String, PrefValue>,
    ) -> Result<(), PrefsError> {
        let write_err = |e: String| PrefsError::WriteFailed {
            key: key.to_string(),
            reason: e,
        };
        let text = render_prefs(prefs).map_err(|e| write_err(e.to_string()))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp_path).map_err(|e| write_err(e.to_string()))?;
        file.write_all(text.as_bytes())
            .map_err(|e| write_err(e.to_string()))?;
        file.sync_all().map_err(|e| write_err(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| write_err(e.to_string()))?;
        Ok(())
    }

    /// Apply `mutate` to the file under the writer lock.
    fn update<F>(&self, key: &str, mutate: F) -> Result<bool, PrefsError>
    where
        F: FnOnce(&mut BTreeMap<String, PrefValue>) -> bool,
    {
        let lock_file = self.lock()?;
        let result = (|| -> Result<bool, PrefsError> {
            let mut prefs = self.read_file(key)?;
            let changed = mutate(&mut prefs);
            if changed {
                self.write_file(key, &prefs)?;
            }
            Ok(changed)
        })();
        let _ = FileExt::unlock(&lock_file);
        result
    }
}

impl PrefStore for FilePrefStore {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, PrefsError> {
        Ok(self.read_file(key)?.remove(key))
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        let new_value = value.clone();
        self.update(key, |prefs| {
            prefs.insert(key.to_string(), new_value);
            true
        })?;
        debug!(
            pref_key = key,
            pref_value = %value,
            path = %self.path.display(),
            "Pref written"
        );
        self.observers.notify(&PrefChange {
            key: key.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        let removed = self.update(key, |prefs| prefs.remove(key).is_some())?;
        if removed {
            debug!(pref_key = key, path = %self.path.display(), "Pref removed");
            self.observers.notify(&PrefChange {
                key: key.to_string(),
                value: None,
            });
        }
        Ok(())
    }

    fn entries(&self) -> Result<BTreeMap<String, PrefValue>, PrefsError> {
        self.read_file("*")
    }

    fn subscribe(&self) -> Receiver<PrefChange> {
        self.observers.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::{PREF_BANNER_SHOWN, PREF_UI_ENABLED};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> FilePrefStore {
        FilePrefStore::open(dir.path().join("nested").join("prefs.toml")).unwrap()
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.entries().unwrap().is_empty());
        assert_eq!(store.get_int(PREF_BANNER_SHOWN, 0).unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = store_in(&dir);
            store.set_bool(PREF_UI_ENABLED, true).unwrap();
            store.set_int(PREF_BANNER_SHOWN, 4).unwrap();
        }
        let store = store_in(&dir);
        assert!(store.get_bool(PREF_UI_ENABLED, false).unwrap());
        assert_eq!(store.get_int(PREF_BANNER_SHOWN, 0).unwrap(), 4);
    }

    #[test]
    fn sees_out_of_band_edits() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set_int(PREF_BANNER_SHOWN, 1).unwrap();

        fs::write(
            store.path(),
            format!("[prefs]\n\"{PREF_BANNER_SHOWN}\" = 3\n\"other\" = \"kept\"\n"),
        )
        .unwrap();
        assert_eq!(store.get_int(PREF_BANNER_SHOWN, 0).unwrap(), 3);

        // A write to one key keeps the externally added key.
        store.set_bool(PREF_UI_ENABLED, true).unwrap();
        let entries = store.entries().unwrap();
        assert_eq!(entries.get("other"), Some(&PrefValue::String("kept".into())));
        assert_eq!(entries.get(PREF_BANNER_SHOWN), Some(&PrefValue::Int(3)));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "[prefs\nnot toml").unwrap();
        let err = store.get_int(PREF_BANNER_SHOWN, 0).unwrap_err();
        assert!(matches!(err, PrefsError::Corrupt { .. }));
    }

    #[test]
    fn remove_notifies_only_when_present() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let rx = store.subscribe();
        store.remove(PREF_BANNER_SHOWN).unwrap();
        assert!(rx.try_recv().is_err());

        store.set_int(PREF_BANNER_SHOWN, 2).unwrap();
        store.remove(PREF_BANNER_SHOWN).unwrap();
        assert_eq!(rx.try_recv().unwrap().value, Some(PrefValue::Int(2)));
        assert_eq!(rx.try_recv().unwrap().value, None);
        assert_eq!(store.get(PREF_BANNER_SHOWN).unwrap(), None);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set_int(PREF_BANNER_SHOWN, 1).unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn render_then_parse_keeps_dotted_keys() {
        let mut prefs = BTreeMap::new();
        prefs.insert(PREF_UI_ENABLED.to_string(), PrefValue::Bool(true));
        prefs.insert(PREF_BANNER_SHOWN.to_string(), PrefValue::Int(5));
        let text = render_prefs(&prefs).unwrap();
        assert!(text.starts_with("[prefs]"));
        assert_eq!(parse_prefs(&text).unwrap(), prefs);
        assert!(parse_prefs("").unwrap().is_empty());
    }

    #[test]
    fn unsupported_value_types_are_rejected() {
        assert!(parse_prefs("[prefs]\nratio = 0.5\n").is_err());
        assert!(parse_prefs("[prefs]\nlist = [1, 2]\n").is_err());
    }
}
