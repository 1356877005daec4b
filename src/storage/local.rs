//! Local durable backup: one JSON document per day under `foodLog_<YYYY-MM-DD>`.
//!
//! Written synchronously on every mutation, independent of auth and network.
//! This layer is a safety net, so every storage or parse error is logged and
//! turned into a miss; nothing here returns an error to the caller.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde_json::Value;

use crate::models::daily_log::{date_key, DailyLog};
use crate::validation::parse_date_key;

pub const KEY_PREFIX: &str = "foodLog_";

pub fn backup_key(date: NaiveDate) -> String {
    format!("{KEY_PREFIX}{}", date_key(date))
}

pub fn parse_backup_key(key: &str) -> Option<NaiveDate> {
    key.strip_prefix(KEY_PREFIX).and_then(parse_date_key)
}

/// A string key/value store with local-storage semantics.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> io::Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove_item(&self, key: &str) -> io::Result<()>;
    fn keys(&self) -> io::Result<Vec<String>>;
}

/// One file per key inside a directory. Writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsafe storage key: {key}"),
            ));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn remove_item(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process storage, used by tests and when no backup directory is wanted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> io::Result<()> {
        self.items().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> io::Result<()> {
        self.items().remove(key);
        Ok(())
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        Ok(self.items().keys().cloned().collect())
    }
}

/// Best-effort per-day backup over any [`KeyValueStorage`].
#[derive(Clone)]
pub struct LocalBackup {
    storage: Arc<dyn KeyValueStorage>,
}

impl LocalBackup {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Returns whether the write landed.
    pub fn save(&self, date: NaiveDate, log: &DailyLog) -> bool {
        match serde_json::to_value(log) {
            Ok(value) => self.save_raw(date, &value),
            Err(e) => {
                tracing::error!(date = %date, error = %e, "Failed to serialize food log for backup");
                false
            }
        }
    }

    pub fn save_raw(&self, date: NaiveDate, value: &Value) -> bool {
        let key = backup_key(date);
        match self.storage.set_item(&key, &value.to_string()) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to write local backup");
                false
            }
        }
    }

    /// The stored document, in whatever shape it was written. Run it through
    /// `validate_and_migrate` before trusting it.
    pub fn load(&self, date: NaiveDate) -> Option<Value> {
        let key = backup_key(date);
        let text = match self.storage.get_item(&key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to read local backup");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Local backup is not valid JSON");
                None
            }
        }
    }

    pub fn remove(&self, date: NaiveDate) {
        let key = backup_key(date);
        if let Err(e) = self.storage.remove_item(&key) {
            tracing::error!(key = %key, error = %e, "Failed to remove local backup");
        }
    }

    /// Every date with a stored document, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        match self.storage.keys() {
            Ok(keys) => {
                let mut dates: Vec<NaiveDate> =
                    keys.iter().filter_map(|k| parse_backup_key(k)).collect();
                dates.sort();
                dates
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to enumerate local backup");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_key_scheme() {
        assert_eq!(backup_key(day(1)), "foodLog_2024-03-01");
        assert_eq!(parse_backup_key("foodLog_2024-03-01"), Some(day(1)));
        assert_eq!(parse_backup_key("foodLog_2024-3-1"), None);
        assert_eq!(parse_backup_key("settings"), None);
    }

    #[test]
    fn test_memory_save_load_roundtrip() {
        let backup = LocalBackup::in_memory();
        let log = DailyLog::empty(day(1), None, Utc::now());
        assert!(backup.save(day(1), &log));
        let loaded = backup.load(day(1)).unwrap();
        assert_eq!(loaded["date"], "2024-03-01");
        assert!(backup.load(day(2)).is_none());
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("foodLog_2024-03-01", "{not json").unwrap();
        let backup = LocalBackup::new(storage);
        assert!(backup.load(day(1)).is_none());
    }

    #[test]
    fn test_dates_ignores_foreign_keys() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("theme", "dark").unwrap();
        let backup = LocalBackup::new(storage);
        let log = DailyLog::empty(day(3), None, Utc::now());
        backup.save(day(3), &log);
        backup.save(day(1), &log);
        assert_eq!(backup.dates(), vec![day(1), day(3)]);
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let backup = LocalBackup::new(Arc::new(FileStorage::new(dir.path().join("backup"))));
        assert!(backup.dates().is_empty());

        let log = DailyLog::empty(day(2), None, Utc::now());
        assert!(backup.save(day(2), &log));
        assert!(dir.path().join("backup/foodLog_2024-03-02.json").exists());
        assert_eq!(backup.dates(), vec![day(2)]);

        backup.remove(day(2));
        assert!(backup.load(day(2)).is_none());
        backup.remove(day(2));
    }

    #[test]
    fn test_file_storage_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(storage.set_item("../escape", "x").is_err());
    }
}
