//! File-backed store for progress records.
//!
//! Each record lives in its own JSON file under
//! `<root>/<kind>/<user>/<item>.json`. Saving takes a per-record lock file,
//! checks that nobody else saved since the record was loaded, then writes
//! through a temp file and rename. A lock left behind by a crashed writer
//! is broken once it is older than the store's stale-lock bound.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, ValidationError};
use crate::models::{FlashcardProgress, PhonemeProgress};

pub type Result<T> = std::result::Result<T, StoreError>;

/// A record keyed by (user, item) that the store can persist.
pub trait StoredRecord: Serialize + DeserializeOwned + Clone {
    /// Subdirectory holding this kind of record.
    const KIND: &'static str;

    fn fresh(user_id: &str, item_id: &str, now: DateTime<Utc>) -> Self;
    fn user_id(&self) -> &str;
    fn item_id(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

impl StoredRecord for FlashcardProgress {
    const KIND: &'static str = "flashcards";

    fn fresh(user_id: &str, item_id: &str, now: DateTime<Utc>) -> Self {
        FlashcardProgress::new(user_id, item_id, now)
    }
    fn user_id(&self) -> &str {
        &self.user_id
    }
    fn item_id(&self) -> &str {
        &self.flashcard_id
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl StoredRecord for PhonemeProgress {
    const KIND: &'static str = "phonemes";

    fn fresh(user_id: &str, item_id: &str, now: DateTime<Utc>) -> Self {
        PhonemeProgress::new(user_id, item_id, now)
    }
    fn user_id(&self) -> &str {
        &self.user_id
    }
    fn item_id(&self) -> &str {
        &self.phoneme_id
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Age after which a lock file counts as abandoned.
pub const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// Handles record persistence.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    root: PathBuf,
    lock_stale_after: Duration,
}

impl ProgressStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
        })
    }

    pub fn with_lock_stale_after(mut self, stale_after: Duration) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    /// Get default storage location.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lingo")
            .join("progress")
    }

    fn user_dir<R: StoredRecord>(&self, user_id: &str) -> Result<PathBuf> {
        validate_id(user_id)?;
        Ok(self.root.join(R::KIND).join(user_id))
    }

    fn record_path<R: StoredRecord>(&self, user_id: &str, item_id: &str) -> Result<PathBuf> {
        validate_id(item_id)?;
        Ok(self.user_dir::<R>(user_id)?.join(format!("{}.json", item_id)))
    }

    /// Load a record from disk.
    pub fn load<R: StoredRecord>(&self, user_id: &str, item_id: &str) -> Result<Option<R>> {
        let path = self.record_path::<R>(user_id, item_id)?;
        read_record(&path)
    }

    /// Load a record, or build an unsaved one with `fresh` when none exists.
    pub fn load_or_insert_with<R, F>(&self, user_id: &str, item_id: &str, fresh: F) -> Result<R>
    where
        R: StoredRecord,
        F: FnOnce() -> R,
    {
        match self.load(user_id, item_id)? {
            Some(record) => Ok(record),
            None => {
                debug!(
                    kind = R::KIND,
                    user = user_id,
                    item = item_id,
                    "no stored record, using defaults"
                );
                Ok(fresh())
            }
        }
    }

    pub fn load_or_default<R: StoredRecord>(
        &self,
        user_id: &str,
        item_id: &str,
        now: DateTime<Utc>,
    ) -> Result<R> {
        self.load_or_insert_with(user_id, item_id, || R::fresh(user_id, item_id, now))
    }

    /// Persist `record` if the stored copy is still at the version it was
    /// loaded at. On success the record's version is bumped.
    pub fn save<R: StoredRecord>(&self, record: &mut R) -> Result<PathBuf> {
        let path = self.record_path::<R>(record.user_id(), record.item_id())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let _lock = RecordLock::acquire(&path, self.lock_stale_after)?;

        let found = read_record::<R>(&path)?.map_or(0, |stored| stored.version());
        if found != record.version() {
            return Err(StoreError::Conflict {
                path,
                expected: record.version(),
                found,
            });
        }

        let mut next = record.clone();
        next.set_version(found + 1);
        write_atomic(&path, &serde_json::to_string_pretty(&next)?)?;

        record.set_version(found + 1);
        debug!(kind = R::KIND, path = ?path, version = found + 1, "saved record");
        Ok(path)
    }

    /// Delete a record file.
    pub fn delete<R: StoredRecord>(&self, user_id: &str, item_id: &str) -> Result<bool> {
        let path = self.record_path::<R>(user_id, item_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All records of one kind for a user, ordered by item id.
    pub fn list<R: StoredRecord>(&self, user_id: &str) -> Result<Vec<R>> {
        let dir = self.user_dir::<R>(user_id)?;
        let mut records = read_dir_records(&dir)?;
        records.sort_by(|a: &R, b: &R| a.item_id().cmp(b.item_id()));
        Ok(records)
    }

    /// Every user with records of this kind.
    pub fn users<R: StoredRecord>(&self) -> Result<Vec<String>> {
        let dir = self.root.join(R::KIND);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut users = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    users.push(name.to_string());
                }
            }
        }
        users.sort();
        Ok(users)
    }

    fn all<R: StoredRecord>(&self) -> Result<Vec<R>> {
        let mut records = Vec::new();
        for user in self.users::<R>()? {
            records.extend(self.list::<R>(&user)?);
        }
        Ok(records)
    }
}

fn validate_id(id: &str) -> std::result::Result<(), ValidationError> {
    let ok = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidId(id.to_string()))
    }
}

fn read_record<R: DeserializeOwned>(path: &Path) -> Result<Option<R>> {
    match fs::read_to_string(path) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_dir_records<R: DeserializeOwned>(dir: &Path) -> Result<Vec<R>> {
    let mut records = Vec::new();
    if !dir.exists() {
        return Ok(records);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            if let Some(record) = read_record(&path)? {
                records.push(record);
            }
        }
    }
    Ok(records)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Owner details written into a lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    /// Milliseconds since the Unix epoch.
    created_at: u64,
}

fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Exclusive lock held as a sibling `.lock` file; removed on drop.
struct RecordLock {
    path: PathBuf,
}

impl RecordLock {
    fn acquire(record_path: &Path, stale_after: Duration) -> Result<Self> {
        let path = record_path.with_extension("json.lock");
        let acquired = match Self::create(&path) {
            Err(StoreError::Locked(_)) if lock_is_stale(&path, stale_after) => {
                break_stale_lock(&path, stale_after)?;
                Self::create(&path)
            }
            other => other,
        };
        acquired.map_err(|e| match e {
            StoreError::Locked(_) => StoreError::Locked(record_path.to_path_buf()),
            other => other,
        })
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::Locked(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let lock = Self {
            path: path.to_path_buf(),
        };

        let owner = LockOwner {
            pid: std::process::id(),
            created_at: unix_millis(SystemTime::now()),
        };
        serde_json::to_writer(&mut file, &owner)?;
        Ok(lock)
    }
}

/// Age comes from the owner record, or from the file's mtime when the
/// record is missing or unreadable.
fn lock_is_stale(path: &Path, stale_after: Duration) -> bool {
    let owner = fs::read_to_string(path)
        .ok()
        .and_then(|json| serde_json::from_str::<LockOwner>(&json).ok());

    let created_at = match owner {
        Some(owner) => owner.created_at,
        None => match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => unix_millis(modified),
            // Gone already; the next create decides
            Err(_) => return true,
        },
    };

    let age_ms = unix_millis(SystemTime::now()).saturating_sub(created_at);
    u128::from(age_ms) >= stale_after.as_millis()
}

fn break_stale_lock(path: &Path, stale_after: Duration) -> Result<()> {
    // Rename first so only one contender removes a given stale lock
    let aside = path.with_extension(format!("lock.stale-{}", Uuid::new_v4()));
    match fs::rename(path, &aside) {
        Ok(()) => {
            // Another contender may have broken it and re-locked since we looked
            if !lock_is_stale(&aside, stale_after) {
                let _ = fs::hard_link(&aside, path);
                let _ = fs::remove_file(&aside);
                return Ok(());
            }
            warn!(lock = ?path, "breaking stale record lock");
            let _ = fs::remove_file(&aside);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Backup format containing all records.
#[derive(Debug, Serialize, Deserialize)]
pub struct Backup {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub flashcards: Vec<FlashcardProgress>,
    #[serde(default)]
    pub phonemes: Vec<PhonemeProgress>,
}

/// Counts from a backup import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

impl ProgressStore {
    /// Export all records to a backup file. Returns the record count.
    pub fn export_backup(&self, path: &Path, now: DateTime<Utc>) -> Result<usize> {
        let backup = Backup {
            version: 1,
            created_at: now,
            flashcards: self.all()?,
            phonemes: self.all()?,
        };

        let json = serde_json::to_string_pretty(&backup)?;
        fs::write(path, json)?;

        let count = backup.flashcards.len() + backup.phonemes.len();
        info!(path = ?path, records = count, "exported backup");
        Ok(count)
    }

    /// Import records from a backup file, skipping any that already exist.
    pub fn import_backup(&self, path: &Path) -> Result<ImportSummary> {
        let json = fs::read_to_string(path)?;
        let backup: Backup = serde_json::from_str(&json)?;

        let mut summary = ImportSummary::default();
        self.import_records(backup.flashcards, &mut summary)?;
        self.import_records(backup.phonemes, &mut summary)?;

        info!(
            path = ?path,
            imported = summary.imported,
            skipped = summary.skipped,
            "imported backup"
        );
        Ok(summary)
    }

    fn import_records<R: StoredRecord>(
        &self,
        records: Vec<R>,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for mut record in records {
            let key = (record.user_id().to_string(), record.item_id().to_string());
            if !seen.insert(key) || self.load::<R>(record.user_id(), record.item_id())?.is_some() {
                summary.skipped += 1;
                continue;
            }
            record.set_version(0);
            self.save(&mut record)?;
            summary.imported += 1;
        }
        Ok(())
    }
}

/// Get default backup path.
pub fn default_backup_path(now: DateTime<Utc>) -> PathBuf {
    let timestamp = now.format("%Y%m%d_%H%M%S");
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!("lingo_backup_{}.json", timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn rejects_path_like_ids() {
        for bad in ["", "..", "a/b", "a\\b", "x y"] {
            assert!(validate_id(bad).is_err(), "{:?} should be rejected", bad);
        }
        for good in ["user-1", "card_22", "a.b", "me@example.com"] {
            assert!(validate_id(good).is_ok(), "{:?} should be accepted", good);
        }
    }

    #[test]
    fn lock_blocks_second_writer_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let lock = RecordLock::acquire(&path, DEFAULT_LOCK_STALE_AFTER).unwrap();
        assert!(matches!(
            RecordLock::acquire(&path, DEFAULT_LOCK_STALE_AFTER),
            Err(StoreError::Locked(_))
        ));
        drop(lock);
        assert!(RecordLock::acquire(&path, DEFAULT_LOCK_STALE_AFTER).is_ok());
    }

    #[test]
    fn lock_file_names_its_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let _lock = RecordLock::acquire(&path, DEFAULT_LOCK_STALE_AFTER).unwrap();

        let json = fs::read_to_string(dir.path().join("r.json.lock")).unwrap();
        let owner: LockOwner = serde_json::from_str(&json).unwrap();
        assert_eq!(owner.pid, std::process::id());
        assert!(!lock_is_stale(&dir.path().join("r.json.lock"), DEFAULT_LOCK_STALE_AFTER));
    }

    #[test]
    fn old_owner_record_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("r.json.lock");
        let an_hour_ago = unix_millis(SystemTime::now() - Duration::from_secs(3600));
        let owner = LockOwner {
            pid: 999_999,
            created_at: an_hour_ago,
        };
        fs::write(&lock_path, serde_json::to_string(&owner).unwrap()).unwrap();

        assert!(lock_is_stale(&lock_path, DEFAULT_LOCK_STALE_AFTER));
        let lock = RecordLock::acquire(&dir.path().join("r.json"), DEFAULT_LOCK_STALE_AFTER);
        assert!(lock.is_ok());
    }

    #[test]
    fn load_or_default_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().to_path_buf()).unwrap();
        let record: FlashcardProgress = store.load_or_default("u1", "c1", now()).unwrap();
        assert_eq!(record.version, 0);
        assert!(store.load::<FlashcardProgress>("u1", "c1").unwrap().is_none());
    }
}
