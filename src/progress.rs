//! Durable per-collection delivery progress.
//!
//! Each collection owns one JSON file, `<data_dir>/progress_<id>.json`, that
//! records which entry ids were already delivered and the date of the last
//! delivery. The file is the source of truth: every mutation re-reads it,
//! applies the change and writes it back while holding both the store's
//! mutex and an exclusive `progress_<id>.json.lock` marker file, so a
//! one-shot command and the serving process never lose each other's marks.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Collection that inherits the single-file progress of older installs.
const LEGACY_COLLECTION: &str = "english";
const LEGACY_FILE: &str = "progress.json";

const LOCK_RETRY: Duration = Duration::from_millis(25);
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
/// A lock file older than this was left behind by a crashed process.
const STALE_LOCK: Duration = Duration::from_secs(30);

/// What has been delivered from one collection so far.
///
/// Ids that no longer exist in the collection are tolerated and simply never
/// match again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(alias = "sent_words", default)]
    pub delivered_ids: BTreeSet<String>,
    /// `YYYY-MM-DD` of the last delivery; empty if nothing was delivered yet.
    #[serde(alias = "last_push_date", default)]
    pub last_delivery_date: String,
}

/// Progress of one collection, backed by a JSON file.
#[derive(Debug)]
pub struct ProgressStore {
    collection_id: String,
    path: PathBuf,
    lock_path: PathBuf,
    /// Last record read from or written to disk.
    record: Mutex<ProgressRecord>,
}

impl ProgressStore {
    /// File holding the progress of `collection_id`.
    pub fn path_for(data_dir: &Path, collection_id: &str) -> PathBuf {
        data_dir.join(format!("progress_{collection_id}.json"))
    }

    /// Open (or start) the progress of a collection.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and also starts empty; it is overwritten on the next mutation.
    #[instrument(level = "info", skip_all, fields(collection = %collection_id))]
    pub async fn open(data_dir: &Path, collection_id: &str) -> Result<Self> {
        fs::create_dir_all(data_dir).await?;
        let path = Self::path_for(data_dir, collection_id);

        if collection_id == LEGACY_COLLECTION {
            migrate_legacy(data_dir, &path).await;
        }

        let record = read_record(&path).await;
        info!(
            delivered = record.delivered_ids.len(),
            last_delivery = %record.last_delivery_date,
            "Opened progress store"
        );

        Ok(Self {
            collection_id: collection_id.to_string(),
            lock_path: path.with_extension("json.lock"),
            path,
            record: Mutex::new(record),
        })
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record, re-read from disk.
    pub async fn snapshot(&self) -> ProgressRecord {
        let mut cached = self.record.lock().await;
        *cached = read_record(&self.path).await;
        cached.clone()
    }

    pub async fn delivered_count(&self) -> usize {
        self.snapshot().await.delivered_ids.len()
    }

    /// Forget every delivered id and persist. The last delivery date is kept.
    #[instrument(level = "info", skip_all, fields(collection = %self.collection_id))]
    pub async fn reset(&self) -> Result<()> {
        let cleared = self
            .update(|record| {
                let cleared = record.delivered_ids.len();
                record.delivered_ids.clear();
                cleared
            })
            .await?;
        info!(cleared, "Progress reset");
        Ok(())
    }

    /// Clear the delivered ids if every one of `ids` is among them.
    ///
    /// Check and reset happen in one locked read-modify-write, so a mark
    /// made after another caller's reset is never wiped by a stale check.
    /// Returns `true` if the progress was reset.
    #[instrument(level = "info", skip_all, fields(collection = %self.collection_id, entries = ids.len()))]
    pub async fn reset_if_exhausted(&self, ids: &[&str]) -> Result<bool> {
        let reset = self
            .update(|record| {
                let exhausted =
                    !ids.is_empty() && ids.iter().all(|id| record.delivered_ids.contains(*id));
                if exhausted {
                    record.delivered_ids.clear();
                }
                exhausted
            })
            .await?;
        if reset {
            info!("Collection exhausted; progress reset");
        }
        Ok(reset)
    }

    /// Record `id` as delivered on `date` (`YYYY-MM-DD`) and persist.
    ///
    /// Inserting an id twice leaves the set unchanged; the date is always
    /// updated.
    #[instrument(level = "info", skip_all, fields(collection = %self.collection_id, entry = %id))]
    pub async fn mark_delivered(&self, id: &str, date: &str) -> Result<()> {
        let (inserted, total) = self
            .update(|record| {
                let inserted = record.delivered_ids.insert(id.to_string());
                record.last_delivery_date = date.to_string();
                (inserted, record.delivered_ids.len())
            })
            .await?;
        debug!(inserted, total, "Marked delivered");
        Ok(())
    }

    /// Apply `change` to the on-disk record under both locks.
    ///
    /// The file is only rewritten when the record actually changed.
    async fn update<T>(&self, change: impl FnOnce(&mut ProgressRecord) -> T) -> Result<T> {
        let mut cached = self.record.lock().await;
        let _lock = LockFile::acquire(self.lock_path.clone()).await?;

        let mut record = read_record(&self.path).await;
        let before = record.clone();
        let out = change(&mut record);
        if record != before {
            self.persist(&record).await?;
        }
        *cached = record;
        Ok(out)
    }

    /// Write through a temporary file so a crash never leaves half a record.
    async fn persist(&self, record: &ProgressRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Read a progress file; missing, unreadable or corrupt files yield an empty record.
async fn read_record(path: &Path) -> ProgressRecord {
    match fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Corrupt progress file; starting fresh");
            ProgressRecord::default()
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => ProgressRecord::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable progress file; starting fresh");
            ProgressRecord::default()
        }
    }
}

/// Exclusive marker file, held across processes; removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    async fn acquire(path: PathBuf) -> Result<Self> {
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        warn!(lock = %path.display(), "Removing stale progress lock");
                        if let Err(e) = fs::remove_file(&path).await {
                            debug!(error = %e, "Stale lock already gone");
                        }
                        continue;
                    }
                    if started.elapsed() >= LOCK_TIMEOUT {
                        return Err(std::io::Error::new(
                            ErrorKind::TimedOut,
                            format!("progress lock {} held for over {LOCK_TIMEOUT:?}", path.display()),
                        )
                        .into());
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release progress lock");
        }
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK)
}

/// Older installs kept a single `progress.json` for the English collection.
async fn migrate_legacy(data_dir: &Path, target: &Path) {
    let legacy = data_dir.join(LEGACY_FILE);
    if fs::try_exists(target).await.unwrap_or(false) || !fs::try_exists(&legacy).await.unwrap_or(false) {
        return;
    }
    match fs::copy(&legacy, target).await {
        Ok(_) => info!(from = %legacy.display(), to = %target.display(), "Migrated legacy progress file"),
        Err(e) => warn!(error = %e, "Failed to migrate legacy progress file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_delivered_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(tmp.path(), "idiom").await.unwrap();

        store.mark_delivered("一石二鸟", "2025-01-01").await.unwrap();
        store.mark_delivered("一石二鸟", "2025-01-02").await.unwrap();

        let record = store.snapshot().await;
        assert_eq!(record.delivered_ids.len(), 1);
        assert_eq!(record.last_delivery_date, "2025-01-02");
    }

    #[tokio::test]
    async fn test_persisted_record_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = ProgressStore::open(tmp.path(), "english").await.unwrap();
            store.mark_delivered("alpha", "2025-05-05").await.unwrap();
            store.mark_delivered("beta", "2025-05-06").await.unwrap();
        }
        let reopened = ProgressStore::open(tmp.path(), "english").await.unwrap();
        let record = reopened.snapshot().await;
        assert_eq!(
            record.delivered_ids,
            BTreeSet::from(["alpha".to_string(), "beta".to_string()])
        );
        assert_eq!(record.last_delivery_date, "2025-05-06");
    }

    #[tokio::test]
    async fn test_reset_clears_ids_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(tmp.path(), "radio").await.unwrap();
        store.mark_delivered("LK0001", "2025-02-02").await.unwrap();
        store.reset().await.unwrap();
        assert_eq!(store.delivered_count().await, 0);

        let reopened = ProgressStore::open(tmp.path(), "radio").await.unwrap();
        assert!(reopened.snapshot().await.delivered_ids.is_empty());
    }

    #[tokio::test]
    async fn test_legacy_keys_and_migration() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(
            tmp.path().join(LEGACY_FILE),
            r#"{"sent_words": ["abandon", "brisk"], "last_push_date": "2024-12-31"}"#,
        )
        .await
        .unwrap();

        let store = ProgressStore::open(tmp.path(), "english").await.unwrap();
        let record = store.snapshot().await;
        assert_eq!(record.delivered_ids.len(), 2);
        assert_eq!(record.last_delivery_date, "2024-12-31");
        assert!(store.path().exists());

        // Only the English collection inherits the legacy file.
        let other = ProgressStore::open(tmp.path(), "idiom").await.unwrap();
        assert_eq!(other.delivered_count().await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(ProgressStore::path_for(tmp.path(), "classical"), "{{{")
            .await
            .unwrap();
        let store = ProgressStore::open(tmp.path(), "classical").await.unwrap();
        assert_eq!(store.snapshot().await, ProgressRecord::default());
    }

    #[tokio::test]
    async fn test_two_stores_on_one_file_keep_both_marks() {
        let tmp = tempfile::tempdir().unwrap();
        let serving = ProgressStore::open(tmp.path(), "english").await.unwrap();
        let command = ProgressStore::open(tmp.path(), "english").await.unwrap();

        command.mark_delivered("alpha", "2025-06-01").await.unwrap();
        serving.mark_delivered("beta", "2025-06-02").await.unwrap();

        let expected = BTreeSet::from(["alpha".to_string(), "beta".to_string()]);
        assert_eq!(serving.snapshot().await.delivered_ids, expected);
        assert_eq!(command.snapshot().await.delivered_ids, expected);

        let reopened = ProgressStore::open(tmp.path(), "english").await.unwrap();
        assert_eq!(reopened.snapshot().await.delivered_ids, expected);
        assert!(!serving.path().with_extension("json.lock").exists());
    }

    #[tokio::test]
    async fn test_reset_if_exhausted_checks_current_file() {
        let tmp = tempfile::tempdir().unwrap();
        let first = ProgressStore::open(tmp.path(), "idiom").await.unwrap();
        let second = ProgressStore::open(tmp.path(), "idiom").await.unwrap();
        first.mark_delivered("a", "2025-06-01").await.unwrap();
        first.mark_delivered("b", "2025-06-01").await.unwrap();

        // Another store resets and marks a new entry first.
        assert!(second.reset_if_exhausted(&["a", "b"]).await.unwrap());
        second.mark_delivered("a", "2025-06-02").await.unwrap();

        // The stale "exhausted" view must not wipe that mark.
        assert!(!first.reset_if_exhausted(&["a", "b"]).await.unwrap());
        assert_eq!(
            first.snapshot().await.delivered_ids,
            BTreeSet::from(["a".to_string()])
        );
        assert!(!first.reset_if_exhausted(&[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(tmp.path(), "radio").await.unwrap();
        let lock = store.path().with_extension("json.lock");
        std::fs::write(&lock, "").unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(120);
        std::fs::File::options()
            .write(true)
            .open(&lock)
            .unwrap()
            .set_modified(old)
            .unwrap();

        store.mark_delivered("LK0002", "2025-06-01").await.unwrap();
        assert_eq!(store.delivered_count().await, 1);
        assert!(!lock.exists());
    }
}
