//! No-repeat entry selection.
//!
//! Picks the next entry to deliver from the entries that have not been
//! delivered yet. When everything has been delivered the collection either
//! starts over (progress reset) or, with auto-reset disabled, keeps serving
//! its first entry until progress is reset by hand.

use crate::error::Result;
use crate::models::CollectionEntry;
use crate::progress::ProgressStore;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// Order in which undelivered entries are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// First undelivered entry in collection order.
    Sequential,
    /// Uniformly random undelivered entry.
    #[default]
    Random,
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Random => f.write_str("random"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionEngine {
    pub mode: SelectionMode,
    /// Reset progress once every entry has been delivered.
    pub auto_reset: bool,
}

impl SelectionEngine {
    pub fn new(mode: SelectionMode, auto_reset: bool) -> Self {
        Self { mode, auto_reset }
    }

    /// Choose the next entry, or `None` if `entries` is empty.
    ///
    /// Progress is only touched when an exhausted collection is reset, which
    /// also happens on preview paths; marking the chosen entry as delivered is
    /// the caller's job.
    #[instrument(level = "info", skip_all, fields(collection = %progress.collection_id(), mode = %self.mode))]
    pub async fn select(
        &self,
        entries: &[CollectionEntry],
        progress: &ProgressStore,
    ) -> Result<Option<CollectionEntry>> {
        if entries.is_empty() {
            warn!("Collection has no entries");
            return Ok(None);
        }

        let delivered = progress.snapshot().await.delivered_ids;
        let mut available = undelivered(entries, &delivered);

        if available.is_empty() {
            if !self.auto_reset {
                warn!(
                    total = entries.len(),
                    "Collection exhausted and auto-reset is off; repeating the first entry"
                );
                return Ok(entries.first().cloned());
            }
            let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
            if progress.reset_if_exhausted(&ids).await? {
                info!(total = entries.len(), "Collection exhausted; starting over");
                available = entries.iter().collect();
            } else {
                // Someone else reset first; select from what they left.
                let delivered = progress.snapshot().await.delivered_ids;
                available = undelivered(entries, &delivered);
                if available.is_empty() {
                    available = entries.iter().collect();
                }
            }
        }

        let chosen = pick(&available, self.mode, &mut rand::rng()).cloned();
        if let Some(entry) = &chosen {
            info!(entry = %entry.id, remaining = available.len() - 1, "Selected entry");
        }
        Ok(chosen)
    }
}

/// Entries whose id has not been delivered, in collection order.
pub fn undelivered<'a>(
    entries: &'a [CollectionEntry],
    delivered: &BTreeSet<String>,
) -> Vec<&'a CollectionEntry> {
    entries
        .iter()
        .filter(|e| !delivered.contains(&e.id))
        .collect()
}

/// Pick from a non-empty candidate list according to `mode`.
fn pick<'a, R: Rng + ?Sized>(
    available: &[&'a CollectionEntry],
    mode: SelectionMode,
    rng: &mut R,
) -> Option<&'a CollectionEntry> {
    match mode {
        SelectionMode::Sequential => available.first().copied(),
        SelectionMode::Random => available.choose(rng).copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Extra;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn entry(id: &str) -> CollectionEntry {
        CollectionEntry {
            id: id.to_string(),
            primary_text: id.to_string(),
            phonetic: None,
            category: None,
            body: format!("meaning of {id}"),
            example: None,
            extra: Extra::new(),
        }
    }

    #[tokio::test]
    async fn test_sequential_alpha_beta_then_reset() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(tmp.path(), "english").await.unwrap();
        let entries = vec![entry("alpha"), entry("beta")];
        let engine = SelectionEngine::new(SelectionMode::Sequential, true);

        let first = engine.select(&entries, &store).await.unwrap().unwrap();
        assert_eq!(first.id, "alpha");
        store.mark_delivered(&first.id, "2025-01-01").await.unwrap();

        let second = engine.select(&entries, &store).await.unwrap().unwrap();
        assert_eq!(second.id, "beta");
        store.mark_delivered(&second.id, "2025-01-02").await.unwrap();

        // Exhausted: progress is cleared and selection starts over.
        let third = engine.select(&entries, &store).await.unwrap().unwrap();
        assert_eq!(third.id, "alpha");
        assert_eq!(store.delivered_count().await, 0);
    }

    #[tokio::test]
    async fn test_exhausted_without_reset_returns_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(tmp.path(), "idiom").await.unwrap();
        let entries = vec![entry("alpha"), entry("beta")];
        for e in &entries {
            store.mark_delivered(&e.id, "2025-01-01").await.unwrap();
        }

        let engine = SelectionEngine::new(SelectionMode::Random, false);
        let chosen = engine.select(&entries, &store).await.unwrap().unwrap();
        assert_eq!(chosen.id, "alpha");
        assert_eq!(store.delivered_count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_collection_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(tmp.path(), "radio").await.unwrap();
        let engine = SelectionEngine::new(SelectionMode::Sequential, true);
        assert!(engine.select(&[], &store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_random_never_repeats_within_a_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(tmp.path(), "classical").await.unwrap();
        let entries: Vec<_> = (0..12).map(|i| entry(&format!("e{i}"))).collect();
        let engine = SelectionEngine::new(SelectionMode::Random, true);

        let mut seen = BTreeSet::new();
        for _ in 0..entries.len() {
            let chosen = engine.select(&entries, &store).await.unwrap().unwrap();
            assert!(seen.insert(chosen.id.clone()), "{} repeated", chosen.id);
            store.mark_delivered(&chosen.id, "2025-01-01").await.unwrap();
        }
        assert_eq!(seen.len(), entries.len());
    }

    #[tokio::test]
    async fn test_selection_sees_marks_from_another_store() {
        let tmp = tempfile::tempdir().unwrap();
        let serving = ProgressStore::open(tmp.path(), "english").await.unwrap();
        let command = ProgressStore::open(tmp.path(), "english").await.unwrap();
        let entries = vec![entry("alpha"), entry("beta")];
        let engine = SelectionEngine::new(SelectionMode::Sequential, true);
        for e in &entries {
            serving.mark_delivered(&e.id, "2025-06-01").await.unwrap();
        }

        let first = engine.select(&entries, &command).await.unwrap().unwrap();
        assert_eq!(first.id, "alpha");
        command.mark_delivered(&first.id, "2025-06-02").await.unwrap();

        // No second reset: the other store's fresh mark survives.
        let next = engine.select(&entries, &serving).await.unwrap().unwrap();
        assert_eq!(next.id, "beta");
        assert_eq!(serving.delivered_count().await, 1);
    }

    #[test]
    fn test_pick_respects_mode() {
        let entries = vec![entry("a"), entry("b"), entry("c")];
        let delivered = BTreeSet::from(["a".to_string()]);
        let available = undelivered(&entries, &delivered);
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(
            pick(&available, SelectionMode::Sequential, &mut rng).map(|e| e.id.as_str()),
            Some("b")
        );
        for _ in 0..20 {
            let id = pick(&available, SelectionMode::Random, &mut rng).unwrap().id.as_str();
            assert!(id == "b" || id == "c");
        }
        assert!(pick(&[], SelectionMode::Random, &mut rng).is_none());
    }
}
