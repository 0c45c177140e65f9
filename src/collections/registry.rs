//! Registry of known collections.
//!
//! Binding an id to a variant loads its `config.json` right away; the
//! [`CollectionHandler`] itself is built on first use and then shared for the
//! rest of the process lifetime.

use super::{CollectionHandler, HandlerVariant};
use crate::error::{Error, Result};
use crate::models::CollectionConfig;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Name of the display-settings file inside a collection directory.
pub const CONFIG_FILE: &str = "config.json";

/// Identifier and human-readable name of a registered collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSummary {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug)]
struct Registration {
    id: String,
    variant: HandlerVariant,
    config: Option<CollectionConfig>,
    handler: OnceCell<Arc<CollectionHandler>>,
}

/// Maps collection ids to handler variants, in registration order.
#[derive(Debug)]
pub struct CollectionRegistry {
    root: PathBuf,
    registrations: Vec<Registration>,
}

impl CollectionRegistry {
    /// Empty registry rooted at the directory holding one folder per collection.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registrations: Vec::new(),
        }
    }

    /// Registry with every built-in collection bound.
    ///
    /// A collection whose config cannot be read is still registered and
    /// fails later on [`get_handler`](Self::get_handler).
    pub async fn with_defaults(root: impl Into<PathBuf>) -> Self {
        use HandlerVariant::*;
        let mut registry = Self::new(root);
        let defaults = [
            ("english", Vocabulary),
            ("japanese", LeveledVocabulary),
            ("japanese_n1", LeveledVocabulary),
            ("japanese_n2", LeveledVocabulary),
            ("japanese_n3", LeveledVocabulary),
            ("japanese_n4", LeveledVocabulary),
            ("japanese_n5", LeveledVocabulary),
            ("idiom", Idiom),
            ("classical", ClassicalFragment),
            ("radio", QuizQuestion),
        ];
        for (id, variant) in defaults {
            if let Err(e) = registry.register(id, variant).await {
                warn!(collection = id, error = %e, "Collection config unreadable; registered without it");
            }
        }
        registry
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bind `id` to `variant` and load its config if one exists.
    ///
    /// Re-registering an id replaces the previous binding. The binding is
    /// kept even when the config file is malformed; the parse error is still
    /// returned so callers can report it.
    #[instrument(level = "info", skip_all, fields(collection = %id, ?variant))]
    pub async fn register(&mut self, id: &str, variant: HandlerVariant) -> Result<()> {
        let loaded = self.load_config(id).await;
        let (config, outcome) = match loaded {
            Ok(config) => (config, Ok(())),
            Err(e) => (None, Err(e)),
        };
        if config.is_none() {
            debug!("Registered without display config");
        }

        let registration = Registration {
            id: id.to_string(),
            variant,
            config,
            handler: OnceCell::new(),
        };
        match self.registrations.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = registration,
            None => self.registrations.push(registration),
        }
        info!("Registered collection");
        outcome
    }

    async fn load_config(&self, id: &str) -> Result<Option<CollectionConfig>> {
        let path = self.root.join(id).join(CONFIG_FILE);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).await?;
        let mut config: CollectionConfig =
            serde_json::from_str(&raw).map_err(|e| Error::InvalidFormat {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if config.collection_id.is_empty() {
            config.collection_id = id.to_string();
        }
        Ok(Some(config))
    }

    /// The handler for `id`, built on first call and shared afterwards.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRegistered`] if `id` was never registered
    /// - [`Error::MissingConfig`] if no config was found at registration
    pub fn get_handler(&self, id: &str) -> Result<Arc<CollectionHandler>> {
        let registration = self
            .registrations
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotRegistered(id.to_string()))?;

        registration
            .handler
            .get_or_try_init(|| {
                let config = registration
                    .config
                    .clone()
                    .ok_or_else(|| Error::MissingConfig(id.to_string()))?;
                debug!(collection = id, "Instantiating handler");
                Ok(Arc::new(CollectionHandler::new(
                    id,
                    registration.variant,
                    config,
                    &self.root.join(id),
                )))
            })
            .cloned()
    }

    pub fn list(&self) -> Vec<CollectionSummary> {
        self.registrations
            .iter()
            .map(|r| CollectionSummary {
                id: r.id.clone(),
                display_name: r
                    .config
                    .as_ref()
                    .map(|c| c.display_name.clone())
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| r.id.clone()),
            })
            .collect()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.registrations.iter().any(|r| r.id == id)
    }
}
