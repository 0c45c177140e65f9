//! Collection handlers: per-content-type loading and card field mapping.
//!
//! Every collection is served by one [`HandlerVariant`]. A variant knows how
//! to turn raw JSON records into [`CollectionEntry`] values and how to build
//! the template fields for its card. The set of variants is closed:
//!
//! | Variant | Module | Template |
//! |---------|--------|----------|
//! | Plain vocabulary | [`vocabulary`] | `card.html` |
//! | Leveled vocabulary (JLPT) | [`leveled`] | `card_japanese.html` |
//! | Idiom | [`idiom`] | `card_idiom.html` |
//! | Classical-text fragment | [`classical`] | `card_classical.html` |
//! | Quiz question | [`quiz`] | `card_quiz.html` |
//!
//! Handlers are instantiated lazily through the [`registry`].

pub mod classical;
pub mod idiom;
pub mod leveled;
pub mod quiz;
pub mod registry;
pub mod source;
pub mod vocabulary;

use crate::error::Result;
use crate::models::{CollectionConfig, CollectionEntry, FieldMap};
use crate::render::RenderContext;
use serde_json::{Map, Value};
use source::CollectionSource;
use std::path::Path;
use tracing::{info, instrument};

pub use registry::{CollectionRegistry, CollectionSummary};

/// One raw record as read from a collection file.
pub type Record = Map<String, Value>;

/// Name of the record file inside a collection directory.
pub const RECORDS_FILE: &str = "words.json";

/// The closed set of content types the service can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerVariant {
    Vocabulary,
    LeveledVocabulary,
    Idiom,
    ClassicalFragment,
    QuizQuestion,
}

impl HandlerVariant {
    /// Template file the renderer uses for this variant.
    pub fn template_id(self) -> &'static str {
        match self {
            Self::Vocabulary => vocabulary::TEMPLATE_ID,
            Self::LeveledVocabulary => leveled::TEMPLATE_ID,
            Self::Idiom => idiom::TEMPLATE_ID,
            Self::ClassicalFragment => classical::TEMPLATE_ID,
            Self::QuizQuestion => quiz::TEMPLATE_ID,
        }
    }

    /// Map one raw record, returning `None` for records that must be dropped.
    ///
    /// The level filter only narrows leveled vocabulary; other variants
    /// ignore it.
    fn map_record(self, record: &Record, level_filter: Option<&str>) -> Option<CollectionEntry> {
        let entry = match self {
            Self::Vocabulary => vocabulary::map_record(record),
            Self::LeveledVocabulary => leveled::map_record(record, level_filter),
            Self::Idiom => idiom::map_record(record),
            Self::ClassicalFragment => classical::map_record(record),
            Self::QuizQuestion => quiz::map_record(record),
        }?;
        entry.is_valid().then_some(entry)
    }

    fn render_input(
        self,
        entry: &CollectionEntry,
        config: &CollectionConfig,
        context: &RenderContext,
    ) -> FieldMap {
        match self {
            Self::Vocabulary => vocabulary::render_input(entry, config, context),
            Self::LeveledVocabulary => leveled::render_input(entry, config, context),
            Self::Idiom => idiom::render_input(entry, config, context),
            Self::ClassicalFragment => classical::render_input(entry, config, context),
            Self::QuizQuestion => quiz::render_input(entry, config, context),
        }
    }
}

/// A loaded-on-demand view of one registered collection.
#[derive(Debug)]
pub struct CollectionHandler {
    id: String,
    variant: HandlerVariant,
    config: CollectionConfig,
    source: CollectionSource,
}

impl CollectionHandler {
    pub fn new(
        id: impl Into<String>,
        variant: HandlerVariant,
        config: CollectionConfig,
        collection_dir: &Path,
    ) -> Self {
        Self {
            id: id.into(),
            variant,
            config,
            source: CollectionSource::new(collection_dir.join(RECORDS_FILE)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn variant(&self) -> HandlerVariant {
        self.variant
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn template_id(&self) -> &'static str {
        self.variant.template_id()
    }

    /// Load every valid entry, in source order.
    ///
    /// Malformed individual records are dropped; only a missing file or a
    /// malformed top-level structure is an error.
    #[instrument(level = "info", skip_all, fields(collection = %self.id, ?level_filter))]
    pub async fn load(&self, level_filter: Option<&str>) -> Result<Vec<CollectionEntry>> {
        let records = self.source.load_records().await?;
        let total = records.len();
        let entries: Vec<CollectionEntry> = records
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|record| self.variant.map_record(record, level_filter))
            .collect();
        info!(
            total,
            kept = entries.len(),
            dropped = total - entries.len(),
            "Loaded collection entries"
        );
        Ok(entries)
    }

    /// Build the template fields for one entry. Pure; performs no I/O.
    pub fn render_input(&self, entry: &CollectionEntry, context: &RenderContext) -> FieldMap {
        self.variant.render_input(entry, &self.config, context)
    }
}

/// Trimmed string value of a record field; numbers are stringified.
pub(crate) fn field(record: &Record, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Like [`field`], but blank values become `None`.
pub(crate) fn optional_field(record: &Record, key: &str) -> Option<String> {
    Some(field(record, key)).filter(|s| !s.is_empty())
}

/// Fields every card template shares: background, position and theme colour.
pub(crate) fn base_fields(context: &RenderContext) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("bg_url".into(), context.background_url.clone());
    fields.insert("bg_position".into(), context.background_position.clone());
    fields.insert("theme_color".into(), context.theme_color.clone());
    fields
}

/// Footer labels, preferring the collection config over variant defaults.
pub(crate) fn insert_labels(
    fields: &mut FieldMap,
    config: &CollectionConfig,
    tag1: &str,
    tag2: &str,
    brand: &str,
) {
    let labels = &config.labels;
    fields.insert("tag1".into(), labels.tag1.clone().unwrap_or_else(|| tag1.to_string()));
    fields.insert("tag2".into(), labels.tag2.clone().unwrap_or_else(|| tag2.to_string()));
    fields.insert("brand".into(), labels.brand.clone().unwrap_or_else(|| brand.to_string()));
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::CardLabels;
    use std::collections::HashMap;

    pub fn config(id: &str) -> CollectionConfig {
        CollectionConfig {
            collection_id: id.to_string(),
            display_name: format!("{id} cards"),
            fonts: HashMap::new(),
            styles: HashMap::new(),
            card_size: Default::default(),
            theme_colors: Vec::new(),
            labels: CardLabels::default(),
        }
    }

    pub fn context() -> RenderContext {
        RenderContext {
            theme_color: "#123456".into(),
            background_url: "https://cdn.example/bg.jpg".into(),
            background_position: "10% 90%".into(),
        }
    }

    pub fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }
}
