//! Data models for collection entries and collection configuration.
//!
//! This module defines the core data structures used throughout the service:
//! - [`CollectionEntry`]: one deliverable unit of content (word, idiom, question...)
//! - [`Extra`]: the typed extension bag carrying variant-specific fields
//! - [`CollectionConfig`]: per-collection display settings loaded from `config.json`
//! - [`FieldMap`]: the flat key/value set handed to the template renderer

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Flat template variables passed to the card renderer.
pub type FieldMap = BTreeMap<String, String>;

/// Keys used inside [`Extra`] by the built-in handler variants.
pub mod extra_keys {
    pub const ACCENT: &str = "accent";
    pub const LEVEL: &str = "level";
    pub const EXAMPLE_TRANSLATION: &str = "example_cn";
    pub const SENTENCE_NUMBER: &str = "sentence_num";
    pub const QUESTION: &str = "question";
    pub const TAGS: &str = "tags";
}

/// A single value stored in the [`Extra`] bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Text(String),
    Number(i64),
    List(Vec<String>),
}

impl ExtraValue {
    /// Convert a raw JSON value into an extra value.
    ///
    /// Nulls, objects and empty strings carry no information and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self::Text(s.trim().to_string())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::Array(items) => {
                let list: Vec<String> = items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
                (!list.is_empty()).then_some(Self::List(list))
            }
            _ => None,
        }
    }

    /// Render the value as display text.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::List(items) => items.join(" "),
        }
    }
}

/// Open-ended, typed per-entry extension fields.
///
/// Variants store their extra columns here (JLPT level, sentence number,
/// tags...). The core `id`/`body` invariant never depends on this bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra(BTreeMap<String, ExtraValue>);

impl Extra {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; `None` values are skipped.
    pub fn with(mut self, key: &str, value: Option<ExtraValue>) -> Self {
        if let Some(value) = value {
            self.0.insert(key.to_string(), value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(ExtraValue::as_text)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Proficiency level such as `JLPT-N4`.
    pub fn level(&self) -> Option<String> {
        self.text(extra_keys::LEVEL)
    }

    /// Sequence number of a classical fragment inside its source text.
    pub fn sentence_number(&self) -> Option<i64> {
        match self.get(extra_keys::SENTENCE_NUMBER)? {
            ExtraValue::Number(n) => Some(*n),
            ExtraValue::Text(s) => s.parse().ok(),
            ExtraValue::List(_) => None,
        }
    }

    /// Tag labels. Text values are split on commas and whitespace.
    pub fn tags(&self) -> Vec<String> {
        match self.get(extra_keys::TAGS) {
            Some(ExtraValue::List(items)) => items.clone(),
            Some(ExtraValue::Text(s)) => s
                .split(|c: char| c == ',' || c == '，' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            Some(ExtraValue::Number(n)) => vec![n.to_string()],
            None => Vec::new(),
        }
    }
}

/// One normalized, deliverable piece of content.
///
/// Entries are built by a handler variant during collection load and are
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    /// Natural key used for no-repeat tracking.
    pub id: String,
    /// The headline text shown on the card.
    pub primary_text: String,
    pub phonetic: Option<String>,
    /// Part-of-speech or type tag.
    pub category: Option<String>,
    /// Primary definition or content.
    pub body: String,
    pub example: Option<String>,
    pub extra: Extra,
}

impl CollectionEntry {
    /// An entry is valid iff both `id` and `body` are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.body.trim().is_empty()
    }
}

/// Card width and height in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct CardSize {
    pub width: u32,
    pub height: u32,
}

impl Default for CardSize {
    fn default() -> Self {
        Self {
            width: 432,
            height: 540,
        }
    }
}

impl From<(u32, u32)> for CardSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl From<CardSize> for (u32, u32) {
    fn from(size: CardSize) -> Self {
        (size.width, size.height)
    }
}

/// Tag and brand labels printed on the card footer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardLabels {
    pub tag1: Option<String>,
    pub tag2: Option<String>,
    pub brand: Option<String>,
}

/// Display configuration for one collection.
///
/// Loaded once from `<collections_dir>/<id>/config.json` when the collection
/// is registered and read-only afterwards. The `lang_id`/`lang_name` keys of
/// older configuration files are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(alias = "lang_id", default)]
    pub collection_id: String,
    #[serde(alias = "lang_name")]
    pub display_name: String,
    #[serde(default)]
    pub fonts: HashMap<String, String>,
    #[serde(default)]
    pub styles: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub card_size: CardSize,
    #[serde(default)]
    pub theme_colors: Vec<String>,
    #[serde(default)]
    pub labels: CardLabels,
}

impl CollectionConfig {
    /// Font for a card slot, or `default` when the config has none.
    pub fn font(&self, slot: &str, default: &str) -> String {
        self.fonts
            .get(slot)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Style value for a key, rendered as text, or `default`.
    pub fn style(&self, key: &str, default: &str) -> String {
        match self.styles.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        }
    }
}
