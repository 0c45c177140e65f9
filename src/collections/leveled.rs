//! Leveled (JLPT) vocabulary cards.
//!
//! Records carry kana, pitch accent, a Japanese example with its translation
//! and a proficiency level such as `JLPT-N4`. Loading can be narrowed to one
//! level: a record with level `L` matches filter `f` when `L` contains
//! `JLPT-f` or `f` itself.

use super::{Record, base_fields, field, insert_labels, optional_field};
use crate::models::{CollectionConfig, CollectionEntry, Extra, ExtraValue, FieldMap, extra_keys};
use crate::render::RenderContext;

pub const TEMPLATE_ID: &str = "card_japanese.html";

/// Whether a record level passes the configured filter.
pub fn level_matches(level: &str, filter: &str) -> bool {
    level.contains(&format!("JLPT-{filter}")) || level.contains(filter)
}

pub(super) fn map_record(record: &Record, level_filter: Option<&str>) -> Option<CollectionEntry> {
    let level = field(record, "level");
    if let Some(filter) = level_filter {
        if !level_matches(&level, filter) {
            return None;
        }
    }

    let word = field(record, "word");
    let extra = Extra::new()
        .with(extra_keys::ACCENT, record.get("accent").and_then(ExtraValue::from_json))
        .with(
            extra_keys::EXAMPLE_TRANSLATION,
            record.get("example_cn").and_then(ExtraValue::from_json),
        )
        .with(extra_keys::LEVEL, record.get("level").and_then(ExtraValue::from_json));

    Some(CollectionEntry {
        id: word.clone(),
        primary_text: word,
        phonetic: optional_field(record, "kana"),
        category: optional_field(record, "pos"),
        body: field(record, "definition_cn"),
        example: optional_field(record, "example_ja"),
        extra,
    })
}

pub(super) fn render_input(
    entry: &CollectionEntry,
    config: &CollectionConfig,
    context: &RenderContext,
) -> FieldMap {
    let level = entry.extra.level().unwrap_or_else(|| "JLPT".to_string());

    let mut fields = base_fields(context);
    fields.insert("word".into(), entry.primary_text.clone());
    fields.insert("kana".into(), entry.phonetic.clone().unwrap_or_default());
    fields.insert(
        "accent".into(),
        entry.extra.text(extra_keys::ACCENT).unwrap_or_default(),
    );
    fields.insert(
        "pos".into(),
        entry.category.clone().unwrap_or_else(|| "単語".to_string()),
    );
    fields.insert("definition_cn".into(), entry.body.clone());
    fields.insert("example_ja".into(), entry.example.clone().unwrap_or_default());
    fields.insert(
        "example_cn".into(),
        entry
            .extra
            .text(extra_keys::EXAMPLE_TRANSLATION)
            .unwrap_or_default(),
    );

    fields.insert("font_word".into(), config.font("word", "serif"));
    fields.insert("font_phonetic".into(), config.font("phonetic", "sans-serif"));
    fields.insert("font_definition".into(), config.font("definition", "sans-serif"));
    fields.insert("font_example".into(), config.font("example", "serif"));
    fields.insert("word_size".into(), config.style("word_size", "48px"));
    fields.insert(
        "word_letter_spacing".into(),
        config.style("word_letter_spacing", "0.05em"),
    );
    fields.insert("phonetic_size".into(), config.style("phonetic_size", "16px"));
    fields.insert("definition_size".into(), config.style("definition_size", "18px"));
    fields.insert("example_size".into(), config.style("example_size", "14px"));
    fields.insert("example_style".into(), config.style("example_style", "normal"));

    insert_labels(&mut fields, config, &format!("#{level}"), "#Daily", "日語単語");
    fields
}
