//! Plain vocabulary cards (word, phonetic, part of speech, definition, example).

use super::{Record, base_fields, field, insert_labels, optional_field};
use crate::models::{CollectionConfig, CollectionEntry, Extra, FieldMap};
use crate::render::RenderContext;

pub const TEMPLATE_ID: &str = "card.html";

pub(super) fn map_record(record: &Record) -> Option<CollectionEntry> {
    let word = field(record, "word");
    Some(CollectionEntry {
        id: word.clone(),
        primary_text: word,
        phonetic: optional_field(record, "phonetic"),
        category: optional_field(record, "pos"),
        body: field(record, "definition_cn"),
        example: optional_field(record, "example"),
        extra: Extra::new(),
    })
}

pub(super) fn render_input(
    entry: &CollectionEntry,
    config: &CollectionConfig,
    context: &RenderContext,
) -> FieldMap {
    let mut fields = base_fields(context);
    fields.insert("word".into(), entry.primary_text.clone());
    fields.insert("phonetic".into(), entry.phonetic.clone().unwrap_or_default());
    fields.insert(
        "pos".into(),
        entry
            .category
            .as_deref()
            .unwrap_or("word")
            .to_uppercase(),
    );
    fields.insert("definition_cn".into(), entry.body.clone());
    fields.insert("example".into(), entry.example.clone().unwrap_or_default());

    fields.insert("font_word".into(), config.font("word", "serif"));
    fields.insert("font_phonetic".into(), config.font("phonetic", "monospace"));
    fields.insert("font_definition".into(), config.font("definition", "sans-serif"));
    fields.insert("font_example".into(), config.font("example", "serif"));
    fields.insert("word_size".into(), config.style("word_size", "52px"));
    fields.insert(
        "word_letter_spacing".into(),
        config.style("word_letter_spacing", "-1px"),
    );
    fields.insert("phonetic_size".into(), config.style("phonetic_size", "15px"));
    fields.insert("definition_size".into(), config.style("definition_size", "18px"));
    fields.insert("example_size".into(), config.style("example_size", "14px"));
    fields.insert("example_style".into(), config.style("example_style", "italic"));

    insert_labels(&mut fields, config, "#CET6", "#Daily", "Daily Vocab");
    fields
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_record() {
        let entry = map_record(&record(json!({
            "word": " abandon ",
            "phonetic": "/əˈbændən/",
            "pos": "v.",
            "definition_cn": "放弃",
            "example": "They had to abandon the car."
        })))
        .unwrap();
        assert_eq!(entry.id, "abandon");
        assert_eq!(entry.phonetic.as_deref(), Some("/əˈbændən/"));
        assert_eq!(entry.category.as_deref(), Some("v."));
        assert_eq!(entry.body, "放弃");
        assert!(entry.is_valid());
    }

    #[test]
    fn test_render_input_defaults() {
        let entry = map_record(&record(json!({"word": "brisk", "definition_cn": "轻快的"}))).unwrap();
        let fields = render_input(&entry, &config("english"), &context());
        assert_eq!(fields["word"], "brisk");
        assert_eq!(fields["pos"], "WORD");
        assert_eq!(fields["phonetic"], "");
        assert_eq!(fields["word_size"], "52px");
        assert_eq!(fields["tag1"], "#CET6");
        assert_eq!(fields["bg_position"], "10% 90%");
        assert_eq!(fields["theme_color"], "#123456");
    }
}
