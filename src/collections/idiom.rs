//! Four-character idiom cards.

use super::{Record, base_fields, field, insert_labels};
use crate::models::{CollectionConfig, CollectionEntry, Extra, FieldMap};
use crate::render::RenderContext;

pub const TEMPLATE_ID: &str = "card_idiom.html";
const CATEGORY: &str = "idiom";

pub(super) fn map_record(record: &Record) -> Option<CollectionEntry> {
    let word = field(record, "word");
    Some(CollectionEntry {
        id: word.clone(),
        primary_text: word,
        phonetic: None,
        category: Some(CATEGORY.to_string()),
        body: field(record, "definition"),
        example: None,
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
    fields.insert("definition".into(), entry.body.clone());
    fields.insert("font_word".into(), config.font("word", "serif"));
    fields.insert("font_definition".into(), config.font("definition", "sans-serif"));
    fields.insert("word_size".into(), config.style("word_size", "56px"));
    fields.insert("definition_size".into(), config.style("definition_size", "18px"));
    insert_labels(&mut fields, config, "#成语", "#国学", "成语卡片");
    fields
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_and_render() {
        let entry = map_record(&record(json!({
            "word": "一石二鸟",
            "definition": "比喻做一件事得到两方面的好处"
        })))
        .unwrap();
        assert_eq!(entry.category.as_deref(), Some("idiom"));
        assert!(entry.is_valid());

        let fields = render_input(&entry, &config("idiom"), &context());
        assert_eq!(fields["word"], "一石二鸟");
        assert_eq!(fields["word_size"], "56px");
        assert_eq!(fields["brand"], "成语卡片");
    }

    #[test]
    fn test_missing_definition_is_invalid() {
        let entry = map_record(&record(json!({"word": "画蛇添足"}))).unwrap();
        assert!(!entry.is_valid());
    }
}
