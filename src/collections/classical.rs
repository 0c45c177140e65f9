//! Classical-text fragment cards: a keyword and the sentence it comes from.

use super::{Record, base_fields, field, insert_labels};
use crate::models::{CollectionConfig, CollectionEntry, Extra, ExtraValue, FieldMap, extra_keys};
use crate::render::RenderContext;

pub const TEMPLATE_ID: &str = "card_classical.html";
const CATEGORY: &str = "classical";

pub(super) fn map_record(record: &Record) -> Option<CollectionEntry> {
    let keyword = field(record, "keyword");
    let sentence = record.get("sentence_num").and_then(ExtraValue::from_json);
    let phonetic = sentence.as_ref().map(|n| format!("第{}句", n.as_text()));

    Some(CollectionEntry {
        id: keyword.clone(),
        primary_text: keyword,
        phonetic,
        category: Some(CATEGORY.to_string()),
        body: field(record, "content"),
        example: None,
        extra: Extra::new().with(extra_keys::SENTENCE_NUMBER, sentence),
    })
}

pub(super) fn render_input(
    entry: &CollectionEntry,
    config: &CollectionConfig,
    context: &RenderContext,
) -> FieldMap {
    let mut fields = base_fields(context);
    fields.insert("keyword".into(), entry.primary_text.clone());
    fields.insert(
        "sentence_num".into(),
        entry
            .extra
            .sentence_number()
            .map(|n| n.to_string())
            .unwrap_or_default(),
    );
    fields.insert("content".into(), entry.body.clone());
    fields.insert("font_word".into(), config.font("word", "serif"));
    fields.insert("font_content".into(), config.font("content", "serif"));
    fields.insert("keyword_size".into(), config.style("keyword_size", "42px"));
    fields.insert("content_size".into(), config.style("content_size", "16px"));
    insert_labels(&mut fields, config, "#古文", "#经典", "古文卡片");
    fields
}
