//! Quiz question cards (question bank with an id, a question and its answer).
//!
//! Unlike other variants, a quiz record is only usable when it also carries
//! a non-empty question.

use super::{Record, base_fields, field, insert_labels, optional_field};
use crate::models::{CollectionConfig, CollectionEntry, Extra, ExtraValue, FieldMap, extra_keys};
use crate::render::RenderContext;

pub const TEMPLATE_ID: &str = "card_quiz.html";
const CATEGORY: &str = "quiz";

pub(super) fn map_record(record: &Record) -> Option<CollectionEntry> {
    let question = optional_field(record, "question")?;
    let id = field(record, "question_id");

    Some(CollectionEntry {
        id: id.clone(),
        primary_text: id,
        phonetic: None,
        category: Some(CATEGORY.to_string()),
        body: field(record, "answer"),
        example: None,
        extra: Extra::new()
            .with(extra_keys::QUESTION, Some(ExtraValue::Text(question)))
            .with(extra_keys::TAGS, record.get("tags").and_then(ExtraValue::from_json)),
    })
}

pub(super) fn render_input(
    entry: &CollectionEntry,
    config: &CollectionConfig,
    context: &RenderContext,
) -> FieldMap {
    let mut fields = base_fields(context);
    fields.insert("question_id".into(), entry.id.clone());
    fields.insert(
        "question".into(),
        entry.extra.text(extra_keys::QUESTION).unwrap_or_default(),
    );
    fields.insert("answer".into(), entry.body.clone());
    fields.insert("tags".into(), entry.extra.tags().join(" "));
    fields.insert("font_question".into(), config.font("question", "sans-serif"));
    fields.insert("font_answer".into(), config.font("answer", "sans-serif"));
    fields.insert("question_size".into(), config.style("question_size", "16px"));
    fields.insert("answer_size".into(), config.style("answer_size", "18px"));
    insert_labels(&mut fields, config, "#Quiz", "#Daily", "Daily Quiz");
    fields
}
