//! LLM-based entity and relationship extraction.
//!
//! [`KnowledgeExtractor::extract`] sends one chunk to the language model with
//! a fixed academic-extraction prompt and turns the reply into typed
//! [`ExtractedEntity`] and [`ExtractedRelationship`] values.
//!
//! Model replies are untrusted: the JSON may be fenced, surrounded by prose,
//! or contain entries of the wrong shape. Parsing goes through
//! `serde_json::Value` so a single bad entry is skipped instead of losing the
//! whole chunk. A reply that cannot be parsed at all yields an empty
//! extraction and a warning.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::LanguageModel;
use crate::models::{
    normalize_name, EntityType, ExtractedEntity, ExtractedRelationship, RelationshipType,
};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response JSON is not an object")]
    NotAnObject,
}

/// Entities and relationships found in one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

pub struct KnowledgeExtractor {
    model: Arc<dyn LanguageModel>,
}

impl KnowledgeExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Extract knowledge from one chunk. Never fails; problems are logged.
    pub async fn extract(&self, chunk_text: &str) -> Extraction {
        if chunk_text.trim().is_empty() {
            return Extraction::default();
        }

        let prompt = build_prompt(chunk_text);
        let raw = match self.model.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, model = self.model.model_name(), "knowledge extraction call failed");
                return Extraction::default();
            }
        };

        match parse_extraction(&raw) {
            Ok(extraction) => {
                debug!(
                    entities = extraction.entities.len(),
                    relationships = extraction.relationships.len(),
                    "extracted knowledge from chunk"
                );
                extraction
            }
            Err(e) => {
                let preview: String = raw.chars().take(200).collect();
                warn!(error = %e, response = %preview, "could not parse extraction response");
                Extraction::default()
            }
        }
    }
}

/// The extraction prompt, with both type vocabularies listed.
pub fn build_prompt(chunk_text: &str) -> String {
    let entity_types = EntityType::ALL
        .iter()
        .map(|t| format!("- {}", t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    let relationship_types = RelationshipType::ALL
        .iter()
        .map(|t| format!("- {}", t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an academic knowledge graph extractor for university-level learning materials.

Extract ONLY study-relevant knowledge. Ignore copyright notices, slide numbers,
repeated headings, URLs and decorative text.

Prioritize core concepts and definitions, frameworks and models, components
or steps, learning objectives, case studies and examples, and cause-effect
or purpose relationships.

Text:
"""{chunk_text}"""

ENTITY TYPES:
{entity_types}

RELATIONSHIP TYPES:
{relationship_types}

RULES:
- Entity names: 2-6 words
- No duplicates
- Canonical academic terms only

Return ONLY valid JSON:
{{
  "entities": [
    {{"name": "Integrated Marketing Communications", "type": "concept"}}
  ],
  "relationships": [
    {{"from": "Promotion Mix", "to": "Advertising", "type": "has_component"}}
  ]
}}
"#
    )
}

/// Strip Markdown fences and surrounding prose, keeping the outermost object.
pub fn clean_json_response(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parse and validate a raw model reply.
pub fn parse_extraction(raw: &str) -> Result<Extraction, ExtractionError> {
    let value: Value = serde_json::from_str(clean_json_response(raw))?;
    let object = value.as_object().ok_or(ExtractionError::NotAnObject)?;

    let mut extraction = Extraction::default();

    let mut seen_entities = HashSet::new();
    for item in array_field(object.get("entities")) {
        let Some(entity) = parse_entity(item) else {
            continue;
        };
        if seen_entities.insert(normalize_name(&entity.name)) {
            extraction.entities.push(entity);
        }
    }

    let mut seen_edges = HashSet::new();
    for item in array_field(object.get("relationships")) {
        let Some(rel) = parse_relationship(item) else {
            continue;
        };
        let key = (
            normalize_name(&rel.source),
            rel.rel_type,
            normalize_name(&rel.target),
        );
        if seen_edges.insert(key) {
            extraction.relationships.push(rel);
        }
    }

    Ok(extraction)
}

fn array_field(value: Option<&Value>) -> &[Value] {
    value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn string_field<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn parse_entity(item: &Value) -> Option<ExtractedEntity> {
    let name = string_field(item, &["name"])?;
    let entity_type = string_field(item, &["type"])
        .and_then(EntityType::parse)
        .unwrap_or(EntityType::Concept);

    Some(ExtractedEntity {
        name: name.to_string(),
        entity_type,
    })
}

fn parse_relationship(item: &Value) -> Option<ExtractedRelationship> {
    let source = string_field(item, &["from", "source"])?;
    let target = string_field(item, &["to", "target"])?;
    if normalize_name(source) == normalize_name(target) {
        return None;
    }
    let rel_type = string_field(item, &["type"]).and_then(RelationshipType::parse)?;

    Some(ExtractedRelationship {
        source: source.to_string(),
        target: target.to_string(),
        rel_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    struct FixedModel(Result<String, ()>);

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.0
                .clone()
                .map_err(|_| LlmError::Request("connection refused".into()))
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_clean_strips_fences_and_prose() {
        let raw = "Here you go:\n```json\n{\"entities\": []}\n```\nHope that helps!";
        assert_eq!(clean_json_response(raw), "{\"entities\": []}");
    }

    #[test]
    fn test_parse_valid_response() {
        let raw = r#"{
            "entities": [
                {"name": "Algorithms", "type": "concept"},
                {"name": "CS101", "type": "Organization"}
            ],
            "relationships": [
                {"from": "Algorithms", "to": "CS101", "type": "used_in"}
            ]
        }"#;
        let ex = parse_extraction(raw).unwrap();
        assert_eq!(ex.entities.len(), 2);
        assert_eq!(ex.entities[1].entity_type, EntityType::Organization);
        assert_eq!(ex.relationships.len(), 1);
        assert_eq!(ex.relationships[0].rel_type, RelationshipType::UsedIn);
    }

    #[test]
    fn test_unknown_entity_type_becomes_concept() {
        let raw = r#"{"entities": [{"name": "Ada Lovelace", "type": "person"}, {"name": "Recursion"}]}"#;
        let ex = parse_extraction(raw).unwrap();
        assert!(ex.entities.iter().all(|e| e.entity_type == EntityType::Concept));
        assert_eq!(ex.entities.len(), 2);
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let raw = r#"{
            "entities": ["just a string", {"name": ""}, {"name": 42}, {"name": "Valid Thing"}],
            "relationships": [
                {"from": "A", "to": "B", "type": "relates_to"},
                {"from": "A", "to": "a", "type": "supports"},
                {"from": "A", "type": "supports"},
                {"source": "A", "target": "B", "type": "Has Component"}
            ]
        }"#;
        let ex = parse_extraction(raw).unwrap();
        assert_eq!(ex.entities.len(), 1);
        assert_eq!(ex.entities[0].name, "Valid Thing");
        assert_eq!(ex.relationships.len(), 1);
        assert_eq!(ex.relationships[0].rel_type, RelationshipType::HasComponent);
    }

    #[test]
    fn test_within_chunk_dedupe() {
        let raw = r#"{
            "entities": [
                {"name": "Promotion Mix", "type": "framework"},
                {"name": "promotion  mix", "type": "concept"}
            ],
            "relationships": [
                {"from": "Promotion Mix", "to": "Advertising", "type": "has_component"},
                {"from": "promotion mix", "to": "advertising", "type": "has_component"},
                {"from": "Promotion Mix", "to": "Advertising", "type": "supports"}
            ]
        }"#;
        let ex = parse_extraction(raw).unwrap();
        assert_eq!(ex.entities.len(), 1);
        assert_eq!(ex.entities[0].entity_type, EntityType::Framework);
        assert_eq!(ex.relationships.len(), 2);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(parse_extraction("I cannot help with that.").is_err());
        assert!(matches!(
            parse_extraction("[1, 2, 3]"),
            Err(ExtractionError::Json(_)) | Err(ExtractionError::NotAnObject)
        ));
    }

    #[test]
    fn test_prompt_lists_vocabularies() {
        let prompt = build_prompt("Some text");
        assert!(prompt.contains("\"\"\"Some text\"\"\""));
        assert!(prompt.contains("- learning_objective"));
        assert!(prompt.contains("- cause_of"));
    }

    #[tokio::test]
    async fn test_extract_is_fail_soft() {
        let failing = KnowledgeExtractor::new(Arc::new(FixedModel(Err(()))));
        assert!(failing.extract("Algorithms are fun.").await.is_empty());

        let garbage = KnowledgeExtractor::new(Arc::new(FixedModel(Ok("no json here".into()))));
        assert!(garbage.extract("Algorithms are fun.").await.is_empty());

        let good = KnowledgeExtractor::new(Arc::new(FixedModel(Ok(
            "```json\n{\"entities\": [{\"name\": \"Algorithms\", \"type\": \"concept\"}]}\n```".into(),
        ))));
        let ex = good.extract("Algorithms are fun.").await;
        assert_eq!(ex.entities.len(), 1);
    }
}
