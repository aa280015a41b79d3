//! Core data models shared by the graph store, the embedding index and the
//! query engine.
//!
//! Every persisted record is owned by exactly one [`UserId`]; the scope label
//! derived from it is written next to the raw id and both are checked on
//! every read.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::error::InputError;

const MAX_USER_ID_LEN: usize = 64;

/// Validated user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_USER_ID_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(InputError::InvalidUserId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Label attached to every record this user owns.
    pub fn scope_label(&self) -> String {
        format!("User_{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case-normalized entity key: lowercase with internal whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a vocabulary label: `"Learning Objective"` → `"learning_objective"`.
fn normalize_label(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Concept,
    Framework,
    Definition,
    LearningObjective,
    Organization,
    Example,
    Process,
    Step,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Concept,
        EntityType::Framework,
        EntityType::Definition,
        EntityType::LearningObjective,
        EntityType::Organization,
        EntityType::Example,
        EntityType::Process,
        EntityType::Step,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Concept => "concept",
            EntityType::Framework => "framework",
            EntityType::Definition => "definition",
            EntityType::LearningObjective => "learning_objective",
            EntityType::Organization => "organization",
            EntityType::Example => "example",
            EntityType::Process => "process",
            EntityType::Step => "step",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let label = normalize_label(raw);
        Self::ALL.into_iter().find(|t| t.as_str() == label)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Defines,
    HasComponent,
    HasStep,
    PartOf,
    ExampleOf,
    UsedIn,
    Supports,
    ObjectiveOf,
    CauseOf,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 9] = [
        RelationshipType::Defines,
        RelationshipType::HasComponent,
        RelationshipType::HasStep,
        RelationshipType::PartOf,
        RelationshipType::ExampleOf,
        RelationshipType::UsedIn,
        RelationshipType::Supports,
        RelationshipType::ObjectiveOf,
        RelationshipType::CauseOf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Defines => "defines",
            RelationshipType::HasComponent => "has_component",
            RelationshipType::HasStep => "has_step",
            RelationshipType::PartOf => "part_of",
            RelationshipType::ExampleOf => "example_of",
            RelationshipType::UsedIn => "used_in",
            RelationshipType::Supports => "supports",
            RelationshipType::ObjectiveOf => "objective_of",
            RelationshipType::CauseOf => "cause_of",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let label = normalize_label(raw);
        Self::ALL.into_iter().find(|t| t.as_str() == label)
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity as produced by the knowledge extractor, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
}

/// Relationship as produced by the knowledge extractor, by entity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    pub rel_type: RelationshipType,
}

/// A stored entity node.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// A stored relationship edge, with endpoint display names resolved.
#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    pub rel_type: RelationshipType,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// `"Algorithms used_in CS101"`
    pub fn sentence(&self) -> String {
        format!("{} {} {}", self.from, self.rel_type, self.to)
    }
}

/// Node of the full user graph, for visualization consumers.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Number of edges touching this node, in either direction.
    pub connections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub label: RelationshipType,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Bounded neighborhood of a focal concept.
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl GraphContext {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// A chunk as persisted by a vector store.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub user_id: String,
    pub document: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub model: String,
}

/// A vector search hit.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub document: String,
    pub text: String,
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validation() {
        assert!(UserId::parse("alice").is_ok());
        assert!(UserId::parse("student_42-b.x").is_ok());
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("bob smith").is_err());
        assert!(UserId::parse("x`) DETACH DELETE").is_err());
        assert!(UserId::parse(&"a".repeat(65)).is_err());
        assert_eq!(UserId::parse("  carol ").unwrap().as_str(), "carol");
    }

    #[test]
    fn test_scope_label() {
        let user = UserId::parse("alice").unwrap();
        assert_eq!(user.scope_label(), "User_alice");
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Promotion   Mix "), "promotion mix");
        assert_eq!(normalize_name("CS101"), "cs101");
    }

    #[test]
    fn test_entity_type_parse_is_lenient() {
        assert_eq!(EntityType::parse("Concept"), Some(EntityType::Concept));
        assert_eq!(
            EntityType::parse("learning objective"),
            Some(EntityType::LearningObjective)
        );
        assert_eq!(EntityType::parse(" STEP "), Some(EntityType::Step));
        assert_eq!(EntityType::parse("person"), None);
    }

    #[test]
    fn test_relationship_type_parse() {
        assert_eq!(
            RelationshipType::parse("has-component"),
            Some(RelationshipType::HasComponent)
        );
        assert_eq!(RelationshipType::parse("USED_IN"), Some(RelationshipType::UsedIn));
        assert_eq!(RelationshipType::parse("relates_to"), None);
    }
}
