//! Hybrid retrieval and question answering.
//!
//! [`QueryEngine::ask`] runs the full question path:
//!
//! 1. Users with no entities and no chunks get the no-material answer
//!    straight away, without any model call.
//! 2. The model classifies the intent and names the focal concept (both with
//!    keyword fallbacks).
//! 3. The graph neighborhood of the focal concept and the vector matches for
//!    the question are fetched concurrently. Either read failing contributes
//!    nothing and is logged.
//! 4. If both reads are empty the no-material answer is returned; otherwise
//!    a [`StructuredContext`] is rendered and handed to the
//!    [`AnswerSynthesizer`].

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::answer::{AnswerSynthesizer, ANSWER_FAILURE_MESSAGE};
use crate::config::RetrievalConfig;
use crate::error::{InputError, PipelineError, Result};
use crate::graph::GraphStore;
use crate::index::EmbeddingIndex;
use crate::intent::{classify_intent, extract_focal_concept, Intent};
use crate::llm::LanguageModel;
use crate::models::{ChunkMatch, GraphContext, UserId};

/// Answer given when retrieval finds nothing for the user.
pub const NO_MATERIAL_MESSAGE: &str = "I could not find this topic in your uploaded materials.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered,
    NoRelevantMaterial,
    SynthesisFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    pub num_chunks_used: usize,
    pub num_entities_used: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub outcome: QueryOutcome,
    pub intent: Intent,
    pub focal_concept: Option<String>,
    pub context_stats: ContextStats,
}

/// Retrieved material in the three sections the answer prompt shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredContext {
    pub concepts: Vec<String>,
    pub relationships: Vec<String>,
    pub documents: Vec<String>,
}

impl StructuredContext {
    pub fn build(graph: &GraphContext, matches: &[ChunkMatch], snippet_chars: usize) -> Self {
        Self {
            concepts: graph.entities.iter().map(|e| e.name.clone()).collect(),
            relationships: graph.relationships.iter().map(|r| r.sentence()).collect(),
            documents: matches
                .iter()
                .map(|m| m.text.chars().take(snippet_chars).collect())
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut sections = Vec::new();
        if !self.concepts.is_empty() {
            sections.push(format!("Concepts:\n{}", self.concepts.join(", ")));
        }
        if !self.relationships.is_empty() {
            sections.push(format!("Relationships:\n{}", self.relationships.join("\n")));
        }
        if !self.documents.is_empty() {
            sections.push(format!("Documents:\n{}", self.documents.join("\n")));
        }
        sections.join("\n\n")
    }
}

pub struct QueryEngine {
    graph: Arc<dyn GraphStore>,
    index: Arc<EmbeddingIndex>,
    model: Arc<dyn LanguageModel>,
    synthesizer: AnswerSynthesizer,
    retrieval: RetrievalConfig,
}

impl QueryEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        index: Arc<EmbeddingIndex>,
        model: Arc<dyn LanguageModel>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            graph,
            index,
            synthesizer: AnswerSynthesizer::new(model.clone()),
            model,
            retrieval,
        }
    }

    pub async fn ask(&self, user: &UserId, question: &str) -> Result<QueryAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(InputError::EmptyQuestion.into());
        }

        let entity_count = self
            .graph
            .count_user_entities(user)
            .await
            .map_err(PipelineError::database)?;
        let chunk_count = self
            .index
            .store()
            .count_user_chunks(user)
            .await
            .map_err(PipelineError::database)?;
        if entity_count == 0 && chunk_count == 0 {
            info!(user = %user, "no stored material, skipping retrieval");
            return Ok(no_material(Intent::heuristic(question), None));
        }

        let intent = classify_intent(self.model.as_ref(), question).await;
        let concept = extract_focal_concept(self.model.as_ref(), question).await;

        let (graph_result, vector_result) = tokio::join!(
            self.graph.neighborhood(
                user,
                &concept,
                self.retrieval.graph_depth,
                self.retrieval.neighborhood_limit,
            ),
            self.index.vector_search(user, question, self.retrieval.top_k),
        );

        let graph_context = graph_result.unwrap_or_else(|e| {
            warn!(error = %e, "graph neighborhood lookup failed");
            GraphContext::default()
        });
        let matches = vector_result.unwrap_or_else(|e| {
            warn!(error = %e, "vector search failed");
            Vec::new()
        });

        info!(
            user = %user,
            intent = %intent,
            concept = %concept,
            entities = graph_context.entities.len(),
            relationships = graph_context.relationships.len(),
            chunks = matches.len(),
            "retrieval complete"
        );

        if graph_context.is_empty() && matches.is_empty() {
            return Ok(no_material(intent, Some(concept)));
        }

        let context_stats = ContextStats {
            num_chunks_used: matches.len(),
            num_entities_used: graph_context.entities.len(),
        };
        let context = StructuredContext::build(&graph_context, &matches, self.retrieval.snippet_chars);

        let (answer, outcome) = match self.synthesizer.synthesize(question, intent, &context).await {
            Some(text) => (text, QueryOutcome::Answered),
            None => (ANSWER_FAILURE_MESSAGE.to_string(), QueryOutcome::SynthesisFailed),
        };

        Ok(QueryAnswer {
            answer,
            outcome,
            intent,
            focal_concept: Some(concept),
            context_stats,
        })
    }
}

fn no_material(intent: Intent, focal_concept: Option<String>) -> QueryAnswer {
    QueryAnswer {
        answer: NO_MATERIAL_MESSAGE.to_string(),
        outcome: QueryOutcome::NoRelevantMaterial,
        intent,
        focal_concept,
        context_stats: ContextStats::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationshipPolicy;
    use crate::db;
    use crate::embedding::HashProvider;
    use crate::graph::SqliteGraphStore;
    use crate::index::SqliteVectorStore;
    use crate::llm::LlmError;
    use crate::migrate;
    use crate::models::{Entity, EntityType, Relationship, RelationshipType};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and always fails.
    #[derive(Default)]
    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for CountingModel {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Request("offline".into()))
        }
        fn model_name(&self) -> &str {
            "counting"
        }
    }

    async fn engine(model: Arc<CountingModel>) -> (QueryEngine, Arc<EmbeddingIndex>) {
        let pool = db::connect_in_memory().await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        let graph = Arc::new(SqliteGraphStore::new(pool.clone(), RelationshipPolicy::Append));
        let index = Arc::new(EmbeddingIndex::new(
            Arc::new(SqliteVectorStore::new(pool)),
            Arc::new(HashProvider::new(384)),
            0.1,
        ));
        let engine = QueryEngine::new(graph, index.clone(), model, RetrievalConfig::default());
        (engine, index)
    }

    #[test]
    fn test_structured_context_render() {
        let now = Utc::now();
        let graph = GraphContext {
            entities: vec![
                Entity {
                    name: "Algorithms".into(),
                    entity_type: EntityType::Concept,
                    user_id: "u".into(),
                    created_at: now,
                },
                Entity {
                    name: "CS101".into(),
                    entity_type: EntityType::Organization,
                    user_id: "u".into(),
                    created_at: now,
                },
            ],
            relationships: vec![Relationship {
                from: "Algorithms".into(),
                to: "CS101".into(),
                rel_type: RelationshipType::UsedIn,
                user_id: "u".into(),
                created_at: now,
            }],
        };
        let matches = vec![ChunkMatch {
            chunk_id: "c1".into(),
            document: "notes.txt".into(),
            text: "x".repeat(600),
            similarity: 0.5,
        }];

        let ctx = StructuredContext::build(&graph, &matches, 500);
        assert_eq!(ctx.documents[0].len(), 500);
        let rendered = ctx.render();
        assert!(rendered.starts_with("Concepts:\nAlgorithms, CS101\n\nRelationships:\nAlgorithms used_in CS101\n\nDocuments:\n"));
    }

    #[test]
    fn test_render_skips_empty_sections() {
        let ctx = StructuredContext {
            documents: vec!["only docs".into()],
            ..Default::default()
        };
        assert_eq!(ctx.render(), "Documents:\nonly docs");
    }

    #[tokio::test]
    async fn test_empty_user_makes_no_model_calls() {
        let model = Arc::new(CountingModel::default());
        let (engine, _) = engine(model.clone()).await;
        let user = UserId::parse("nobody").unwrap();

        let answer = engine.ask(&user, "What does CS101 teach?").await.unwrap();
        assert_eq!(answer.outcome, QueryOutcome::NoRelevantMaterial);
        assert_eq!(answer.answer, NO_MATERIAL_MESSAGE);
        assert_eq!(answer.context_stats, ContextStats::default());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let (engine, _) = engine(Arc::new(CountingModel::default())).await;
        let user = UserId::parse("alice").unwrap();
        assert!(matches!(
            engine.ask(&user, "   ").await,
            Err(PipelineError::Input(InputError::EmptyQuestion))
        ));
    }

    #[tokio::test]
    async fn test_synthesis_failure_with_material() {
        let model = Arc::new(CountingModel::default());
        let (engine, index) = engine(model.clone()).await;
        let user = UserId::parse("alice").unwrap();
        index
            .store_document_embeddings(&user, "CS101 teaches Algorithms.", "c1")
            .await
            .unwrap();

        let answer = engine.ask(&user, "What does CS101 teach?").await.unwrap();
        assert_eq!(answer.outcome, QueryOutcome::SynthesisFailed);
        assert_eq!(answer.answer, ANSWER_FAILURE_MESSAGE);
        assert_eq!(answer.focal_concept.as_deref(), Some("CS101"));
        assert_eq!(answer.context_stats.num_chunks_used, 1);
        // intent, concept, answer
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }
}
