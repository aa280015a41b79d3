//! Operation dispatch over an explicitly constructed [`Workspace`].
//!
//! A workspace owns every dependency the pipeline needs: the database pool,
//! the graph store, the embedding index, and the language model. It is built
//! once with [`Workspace::open`] (from config) or [`Workspace::from_parts`]
//! (injected trait objects, for tests and embedding in other programs) and
//! then serves any number of [`Operation`]s.
//!
//! [`Workspace::run`] settles every operation into an [`OperationResult`]:
//! malformed input is `Rejected` before the pipeline starts, an unavailable
//! database is `Failed`, and everything else is `Completed`.

use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{InputError, PipelineError, Result};
use crate::export::GraphExport;
use crate::extract::{extract_text, ExtractError};
use crate::graph::{GraphStore, SqliteGraphStore};
use crate::index::{EmbeddingIndex, SqliteVectorStore, VectorStore};
use crate::knowledge::KnowledgeExtractor;
use crate::llm::{create_model, LanguageModel};
use crate::migrate;
use crate::models::UserId;
use crate::query::{QueryAnswer, QueryEngine};

/// The closed set of user-facing operations.
#[derive(Debug, Clone)]
pub enum Operation {
    Upload {
        user_id: String,
        filename: String,
        bytes: Vec<u8>,
    },
    Query {
        user_id: String,
        question: String,
    },
    Visualize {
        user_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationOutput {
    Uploaded(UploadReport),
    Answered(QueryAnswer),
    Graph(GraphExport),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationResult {
    Completed(OperationOutput),
    Rejected { message: String },
    Failed { message: String },
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Completed(_))
    }
}

/// What one upload produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub upload_id: String,
    pub user_id: String,
    pub document: String,
    pub text_chars: usize,
    pub chunks: usize,
    /// Chunks whose extraction yielded at least one entity or relationship.
    pub chunks_with_knowledge: usize,
    pub entities_written: usize,
    pub relationships_written: usize,
    pub chunks_embedded: usize,
    pub embedding_failures: usize,
}

pub struct Workspace {
    config: Config,
    pool: Option<SqlitePool>,
    graph: Arc<dyn GraphStore>,
    index: Arc<EmbeddingIndex>,
    extractor: KnowledgeExtractor,
    engine: QueryEngine,
}

impl Workspace {
    /// Connect to the configured database, create the schema if needed, and
    /// build the configured model and embedding provider.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let model = create_model(&config.llm)?;
        Self::open_with_model(config, model).await
    }

    /// Like [`open`](Self::open), with a caller-supplied language model.
    pub async fn open_with_model(
        config: Config,
        model: Arc<dyn LanguageModel>,
    ) -> anyhow::Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let pool = db::connect(&config).await?;
        migrate::migrate_pool(&pool).await?;

        let graph = Arc::new(SqliteGraphStore::new(
            pool.clone(),
            config.graph.relationship_policy,
        ));
        let vectors = Arc::new(SqliteVectorStore::new(pool.clone()));

        let mut workspace = Self::from_parts(config, graph, vectors, model, embedder);
        workspace.pool = Some(pool);
        Ok(workspace)
    }

    pub fn from_parts(
        config: Config,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let index = Arc::new(EmbeddingIndex::new(
            vectors,
            embedder,
            config.retrieval.min_similarity,
        ));
        let engine = QueryEngine::new(
            graph.clone(),
            index.clone(),
            model.clone(),
            config.retrieval.clone(),
        );

        Self {
            pool: None,
            graph,
            index,
            extractor: KnowledgeExtractor::new(model),
            engine,
            config,
        }
    }

    /// Close the database pool, if this workspace opened one.
    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    pub async fn run(&self, operation: Operation) -> OperationResult {
        match operation {
            Operation::Upload {
                user_id,
                filename,
                bytes,
            } => settle(
                self.upload(&user_id, &filename, &bytes).await,
                OperationOutput::Uploaded,
            ),
            Operation::Query { user_id, question } => {
                settle(self.ask(&user_id, &question).await, OperationOutput::Answered)
            }
            Operation::Visualize { user_id } => {
                settle(self.visualize(&user_id).await, OperationOutput::Graph)
            }
        }
    }

    /// Extract text from an uploaded file and ingest it.
    pub async fn upload(&self, user_id: &str, filename: &str, bytes: &[u8]) -> Result<UploadReport> {
        let user = UserId::parse(user_id)?;
        let text = extract_text(bytes, filename).map_err(|e| match e {
            ExtractError::Unsupported(kind) => InputError::UnsupportedFileType(kind),
            other => InputError::Unreadable {
                filename: filename.to_string(),
                reason: other.to_string(),
            },
        })?;
        self.ingest_text(&user, filename, &text).await
    }

    /// Chunk already-extracted text, then for each chunk extract knowledge
    /// and write the graph facts and the chunk embedding side by side.
    pub async fn ingest_text(&self, user: &UserId, filename: &str, text: &str) -> Result<UploadReport> {
        let chunking = &self.config.chunking;
        let document_id = format!("{}/{}", user, filename);
        let chunks = chunk_text(&document_id, text, chunking.max_chars, chunking.overlap_chars);
        if chunks.is_empty() {
            return Err(InputError::EmptyText(filename.to_string()).into());
        }

        self.graph
            .create_user_if_not_exists(user)
            .await
            .map_err(PipelineError::database)?;

        let mut report = UploadReport {
            upload_id: Uuid::new_v4().to_string(),
            user_id: user.to_string(),
            document: filename.to_string(),
            text_chars: text.chars().count(),
            chunks: chunks.len(),
            ..Default::default()
        };
        info!(user = %user, document = filename, chunks = chunks.len(), "ingesting document");

        for chunk in &chunks {
            let extraction = self.extractor.extract(&chunk.text).await;
            if !extraction.is_empty() {
                report.chunks_with_knowledge += 1;
            }

            let graph_write = async {
                if extraction.is_empty() {
                    return Ok::<_, anyhow::Error>((0, 0));
                }
                let entities = self.graph.create_entities(user, &extraction.entities).await?;
                let relationships = self
                    .graph
                    .create_relationships(user, &extraction.relationships)
                    .await?;
                Ok((entities, relationships))
            };
            let embedding_write = self
                .index
                .store_chunks(user, filename, std::slice::from_ref(chunk));

            let (graph_result, embedding_result) = tokio::join!(graph_write, embedding_write);

            let (entities, relationships) = graph_result.map_err(PipelineError::database)?;
            report.entities_written += entities;
            report.relationships_written += relationships;

            match embedding_result {
                Ok(stored) => report.chunks_embedded += stored,
                Err(e) => {
                    warn!(chunk = chunk.chunk_index, error = %e, "failed to store chunk embedding");
                    report.embedding_failures += 1;
                }
            }
        }

        info!(
            user = %user,
            document = filename,
            entities = report.entities_written,
            relationships = report.relationships_written,
            embedded = report.chunks_embedded,
            "upload complete"
        );
        Ok(report)
    }

    pub async fn ask(&self, user_id: &str, question: &str) -> Result<QueryAnswer> {
        let user = UserId::parse(user_id)?;
        self.engine.ask(&user, question).await
    }

    pub async fn visualize(&self, user_id: &str) -> Result<GraphExport> {
        let user = UserId::parse(user_id)?;
        let data = self
            .graph
            .get_user_graph_data(&user)
            .await
            .map_err(PipelineError::database)?;
        Ok(GraphExport::new(&user, data))
    }

    /// Delete every entity, relationship and chunk the user owns.
    pub async fn reset(&self, user_id: &str) -> Result<()> {
        let user = UserId::parse(user_id)?;
        self.graph
            .delete_user_data(&user)
            .await
            .map_err(PipelineError::database)?;
        self.index
            .store()
            .delete_user(&user)
            .await
            .map_err(PipelineError::database)?;
        info!(user = %user, "user data deleted");
        Ok(())
    }
}

fn settle<T>(result: Result<T>, wrap: impl FnOnce(T) -> OperationOutput) -> OperationResult {
    match result {
        Ok(value) => OperationResult::Completed(wrap(value)),
        Err(PipelineError::Input(e)) => OperationResult::Rejected {
            message: e.to_string(),
        },
        Err(e) => OperationResult::Failed {
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use crate::index::InMemoryVectorStore;
    use crate::llm::DisabledModel;

    async fn workspace() -> Workspace {
        let pool = db::connect_in_memory().await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        let config = Config::with_db_path(":memory:");
        Workspace::from_parts(
            config.clone(),
            Arc::new(SqliteGraphStore::new(pool, config.graph.relationship_policy)),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(DisabledModel),
            Arc::new(HashProvider::new(64)),
        )
    }

    #[tokio::test]
    async fn test_invalid_user_rejected() {
        let ws = workspace().await;
        let result = ws
            .run(Operation::Query {
                user_id: "not a user".into(),
                question: "anything".into(),
            })
            .await;
        assert!(matches!(result, OperationResult::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_and_empty_uploads_rejected() {
        let ws = workspace().await;
        let image = ws
            .run(Operation::Upload {
                user_id: "alice".into(),
                filename: "scan.png".into(),
                bytes: vec![0x89, 0x50],
            })
            .await;
        match image {
            OperationResult::Rejected { message } => assert!(message.contains("unsupported")),
            other => panic!("expected rejection, got {other:?}"),
        }

        let blank = ws
            .run(Operation::Upload {
                user_id: "alice".into(),
                filename: "blank.txt".into(),
                bytes: b"   \n\n".to_vec(),
            })
            .await;
        assert!(matches!(blank, OperationResult::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_upload_without_model_still_embeds() {
        let ws = workspace().await;
        let result = ws
            .run(Operation::Upload {
                user_id: "alice".into(),
                filename: "notes.txt".into(),
                bytes: b"CS101 teaches Algorithms.".to_vec(),
            })
            .await;

        let OperationResult::Completed(OperationOutput::Uploaded(report)) = result else {
            panic!("upload did not complete");
        };
        assert_eq!(report.chunks, 1);
        assert_eq!(report.chunks_embedded, 1);
        assert_eq!(report.entities_written, 0);
        assert_eq!(report.chunks_with_knowledge, 0);
    }

    #[tokio::test]
    async fn test_visualize_unknown_user_is_empty() {
        let ws = workspace().await;
        let result = ws
            .run(Operation::Visualize {
                user_id: "ghost".into(),
            })
            .await;
        let OperationResult::Completed(OperationOutput::Graph(export)) = result else {
            panic!("visualize did not complete");
        };
        assert_eq!(export.statistics.nodes, 0);
        assert_eq!(export.user_id, "ghost");
    }
}
