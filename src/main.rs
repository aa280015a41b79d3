//! # Study Graph CLI (`sgraph`)
//!
//! The `sgraph` binary uploads study material into a per-user knowledge
//! graph and answers questions about it.
//!
//! ## Usage
//!
//! ```bash
//! sgraph --config ./config/sgraph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sgraph init` | Create the SQLite database and run schema migrations |
//! | `sgraph upload <user> <file>` | Extract, chunk, and ingest a document |
//! | `sgraph ask <user> "<question>"` | Answer a question from the user's material |
//! | `sgraph graph <user>` | Export the user's graph as JSON |
//! | `sgraph entities <user>` | List the user's newest entities |
//! | `sgraph relationships <user>` | List the user's newest relationships |
//! | `sgraph reset <user>` | Delete all of the user's data |
//!
//! ## Examples
//!
//! ```bash
//! export OPENROUTER_API_KEY=...
//! sgraph init
//! sgraph upload alice ./notes/cs101.pdf
//! sgraph ask alice "What does CS101 teach?"
//! sgraph graph alice --output ./alice-graph.json
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use study_graph::config::{self, Config};
use study_graph::export;
use study_graph::llm::DisabledModel;
use study_graph::logging;
use study_graph::migrate;
use study_graph::models::UserId;
use study_graph::query::QueryAnswer;
use study_graph::workflow::{Operation, OperationOutput, OperationResult, UploadReport, Workspace};

/// Study Graph: a personal knowledge-graph question answering tool.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sgraph.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sgraph",
    about = "Study Graph: a personal knowledge-graph question answering tool",
    version,
    long_about = "Study Graph chunks uploaded study documents, extracts concepts and their \
    relationships into a per-user knowledge graph with a language model, and answers questions \
    by combining graph-neighborhood lookup with vector similarity search."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (users, entities, relationships, chunks). Idempotent.
    Init,

    /// Upload a document for a user.
    ///
    /// Supported formats: .txt, .md, .pdf, .docx, .pptx.
    Upload {
        /// User identifier (letters, digits, `_`, `-`, `.`).
        user: String,
        /// Path to the document.
        file: PathBuf,
    },

    /// Ask a question about a user's uploaded material.
    Ask {
        user: String,
        question: String,
        /// Print the full answer record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Export a user's knowledge graph as JSON.
    Graph {
        user: String,
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List a user's most recently created entities.
    Entities {
        user: String,
        /// Maximum number of entities (defaults to `graph.entity_limit`).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// List a user's most recently created relationships.
    Relationships {
        user: String,
        /// Maximum number of relationships (defaults to `graph.relationship_limit`).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Delete every entity, relationship and chunk a user owns.
    Reset { user: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Upload { user, file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());

            let workspace = Workspace::open(cfg).await?;
            let result = workspace
                .run(Operation::Upload {
                    user_id: user,
                    filename,
                    bytes,
                })
                .await;
            workspace.close().await;

            if let OperationOutput::Uploaded(report) = completed(result)? {
                print_upload_report(&report);
            }
        }
        Commands::Ask {
            user,
            question,
            json,
        } => {
            let workspace = Workspace::open(cfg).await?;
            let result = workspace
                .run(Operation::Query {
                    user_id: user,
                    question,
                })
                .await;
            workspace.close().await;

            if let OperationOutput::Answered(answer) = completed(result)? {
                print_answer(&answer, json)?;
            }
        }
        Commands::Graph { user, output } => {
            let workspace = offline_workspace(cfg).await?;
            let result = workspace.run(Operation::Visualize { user_id: user }).await;
            workspace.close().await;

            if let OperationOutput::Graph(graph) = completed(result)? {
                export::write_export(&graph, output.as_deref())?;
            }
        }
        Commands::Entities { user, limit } => {
            let limit = limit.unwrap_or(cfg.graph.entity_limit);
            let user = UserId::parse(&user)?;
            let workspace = offline_workspace(cfg).await?;
            let entities = workspace.graph().get_user_entities(&user, limit).await?;
            workspace.close().await;

            if entities.is_empty() {
                println!("No entities for {}.", user);
            }
            for entity in entities {
                println!(
                    "{:<20} {}  ({})",
                    entity.entity_type,
                    entity.name,
                    entity.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Relationships { user, limit } => {
            let limit = limit.unwrap_or(cfg.graph.relationship_limit);
            let user = UserId::parse(&user)?;
            let workspace = offline_workspace(cfg).await?;
            let relationships = workspace.graph().get_user_relationships(&user, limit).await?;
            workspace.close().await;

            if relationships.is_empty() {
                println!("No relationships for {}.", user);
            }
            for rel in relationships {
                println!("{}", rel.sentence());
            }
        }
        Commands::Reset { user } => {
            let workspace = offline_workspace(cfg).await?;
            let result = workspace.reset(&user).await;
            workspace.close().await;
            result?;
            println!("Deleted all data for {}.", user);
        }
    }

    Ok(())
}

/// Workspace for commands that never call the language model.
async fn offline_workspace(cfg: Config) -> anyhow::Result<Workspace> {
    Workspace::open_with_model(cfg, Arc::new(DisabledModel)).await
}

fn completed(result: OperationResult) -> anyhow::Result<OperationOutput> {
    match result {
        OperationResult::Completed(output) => Ok(output),
        OperationResult::Rejected { message } => bail!("rejected: {}", message),
        OperationResult::Failed { message } => bail!("failed: {}", message),
    }
}

fn print_upload_report(report: &UploadReport) {
    println!("Uploaded {} for {}", report.document, report.user_id);
    println!("  upload id:           {}", report.upload_id);
    println!("  characters:          {}", report.text_chars);
    println!("  chunks:              {}", report.chunks);
    println!("  chunks with facts:   {}", report.chunks_with_knowledge);
    println!("  entities written:    {}", report.entities_written);
    println!("  relationships:       {}", report.relationships_written);
    println!("  chunks embedded:     {}", report.chunks_embedded);
    if report.embedding_failures > 0 {
        println!("  embedding failures:  {}", report.embedding_failures);
    }
}

fn print_answer(answer: &QueryAnswer, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }

    println!("{}", answer.answer);
    println!();
    println!(
        "[intent: {}, concept: {}, entities: {}, chunks: {}]",
        answer.intent,
        answer.focal_concept.as_deref().unwrap_or("-"),
        answer.context_stats.num_entities_used,
        answer.context_stats.num_chunks_used
    );
    Ok(())
}
