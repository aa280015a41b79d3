//! # Study Graph
//!
//! A personal knowledge-graph question answering tool for study material.
//!
//! Uploaded documents are chunked, a language model extracts concepts and
//! the relationships between them into a per-user graph, and every chunk
//! is embedded for similarity search. Questions are answered from a
//! structured context that merges the graph neighborhood of the question's
//! focal concept with the closest chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────────┐   ┌────────────┐
//! │ extract  │──▶│   chunk   │──▶│  knowledge  │──▶│   graph    │
//! │ pdf/docx │   │ headings  │   │ LLM -> JSON │   │  (SQLite)  │
//! └──────────┘   └─────┬─────┘   └─────────────┘   └─────┬──────┘
//!                      │                                 │
//!                      ▼                                 ▼
//!                ┌───────────┐                     ┌────────────┐
//!                │   index   │────────────────────▶│   query    │──▶ answer
//!                │ embedding │                     │   hybrid   │
//!                └───────────┘                     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sgraph init
//! sgraph upload alice ./notes/cs101.txt
//! sgraph ask alice "What does CS101 teach?"
//! sgraph graph alice --output graph.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Input and upstream error types |
//! | [`extract`] | Text extraction from txt/md/pdf/docx/pptx |
//! | [`chunk`] | Heading-aware text chunking |
//! | [`llm`] | Language model abstraction |
//! | [`knowledge`] | Entity and relationship extraction |
//! | [`graph`] | Per-user graph store |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Chunk vectors and similarity search |
//! | [`intent`] | Question intent and focal concept |
//! | [`query`] | Hybrid retrieval and context assembly |
//! | [`answer`] | Answer synthesis |
//! | [`workflow`] | Upload, query and visualize operations |
//! | [`export`] | Graph JSON export |
//! | [`logging`] | tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod export;
pub mod extract;
pub mod graph;
pub mod index;
pub mod intent;
pub mod knowledge;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod query;
pub mod workflow;
