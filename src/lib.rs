//! # Sakiyomi
//!
//! A content assistant for social-media managers. Users register
//! reference material (web pages, PDFs); the text is chunked, embedded
//! and stored in a per-user vector index, and an LLM drafts post scripts
//! and title ideas grounded in what was retrieved. Per-post performance
//! records are tracked alongside.
//!
//! ## Architecture
//!
//! ```text
//!  write path
//! ┌────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────┐
//! │ Loader │──▶│ Chunker │──▶│ Embedder │──▶│ Vector index │
//! │ URL/PDF│   └─────────┘   └──────────┘   │ ns1 .. ns5   │
//! └────────┘                                 └──────┬───────┘
//!  read path                                        │
//! ┌───────┐   ┌──────────┐   ┌──────────────┐       │
//! │ Query │──▶│ Embedder │──▶│ Orchestrator │◀──────┘
//! └───────┘   └──────────┘   └──────┬───────┘
//!                                   ▼
//!                          ┌────────────────┐   ┌────────┐
//!                          │ ChatBackend    │──▶│ Tracer │
//!                          │ GPT-4o/Claude3 │   └────────┘
//!                          └────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Failure kinds and user-facing messages |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF, HTML and JSON text extraction |
//! | [`loader`] | URL policy, fetching, document normalization |
//! | [`chunk`] | Sentence-boundary chunking with overlap |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index gateway (Pinecone, in-memory) |
//! | [`ingest`] | Write path: load, chunk, embed, upsert |
//! | [`cache`] | Reference-URL namespace cache |
//! | [`llm`] | Chat-completion backends |
//! | [`tracer`] | Fire-and-forget run tracing |
//! | [`rag`] | Read path: retrieve and generate |
//! | [`titles`] | Title suggestions |
//! | [`accounts`] | Users, sign-in, per-user configuration |
//! | [`prompts`] | Built-in system prompts |
//! | [`session`] | A signed-in user's session |
//! | [`insights`] | Per-post performance records |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`commands`] | CLI command implementations |
//! | [`logging`] | Log output setup |

pub mod accounts;
pub mod cache;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod insights;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod rag;
pub mod session;
pub mod store;
pub mod titles;
pub mod tracer;
