//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, vectors and retrieval
//! results that flow between the loader, chunker, embedder and index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata key holding the chunk text inside a stored vector.
pub const META_TEXT: &str = "text";
/// Metadata key holding the URL or filename a chunk came from.
pub const META_ORIGIN: &str = "origin";
/// Metadata key holding the chunk's position within its document.
pub const META_SEQ: &str = "seq";
/// Metadata key holding a title-like field, when one was extracted.
pub const META_TITLE: &str = "title";

/// How a [`SourceDocument`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Web,
    Pdf,
}

/// Normalized content of one source, produced by the loader.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// URL or filename.
    pub origin: String,
    pub kind: SourceKind,
    pub raw_text: String,
    /// Structured fields found in the source (`title`, `description`, …).
    pub extracted_fields: BTreeMap<String, String>,
}

/// A bounded-size segment of a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Stable ID derived from origin and sequence index.
    pub id: String,
    pub text: String,
    pub origin: String,
    pub index: usize,
    pub metadata: BTreeMap<String, String>,
}

/// An embedding paired with the chunk it was computed from.
#[derive(Debug, Clone)]
pub struct EmbeddingVector {
    pub vector: Vec<f32>,
    pub chunk: TextChunk,
}

/// A logical partition inside one user's vector index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    /// Reference URL for the script currently being written.
    pub const REFERENCE: &'static str = "ns1";
    /// URLs registered by the user.
    pub const REGISTERED_URLS: &'static str = "ns2";
    /// Past plots (PDF). Also the source for title ideas.
    pub const PAST_PLOTS: &'static str = "ns3";
    /// Competitor material (PDF).
    pub const COMPETITORS: &'static str = "ns4";
    /// Domain reference material (PDF).
    pub const DOMAIN_REFERENCE: &'static str = "ns5";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn reference() -> Self {
        Self::new(Self::REFERENCE)
    }

    pub fn past_plots() -> Self {
        Self::new(Self::PAST_PLOTS)
    }

    /// All five namespaces in the order script generation reads them.
    pub fn all() -> Vec<Namespace> {
        [
            Self::REFERENCE,
            Self::REGISTERED_URLS,
            Self::PAST_PLOTS,
            Self::COMPETITORS,
            Self::DOMAIN_REFERENCE,
        ]
        .iter()
        .map(|n| Self::new(*n))
        .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Per-user credentials for the hosted vector index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCredential {
    pub index_name: String,
    pub api_key: String,
    /// Project name runs are traced under.
    pub project_name: String,
}

/// A vector as written to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

impl VectorRecord {
    /// Build the stored form of an embedded chunk: chunk metadata plus
    /// the text, origin and sequence index.
    pub fn from_embedding(embedding: &EmbeddingVector) -> Self {
        let chunk = &embedding.chunk;
        let mut metadata = chunk.metadata.clone();
        metadata.insert(META_TEXT.to_string(), chunk.text.clone());
        metadata.insert(META_ORIGIN.to_string(), chunk.origin.clone());
        metadata.insert(META_SEQ.to_string(), chunk.index.to_string());
        Self {
            id: chunk.id.clone(),
            values: embedding.vector.clone(),
            metadata,
        }
    }
}

/// One similarity-search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

impl ScoredMatch {
    pub fn text(&self) -> &str {
        self.metadata.get(META_TEXT).map(String::as_str).unwrap_or("")
    }

    pub fn origin(&self) -> Option<&str> {
        self.metadata.get(META_ORIGIN).map(String::as_str)
    }
}
