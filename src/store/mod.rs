//! Vector store gateway.
//!
//! The [`VectorIndex`] trait is the seam between the pipeline and the
//! hosted vector index. One index belongs to one user and is partitioned
//! into [`Namespace`]s; a namespace springs into existence on first write
//! and is emptied with [`VectorIndex::delete_all`].
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | [`pinecone::PineconeIndex`] | Hosted index over the Pinecone REST API |
//! | [`memory::InMemoryIndex`] | Process-local index for tests and offline runs |
//!
//! Writes to a single namespace must be issued one after another; reads
//! are independent and may run in any order.

pub mod memory;
pub mod pinecone;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{RagError, RagResult};
use crate::models::{EmbeddingVector, IndexCredential, Namespace, ScoredMatch, VectorRecord};

/// Records sent per upsert request.
pub const UPSERT_BATCH: usize = 100;

/// Abstract vector index.
///
/// # Operations
///
/// | Method | Contract |
/// |--------|----------|
/// | [`upsert`](VectorIndex::upsert) | Idempotent by record ID; re-upserting overwrites |
/// | [`query`](VectorIndex::query) | At most `top_k` hits, descending score, ties in insertion order |
/// | [`delete_all`](VectorIndex::delete_all) | Empties the namespace; no-op when already empty |
/// | [`delete_prefix`](VectorIndex::delete_prefix) | Removes records whose ID starts with the prefix |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Index name.
    fn name(&self) -> &str;

    /// Declared vector width. Every upserted and queried vector must match.
    fn dimension(&self) -> usize;

    async fn upsert(&self, namespace: &Namespace, records: &[VectorRecord]) -> RagResult<()>;

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> RagResult<Vec<ScoredMatch>>;

    async fn delete_all(&self, namespace: &Namespace) -> RagResult<()>;

    /// Delete every record in `namespace` whose ID starts with `prefix`.
    /// Returns how many were deleted.
    async fn delete_prefix(&self, namespace: &Namespace, prefix: &str) -> RagResult<usize>;
}

/// Open the user's index.
///
/// Fails with [`RagError::IndexInit`] when the index does not exist or
/// the credential is rejected. `dims` is only used by the in-memory
/// provider, which has no remote description to read it from.
pub async fn initialize(
    config: &IndexConfig,
    credential: &IndexCredential,
    dims: usize,
) -> RagResult<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "pinecone" => {
            let index = pinecone::PineconeIndex::connect(config, credential).await?;
            info!(index = %credential.index_name, dimension = index.dimension(), "connected to index");
            Ok(Arc::new(index))
        }
        "memory" => Ok(Arc::new(memory::InMemoryIndex::new(
            &credential.index_name,
            dims,
        ))),
        other => Err(RagError::IndexInit(format!(
            "unknown index provider: {}",
            other
        ))),
    }
}

/// Write embedded chunks into `namespace`, in batches of [`UPSERT_BATCH`].
///
/// A vector whose width differs from the index dimension is a
/// configuration fault and fails with [`RagError::IndexInit`] before
/// anything is written.
pub async fn upsert_embeddings(
    index: &dyn VectorIndex,
    namespace: &Namespace,
    embeddings: &[EmbeddingVector],
) -> RagResult<usize> {
    ensure_dimension(index, embeddings.iter().map(|e| e.vector.len()))?;

    let records: Vec<VectorRecord> = embeddings.iter().map(VectorRecord::from_embedding).collect();
    for batch in records.chunks(UPSERT_BATCH) {
        index.upsert(namespace, batch).await?;
    }
    Ok(records.len())
}

/// Replace one source's records in `namespace` with `embeddings`.
///
/// Records under `id_prefix` are deleted before the write so a source
/// that shrank since it was last ingested leaves no stale tail. A failed
/// delete is logged and the write goes ahead.
pub async fn replace_embeddings(
    index: &dyn VectorIndex,
    namespace: &Namespace,
    id_prefix: &str,
    embeddings: &[EmbeddingVector],
) -> RagResult<usize> {
    ensure_dimension(index, embeddings.iter().map(|e| e.vector.len()))?;

    match index.delete_prefix(namespace, id_prefix).await {
        Ok(0) => {}
        Ok(removed) => debug!(namespace = %namespace, id_prefix, removed, "previous records removed"),
        Err(e) => warn!(namespace = %namespace, id_prefix, error = %e, "could not remove previous records"),
    }
    upsert_embeddings(index, namespace, embeddings).await
}

/// Similarity search with the dimension check applied to the query vector.
pub async fn query(
    index: &dyn VectorIndex,
    namespace: &Namespace,
    vector: &[f32],
    top_k: usize,
) -> RagResult<Vec<ScoredMatch>> {
    ensure_dimension(index, std::iter::once(vector.len()))?;
    index.query(namespace, vector, top_k).await
}

fn ensure_dimension(
    index: &dyn VectorIndex,
    widths: impl Iterator<Item = usize>,
) -> RagResult<()> {
    for width in widths {
        if width != index.dimension() {
            return Err(RagError::IndexInit(format!(
                "embedding dimension {} does not match index '{}' dimension {}",
                width,
                index.name(),
                index.dimension()
            )));
        }
    }
    Ok(())
}

/// Order hits by descending score, keeping insertion order on ties, and
/// keep the first `top_k`.
pub(crate) fn rank(mut hits: Vec<ScoredMatch>, top_k: usize) -> Vec<ScoredMatch> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}
