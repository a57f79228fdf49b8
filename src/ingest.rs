//! Ingestion pipeline.
//!
//! Coordinates the write path: loader → chunker → embedder → vector store.
//! Every chunk of a document is embedded before anything is written, so an
//! embedding failure leaves the namespace untouched.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chunk;
use crate::config::ChunkingConfig;
use crate::embedding::{embed_chunks, EmbeddingProvider};
use crate::error::RagResult;
use crate::loader::{load_pdf, LoadOutcome, Loader};
use crate::models::{Namespace, SourceDocument, SourceKind, META_TITLE};
use crate::store::{replace_embeddings, VectorIndex};

/// Metadata key carrying an uploaded file's name.
pub const META_FILENAME: &str = "filename";

/// What one ingest wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub origin: String,
    pub namespace: Namespace,
    pub chunks: usize,
    pub vectors: usize,
}

/// Result of ingesting a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested(IngestReport),
    /// The URL was rejected by policy. Nothing was fetched or written.
    Blocked(String),
}

/// Write side of one namespace, as seen by the cache guard.
#[async_trait]
pub trait NamespaceWriter: Send + Sync {
    async fn clear(&self, namespace: &Namespace) -> RagResult<()>;
    async fn ingest_url(&self, origin: &str, namespace: &Namespace) -> RagResult<IngestOutcome>;
}

pub struct IngestPipeline {
    loader: Arc<Loader>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl IngestPipeline {
    pub fn new(
        loader: Arc<Loader>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            loader,
            embedder,
            index,
            chunking,
            batch_size,
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Load an uploaded PDF and write it into `namespace`.
    pub async fn ingest_pdf(
        &self,
        bytes: &[u8],
        filename: &str,
        namespace: &Namespace,
    ) -> RagResult<IngestReport> {
        let doc = load_pdf(bytes, filename);
        if doc.raw_text.is_empty() {
            warn!(filename, "no text extracted from PDF");
        }
        self.ingest_document(doc, namespace).await
    }

    /// Chunk, embed and upsert an already loaded document, replacing any
    /// earlier records of the same origin in `namespace`.
    pub async fn ingest_document(
        &self,
        doc: SourceDocument,
        namespace: &Namespace,
    ) -> RagResult<IngestReport> {
        let mut chunks = chunk::split(
            &doc.origin,
            &doc.raw_text,
            self.chunking.max_chars,
            self.chunking.overlap_chars,
        );

        for c in &mut chunks {
            if let Some(title) = doc.extracted_fields.get(META_TITLE) {
                c.metadata.insert(META_TITLE.to_string(), title.clone());
            }
            if doc.kind == SourceKind::Pdf {
                c.metadata
                    .insert(META_FILENAME.to_string(), doc.origin.clone());
            }
        }

        let chunk_count = chunks.len();
        let embeddings = embed_chunks(self.embedder.as_ref(), chunks, self.batch_size).await?;
        let vectors = replace_embeddings(
            self.index.as_ref(),
            namespace,
            &chunk::id_prefix(&doc.origin),
            &embeddings,
        )
        .await?;

        info!(
            origin = %doc.origin,
            namespace = %namespace,
            chunks = chunk_count,
            vectors,
            "ingested"
        );
        Ok(IngestReport {
            origin: doc.origin,
            namespace: namespace.clone(),
            chunks: chunk_count,
            vectors,
        })
    }
}

#[async_trait]
impl NamespaceWriter for IngestPipeline {
    async fn clear(&self, namespace: &Namespace) -> RagResult<()> {
        self.index.delete_all(namespace).await?;
        info!(namespace = %namespace, "namespace cleared");
        Ok(())
    }

    /// Load a URL and write it into `namespace`.
    async fn ingest_url(&self, origin: &str, namespace: &Namespace) -> RagResult<IngestOutcome> {
        match self.loader.load_url(origin).await? {
            LoadOutcome::Blocked(reason) => Ok(IngestOutcome::Blocked(reason)),
            LoadOutcome::Loaded(doc) => Ok(IngestOutcome::Ingested(
                self.ingest_document(doc, namespace).await?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::embedding::HashProvider;
    use crate::error::RagError;
    use crate::loader::{FetchedPage, Fetch};
    use crate::store::memory::InMemoryIndex;
    use anyhow::Result;
    use reqwest::Url;
    use std::collections::BTreeMap;

    struct StaticFetcher(&'static str);

    #[async_trait]
    impl Fetch for StaticFetcher {
        async fn fetch(&self, _url: &Url) -> Result<FetchedPage> {
            Ok(FetchedPage {
                content_type: Some("text/html".into()),
                body: self.0.to_string(),
            })
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("service unavailable")
        }
    }

    fn pipeline(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<InMemoryIndex>,
    ) -> IngestPipeline {
        let loader = Loader::new(
            &LoaderConfig::default(),
            Arc::new(StaticFetcher(
                "<html><head><title>Spring</title></head><body><p>First line.</p><p>Second line.</p></body></html>",
            )),
        );
        IngestPipeline::new(
            Arc::new(loader),
            embedder,
            index,
            ChunkingConfig {
                max_chars: 20,
                overlap_chars: 0,
            },
            2,
        )
    }

    #[tokio::test]
    async fn test_url_ingest_writes_titled_chunks() {
        let index = Arc::new(InMemoryIndex::new("idx", 8));
        let pipe = pipeline(Arc::new(HashProvider::new(8)), index.clone());
        let ns = Namespace::new("ns2");

        let outcome = pipe.ingest_url("https://example.com/a", &ns).await.unwrap();
        let report = match outcome {
            IngestOutcome::Ingested(r) => r,
            IngestOutcome::Blocked(r) => panic!("blocked: {}", r),
        };
        assert_eq!(report.chunks, 2);
        assert_eq!(report.vectors, 2);
        assert_eq!(index.len(&ns), 2);

        let hits = index.query(&ns, &HashProvider::new(8).embed_one("First line."), 1).await.unwrap();
        assert_eq!(hits[0].metadata[META_TITLE], "Spring");
    }

    #[tokio::test]
    async fn test_reingest_same_source_is_idempotent() {
        let index = Arc::new(InMemoryIndex::new("idx", 8));
        let pipe = pipeline(Arc::new(HashProvider::new(8)), index.clone());
        let ns = Namespace::new("ns2");
        pipe.ingest_url("https://example.com/a", &ns).await.unwrap();
        pipe.ingest_url("https://example.com/a", &ns).await.unwrap();
        assert_eq!(index.len(&ns), 2);
    }

    #[tokio::test]
    async fn test_reingest_shorter_source_drops_stale_chunks() {
        let index = Arc::new(InMemoryIndex::new("idx", 8));
        let pipe = pipeline(Arc::new(HashProvider::new(8)), index.clone());
        let ns = Namespace::new("ns3");
        let other = SourceDocument {
            origin: "other.pdf".into(),
            kind: SourceKind::Pdf,
            raw_text: "Unrelated notes.".into(),
            extracted_fields: BTreeMap::new(),
        };
        pipe.ingest_document(other, &ns).await.unwrap();

        let doc = |text: &str| SourceDocument {
            origin: "plots.pdf".into(),
            kind: SourceKind::Pdf,
            raw_text: text.to_string(),
            extracted_fields: BTreeMap::new(),
        };
        let long = pipe
            .ingest_document(doc("One plot. Two plot. Three plot. Four plot."), &ns)
            .await
            .unwrap();
        assert!(long.chunks > 1);
        assert_eq!(index.len(&ns), long.chunks + 1);

        let short = pipe.ingest_document(doc("One plot."), &ns).await.unwrap();
        assert_eq!(short.chunks, 1);
        assert_eq!(index.len(&ns), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_nothing() {
        let index = Arc::new(InMemoryIndex::new("idx", 8));
        let pipe = pipeline(Arc::new(BrokenEmbedder), index.clone());
        let ns = Namespace::new("ns2");
        let err = pipe.ingest_url("https://example.com/a", &ns).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
        assert!(index.is_empty(&ns));
    }

    #[tokio::test]
    async fn test_empty_document_writes_nothing() {
        let index = Arc::new(InMemoryIndex::new("idx", 8));
        let pipe = pipeline(Arc::new(BrokenEmbedder), index.clone());
        let doc = SourceDocument {
            origin: "empty.pdf".into(),
            kind: SourceKind::Pdf,
            raw_text: String::new(),
            extracted_fields: BTreeMap::new(),
        };
        let report = pipe.ingest_document(doc, &Namespace::new("ns3")).await.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.vectors, 0);
    }
}
