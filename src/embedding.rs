//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/v1/embeddings` endpoint with retry and backoff.
//! - **[`HashProvider`]**: deterministic character-bigram hashing; offline, no model download.
//!
//! [`embed_chunks`] is the pipeline entry point: it batches chunks to the
//! provider's batch limit and returns exactly one vector per chunk, in
//! order, or fails the whole call.
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, RagResult};
use crate::models::{EmbeddingVector, TextChunk};

const OPENAI_URL: &str = "https://api.openai.com";

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one batch of texts, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed chunks in batches of `batch_size`.
///
/// Returns one [`EmbeddingVector`] per chunk in input order. Any batch
/// failure, a short response, or a vector of the wrong width fails the
/// whole call with [`RagError::Embedding`]; there is no partial result.
pub async fn embed_chunks(
    provider: &dyn EmbeddingProvider,
    chunks: Vec<TextChunk>,
    batch_size: usize,
) -> RagResult<Vec<EmbeddingVector>> {
    let batch_size = batch_size.max(1);
    let mut out = Vec::with_capacity(chunks.len());
    let mut remaining = chunks.into_iter().peekable();

    while remaining.peek().is_some() {
        let batch: Vec<TextChunk> = remaining.by_ref().take(batch_size).collect();
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        debug!(batch = texts.len(), model = provider.model_name(), "embedding batch");

        let vectors = provider
            .embed_batch(&texts)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;
        check_batch(provider, texts.len(), &vectors)?;

        out.extend(
            batch
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddingVector { vector, chunk }),
        );
    }

    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> RagResult<Vec<f32>> {
    let vectors = provider
        .embed_batch(&[text.to_string()])
        .await
        .map_err(|e| RagError::Embedding(e.to_string()))?;
    check_batch(provider, 1, &vectors)?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))
}

fn check_batch(provider: &dyn EmbeddingProvider, expected: usize, vectors: &[Vec<f32>]) -> RagResult<()> {
    if vectors.len() != expected {
        return Err(RagError::Embedding(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dims()) {
        return Err(RagError::Embedding(format!(
            "provider returned a {}-dimensional vector, expected {}",
            bad.len(),
            provider.dims()
        )));
    }
    Ok(())
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (or any compatible server).
///
/// Calls `POST {url}/v1/embeddings` with the configured model. The API
/// key is read from `OPENAI_API_KEY` when the provider is created.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    /// Create a provider with an explicit API key.
    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            api_key: api_key.into(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying embeddings request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/v1/embeddings", self.url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Hash Provider ============

/// Deterministic embedder built from hashed character bigrams.
///
/// Texts sharing many bigrams land close together, which is enough for
/// offline runs and tests. Vectors are L2-normalized. Slots come from
/// SHA-256, so stored vectors stay valid across builds.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    /// Embed a single text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        let grams: Vec<&[char]> = if chars.len() < 2 {
            vec![&chars[..]]
        } else {
            chars.windows(2).collect()
        };
        for gram in grams {
            vector[gram_slot(gram, self.dims)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Slot for a gram: first 8 bytes of SHA-256 of its UTF-8, modulo `dims`.
fn gram_slot(gram: &[char], dims: usize) -> usize {
    let text: String = gram.iter().collect();
    let digest = Sha256::digest(text.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % dims as u64) as usize
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash-bigram"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"hash"` | [`HashProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "hash" => Ok(Box::new(HashProvider::new(config.dims.unwrap_or(384)))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails on the batch number given, counting calls.
    struct FlakyProvider {
        fail_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_on {
                bail!("upstream 500");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_one_vector_per_chunk_in_order() {
        let text = "一文目です。二文目です。三文目です。".repeat(30);
        let chunks = split("doc", &text, 40, 5);
        let expected: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        let provider = HashProvider::new(64);
        let vectors = embed_chunks(&provider, chunks, 4).await.unwrap();

        assert_eq!(vectors.len(), expected.len());
        for (v, id) in vectors.iter().zip(expected.iter()) {
            assert_eq!(&v.chunk.id, id);
            assert_eq!(v.vector.len(), 64);
        }
    }

    #[tokio::test]
    async fn test_single_batch_failure_fails_everything() {
        let chunks = split("doc", &"abc. ".repeat(50), 10, 0);
        assert!(chunks.len() > 4);
        let provider = FlakyProvider {
            fail_on: 1,
            calls: AtomicUsize::new(0),
        };
        let err = embed_chunks(&provider, chunks, 2).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_wrong_width_is_embedding_error() {
        struct Narrow;
        #[async_trait]
        impl EmbeddingProvider for Narrow {
            fn model_name(&self) -> &str {
                "narrow"
            }
            fn dims(&self) -> usize {
                3
            }
            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0]).collect())
            }
        }
        let err = embed_query(&Narrow, "q").await.unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[tokio::test]
    async fn test_hash_provider_similarity() {
        let provider = HashProvider::new(256);
        let v = provider
            .embed_batch(&[
                "インスタ投稿の台本".to_string(),
                "インスタ投稿の台本を書く".to_string(),
                "weather forecast for tomorrow".to_string(),
            ])
            .await
            .unwrap();
        assert!(cosine_similarity(&v[0], &v[1]) > cosine_similarity(&v[0], &v[2]));
    }

    #[test]
    fn test_hash_provider_slots_are_stable() {
        let provider = HashProvider::new(64);
        let v = provider.embed_one("ab");
        assert_eq!(v[36], 1.0);
        assert_eq!(v.iter().filter(|x| **x != 0.0).count(), 1);
        assert_eq!(provider.embed_one("台 本")[33], 1.0);
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
