//! In-memory [`VectorIndex`] for tests and offline runs.
//!
//! Namespaces are `Vec`s behind a `std::sync::RwLock`, kept in insertion
//! order so that equal scores rank in the order vectors were first written.
//! Search is brute-force cosine similarity.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, RagResult};
use crate::models::{Namespace, ScoredMatch, VectorRecord};

use super::{rank, VectorIndex};

/// In-memory index.
pub struct InMemoryIndex {
    name: String,
    dimension: usize,
    namespaces: RwLock<HashMap<Namespace, Vec<VectorRecord>>>,
}

impl InMemoryIndex {
    pub fn new(name: &str, dimension: usize) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of vectors stored in `namespace`.
    pub fn len(&self, namespace: &Namespace) -> usize {
        self.namespaces
            .read()
            .map(|ns| ns.get(namespace).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &Namespace) -> bool {
        self.len(namespace) == 0
    }
}

fn poisoned() -> RagError {
    RagError::Store("in-memory index lock poisoned".to_string())
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, namespace: &Namespace, records: &[VectorRecord]) -> RagResult<()> {
        let mut namespaces = self.namespaces.write().map_err(|_| poisoned())?;
        let stored = namespaces.entry(namespace.clone()).or_default();
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> RagResult<Vec<ScoredMatch>> {
        let namespaces = self.namespaces.read().map_err(|_| poisoned())?;
        let hits = namespaces
            .get(namespace)
            .map(|records| {
                records
                    .iter()
                    .map(|r| ScoredMatch {
                        id: r.id.clone(),
                        score: cosine_similarity(vector, &r.values),
                        metadata: r.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rank(hits, top_k))
    }

    async fn delete_all(&self, namespace: &Namespace) -> RagResult<()> {
        let mut namespaces = self.namespaces.write().map_err(|_| poisoned())?;
        namespaces.remove(namespace);
        Ok(())
    }

    async fn delete_prefix(&self, namespace: &Namespace, prefix: &str) -> RagResult<usize> {
        let mut namespaces = self.namespaces.write().map_err(|_| poisoned())?;
        let Some(stored) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|r| !r.id.starts_with(prefix));
        Ok(before - stored.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(id: &str, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values,
            metadata: BTreeMap::from([("text".to_string(), id.to_string())]),
        }
    }

    #[tokio::test]
    async fn test_query_ranked_and_bounded() {
        let index = InMemoryIndex::new("idx", 2);
        let ns = Namespace::new("ns2");
        index
            .upsert(
                &ns,
                &[
                    record("far", vec![0.0, 1.0]),
                    record("near", vec![1.0, 0.1]),
                    record("mid", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = index.query(&ns, &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert_eq!(hits[1].id, "mid");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_upsert_same_id_overwrites() {
        let index = InMemoryIndex::new("idx", 2);
        let ns = Namespace::new("ns2");
        index.upsert(&ns, &[record("a", vec![1.0, 0.0])]).await.unwrap();
        index.upsert(&ns, &[record("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.len(&ns), 1);
        let hits = index.query(&ns, &[0.0, 1.0], 5).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_delete_prefix_removes_only_matching_ids() {
        let index = InMemoryIndex::new("idx", 2);
        let ns = Namespace::new("ns3");
        index
            .upsert(
                &ns,
                &[
                    record("aaaa-0", vec![1.0, 0.0]),
                    record("bbbb-0", vec![0.0, 1.0]),
                    record("aaaa-1", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(index.delete_prefix(&ns, "aaaa-").await.unwrap(), 2);
        assert_eq!(index.len(&ns), 1);
        assert_eq!(index.delete_prefix(&ns, "aaaa-").await.unwrap(), 0);
        assert_eq!(
            index.delete_prefix(&Namespace::new("ns5"), "aaaa-").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_delete_all_on_empty_namespace_is_ok() {
        let index = InMemoryIndex::new("idx", 2);
        let ns = Namespace::new("ns1");
        index.delete_all(&ns).await.unwrap();
        assert!(index.is_empty(&ns));
        assert!(index.query(&ns, &[1.0, 0.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let index = InMemoryIndex::new("idx", 2);
        index
            .upsert(&Namespace::new("ns3"), &[record("plot", vec![1.0, 0.0])])
            .await
            .unwrap();
        index.delete_all(&Namespace::new("ns4")).await.unwrap();
        assert_eq!(index.len(&Namespace::new("ns3")), 1);
    }
}
