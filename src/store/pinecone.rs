//! Pinecone-backed [`VectorIndex`].
//!
//! [`PineconeIndex::connect`] describes the index on the control plane
//! (`GET {control_url}/indexes/{name}`) to learn its data-plane host and
//! dimension. All later calls go to that host:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upsert | `POST /vectors/upsert` |
//! | query | `POST /query` with `includeMetadata` |
//! | delete all | `POST /vectors/delete` with `deleteAll` |
//! | delete by prefix | `GET /vectors/list?prefix=`, then `POST /vectors/delete` with `ids` |
//!
//! Listing by prefix is only offered by serverless indexes. On other
//! index types the list call fails and callers treat that as best-effort.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::config::IndexConfig;
use crate::error::{RagError, RagResult};
use crate::models::{IndexCredential, Namespace, ScoredMatch, VectorRecord};

use super::{rank, VectorIndex};

const API_VERSION: &str = "2024-07";

/// IDs sent per delete request.
const DELETE_BATCH: usize = 1000;

pub struct PineconeIndex {
    name: String,
    dimension: usize,
    host: String,
    api_key: String,
    client: reqwest::Client,
}

impl PineconeIndex {
    /// Look up the index and bind to its data-plane host.
    pub async fn connect(config: &IndexConfig, credential: &IndexCredential) -> RagResult<Self> {
        if credential.index_name.is_empty() || credential.api_key.is_empty() {
            return Err(RagError::IndexInit(
                "index name and API key are required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::IndexInit(e.to_string()))?;

        let url = format!(
            "{}/indexes/{}",
            config.control_url.trim_end_matches('/'),
            credential.index_name
        );
        let resp = client
            .get(&url)
            .header("Api-Key", &credential.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| RagError::IndexInit(format!("describe index: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = match status.as_u16() {
                404 => format!("index '{}' not found", credential.index_name),
                401 | 403 => "API key rejected".to_string(),
                _ => format!("describe index returned {}: {}", status, body),
            };
            return Err(RagError::IndexInit(reason));
        }

        let description: Value = resp
            .json()
            .await
            .map_err(|e| RagError::IndexInit(format!("invalid index description: {}", e)))?;
        let (host, dimension) = parse_description(&description)?;
        debug!(index = %credential.index_name, %host, dimension, "index described");

        Ok(Self {
            name: credential.index_name.clone(),
            dimension,
            host,
            api_key: credential.api_key.clone(),
            client,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> RagResult<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::Store(format!("{}: {}", path, e)))
    }

    /// Every vector ID in `namespace` starting with `prefix`, following
    /// pagination.
    async fn list_ids(&self, namespace: &Namespace, prefix: &str) -> RagResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(format!("{}/vectors/list", self.host))
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .query(&[("namespace", namespace.as_str()), ("prefix", prefix)]);
            if let Some(token) = &token {
                req = req.query(&[("paginationToken", token.as_str())]);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| RagError::Store(format!("/vectors/list: {}", e)))?;
            if resp.status().as_u16() == 404 {
                return Ok(ids);
            }
            if !resp.status().is_success() {
                return Err(RagError::Store(format!("list {}", error_body(resp).await)));
            }
            let page: Value = resp
                .json()
                .await
                .map_err(|e| RagError::Store(format!("invalid list response: {}", e)))?;
            let (page_ids, next) = parse_list(&page);
            ids.extend(page_ids);
            match next {
                Some(next) => token = Some(next),
                None => return Ok(ids),
            }
        }
    }
}

/// IDs and the next pagination token from a list response.
fn parse_list(page: &Value) -> (Vec<String>, Option<String>) {
    let ids = page
        .get("vectors")
        .and_then(Value::as_array)
        .map(|vectors| {
            vectors
                .iter()
                .filter_map(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let next = page
        .pointer("/pagination/next")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    (ids, next)
}

/// Pull the data-plane base URL and dimension out of a describe response.
fn parse_description(description: &Value) -> RagResult<(String, usize)> {
    let host = description
        .get("host")
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RagError::IndexInit("index description has no host".to_string()))?;
    let dimension = description
        .get("dimension")
        .and_then(Value::as_u64)
        .ok_or_else(|| RagError::IndexInit("index description has no dimension".to_string()))?
        as usize;

    let host = if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    };
    Ok((host, dimension))
}

fn parse_matches(json: &Value) -> Vec<ScoredMatch> {
    json.get("matches")
        .and_then(Value::as_array)
        .map(|matches| {
            matches
                .iter()
                .filter_map(|m| {
                    let id = m.get("id")?.as_str()?.to_string();
                    let score = m.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                    let metadata = m
                        .get("metadata")
                        .and_then(Value::as_object)
                        .map(|obj| {
                            obj.iter()
                                .map(|(k, v)| (k.clone(), metadata_string(v)))
                                .collect()
                        })
                        .unwrap_or_else(BTreeMap::new);
                    Some(ScoredMatch {
                        id,
                        score,
                        metadata,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Metadata written by other tools may hold numbers or lists.
fn metadata_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(metadata_string)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

async fn error_body(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    format!("{}: {}", status, body)
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, namespace: &Namespace, records: &[VectorRecord]) -> RagResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = json!({
            "vectors": records,
            "namespace": namespace.as_str(),
        });
        let resp = self.post("/vectors/upsert", &body).await?;
        if !resp.status().is_success() {
            return Err(RagError::Store(format!("upsert {}", error_body(resp).await)));
        }
        debug!(namespace = %namespace, count = records.len(), "vectors upserted");
        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> RagResult<Vec<ScoredMatch>> {
        let body = json!({
            "namespace": namespace.as_str(),
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": false,
        });
        let resp = self.post("/query", &body).await?;
        if !resp.status().is_success() {
            return Err(RagError::Store(format!("query {}", error_body(resp).await)));
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| RagError::Store(format!("invalid query response: {}", e)))?;
        Ok(rank(parse_matches(&json), top_k))
    }

    async fn delete_all(&self, namespace: &Namespace) -> RagResult<()> {
        let body = json!({
            "deleteAll": true,
            "namespace": namespace.as_str(),
        });
        let resp = self.post("/vectors/delete", &body).await?;
        // A namespace that was never written to does not exist yet.
        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(RagError::Store(format!("delete {}", error_body(resp).await)));
        }
        debug!(namespace = %namespace, "namespace cleared");
        Ok(())
    }

    async fn delete_prefix(&self, namespace: &Namespace, prefix: &str) -> RagResult<usize> {
        let ids = self.list_ids(namespace, prefix).await?;
        for batch in ids.chunks(DELETE_BATCH) {
            let body = json!({
                "ids": batch,
                "namespace": namespace.as_str(),
            });
            let resp = self.post("/vectors/delete", &body).await?;
            if !resp.status().is_success() && resp.status().as_u16() != 404 {
                return Err(RagError::Store(format!("delete {}", error_body(resp).await)));
            }
        }
        Ok(ids.len())
    }
}
