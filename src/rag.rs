//! Retrieval-augmented generation.
//!
//! [`Orchestrator::generate`] runs the read path:
//!
//! 1. Embed the query once.
//! 2. Query each namespace in the order given, `top_k` hits each.
//! 3. Concatenate the hits in namespace order, each tagged with its
//!    namespace and origin. No re-ranking across namespaces.
//! 4. Send system prompt, context and query to the selected backend.
//! 5. Report the run to the tracer, whatever the outcome. Title
//!    suggestions go through the same traced call.
//!
//! Namespace queries are read-only and run one after another.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{RagError, RagResult};
use crate::llm::{ChatBackend, LlmRegistry};
use crate::models::{Namespace, ScoredMatch};
use crate::store::{self, VectorIndex};
use crate::tracer::{RunTracer, TraceRun};

/// A retrieved passage and the namespace it came from.
#[derive(Debug, Clone)]
pub struct Passage {
    pub namespace: Namespace,
    pub hit: ScoredMatch,
}

pub struct Orchestrator {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    llms: Arc<LlmRegistry>,
    tracer: Arc<dyn RunTracer>,
    top_k: usize,
}

impl Orchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        llms: Arc<LlmRegistry>,
        tracer: Arc<dyn RunTracer>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            llms,
            tracer,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Top-`top_k` passages from each namespace, concatenated in order.
    pub async fn retrieve(
        &self,
        query: &str,
        namespaces: &[Namespace],
        top_k: usize,
    ) -> RagResult<Vec<Passage>> {
        if namespaces.is_empty() {
            return Ok(Vec::new());
        }
        let vector = embed_query(self.embedder.as_ref(), query).await?;

        let mut passages = Vec::new();
        for namespace in namespaces {
            let hits = store::query(self.index.as_ref(), namespace, &vector, top_k).await?;
            debug!(namespace = %namespace, hits = hits.len(), "namespace queried");
            passages.extend(hits.into_iter().map(|hit| Passage {
                namespace: namespace.clone(),
                hit,
            }));
        }
        Ok(passages)
    }

    pub(crate) fn backend(&self, llm_choice: &str) -> RagResult<&dyn ChatBackend> {
        self.llms.get(llm_choice).ok_or_else(|| {
            RagError::Generation(format!(
                "unknown LLM '{}' (available: {})",
                llm_choice,
                self.llms.names().join(", ")
            ))
        })
    }

    /// Generate a script grounded in `namespaces`.
    ///
    /// Returns [`RagError::Generation`] when the backend fails or answers
    /// with nothing but whitespace.
    pub async fn generate(
        &self,
        query: &str,
        namespaces: &[Namespace],
        llm_choice: &str,
        system_prompt: &str,
        project: &str,
    ) -> RagResult<String> {
        let backend = self.backend(llm_choice)?;
        let passages = self.retrieve(query, namespaces, self.top_k).await?;
        let context = assemble_context(&passages);

        let text = self
            .complete_traced(
                backend,
                LlmCall {
                    run_name: "generate",
                    llm_choice,
                    system_prompt,
                    context: &context,
                    message: query,
                    project,
                    namespaces,
                    passages: passages.len(),
                },
            )
            .await?;
        info!(
            llm = llm_choice,
            passages = passages.len(),
            chars = text.chars().count(),
            "generated"
        );
        Ok(text)
    }

    /// Run one completion and report it to the tracer, whatever the outcome.
    ///
    /// A backend error or a whitespace-only answer is a
    /// [`RagError::Generation`].
    pub(crate) async fn complete_traced(
        &self,
        backend: &dyn ChatBackend,
        call: LlmCall<'_>,
    ) -> RagResult<String> {
        let started_at = Utc::now();
        let result = backend
            .complete(call.system_prompt, call.context, call.message)
            .await;
        let ended_at = Utc::now();

        let outcome = match result {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => Err(RagError::Generation("empty response".to_string())),
            Err(e) => Err(RagError::Generation(format!("{:#}", e))),
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("llm".to_string(), call.llm_choice.to_string());
        metadata.insert(
            "namespaces".to_string(),
            call.namespaces
                .iter()
                .map(Namespace::as_str)
                .collect::<Vec<_>>()
                .join(","),
        );
        metadata.insert("passages".to_string(), call.passages.to_string());
        if let Err(e) = &outcome {
            metadata.insert("error".to_string(), e.to_string());
            warn!(run = call.run_name, llm = call.llm_choice, error = %e, "llm call failed");
        }
        self.tracer.submit(TraceRun {
            project: call.project.to_string(),
            name: call.run_name.to_string(),
            input: call.message.to_string(),
            output: outcome.as_ref().map(String::clone).unwrap_or_default(),
            metadata,
            started_at,
            ended_at,
        });
        outcome
    }
}

/// One traced LLM request.
pub(crate) struct LlmCall<'a> {
    /// Run name reported to the tracer.
    pub run_name: &'a str,
    pub llm_choice: &'a str,
    pub system_prompt: &'a str,
    pub context: &'a str,
    pub message: &'a str,
    pub project: &'a str,
    pub namespaces: &'a [Namespace],
    pub passages: usize,
}

/// Join passages into one context block, in order.
pub fn assemble_context(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| {
            let origin = p.hit.origin().unwrap_or("unknown");
            format!("[{} | {}]\n{}", p.namespace, origin, p.hit.text())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
