//! Run tracing for generation calls.
//!
//! Each generation is reported once to an external collector, keyed by
//! the user's tracing project. Submission returns immediately and a
//! failed delivery is only logged. Deliveries still in flight are awaited
//! by [`RunTracer::flush`], which a short-lived process calls before it
//! exits so the runtime does not cancel them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TracingConfig;

/// One traced LLM run.
#[derive(Debug, Clone)]
pub struct TraceRun {
    pub project: String,
    pub name: String,
    pub input: String,
    pub output: String,
    pub metadata: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[async_trait]
pub trait RunTracer: Send + Sync {
    /// Hand a run to the collector. Must not block.
    fn submit(&self, run: TraceRun);

    /// Wait up to `timeout` for submitted runs to be delivered.
    async fn flush(&self, _timeout: Duration) {}
}

/// Drops every run.
pub struct NoopTracer;

impl RunTracer for NoopTracer {
    fn submit(&self, run: TraceRun) {
        debug!(project = %run.project, name = %run.name, "tracing disabled, run dropped");
    }
}

/// Posts runs to a LangSmith-compatible `/runs` endpoint.
pub struct LangSmithTracer {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl LangSmithTracer {
    pub fn new(endpoint: &str, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            pending: Mutex::new(Vec::new()),
        })
    }

    fn take_pending(&self) -> Vec<JoinHandle<()>> {
        match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

fn run_body(run: &TraceRun) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "name": run.name,
        "run_type": "llm",
        "session_name": run.project,
        "inputs": {"input": run.input},
        "outputs": {"output": run.output},
        "start_time": run.started_at.to_rfc3339(),
        "end_time": run.ended_at.to_rfc3339(),
        "extra": {"metadata": run.metadata},
    })
}

#[async_trait]
impl RunTracer for LangSmithTracer {
    fn submit(&self, run: TraceRun) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(project = %run.project, "no async runtime, trace dropped");
                return;
            }
        };

        let client = self.client.clone();
        let url = format!("{}/runs", self.endpoint);
        let api_key = self.api_key.clone();
        let body = run_body(&run);
        let project = run.project;

        let task = runtime.spawn(async move {
            let result = client
                .post(&url)
                .header("x-api-key", api_key)
                .json(&body)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%project, "trace delivered");
                }
                Ok(resp) => warn!(%project, status = %resp.status(), "trace rejected"),
                Err(e) => warn!(%project, error = %e, "trace delivery failed"),
            }
        });

        match self.pending.lock() {
            Ok(mut pending) => {
                pending.retain(|t| !t.is_finished());
                pending.push(task);
            }
            Err(poisoned) => poisoned.into_inner().push(task),
        }
    }

    async fn flush(&self, timeout: Duration) {
        let tasks = self.take_pending();
        if tasks.is_empty() {
            return;
        }
        let count = tasks.len();
        let all = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        match tokio::time::timeout(timeout, all).await {
            Ok(()) => debug!(runs = count, "traces flushed"),
            Err(_) => warn!(runs = count, ?timeout, "trace delivery still pending, giving up"),
        }
    }
}

/// Build the tracer selected by `[tracing]`.
///
/// A missing API key downgrades to [`NoopTracer`] with a warning rather
/// than failing startup.
pub fn create_tracer(config: &TracingConfig) -> anyhow::Result<Box<dyn RunTracer>> {
    match config.provider.as_str() {
        "langsmith" => match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(Box::new(LangSmithTracer::new(&config.endpoint, key)?)),
            _ => {
                warn!(env = %config.api_key_env, "tracing key not set, tracing disabled");
                Ok(Box::new(NoopTracer))
            }
        },
        _ => Ok(Box::new(NoopTracer)),
    }
}
