//! Per-session cache for the reference-URL namespace.
//!
//! Re-scraping and re-embedding a page is slow, and the same generation
//! request is often submitted several times in a row. The guard remembers
//! which origin currently fills the namespace and skips the work when the
//! same origin comes back.
//!
//! | State | Submitted origin | Action | Next state |
//! |-------|------------------|--------|------------|
//! | `Loaded(o)` | `o` | none | `Loaded(o)` |
//! | any | `o'` non-empty, different | clear, ingest `o'` | `Loaded(o')` |
//! | any | empty | clear | `Empty` |
//!
//! A failed clear is logged and ignored. A failed or blocked ingest leaves
//! the guard `Empty` so the next submission retries.

use tracing::{debug, warn};

use crate::error::RagResult;
use crate::ingest::{IngestOutcome, IngestReport, NamespaceWriter};
use crate::models::Namespace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Loaded(String),
}

/// What [`NamespaceCacheGuard::ensure`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// The namespace already holds this origin.
    Reused,
    /// The namespace was cleared and nothing was loaded.
    Cleared,
    Reloaded(IngestReport),
    /// The origin was rejected by policy after the namespace was cleared.
    Blocked(String),
}

pub struct NamespaceCacheGuard {
    namespace: Namespace,
    state: CacheState,
}

impl NamespaceCacheGuard {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            state: CacheState::Empty,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn state(&self) -> &CacheState {
        &self.state
    }

    /// Make the namespace hold exactly `origin` (or nothing, if empty).
    pub async fn ensure(
        &mut self,
        writer: &dyn NamespaceWriter,
        origin: &str,
    ) -> RagResult<Refresh> {
        let origin = origin.trim();
        if !origin.is_empty() && self.state == CacheState::Loaded(origin.to_string()) {
            debug!(namespace = %self.namespace, origin, "reusing cached namespace");
            return Ok(Refresh::Reused);
        }

        if let Err(e) = writer.clear(&self.namespace).await {
            warn!(namespace = %self.namespace, error = %e, "clear failed, continuing");
        }
        self.state = CacheState::Empty;

        if origin.is_empty() {
            return Ok(Refresh::Cleared);
        }

        match writer.ingest_url(origin, &self.namespace).await? {
            IngestOutcome::Ingested(report) => {
                self.state = CacheState::Loaded(origin.to_string());
                Ok(Refresh::Reloaded(report))
            }
            IngestOutcome::Blocked(reason) => Ok(Refresh::Blocked(reason)),
        }
    }

    /// Forget the cached origin without touching the index.
    pub fn reset(&mut self) {
        self.state = CacheState::Empty;
    }
}
