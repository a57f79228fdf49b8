//! A signed-in user's working session.
//!
//! [`Services`] holds the process-wide collaborators built once from the
//! config file. [`Session::login`] resolves a user against them:
//!
//! ```text
//! sign_in ──► get_user_info ──► read_index_config ──► initialize index
//!                                     │
//!                                     └──► read_prompt(post | title), falling back to examples
//! ```
//!
//! A session owns the cache guard for the reference-URL namespace, so
//! submitting the same URL twice in one session fetches it once.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::accounts::{ConfigStore, IdentityProvider, PromptKind, SqliteAccounts, UserProfile};
use crate::cache::{NamespaceCacheGuard, Refresh};
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{RagError, RagResult};
use crate::ingest::{IngestOutcome, IngestPipeline, IngestReport, NamespaceWriter};
use crate::llm::LlmRegistry;
use crate::loader::Loader;
use crate::models::{IndexCredential, Namespace, ScoredMatch};
use crate::prompts;
use crate::rag::Orchestrator;
use crate::store::{self, VectorIndex};
use crate::titles;
use crate::tracer::{create_tracer, RunTracer};

/// Upper bound on how long logout waits for trace delivery.
pub const TRACE_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-wide collaborators.
pub struct Services {
    pub config: Arc<Config>,
    pub identity: Arc<dyn IdentityProvider>,
    pub configs: Arc<dyn ConfigStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub loader: Arc<Loader>,
    pub llms: Arc<LlmRegistry>,
    pub tracer: Arc<dyn RunTracer>,
}

impl Services {
    /// Build every collaborator from `config`, with accounts in `accounts`.
    pub fn from_config(config: Config, accounts: Arc<SqliteAccounts>) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let loader = Arc::new(Loader::from_config(&config.loader)?);
        let llms = Arc::new(LlmRegistry::from_config(&config.llm)?);
        let tracer: Arc<dyn RunTracer> = Arc::from(create_tracer(&config.tracing)?);
        Ok(Self {
            config: Arc::new(config),
            identity: accounts.clone(),
            configs: accounts,
            embedder,
            loader,
            llms,
            tracer,
        })
    }
}

/// Result of a script request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Generated(String),
    /// The reference URL was rejected by policy. Nothing was fetched.
    Blocked(String),
}

pub struct Session {
    services: Arc<Services>,
    token: String,
    profile: UserProfile,
    credential: IndexCredential,
    post_prompt: String,
    title_prompt: String,
    pipeline: IngestPipeline,
    orchestrator: Orchestrator,
    reference: NamespaceCacheGuard,
}

impl Session {
    /// Sign in and bind the user's index.
    ///
    /// A user without an index credential, or whose index cannot be
    /// opened, gets an error wrapping [`RagError::IndexInit`].
    pub async fn login(services: Arc<Services>, email: &str, password: &str) -> Result<Self> {
        let token = services.identity.sign_in(email, password).await?;
        let profile = services.identity.get_user_info(&token).await?;

        let credential = services
            .configs
            .read_index_config(&profile.id)
            .await?
            .ok_or_else(|| {
                RagError::IndexInit(format!("no index configured for {}", profile.email))
            })?;
        let post_prompt =
            prompts::resolve(services.configs.as_ref(), &profile.id, PromptKind::Post).await?;
        let title_prompt =
            prompts::resolve(services.configs.as_ref(), &profile.id, PromptKind::Title).await?;

        let index = store::initialize(
            &services.config.index,
            &credential,
            services.embedder.dims(),
        )
        .await?;

        info!(user_id = %profile.id, index = %credential.index_name, "session opened");
        Ok(Self::assemble(
            services,
            token,
            profile,
            credential,
            post_prompt,
            title_prompt,
            index,
        ))
    }

    fn assemble(
        services: Arc<Services>,
        token: String,
        profile: UserProfile,
        credential: IndexCredential,
        post_prompt: String,
        title_prompt: String,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        let config = &services.config;
        let pipeline = IngestPipeline::new(
            services.loader.clone(),
            services.embedder.clone(),
            index.clone(),
            config.chunking.clone(),
            config.embedding.batch_size,
        );
        let orchestrator = Orchestrator::new(
            services.embedder.clone(),
            index,
            services.llms.clone(),
            services.tracer.clone(),
            config.retrieval.top_k,
        );
        Self {
            services,
            token,
            profile,
            credential,
            post_prompt,
            title_prompt,
            pipeline,
            orchestrator,
            reference: NamespaceCacheGuard::new(Namespace::reference()),
        }
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn credential(&self) -> &IndexCredential {
        &self.credential
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        self.pipeline.index()
    }

    pub fn reference_cache(&self) -> &NamespaceCacheGuard {
        &self.reference
    }

    /// Generate a post script.
    ///
    /// `url` is the reference page for this script and may be empty. It
    /// is checked against the URL policy first; then the reference
    /// namespace is brought in line with it through the cache guard, and
    /// generation reads every configured namespace.
    pub async fn generate_script(
        &mut self,
        url: &str,
        query: &str,
        llm_choice: &str,
    ) -> RagResult<ScriptOutcome> {
        let url = url.trim();
        if !url.is_empty() && self.services.loader.is_blocked(url) {
            return Ok(ScriptOutcome::Blocked(crate::loader::BLOCKED_MESSAGE.to_string()));
        }
        if let Refresh::Blocked(_) = self.reference.ensure(&self.pipeline, url).await? {
            return Ok(ScriptOutcome::Blocked(crate::loader::BLOCKED_MESSAGE.to_string()));
        }

        let namespaces: Vec<Namespace> = self
            .services
            .config
            .retrieval
            .namespaces
            .iter()
            .map(|n| Namespace::new(n.as_str()))
            .collect();
        let text = self
            .orchestrator
            .generate(
                query,
                &namespaces,
                llm_choice,
                &self.post_prompt,
                &self.credential.project_name,
            )
            .await?;
        Ok(ScriptOutcome::Generated(text))
    }

    /// Title ideas drawn from the past-plots namespace.
    pub async fn suggest_titles(&self, query: &str, llm_choice: &str) -> RagResult<Vec<String>> {
        titles::suggest_titles(
            &self.orchestrator,
            query,
            &Namespace::past_plots(),
            llm_choice,
            &self.title_prompt,
            self.services.config.retrieval.title_top_k,
            &self.credential.project_name,
        )
        .await
    }

    /// Register a web page into the registered-URLs namespace.
    pub async fn register_url(&self, url: &str) -> RagResult<IngestOutcome> {
        self.pipeline
            .ingest_url(url, &Namespace::new(Namespace::REGISTERED_URLS))
            .await
    }

    /// Register an uploaded PDF into `namespace`.
    pub async fn register_pdf(
        &self,
        bytes: &[u8],
        filename: &str,
        namespace: &Namespace,
    ) -> RagResult<IngestReport> {
        self.pipeline.ingest_pdf(bytes, filename, namespace).await
    }

    /// Delete everything in `namespace`.
    pub async fn clear(&mut self, namespace: &Namespace) -> RagResult<()> {
        self.pipeline.clear(namespace).await?;
        if namespace == self.reference.namespace() {
            self.reference.reset();
        }
        Ok(())
    }

    /// Raw similarity search over one namespace.
    pub async fn search(
        &self,
        query: &str,
        namespace: &Namespace,
        top_k: usize,
    ) -> RagResult<Vec<ScoredMatch>> {
        let passages = self
            .orchestrator
            .retrieve(query, std::slice::from_ref(namespace), top_k)
            .await?;
        Ok(passages.into_iter().map(|p| p.hit).collect())
    }

    /// Wait for pending trace deliveries, then revoke the session token.
    pub async fn logout(self) -> Result<()> {
        self.services.tracer.flush(TRACE_FLUSH_TIMEOUT).await;
        self.services
            .identity
            .sign_out(&self.token)
            .await
            .context("failed to sign out")?;
        info!(user_id = %self.profile.id, "session closed");
        Ok(())
    }
}
