//! CLI command implementations.
//!
//! Each `run_*` function opens what it needs from the config, performs
//! one action, and prints a short human-readable result to stdout.
//! Recoverable pipeline failures print their user-facing message and
//! succeed; only configuration faults and a failed index initialization
//! are returned as errors.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::accounts::{IdentityProvider, NewUser, PromptKind, SqliteAccounts, UserProfile};
use crate::config::Config;
use crate::db;
use crate::error::RagError;
use crate::ingest::IngestOutcome;
use crate::insights::{default_window, summarize, InsightInput, InsightStore, SqliteInsights};
use crate::loader::BLOCKED_MESSAGE;
use crate::migrate;
use crate::models::Namespace;
use crate::session::{ScriptOutcome, Services, Session};
use crate::titles;

/// Email and password given on the command line.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

async fn open_accounts(config: &Config) -> Result<Arc<SqliteAccounts>> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    Ok(Arc::new(SqliteAccounts::new(pool)))
}

async fn open_session(config: &Config, creds: &Credentials) -> Result<Session> {
    let accounts = open_accounts(config).await?;
    let services = Arc::new(Services::from_config(config.clone(), accounts)?);
    Session::login(services, &creds.email, &creds.password).await
}

async fn authenticate(accounts: &SqliteAccounts, creds: &Credentials) -> Result<UserProfile> {
    let token = accounts.sign_in(&creds.email, &creds.password).await?;
    let profile = accounts.get_user_info(&token).await?;
    accounts.sign_out(&token).await?;
    Ok(profile)
}

async fn require_user(accounts: &SqliteAccounts, email: &str) -> Result<UserProfile> {
    match accounts.find_user_by_email(email).await? {
        Some(user) => Ok(user),
        None => bail!("no such user: {}", email),
    }
}

/// Print the user-facing message for a recoverable failure and swallow
/// it; pass terminal failures through.
fn report(err: RagError) -> Result<()> {
    if err.is_terminal() {
        return Err(err.into());
    }
    warn!(error = %err, "operation failed");
    println!("{}", err.user_message());
    Ok(())
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized at {}", config.storage.path.display());
    Ok(())
}

pub async fn run_user_add(config: &Config, user: NewUser) -> Result<()> {
    let accounts = open_accounts(config).await?;
    let profile = accounts.create_user(user).await?;
    println!("created user {} ({})", profile.email, profile.id);
    Ok(())
}

pub async fn run_user_set_index(
    config: &Config,
    email: &str,
    index_name: &str,
    api_key: &str,
    project_name: &str,
) -> Result<()> {
    let accounts = open_accounts(config).await?;
    let user = require_user(&accounts, email).await?;
    accounts
        .write_index_config(
            &user.id,
            &crate::models::IndexCredential {
                index_name: index_name.to_string(),
                api_key: api_key.to_string(),
                project_name: project_name.to_string(),
            },
        )
        .await?;
    println!("index '{}' assigned to {}", index_name, user.email);
    Ok(())
}

pub async fn run_user_set_prompt(
    config: &Config,
    email: &str,
    kind: PromptKind,
    file: &Path,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read prompt file: {}", file.display()))?;
    let accounts = open_accounts(config).await?;
    let user = require_user(&accounts, email).await?;
    accounts.write_prompt(&user.id, kind, &text).await?;
    println!("{} prompt saved for {}", kind, user.email);
    Ok(())
}

pub async fn run_register_url(config: &Config, creds: &Credentials, url: &str) -> Result<()> {
    let session = open_session(config, creds).await?;
    match session.register_url(url).await {
        Ok(IngestOutcome::Ingested(report)) => println!(
            "registered {} into {}: {} chunks",
            report.origin, report.namespace, report.chunks
        ),
        Ok(IngestOutcome::Blocked(_)) => println!("{}", BLOCKED_MESSAGE),
        Err(e) => report(e)?,
    }
    session.logout().await
}

pub async fn run_register_pdf(
    config: &Config,
    creds: &Credentials,
    path: &Path,
    namespace: &Namespace,
) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let session = open_session(config, creds).await?;
    match session.register_pdf(&bytes, &filename, namespace).await {
        Ok(r) => println!("registered {} into {}: {} chunks", r.origin, r.namespace, r.chunks),
        Err(e) => report(e)?,
    }
    session.logout().await
}

pub async fn run_clear(config: &Config, creds: &Credentials, namespace: &Namespace) -> Result<()> {
    let mut session = open_session(config, creds).await?;
    match session.clear(namespace).await {
        Ok(()) => println!("cleared {}", namespace),
        Err(e) => report(e)?,
    }
    session.logout().await
}

pub async fn run_search(
    config: &Config,
    creds: &Credentials,
    query: &str,
    namespace: &Namespace,
    top_k: usize,
) -> Result<()> {
    let session = open_session(config, creds).await?;
    match session.search(query, namespace, top_k).await {
        Ok(hits) if hits.is_empty() => println!("No results."),
        Ok(hits) => {
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}",
                    i + 1,
                    hit.score,
                    hit.origin().unwrap_or("unknown")
                );
                let preview: String = hit.text().chars().take(120).collect();
                println!("    {}", preview.replace('\n', " "));
            }
        }
        Err(e) => report(e)?,
    }
    session.logout().await
}

pub async fn run_generate(
    config: &Config,
    creds: &Credentials,
    url: &str,
    query: &str,
    llm: &str,
) -> Result<()> {
    let mut session = open_session(config, creds).await?;
    match session.generate_script(url, query, llm).await {
        Ok(ScriptOutcome::Generated(text)) => println!("{}", text),
        Ok(ScriptOutcome::Blocked(message)) => println!("{}", message),
        Err(e) => report(e)?,
    }
    session.logout().await
}

pub async fn run_titles(config: &Config, creds: &Credentials, query: &str, llm: &str) -> Result<()> {
    let session = open_session(config, creds).await?;
    match session.suggest_titles(query, llm).await {
        Ok(candidates) => println!("{}", titles::render(&candidates)),
        Err(e) => report(e)?,
    }
    session.logout().await
}

pub async fn run_insight_add(config: &Config, creds: &Credentials, input: InsightInput) -> Result<()> {
    let accounts = open_accounts(config).await?;
    let user = authenticate(&accounts, creds).await?;
    let store = SqliteInsights::new(accounts.pool().clone());
    let insight = store.create(&user.id, input).await?;
    println!("added insight {}", insight.post_id);
    Ok(())
}

pub async fn run_insight_list(config: &Config, creds: &Credentials) -> Result<()> {
    let accounts = open_accounts(config).await?;
    let user = authenticate(&accounts, creds).await?;
    let store = SqliteInsights::new(accounts.pool().clone());
    let insights = store.read_all(&user.id).await?;
    if insights.is_empty() {
        println!("No insights.");
        return Ok(());
    }
    for i in insights {
        println!(
            "{}  {}  saves={} likes={} reach={} new={} followers={}  {}",
            i.posted_at,
            i.post_id,
            i.save_count,
            i.like_count,
            i.reach_count,
            i.new_reach_count,
            i.followers_reach_count,
            i.post_url
        );
    }
    Ok(())
}

pub async fn run_insight_update(
    config: &Config,
    creds: &Credentials,
    post_id: &str,
    input: InsightInput,
) -> Result<()> {
    let accounts = open_accounts(config).await?;
    let user = authenticate(&accounts, creds).await?;
    let store = SqliteInsights::new(accounts.pool().clone());
    store.update(&user.id, post_id, input).await?;
    println!("updated insight {}", post_id);
    Ok(())
}

pub async fn run_insight_delete(config: &Config, creds: &Credentials, post_id: &str) -> Result<()> {
    let accounts = open_accounts(config).await?;
    let user = authenticate(&accounts, creds).await?;
    let store = SqliteInsights::new(accounts.pool().clone());
    if store.delete(&user.id, post_id).await? {
        println!("deleted insight {}", post_id);
    } else {
        println!("insight not found: {}", post_id);
    }
    Ok(())
}

pub async fn run_insight_summary(
    config: &Config,
    creds: &Credentials,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let accounts = open_accounts(config).await?;
    let user = authenticate(&accounts, creds).await?;
    let store = SqliteInsights::new(accounts.pool().clone());
    let insights = store.read_all(&user.id).await?;

    let (default_start, default_end) = default_window(end.unwrap_or_else(|| Utc::now().date_naive()));
    let summary = summarize(
        &insights,
        start.unwrap_or(default_start),
        end.unwrap_or(default_end),
    );

    println!("{} .. {} ({} posts)", summary.start, summary.end, summary.posts);
    println!("  保存数: {}", summary.saves);
    println!("  リーチ数: {}", summary.reach);
    println!("  保存率: {}%", summary.save_rate);
    println!("  フォロワーリーチ数: {}", summary.followers_reach);
    println!("  新規リーチ数: {}", summary.new_reach);
    println!("  ホーム率: {}%", summary.home_rate);
    println!("  いいね数: {}", summary.likes);
    println!("  フォロワー数: {}", summary.followers);
    Ok(())
}
