//! # Sakiyomi CLI (`sakiyomi`)
//!
//! Command-line front end for the content assistant: account setup,
//! reference registration, script generation, title ideas and post
//! performance tracking.
//!
//! ## Usage
//!
//! ```bash
//! sakiyomi --config ./config/sakiyomi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sakiyomi init` | Create the account database |
//! | `sakiyomi user add` | Create a user |
//! | `sakiyomi user set-index` | Assign a vector index to a user |
//! | `sakiyomi user set-prompt` | Save a user's post or title prompt |
//! | `sakiyomi register url <url>` | Register a web page (ns2) |
//! | `sakiyomi register pdf <file> --role <role>` | Register a PDF (ns3/ns4/ns5) |
//! | `sakiyomi clear <namespace>` | Delete every vector in a namespace |
//! | `sakiyomi search "<query>"` | Similarity search over one namespace |
//! | `sakiyomi generate --query "<text>"` | Generate a post script |
//! | `sakiyomi titles` | Suggest titles from past plots |
//! | `sakiyomi insight <action>` | Manage per-post performance records |
//!
//! Commands that touch a user's data take `--email` and `--password`.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use sakiyomi::accounts::{NewUser, PromptKind};
use sakiyomi::commands::{self, Credentials};
use sakiyomi::config;
use sakiyomi::error::RagError;
use sakiyomi::insights::InsightInput;
use sakiyomi::logging;
use sakiyomi::models::Namespace;

/// Sakiyomi: reference-grounded post scripts and titles for social media.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sakiyomi.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "sakiyomi", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sakiyomi.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Login {
    /// Account email.
    #[arg(long)]
    email: String,

    /// Account password.
    #[arg(long)]
    password: String,
}

impl From<Login> for Credentials {
    fn from(l: Login) -> Self {
        Credentials {
            email: l.email,
            password: l.password,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the account database. Safe to run more than once.
    Init,

    /// Manage users and their configuration.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Add reference material to the user's index.
    Register {
        #[command(subcommand)]
        source: RegisterSource,
    },

    /// Delete every vector in a namespace (ns1..ns5).
    Clear {
        namespace: String,
        #[command(flatten)]
        login: Login,
    },

    /// Similarity search over one namespace.
    Search {
        query: String,
        #[arg(long, default_value = "ns2")]
        namespace: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        #[command(flatten)]
        login: Login,
    },

    /// Generate a post script grounded in every namespace.
    Generate {
        /// What the post should be about.
        #[arg(long)]
        query: String,
        /// Reference page for this script. Empty clears the reference slot.
        #[arg(long, default_value = "")]
        url: String,
        /// LLM to use, by configured name.
        #[arg(long, default_value = "GPT-4o")]
        llm: String,
        #[command(flatten)]
        login: Login,
    },

    /// Suggest new titles in the style of past plots.
    Titles {
        /// Genre keywords. Empty searches broadly.
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long, default_value = "GPT-4o")]
        llm: String,
        #[command(flatten)]
        login: Login,
    },

    /// Manage per-post performance records.
    Insight {
        #[command(subcommand)]
        action: InsightAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user.
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        display_name: String,
        #[arg(long, default_value = "")]
        instagram_username: String,
    },
    /// Assign a vector index and tracing project to a user.
    SetIndex {
        #[arg(long)]
        email: String,
        #[arg(long)]
        index_name: String,
        /// Index API key. Falls back to `PINECONE_API_KEY`.
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        project: String,
    },
    /// Save a user's system prompt from a file.
    SetPrompt {
        #[arg(long)]
        email: String,
        #[arg(long, value_enum)]
        kind: PromptKindArg,
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PromptKindArg {
    Post,
    Title,
}

impl From<PromptKindArg> for PromptKind {
    fn from(k: PromptKindArg) -> Self {
        match k {
            PromptKindArg::Post => PromptKind::Post,
            PromptKindArg::Title => PromptKind::Title,
        }
    }
}

#[derive(Subcommand)]
enum RegisterSource {
    /// Register a web page into ns2.
    Url {
        url: String,
        #[command(flatten)]
        login: Login,
    },
    /// Register a PDF into the namespace for its role.
    Pdf {
        file: PathBuf,
        #[arg(long, value_enum)]
        role: PdfRole,
        #[command(flatten)]
        login: Login,
    },
}

/// What an uploaded PDF contains.
#[derive(Clone, Copy, ValueEnum)]
enum PdfRole {
    /// Past plots (ns3).
    Plots,
    /// Competitor material (ns4).
    Competitors,
    /// Domain reference material (ns5).
    Domain,
}

impl PdfRole {
    fn namespace(self) -> Namespace {
        Namespace::new(match self {
            PdfRole::Plots => Namespace::PAST_PLOTS,
            PdfRole::Competitors => Namespace::COMPETITORS,
            PdfRole::Domain => Namespace::DOMAIN_REFERENCE,
        })
    }
}

#[derive(Args, Clone)]
struct InsightFields {
    #[arg(long, default_value = "")]
    post_url: String,
    #[arg(long)]
    plot: Option<String>,
    #[arg(long, default_value_t = 0)]
    saves: i64,
    #[arg(long, default_value_t = 0)]
    likes: i64,
    #[arg(long, default_value_t = 0)]
    reach: i64,
    #[arg(long, default_value_t = 0)]
    new_reach: i64,
    #[arg(long, default_value_t = 0)]
    followers_reach: i64,
    /// Posting date (YYYY-MM-DD).
    #[arg(long)]
    posted_at: NaiveDate,
}

impl From<InsightFields> for InsightInput {
    fn from(f: InsightFields) -> Self {
        InsightInput {
            post_url: f.post_url,
            plot: f.plot,
            save_count: f.saves,
            like_count: f.likes,
            reach_count: f.reach,
            new_reach_count: f.new_reach,
            followers_reach_count: f.followers_reach,
            posted_at: f.posted_at,
        }
    }
}

#[derive(Subcommand)]
enum InsightAction {
    Add {
        #[command(flatten)]
        fields: InsightFields,
        #[command(flatten)]
        login: Login,
    },
    List {
        #[command(flatten)]
        login: Login,
    },
    Update {
        post_id: String,
        #[command(flatten)]
        fields: InsightFields,
        #[command(flatten)]
        login: Login,
    },
    Delete {
        post_id: String,
        #[command(flatten)]
        login: Login,
    },
    /// Totals over a date range, default the last seven days.
    Summary {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[command(flatten)]
        login: Login,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::User { action } => match action {
            UserAction::Add {
                email,
                password,
                display_name,
                instagram_username,
            } => {
                commands::run_user_add(
                    &cfg,
                    NewUser {
                        email,
                        password,
                        display_name,
                        instagram_username,
                    },
                )
                .await?
            }
            UserAction::SetIndex {
                email,
                index_name,
                api_key,
                project,
            } => {
                let api_key = match api_key {
                    Some(key) => key,
                    None => std::env::var("PINECONE_API_KEY").map_err(|_| {
                        anyhow::anyhow!("--api-key not given and PINECONE_API_KEY not set")
                    })?,
                };
                commands::run_user_set_index(&cfg, &email, &index_name, &api_key, &project)
                    .await?
            }
            UserAction::SetPrompt { email, kind, file } => {
                commands::run_user_set_prompt(&cfg, &email, kind.into(), &file).await?
            }
        },
        Commands::Register { source } => match source {
            RegisterSource::Url { url, login } => {
                commands::run_register_url(&cfg, &login.into(), &url).await?
            }
            RegisterSource::Pdf { file, role, login } => {
                commands::run_register_pdf(&cfg, &login.into(), &file, &role.namespace()).await?
            }
        },
        Commands::Clear { namespace, login } => {
            commands::run_clear(&cfg, &login.into(), &Namespace::new(namespace)).await?
        }
        Commands::Search {
            query,
            namespace,
            top_k,
            login,
        } => {
            commands::run_search(&cfg, &login.into(), &query, &Namespace::new(namespace), top_k)
                .await?
        }
        Commands::Generate {
            query,
            url,
            llm,
            login,
        } => commands::run_generate(&cfg, &login.into(), &url, &query, &llm).await?,
        Commands::Titles { query, llm, login } => {
            commands::run_titles(&cfg, &login.into(), &query, &llm).await?
        }
        Commands::Insight { action } => match action {
            InsightAction::Add { fields, login } => {
                commands::run_insight_add(&cfg, &login.into(), fields.into()).await?
            }
            InsightAction::List { login } => {
                commands::run_insight_list(&cfg, &login.into()).await?
            }
            InsightAction::Update {
                post_id,
                fields,
                login,
            } => {
                commands::run_insight_update(&cfg, &login.into(), &post_id, fields.into()).await?
            }
            InsightAction::Delete { post_id, login } => {
                commands::run_insight_delete(&cfg, &login.into(), &post_id).await?
            }
            InsightAction::Summary { start, end, login } => {
                commands::run_insight_summary(&cfg, &login.into(), start, end).await?
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        if let Some(rag) = e.downcast_ref::<RagError>() {
            eprintln!("{}", rag.user_message());
        }
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
