//! Schema for the account database.
//!
//! | Table | Key | Holds |
//! |-------|-----|-------|
//! | `users` | `id` | Login and profile |
//! | `sessions` | `token` | Issued sign-in tokens |
//! | `user_indexes` | `user_id` | Vector index credential and tracing project |
//! | `prompts` | `(user_id, kind)` | System prompts for posts and titles |
//! | `insights` | `(user_id, post_id)` | Per-post performance records |
//!
//! Every statement is `IF NOT EXISTS`, so migrating twice is harmless.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            display_name TEXT NOT NULL,
            instagram_username TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL DEFAULT 'user',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_indexes (
            user_id TEXT PRIMARY KEY,
            index_name TEXT NOT NULL,
            api_key TEXT NOT NULL,
            project_name TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompts (
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, kind),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insights (
            user_id TEXT NOT NULL,
            post_id TEXT NOT NULL,
            post_url TEXT NOT NULL DEFAULT '',
            plot TEXT,
            save_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            reach_count INTEGER NOT NULL DEFAULT 0,
            new_reach_count INTEGER NOT NULL DEFAULT 0,
            followers_reach_count INTEGER NOT NULL DEFAULT 0,
            posted_at TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, post_id),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_insights_posted ON insights(user_id, posted_at)")
        .execute(pool)
        .await?;

    Ok(())
}
