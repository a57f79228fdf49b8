//! Users, sign-in tokens, and per-user configuration.
//!
//! Two seams face the rest of the crate:
//!
//! - [`IdentityProvider`]: email/password sign-in returning a token, and
//!   token → profile resolution.
//! - [`ConfigStore`]: the user's index credential and system prompts.
//!   Absence is `Ok(None)`, never an error; callers fall back to
//!   defaults.
//!
//! [`SqliteAccounts`] implements both over the account database.
//! Passwords are stored as salted SHA-256 digests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::models::IndexCredential;

/// Sign-in tokens expire after this many seconds.
pub const SESSION_TTL_SECS: i64 = 60 * 60 * 24 * 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub instagram_username: String,
    pub role: String,
}

/// Fields needed to create an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub instagram_username: String,
}

/// Which system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    /// Script (plot) generation.
    Post,
    /// Title suggestions.
    Title,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::Post => "post",
            PromptKind::Title => "title",
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "post" => Ok(PromptKind::Post),
            "title" => Ok(PromptKind::Title),
            other => bail!("unknown prompt kind '{}'. Must be post or title.", other),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify credentials and issue a token.
    async fn sign_in(&self, email: &str, password: &str) -> Result<String>;

    /// Resolve a live token to its user.
    async fn get_user_info(&self, token: &str) -> Result<UserProfile>;

    /// Revoke a token. Unknown tokens are ignored.
    async fn sign_out(&self, token: &str) -> Result<()>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read_index_config(&self, user_id: &str) -> Result<Option<IndexCredential>>;

    async fn read_prompt(&self, user_id: &str, kind: PromptKind) -> Result<Option<String>>;
}

pub struct SqliteAccounts {
    pool: SqlitePool,
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn profile_from_row(row: &sqlx::sqlite::SqliteRow) -> UserProfile {
    UserProfile {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        instagram_username: row.get("instagram_username"),
        role: row.get("role"),
    }
}

impl SqliteAccounts {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_user(&self, user: NewUser) -> Result<UserProfile> {
        let email = normalize_email(&user.email);
        if email.is_empty() || !email.contains('@') {
            bail!("invalid email address: '{}'", user.email);
        }
        if user.password.len() < 6 {
            bail!("password must be at least 6 characters");
        }

        let id = Uuid::new_v4().to_string();
        let salt = Uuid::new_v4().simple().to_string();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, salt, display_name, instagram_username, role, created_at) VALUES (?, ?, ?, ?, ?, ?, 'user', ?)",
        )
        .bind(&id)
        .bind(&email)
        .bind(hash_password(&salt, &user.password))
        .bind(&salt)
        .bind(&user.display_name)
        .bind(&user.instagram_username)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create user {}", email))?;

        info!(user_id = %id, %email, "user created");
        Ok(UserProfile {
            id,
            email,
            display_name: user.display_name,
            instagram_username: user.instagram_username,
            role: "user".to_string(),
        })
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT id, email, display_name, instagram_username, role FROM users WHERE email = ?",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(profile_from_row))
    }

    /// Store or replace the user's index credential.
    pub async fn write_index_config(&self, user_id: &str, credential: &IndexCredential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_indexes (user_id, index_name, api_key, project_name, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                index_name = excluded.index_name,
                api_key = excluded.api_key,
                project_name = excluded.project_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&credential.index_name)
        .bind(&credential.api_key)
        .bind(&credential.project_name)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store or replace one of the user's system prompts.
    pub async fn write_prompt(&self, user_id: &str, kind: PromptKind, text: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prompts (user_id, kind, text, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, kind) DO UPDATE SET
                text = excluded.text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(text)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for SqliteAccounts {
    async fn sign_in(&self, email: &str, password: &str) -> Result<String> {
        let row = sqlx::query("SELECT id, password_hash, salt FROM users WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => bail!("invalid email or password"),
        };
        let salt: String = row.get("salt");
        let stored: String = row.get("password_hash");
        if hash_password(&salt, password) != stored {
            bail!("invalid email or password");
        }

        let user_id: String = row.get("id");
        let token = Uuid::new_v4().simple().to_string();
        let now = Utc::now().timestamp();
        sqlx::query("INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(&token)
            .bind(&user_id)
            .bind(now)
            .bind(now + SESSION_TTL_SECS)
            .execute(&self.pool)
            .await?;

        info!(%user_id, "signed in");
        Ok(token)
    }

    async fn get_user_info(&self, token: &str) -> Result<UserProfile> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.email, u.display_name, u.instagram_username, u.role
            FROM sessions s JOIN users u ON u.id = s.user_id
            WHERE s.token = ? AND s.expires_at > ?
            "#,
        )
        .bind(token)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(profile_from_row(&row)),
            None => bail!("session expired or invalid"),
        }
    }

    async fn sign_out(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for SqliteAccounts {
    async fn read_index_config(&self, user_id: &str) -> Result<Option<IndexCredential>> {
        let row = sqlx::query(
            "SELECT index_name, api_key, project_name FROM user_indexes WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| IndexCredential {
            index_name: row.get("index_name"),
            api_key: row.get("api_key"),
            project_name: row.get("project_name"),
        }))
    }

    async fn read_prompt(&self, user_id: &str, kind: PromptKind) -> Result<Option<String>> {
        let row = sqlx::query("SELECT text FROM prompts WHERE user_id = ? AND kind = ?")
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<String, _>("text")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_depends_on_salt() {
        assert_ne!(hash_password("a", "secret"), hash_password("b", "secret"));
        assert_eq!(hash_password("a", "secret"), hash_password("a", "secret"));
        assert_eq!(hash_password("a", "secret").len(), 64);
    }

    #[test]
    fn test_prompt_kind_parse() {
        assert_eq!("post".parse::<PromptKind>().unwrap(), PromptKind::Post);
        assert_eq!("title".parse::<PromptKind>().unwrap(), PromptKind::Title);
        assert!("other".parse::<PromptKind>().is_err());
    }
}
