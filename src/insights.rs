//! Per-post performance records and their summary.
//!
//! Records are keyed by `(user_id, post_id)`. A user only ever sees and
//! edits their own records.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub post_id: String,
    pub user_id: String,
    pub post_url: String,
    pub plot: Option<String>,
    pub save_count: i64,
    pub like_count: i64,
    pub reach_count: i64,
    pub new_reach_count: i64,
    pub followers_reach_count: i64,
    pub posted_at: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// User-entered fields of a record.
#[derive(Debug, Clone, Default)]
pub struct InsightInput {
    pub post_url: String,
    pub plot: Option<String>,
    pub save_count: i64,
    pub like_count: i64,
    pub reach_count: i64,
    pub new_reach_count: i64,
    pub followers_reach_count: i64,
    pub posted_at: NaiveDate,
}

impl InsightInput {
    fn validate(&self) -> Result<()> {
        let counts = [
            ("save_count", self.save_count),
            ("like_count", self.like_count),
            ("reach_count", self.reach_count),
            ("new_reach_count", self.new_reach_count),
            ("followers_reach_count", self.followers_reach_count),
        ];
        for (name, value) in counts {
            if value < 0 {
                bail!("{} must be >= 0, got {}", name, value);
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn create(&self, user_id: &str, input: InsightInput) -> Result<Insight>;

    /// All of the user's records, newest post first.
    async fn read_all(&self, user_id: &str) -> Result<Vec<Insight>>;

    /// Replace the user-entered fields of an existing record.
    async fn update(&self, user_id: &str, post_id: &str, input: InsightInput) -> Result<Insight>;

    /// Returns `false` when no such record existed.
    async fn delete(&self, user_id: &str, post_id: &str) -> Result<bool>;
}

pub struct SqliteInsights {
    pool: SqlitePool,
}

impl SqliteInsights {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn read_one(&self, user_id: &str, post_id: &str) -> Result<Option<Insight>> {
        let row = sqlx::query(
            "SELECT * FROM insights WHERE user_id = ? AND post_id = ?",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(insight_from_row).transpose()
    }
}

fn insight_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Insight> {
    let posted_at: String = row.get("posted_at");
    let created_at: i64 = row.get("created_at");
    Ok(Insight {
        post_id: row.get("post_id"),
        user_id: row.get("user_id"),
        post_url: row.get("post_url"),
        plot: row.get("plot"),
        save_count: row.get("save_count"),
        like_count: row.get("like_count"),
        reach_count: row.get("reach_count"),
        new_reach_count: row.get("new_reach_count"),
        followers_reach_count: row.get("followers_reach_count"),
        posted_at: NaiveDate::parse_from_str(&posted_at, "%Y-%m-%d")
            .with_context(|| format!("invalid posted_at: {}", posted_at))?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    })
}

#[async_trait]
impl InsightStore for SqliteInsights {
    async fn create(&self, user_id: &str, input: InsightInput) -> Result<Insight> {
        input.validate()?;
        let post_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO insights (user_id, post_id, post_url, plot, save_count, like_count,
                reach_count, new_reach_count, followers_reach_count, posted_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(&post_id)
        .bind(&input.post_url)
        .bind(&input.plot)
        .bind(input.save_count)
        .bind(input.like_count)
        .bind(input.reach_count)
        .bind(input.new_reach_count)
        .bind(input.followers_reach_count)
        .bind(input.posted_at.format("%Y-%m-%d").to_string())
        .bind(created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(Insight {
            post_id,
            user_id: user_id.to_string(),
            post_url: input.post_url,
            plot: input.plot,
            save_count: input.save_count,
            like_count: input.like_count,
            reach_count: input.reach_count,
            new_reach_count: input.new_reach_count,
            followers_reach_count: input.followers_reach_count,
            posted_at: input.posted_at,
            created_at: DateTime::from_timestamp(created_at.timestamp(), 0).unwrap_or_default(),
        })
    }

    async fn read_all(&self, user_id: &str) -> Result<Vec<Insight>> {
        let rows = sqlx::query(
            "SELECT * FROM insights WHERE user_id = ? ORDER BY posted_at DESC, created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(insight_from_row).collect()
    }

    async fn update(&self, user_id: &str, post_id: &str, input: InsightInput) -> Result<Insight> {
        input.validate()?;
        let result = sqlx::query(
            r#"
            UPDATE insights SET post_url = ?, plot = ?, save_count = ?, like_count = ?,
                reach_count = ?, new_reach_count = ?, followers_reach_count = ?, posted_at = ?
            WHERE user_id = ? AND post_id = ?
            "#,
        )
        .bind(&input.post_url)
        .bind(&input.plot)
        .bind(input.save_count)
        .bind(input.like_count)
        .bind(input.reach_count)
        .bind(input.new_reach_count)
        .bind(input.followers_reach_count)
        .bind(input.posted_at.format("%Y-%m-%d").to_string())
        .bind(user_id)
        .bind(post_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("insight not found: {}", post_id);
        }
        match self.read_one(user_id, post_id).await? {
            Some(insight) => Ok(insight),
            None => bail!("insight not found: {}", post_id),
        }
    }

    async fn delete(&self, user_id: &str, post_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM insights WHERE user_id = ? AND post_id = ?")
            .bind(user_id)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Totals over a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightSummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub posts: usize,
    pub saves: i64,
    pub reach: i64,
    /// Saves per reach, as a percentage rounded to two decimals. 0 when
    /// reach is 0.
    pub save_rate: f64,
    pub followers_reach: i64,
    pub new_reach: i64,
    /// Not derivable from stored fields; always 0.
    pub home_rate: f64,
    pub likes: i64,
    /// Not derivable from stored fields; always 0.
    pub followers: i64,
}

/// The seven days ending on `today`.
pub fn default_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(6), today)
}

/// Sum the records posted between `start` and `end`, both inclusive.
pub fn summarize(insights: &[Insight], start: NaiveDate, end: NaiveDate) -> InsightSummary {
    let in_range: Vec<&Insight> = insights
        .iter()
        .filter(|i| i.posted_at >= start && i.posted_at <= end)
        .collect();

    let saves: i64 = in_range.iter().map(|i| i.save_count).sum();
    let reach: i64 = in_range.iter().map(|i| i.reach_count).sum();
    let save_rate = if reach > 0 {
        (saves as f64 / reach as f64 * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    };

    InsightSummary {
        start,
        end,
        posts: in_range.len(),
        saves,
        reach,
        save_rate,
        followers_reach: in_range.iter().map(|i| i.followers_reach_count).sum(),
        new_reach: in_range.iter().map(|i| i.new_reach_count).sum(),
        home_rate: 0.0,
        likes: in_range.iter().map(|i| i.like_count).sum(),
        followers: 0,
    }
}
