//! Failure kinds of the retrieval pipeline.
//!
//! Every core operation resolves to one of these kinds so the caller can
//! show a short message instead of crashing. A URL rejected by policy is
//! not an error; see [`LoadOutcome::Blocked`](crate::loader::LoadOutcome).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// The source could not be fetched. The user may retry with other input.
    #[error("failed to fetch {origin}: {reason}")]
    Fetch { origin: String, reason: String },

    /// An embedding batch failed. Nothing from the document was written.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The vector index is missing, unreachable at startup, or misconfigured.
    #[error("vector index initialization failed: {0}")]
    IndexInit(String),

    /// A request against an initialized index failed.
    #[error("vector store request failed: {0}")]
    Store(String),

    /// The LLM returned nothing usable.
    #[error("generation failed: {0}")]
    Generation(String),
}

impl RagError {
    /// Short message suitable for showing to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            RagError::Fetch { .. } => {
                "このURLは読み込めませんでした。別のURLをお試し下さい。"
            }
            RagError::Embedding(_) => "データの登録に失敗しました。時間をおいて再度お試し下さい。",
            RagError::IndexInit(_) => "インデックスの初期化に失敗しました",
            RagError::Store(_) => "データベースへのアクセスに失敗しました。再度お試し下さい。",
            RagError::Generation(_) => "エラー: プロットを生成できませんでした。",
        }
    }

    /// Only index initialization failures halt the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RagError::IndexInit(_))
    }
}

/// Text extraction failure. Always absorbed inside the loader.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("page {page} has no extractable text: {reason}")]
    Page { page: u32, reason: String },
}

pub type RagResult<T> = std::result::Result<T, RagError>;
