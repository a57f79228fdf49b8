//! Built-in system prompts, used when a user has not saved their own.

use anyhow::Result;

use crate::accounts::{ConfigStore, PromptKind};

pub const POST_PROMPT_EXAMPLE: &str = "\
あなたはInstagramの投稿を企画するプロのコンテンツプランナーです。
参考情報に含まれる事実だけを根拠に、依頼されたテーマの投稿プロットを作成してください。

# 出力形式
- 1枚目: 思わず保存したくなるタイトル
- 2〜9枚目: 各スライドの見出しと本文(各100字以内)
- 最終枚: 保存とフォローを促す一文
- キャプション: 300字程度、ハッシュタグを5つ

# 注意
- 参考情報にない数値や固有名詞を作らないこと
- 過去プロットと同じ構成の繰り返しは避けること";

pub const TITLE_PROMPT_EXAMPLE: &str = "\
あなたはInstagramの投稿タイトルを考えるコピーライターです。
参考情報は過去に反応の良かった投稿タイトルの一覧です。
その傾向を踏まえ、依頼されたキーワードに沿った新しいタイトル案を10個提案してください。

# 出力形式
- 1行に1案、番号や記号を付けずに出力すること
- 各案は30字以内";

/// The built-in prompt for `kind`.
pub fn example(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::Post => POST_PROMPT_EXAMPLE,
        PromptKind::Title => TITLE_PROMPT_EXAMPLE,
    }
}

/// The user's saved prompt, or the built-in one when none is saved.
pub async fn resolve(store: &dyn ConfigStore, user_id: &str, kind: PromptKind) -> Result<String> {
    Ok(match store.read_prompt(user_id, kind).await? {
        Some(text) if !text.trim().is_empty() => text,
        _ => example(kind).to_string(),
    })
}
