//! Title and topic suggestions from past plots.

use tracing::info;

use crate::error::RagResult;
use crate::models::{Namespace, ScoredMatch, META_TITLE};
use crate::rag::{LlmCall, Orchestrator};

/// Query used when the user leaves the keyword box empty.
pub const WILDCARD_QUERY: &str = "*";

const TITLE_MAX_CHARS: usize = 80;

/// Title of a stored record: its `title` metadata, else the first
/// non-empty line of its text, cut to a readable length.
pub fn record_title(hit: &ScoredMatch) -> Option<String> {
    if let Some(title) = hit.metadata.get(META_TITLE) {
        let title = title.trim();
        if !title.is_empty() {
            return Some(title.to_string());
        }
    }
    hit.text()
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|line| line.chars().take(TITLE_MAX_CHARS).collect())
}

/// Split an LLM answer into candidates, one per non-blank line, in order.
pub fn parse_candidates(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render candidates as a bulleted list.
pub fn render(candidates: &[String]) -> String {
    candidates
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ask the LLM for new titles in the style of the records in `namespace`.
///
/// An empty query searches with [`WILDCARD_QUERY`]. The returned
/// candidates are in the order the model produced them. The LLM call is
/// traced under `project` as a `titles` run.
pub async fn suggest_titles(
    orchestrator: &Orchestrator,
    query: &str,
    namespace: &Namespace,
    llm_choice: &str,
    system_prompt: &str,
    top_k: usize,
    project: &str,
) -> RagResult<Vec<String>> {
    let query = if query.trim().is_empty() {
        WILDCARD_QUERY
    } else {
        query
    };
    let backend = orchestrator.backend(llm_choice)?;
    let passages = orchestrator
        .retrieve(query, std::slice::from_ref(namespace), top_k)
        .await?;

    let mut titles: Vec<String> = Vec::new();
    for title in passages.iter().filter_map(|p| record_title(&p.hit)) {
        if !titles.contains(&title) {
            titles.push(title);
        }
    }
    let context = titles
        .iter()
        .map(|t| format!("- {}", t))
        .collect::<Vec<_>>()
        .join("\n");

    let raw = orchestrator
        .complete_traced(
            backend,
            LlmCall {
                run_name: "titles",
                llm_choice,
                system_prompt,
                context: &context,
                message: query,
                project,
                namespaces: std::slice::from_ref(namespace),
                passages: passages.len(),
            },
        )
        .await?;
    let candidates = parse_candidates(&raw);

    info!(
        namespace = %namespace,
        references = titles.len(),
        candidates = candidates.len(),
        "titles suggested"
    );
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn hit(metadata: &[(&str, &str)]) -> ScoredMatch {
        ScoredMatch {
            id: "x".into(),
            score: 0.0,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_title_prefers_metadata() {
        let h = hit(&[("title", "春の新作"), ("text", "本文")]);
        assert_eq!(record_title(&h).as_deref(), Some("春の新作"));
    }

    #[test]
    fn test_title_falls_back_to_first_line() {
        let h = hit(&[("text", "\n  夏の海コーデ5選  \n本文")]);
        assert_eq!(record_title(&h).as_deref(), Some("夏の海コーデ5選"));
        assert_eq!(record_title(&hit(&[])), None);
    }

    #[test]
    fn test_candidates_drop_blank_lines_and_keep_order() {
        let raw = "案B\n\n  案A  \n\t\n案C";
        let candidates = parse_candidates(raw);
        assert_eq!(candidates, vec!["案B", "案A", "案C"]);
        assert_eq!(render(&candidates), "- 案B\n- 案A\n- 案C");
    }
}
