//! Text extraction for fetched and uploaded documents.
//!
//! Three input shapes are supported:
//!
//! | Input | Function | Notes |
//! |-------|----------|-------|
//! | PDF bytes | [`extract_pdf`] | Page by page via `lopdf`, whole-document `pdf-extract` fallback |
//! | HTML | [`extract_html`] | Title, meta description, headings, paragraphs, captions, image alt |
//! | JSON | [`extract_json`] | Known keys collected from any depth |
//!
//! Extraction never panics. A page that yields no text contributes an
//! empty string and an [`ExtractError::Page`] note; only a document that
//! neither backend can open is an error, and the loader absorbs that too.

use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ExtractError;

/// Structured keys lifted out of web content, in priority order.
pub const FIELD_KEYS: [&str; 7] = [
    "title",
    "description",
    "caption",
    "text",
    "body",
    "content",
    "alt",
];

/// Text extracted from a PDF, one entry per page in page order.
#[derive(Debug, Default)]
pub struct PdfText {
    pub pages: Vec<String>,
    /// Pages that could not be read. Their entry in `pages` is empty.
    pub issues: Vec<ExtractError>,
}

impl PdfText {
    /// Non-empty pages joined with newlines.
    pub fn joined(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Fields and body text pulled out of a web page or JSON payload.
#[derive(Debug, Default, PartialEq)]
pub struct Extracted {
    pub fields: BTreeMap<String, String>,
    pub text: String,
}

/// Extract text from PDF bytes page by page.
pub fn extract_pdf(bytes: &[u8]) -> Result<PdfText, ExtractError> {
    match lopdf::Document::load_mem(bytes) {
        Ok(doc) => {
            let mut out = PdfText::default();
            for page in doc.get_pages().keys().copied() {
                match doc.extract_text(&[page]) {
                    Ok(text) => out.pages.push(text),
                    Err(e) => {
                        out.pages.push(String::new());
                        out.issues.push(ExtractError::Page {
                            page,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Ok(out)
        }
        Err(load_err) => {
            // lopdf is stricter about xref damage than pdf-extract.
            let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
                ExtractError::Pdf(format!("{}; fallback: {}", load_err, e))
            })?;
            Ok(PdfText {
                pages: vec![text],
                issues: Vec::new(),
            })
        }
    }
}

/// Extract fields and readable text from an HTML document.
///
/// `fields` gets `title` (the `<title>` element, else `og:title`),
/// `description` (meta description, else `og:description`), `caption`
/// (first `<figcaption>`) and `alt` (image alt texts). `text` is the
/// headings, paragraphs and list items in document order; when the page
/// has none of those it falls back to all visible body text.
pub fn extract_html(html: &str) -> Extracted {
    let doc = Html::parse_document(html);
    let mut fields = BTreeMap::new();

    let title = first_text(&doc, "title")
        .or_else(|| meta_content(&doc, "meta[property=\"og:title\"]"));
    if let Some(title) = title {
        fields.insert("title".to_string(), title);
    }
    let description = meta_content(&doc, "meta[name=\"description\"]")
        .or_else(|| meta_content(&doc, "meta[property=\"og:description\"]"));
    if let Some(description) = description {
        fields.insert("description".to_string(), description);
    }
    if let Some(caption) = first_text(&doc, "figcaption") {
        fields.insert("caption".to_string(), caption);
    }
    let alts: Vec<String> = select(&doc, "img[alt]")
        .into_iter()
        .filter_map(|el| el.value().attr("alt").map(normalize))
        .filter(|a| !a.is_empty())
        .collect();
    if !alts.is_empty() {
        fields.insert("alt".to_string(), alts.join(" / "));
    }

    let blocks: Vec<String> = select(&doc, "h1, h2, h3, h4, p, li")
        .into_iter()
        .map(|el| normalize(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();

    let text = if blocks.is_empty() {
        select(&doc, "body")
            .into_iter()
            .next()
            .map(|body| normalize(&body.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_default()
    } else {
        blocks.join("\n")
    };

    Extracted { fields, text }
}

/// Collect [`FIELD_KEYS`] from a JSON document.
///
/// The first string found for each key wins, searching depth first.
/// Arrays of strings under a known key are joined with newlines. The
/// body text is the fields in key order, falling back to every string
/// in the document when none of the keys are present.
pub fn extract_json(value: &Value) -> Extracted {
    let mut fields = BTreeMap::new();
    collect_keys(value, &mut fields);

    let text = if fields.is_empty() {
        let mut strings = Vec::new();
        collect_strings(value, &mut strings);
        strings.join("\n")
    } else {
        FIELD_KEYS
            .iter()
            .filter_map(|k| fields.get(*k))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    };

    Extracted { fields, text }
}

fn collect_keys(value: &Value, fields: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let key_lc = key.to_lowercase();
                if FIELD_KEYS.contains(&key_lc.as_str()) && !fields.contains_key(&key_lc) {
                    if let Some(text) = scalar_text(v) {
                        fields.insert(key_lc, text);
                        continue;
                    }
                }
                collect_keys(v, fields);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_keys(item, fields);
            }
        }
        _ => {}
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(normalize(s)).filter(|s| !s.is_empty()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|i| i.as_str().map(normalize))
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let s = normalize(s);
            if !s.is_empty() {
                out.push(s);
            }
        }
        Value::Array(items) => items.iter().for_each(|i| collect_strings(i, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn select<'a>(doc: &'a Html, css: &str) -> Vec<scraper::ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => doc.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    select(doc, css)
        .into_iter()
        .map(|el| normalize(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    select(doc, css)
        .into_iter()
        .filter_map(|el| el.value().attr("content").map(normalize))
        .find(|t| !t.is_empty())
}

/// Collapse runs of whitespace into single spaces.
fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn joined_skips_empty_pages() {
        let text = PdfText {
            pages: vec!["one".into(), "".into(), "  three ".into()],
            issues: vec![],
        };
        assert_eq!(text.joined(), "one\nthree");
    }

    #[test]
    fn html_fields_and_blocks() {
        let html = r#"<html><head>
            <title> 春の新作 </title>
            <meta name="description" content="桜色のコスメ特集">
            </head><body>
            <nav>menu</nav>
            <h1>新作紹介</h1>
            <p>今年の春は   桜色。</p>
            <figure><img src="a.png" alt="リップ"><figcaption>限定色</figcaption></figure>
            </body></html>"#;
        let out = extract_html(html);
        assert_eq!(out.fields["title"], "春の新作");
        assert_eq!(out.fields["description"], "桜色のコスメ特集");
        assert_eq!(out.fields["caption"], "限定色");
        assert_eq!(out.fields["alt"], "リップ");
        assert_eq!(out.text, "新作紹介\n今年の春は 桜色。");
    }

    #[test]
    fn html_without_blocks_falls_back_to_body_text() {
        let out = extract_html("<html><body><div>plain <span>words</span></div></body></html>");
        assert!(out.fields.is_empty());
        assert_eq!(out.text, "plain words");
    }

    #[test]
    fn json_known_keys_at_any_depth() {
        let value = json!({
            "data": {
                "post": {"caption": "夏のコーデ", "likes": 10},
                "title": "Summer"
            },
            "text": ["line one", "line two"]
        });
        let out = extract_json(&value);
        assert_eq!(out.fields["caption"], "夏のコーデ");
        assert_eq!(out.fields["title"], "Summer");
        assert_eq!(out.fields["text"], "line one\nline two");
        assert_eq!(out.text, "Summer\n夏のコーデ\nline one\nline two");
    }

    #[test]
    fn json_unknown_structure_degrades_to_all_strings() {
        let out = extract_json(&json!({"a": "x", "b": [1, "y"]}));
        assert!(out.fields.is_empty());
        assert_eq!(out.text, "x\ny");
    }
}
