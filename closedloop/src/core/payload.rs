//! Extract a JSON object from free-form model output.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("fenced json regex is valid")
});

/// Pull the first JSON object out of `text`.
///
/// Tries a fenced ```json block, then the whole trimmed text, then the widest
/// `{...}` span. Returns `None` when nothing parses as an object.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = FENCED_JSON_RE.captures(text)
        && let Some(object) = parse_object(&caps[1])
    {
        return Some(object);
    }

    if text.starts_with('{')
        && text.ends_with('}')
        && let Some(object) = parse_object(text)
    {
        return Some(object);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&text[start..=end])
}

fn parse_object(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Pull the body of the first fenced code block (any language tag) out of `text`.
pub fn extract_code_block(text: &str) -> Option<String> {
    static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)```").expect("code block regex is valid")
    });
    CODE_BLOCK_RE
        .captures(text)
        .map(|caps| caps[1].to_string())
}
