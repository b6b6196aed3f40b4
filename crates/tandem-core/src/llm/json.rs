//! Tolerant JSON extraction from LLM output
//!
//! Models wrap JSON in fenced code blocks or prose more often than not. The
//! extraction order is fixed: fenced block first, then the first balanced
//! `{...}` span, then the raw text. The raw text only counts when it
//! actually parses.

use serde_json::Value;

/// Extract the first JSON object from LLM output.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(fenced) = fenced_block(text) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced.trim()) {
            return Some(value);
        }
    }
    if let Some(span) = balanced_span(text) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return Some(value);
        }
    }
    serde_json::from_str::<Value>(text.trim()).ok()
}

/// The contents of the first ``` fence, tolerant of a language tag
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag line ("json", "JSON", ...)
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// The first balanced `{...}` span, string-literal aware
fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
