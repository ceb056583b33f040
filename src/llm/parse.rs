use regex::Regex;
use serde::de::DeserializeOwned;

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Try to fix common JSON issues from LLM responses
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Remove trailing commas before ] or }
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    // Smart quotes to regular quotes
    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    // Remove control characters that might have slipped in
    fixed = fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    fixed
}

/// Parse a typed JSON payload from an LLM answer.
///
/// Tolerates both a fenced ```json block and a raw object; the shape is
/// enforced by serde so a malformed answer is indistinguishable from an
/// empty one. Returns `None` on any mismatch.
pub fn parse_json_payload<T: DeserializeOwned>(response: &str) -> Option<T> {
    if response.trim().is_empty() {
        return None;
    }
    let clean = strip_markdown_fences(response);
    let fragment = extract_json_fragment(clean, '{', '}')?;

    match serde_json::from_str::<T>(fragment) {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            let fixed = fix_json_issues(fragment);
            serde_json::from_str::<T>(&fixed).ok()
        }
    }
}

/// Extract the first fenced code block from a response.
///
/// Accepts an optional language tag after the opening fence. Returns the
/// trimmed body, or `None` when the answer carries no fence at all.
pub fn extract_first_code_block(response: &str) -> Option<String> {
    code_block_regex()
        .captures(response)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract the last fenced code block from a response.
///
/// Fix answers often restate the broken snippet before the corrected one;
/// the last block is the candidate that matters.
pub fn extract_last_code_block(response: &str) -> Option<String> {
    code_block_regex()
        .captures_iter(response)
        .last()
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

fn code_block_regex() -> Regex {
    // Language tag is optional and unvalidated; models label TypeScript
    // snippets inconsistently.
    Regex::new(r"```[ \t]*[a-zA-Z]*[ \t]*\r?\n([\s\S]*?)```").unwrap_or_else(|_| unreachable!())
}
