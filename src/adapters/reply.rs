//! Best-effort JSON extraction from free-text replies.
//!
//! Models and scripts often wrap JSON in markdown fences or print a line of
//! chatter before it. These helpers strip that and fall back to an explicit
//! value when nothing parses.

use serde_json::Value;

/// Remove a surrounding ```lang ... ``` fence, if present
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };

    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse JSON from a reply, tolerating fences and a leading preamble
pub fn parse_json_reply(text: &str) -> Option<Value> {
    let body = strip_fences(text);
    if body.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }

    // Last resort: the outermost object in the text
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

/// Parse JSON from a reply, or return the fallback
pub fn parse_json_or(text: &str, fallback: Value) -> Value {
    parse_json_reply(text).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("```\nplain\n```"), "plain");
        assert_eq!(strip_fences("  no fences  "), "no fences");
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "```json\n{\"url\": \"https://demo.pages.dev\"}\n```";
        assert_eq!(
            parse_json_reply(reply),
            Some(json!({"url": "https://demo.pages.dev"}))
        );
    }

    #[test]
    fn test_parse_json_after_preamble() {
        let reply = "Deploying...\n{\"url\": \"https://x.dev\", \"cost\": 0}";
        assert_eq!(parse_json_reply(reply).unwrap()["url"], "https://x.dev");
    }

    #[test]
    fn test_fallback_when_nothing_parses() {
        let fallback = json!({"output": "done"});
        assert_eq!(parse_json_or("done", fallback.clone()), fallback);
        assert_eq!(parse_json_reply(""), None);
    }
}
