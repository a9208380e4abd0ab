//! Detection of the stale delivery key condition.
//!
//! Push services report a key mismatch in a handful of shapes: a plain text
//! body, a JSON object with the reason under varying field names, or a JSON
//! document serialized into a string field of another one. The matcher
//! flattens all of these into candidate strings and looks for any of the
//! configured patterns.

use serde_json::Value;

use crate::push::error::TransportError;

/// Patterns used when none are configured.
pub const DEFAULT_STALE_KEY_PATTERNS: [&str; 4] = [
    "vapidpkhashmismatch",
    "vapid key mismatch",
    "vapid public key mismatch",
    "do not correspond to the credentials used to create the subscription",
];

/// How deep string-encoded JSON is unpacked.
const MAX_NESTING: usize = 4;

/// Classifies transport errors against a list of case-insensitive patterns.
#[derive(Debug, Clone)]
pub struct StaleKeyMatcher {
    patterns: Vec<String>,
}

impl StaleKeyMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns `true` if `err` reports a stale delivery key.
    pub fn is_stale_key_error(&self, err: &TransportError) -> bool {
        let mut candidates = vec![err.to_string()];
        if let TransportError::Rejected { body, .. } = err {
            collect_strings(body, 0, &mut candidates);
        }

        candidates.iter().any(|candidate| self.matches(candidate))
    }

    fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.patterns.iter().any(|p| text.contains(p.as_str()))
    }
}

impl Default for StaleKeyMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_KEY_PATTERNS)
    }
}

/// Pushes `text` and, if it parses as JSON, every string nested inside it.
fn collect_strings(text: &str, depth: usize, out: &mut Vec<String>) {
    out.push(text.to_string());
    if depth >= MAX_NESTING {
        return;
    }
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with('"')) {
        return;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        collect_value(&value, depth + 1, out);
    }
}

fn collect_value(value: &Value, depth: usize, out: &mut Vec<String>) {
    match value {
        Value::String(s) => collect_strings(s, depth, out),
        Value::Array(items) => items.iter().for_each(|v| collect_value(v, depth, out)),
        Value::Object(map) => {
            for (key, v) in map {
                out.push(key.clone());
                collect_value(v, depth, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(body: &str) -> TransportError {
        TransportError::Rejected {
            status: 403,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_plain_text_body() {
        let matcher = StaleKeyMatcher::default();
        assert!(matcher.is_stale_key_error(&rejected("VapidPkHashMismatch")));
        assert!(!matcher.is_stale_key_error(&rejected("Gone")));
    }

    #[test]
    fn test_nested_json_body() {
        let matcher = StaleKeyMatcher::default();
        let body = serde_json::json!({
            "success": false,
            "error": {
                "details": "{\"reason\":\"VAPID key mismatch for subscription\"}",
            },
        })
        .to_string();
        assert!(matcher.is_stale_key_error(&rejected(&body)));

        let body = serde_json::json!({ "errors": [{ "message": "expired" }] }).to_string();
        assert!(!matcher.is_stale_key_error(&rejected(&body)));
    }

    #[test]
    fn test_fcm_style_message() {
        let matcher = StaleKeyMatcher::default();
        let body = "the VAPID credentials in the authorization header do not correspond to \
                    the credentials used to create the subscriptions.";
        assert!(matcher.is_stale_key_error(&rejected(body)));
    }

    #[test]
    fn test_custom_patterns() {
        let matcher = StaleKeyMatcher::new([" Key Rotated ", ""]);
        assert_eq!(matcher.patterns(), ["key rotated".to_string()]);
        assert!(matcher.is_stale_key_error(&TransportError::InvalidResponse {
            message: "key rotated upstream".to_string()
        }));
        assert!(!matcher.is_stale_key_error(&rejected("VapidPkHashMismatch")));
    }

    #[test]
    fn test_request_failures_are_not_stale() {
        let matcher = StaleKeyMatcher::default();
        let err = TransportError::RequestFailed("connection reset".into());
        assert!(!matcher.is_stale_key_error(&err));
    }

    /// `levels` extra rounds of string encoding around a pattern that only
    /// appears once the innermost JSON string is decoded.
    fn nested_body(levels: usize) -> String {
        let mut body = r#""vapid\u0020key\u0020mismatch""#.to_string();
        for _ in 0..levels {
            body = serde_json::to_string(&body).unwrap();
        }
        body
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let matcher = StaleKeyMatcher::default();
        assert!(!nested_body(0).contains("vapid key mismatch"));

        for levels in 0..MAX_NESTING {
            assert!(
                matcher.is_stale_key_error(&rejected(&nested_body(levels))),
                "expected a match at {levels} extra levels"
            );
        }
        assert!(!matcher.is_stale_key_error(&rejected(&nested_body(MAX_NESTING))));
        assert!(!matcher.is_stale_key_error(&rejected(&nested_body(10))));
    }
}
