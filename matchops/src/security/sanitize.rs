//! Input sanitization and suspicious-pattern detection

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named injection/XSS signatures
static SUSPICIOUS_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("script_tag", r"(?i)<script\b[^>]*>[\s\S]*?</script>"),
        ("exec_call", r"(?i)\bexec\s*\("),
        ("boolean_injection", r"(?i)\b(?:and|or)\b\s+\S+\s*="),
        ("html_tag", r"<[^>]+>"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("suspicious pattern")))
    .collect()
});

/// A value that matched a suspicious pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Signature name, e.g. `script_tag`
    pub pattern: String,
    /// The regex that matched
    pub regex: String,
    /// JSON path of the value, e.g. `body.comment`
    pub path: String,
    pub value: String,
}

/// Strip `<` and `>` from every string, recursively
///
/// Object keys are kept as-is. Idempotent.
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(['<', '>'], "")),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Scan every string leaf of `value` as received and as sanitized
///
/// Markup signatures only match the received form, since sanitizing
/// removes the brackets they rely on; one match is reported per
/// signature and path.
pub fn scan_suspicious(value: &Value, root: &str) -> Vec<PatternMatch> {
    let mut matches = Vec::new();
    scan_into(value, root, &mut matches);
    matches
}

fn scan_into(value: &Value, path: &str, matches: &mut Vec<PatternMatch>) {
    match value {
        Value::String(raw) => {
            let cleaned = raw.replace(['<', '>'], "");
            for (name, regex) in SUSPICIOUS_PATTERNS.iter() {
                if regex.is_match(raw) || regex.is_match(&cleaned) {
                    matches.push(PatternMatch {
                        pattern: name.to_string(),
                        regex: regex.as_str().to_string(),
                        path: path.to_string(),
                        value: raw.clone(),
                    });
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                scan_into(item, &format!("{}[{}]", path, i), matches);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                scan_into(item, &format!("{}.{}", path, key), matches);
            }
        }
        _ => {}
    }
}
