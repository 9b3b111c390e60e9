//! Tool-declaration schema sanitizer.
//!
//! The upstream rejects several JSON-Schema draft keywords, so declarations
//! are reduced to a strict allowlist: `type`, `properties`, `required`,
//! `items`, `enum`, `description`. Combinators (`oneOf`/`anyOf`) collapse
//! to their first branch. The walk is idempotent.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Keys copied verbatim (after recursion where they nest schemas).
const ALLOWED_KEYS: [&str; 6] = ["type", "properties", "required", "items", "enum", "description"];

static NAME_OK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("name regex"));

static NAME_BAD_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("bad-char regex"));

/// Reduce a schema fragment to the upstream-supported subset.
#[must_use]
pub fn sanitize_schema(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };

    // Combinators: keep the first branch only.
    for combinator in ["oneOf", "anyOf"] {
        if let Some(first) = map.get(combinator).and_then(Value::as_array).and_then(|a| a.first())
        {
            return sanitize_schema(first);
        }
    }

    let mut cleaned = Map::new();
    for key in ALLOWED_KEYS {
        let Some(value) = map.get(key) else { continue };
        let sanitized = match key {
            "properties" => {
                // Property names are data, not keywords: recurse into the
                // values only.
                let Value::Object(props) = value else { continue };
                Value::Object(
                    props.iter().map(|(name, sub)| (name.clone(), sanitize_schema(sub))).collect(),
                )
            }
            "items" => sanitize_schema(value),
            _ => value.clone(),
        };
        let _ = cleaned.insert(key.to_string(), sanitized);
    }

    Value::Object(cleaned)
}

/// Normalize a tool name to `[A-Za-z0-9_-]{1,64}`.
///
/// Invalid characters become underscores; overlong names truncate; an empty
/// result falls back to `"tool"`.
#[must_use]
pub fn normalize_tool_name(name: &str) -> String {
    if NAME_OK.is_match(name) {
        return name.to_string();
    }
    let replaced = NAME_BAD_CHAR.replace_all(name, "_");
    let truncated: String = replaced.chars().take(64).collect();
    if truncated.is_empty() { "tool".to_string() } else { truncated }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
