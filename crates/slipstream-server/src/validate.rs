//! Request validation, run on the raw JSON before typed parsing.
//!
//! Shape and size caps from the public contract: ≤500 messages, ≤100
//! tools, ≤1 MiB per text block, ≤10 MiB per image, `max_tokens` in
//! `[1, 200000]`, and a deep scan rejecting prototype-pollution key names
//! anywhere in the document.

use serde_json::Value;

use slipstream_core::constants::{
    MAX_IMAGE_BYTES, MAX_MESSAGES, MAX_OUTPUT_TOKENS_CAP, MAX_TEXT_BLOCK_BYTES, MAX_TOOLS,
};
use slipstream_core::{ProxyError, ProxyResult};

/// Key names rejected anywhere in the request document.
const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

fn invalid(message: impl Into<String>) -> ProxyError {
    ProxyError::InvalidRequest { message: message.into() }
}

/// Validate a `/v1/messages` request body.
pub fn validate_messages_request(body: &Value) -> ProxyResult<()> {
    reject_forbidden_keys(body)?;

    let object = body.as_object().ok_or_else(|| invalid("request body must be an object"))?;

    match object.get("model").and_then(Value::as_str) {
        Some(model) if !model.is_empty() => {}
        _ => return Err(invalid("model must be a non-empty string")),
    }

    let max_tokens = object
        .get("max_tokens")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid("max_tokens must be a positive integer"))?;
    if max_tokens < 1 || max_tokens > u64::from(MAX_OUTPUT_TOKENS_CAP) {
        return Err(invalid(format!(
            "max_tokens must be between 1 and {MAX_OUTPUT_TOKENS_CAP}"
        )));
    }

    let messages = object
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("messages must be an array"))?;
    if messages.is_empty() {
        return Err(invalid("messages must not be empty"));
    }
    if messages.len() > MAX_MESSAGES {
        return Err(invalid(format!("messages exceeds the {MAX_MESSAGES}-entry cap")));
    }
    for (index, message) in messages.iter().enumerate() {
        validate_message(message)
            .map_err(|e| invalid(format!("messages[{index}]: {e}")))?;
    }

    if let Some(tools) = object.get("tools") {
        let tools = tools.as_array().ok_or_else(|| invalid("tools must be an array"))?;
        if tools.len() > MAX_TOOLS {
            return Err(invalid(format!("tools exceeds the {MAX_TOOLS}-entry cap")));
        }
        for (index, tool) in tools.iter().enumerate() {
            if tool.get("name").and_then(Value::as_str).is_none_or(str::is_empty) {
                return Err(invalid(format!("tools[{index}] is missing a name")));
            }
        }
    }

    if let Some(stream) = object.get("stream") {
        if !stream.is_boolean() {
            return Err(invalid("stream must be a boolean"));
        }
    }

    Ok(())
}

fn validate_message(message: &Value) -> Result<(), String> {
    let object = message.as_object().ok_or("must be an object")?;

    match object.get("role").and_then(Value::as_str) {
        Some("user" | "assistant") => {}
        Some(other) => return Err(format!("unknown role {other:?}")),
        None => return Err("missing role".into()),
    }

    match object.get("content") {
        Some(Value::String(text)) => check_text_size(text)?,
        Some(Value::Array(blocks)) => {
            for block in blocks {
                validate_block(block)?;
            }
        }
        _ => return Err("content must be a string or an array of blocks".into()),
    }

    Ok(())
}

fn validate_block(block: &Value) -> Result<(), String> {
    let object = block.as_object().ok_or("content block must be an object")?;
    let block_type = object.get("type").and_then(Value::as_str).ok_or("block missing type")?;

    match block_type {
        "text" => {
            let text = object.get("text").and_then(Value::as_str).ok_or("text block missing text")?;
            check_text_size(text)?;
        }
        "image" => {
            if let Some(data) = object
                .get("source")
                .and_then(|s| s.get("data"))
                .and_then(Value::as_str)
            {
                if data.len() > MAX_IMAGE_BYTES {
                    return Err(format!("image data exceeds {MAX_IMAGE_BYTES} bytes"));
                }
            }
        }
        "tool_use" => {
            if object.get("id").and_then(Value::as_str).is_none_or(str::is_empty) {
                return Err("tool_use block missing id".into());
            }
            if object.get("name").and_then(Value::as_str).is_none_or(str::is_empty) {
                return Err("tool_use block missing name".into());
            }
        }
        "tool_result" => {
            if object
                .get("tool_use_id")
                .and_then(Value::as_str)
                .is_none_or(str::is_empty)
            {
                return Err("tool_result block missing tool_use_id".into());
            }
        }
        "thinking" => {
            if object.get("thinking").and_then(Value::as_str).is_none() {
                return Err("thinking block missing thinking text".into());
            }
        }
        "redacted_thinking" => {}
        other => return Err(format!("unknown content block type {other:?}")),
    }
    Ok(())
}

fn check_text_size(text: &str) -> Result<(), String> {
    if text.len() > MAX_TEXT_BLOCK_BYTES {
        return Err(format!("text block exceeds {MAX_TEXT_BLOCK_BYTES} bytes"));
    }
    Ok(())
}

/// Recursively reject prototype-pollution key names.
fn reject_forbidden_keys(value: &Value) -> ProxyResult<()> {
    match value {
        Value::Object(map) => {
            for (key, sub) in map {
                if FORBIDDEN_KEYS.contains(&key.as_str()) {
                    return Err(invalid(format!("forbidden key {key:?} in request")));
                }
                reject_forbidden_keys(sub)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                reject_forbidden_keys(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
