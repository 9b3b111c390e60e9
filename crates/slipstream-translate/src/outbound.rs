//! Upstream response → Anthropic response (non-streaming).

use serde_json::Value;

use slipstream_core::ids::{new_message_id, new_tool_use_id};

use crate::anthropic::{ContentBlock, MessagesResponse, OutputTokensDetails, Usage};
use crate::gemini::{GenerateContentResponse, Part, UsageMetadata};
use crate::signature_cache::SignatureCache;

/// Map an upstream finish reason to an Anthropic stop reason.
///
/// The presence of any function call wins over the reported reason.
#[must_use]
pub fn map_stop_reason(finish_reason: Option<&str>, saw_tool_use: bool) -> &'static str {
    if saw_tool_use {
        return "tool_use";
    }
    match finish_reason {
        Some("MAX_TOKENS") => "max_tokens",
        // SAFETY / RECITATION / STOP / anything else
        _ => "end_turn",
    }
}

/// Aggregate upstream usage metadata into the Anthropic shape.
#[must_use]
pub fn map_usage(metadata: Option<&UsageMetadata>) -> Usage {
    let Some(meta) = metadata else {
        return Usage::default();
    };
    Usage {
        input_tokens: meta.prompt_token_count,
        output_tokens: meta.candidates_token_count,
        cache_read_input_tokens: (meta.cached_content_token_count > 0)
            .then_some(meta.cached_content_token_count),
        output_tokens_details: (meta.thoughts_token_count > 0).then_some(OutputTokensDetails {
            reasoning_tokens: meta.thoughts_token_count,
        }),
    }
}

/// Translate a complete upstream response into an Anthropic message.
///
/// Thought signatures seen here are recorded into the signature cache so
/// replays without them can be restored later.
#[must_use]
pub fn from_upstream(
    model: &str,
    response: &GenerateContentResponse,
    cache: &SignatureCache,
) -> MessagesResponse {
    let mut content = Vec::new();
    let mut saw_tool_use = false;
    let mut finish_reason = None;

    if let Some(candidate) = response.candidates.as_ref().and_then(|c| c.first()) {
        finish_reason = candidate.finish_reason.clone();
        if let Some(parts) = candidate.content.as_ref().map(|c| &c.parts) {
            for part in parts {
                match part {
                    Part::Text { text, thought: Some(true), thought_signature } => {
                        if let Some(sig) = thought_signature {
                            cache.record(text, sig);
                        }
                        content.push(ContentBlock::Thinking {
                            thinking: text.clone(),
                            signature: thought_signature.clone(),
                        });
                    }
                    Part::Text { text, .. } => {
                        if !text.is_empty() {
                            content.push(ContentBlock::text(text.clone()));
                        }
                    }
                    Part::FunctionCall { function_call, thought_signature } => {
                        saw_tool_use = true;
                        let input = match &function_call.args {
                            Value::Object(_) => function_call.args.clone(),
                            Value::Null => Value::Object(serde_json::Map::new()),
                            other => serde_json::from_str(other.as_str().unwrap_or_default())
                                .unwrap_or_else(|_| Value::Object(serde_json::Map::new())),
                        };
                        content.push(ContentBlock::ToolUse {
                            id: new_tool_use_id(),
                            name: function_call.name.clone(),
                            input,
                            thought_signature: thought_signature.clone(),
                        });
                    }
                    // The model never answers with these.
                    Part::FunctionResponse { .. } | Part::InlineData { .. } => {}
                }
            }
        }
    }

    MessagesResponse {
        id: new_message_id(),
        response_type: "message".into(),
        role: "assistant".into(),
        model: model.to_string(),
        content,
        stop_reason: Some(map_stop_reason(finish_reason.as_deref(), saw_tool_use).into()),
        stop_sequence: None,
        usage: map_usage(response.usage_metadata.as_ref()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
