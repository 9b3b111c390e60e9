//! Anthropic Messages API wire types and the model registry.
//!
//! Request and response content blocks are tagged sum types; every branch
//! is explicit and nothing relies on duck-typed shape checks. The SSE event
//! enum mirrors the exact streaming wire format, with
//! [`StreamEvent::event_name`] supplying the `event:` line.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use slipstream_core::constants::SIGNATURE_MIN_LEN;

// ─────────────────────────────────────────────────────────────────────────────
// Request types
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /v1/messages` request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Model ID or alias.
    pub model: String,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// System prompt (string or block array).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    /// Tool declarations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Whether to stream the response.
    #[serde(default)]
    pub stream: bool,
    /// Extended-thinking configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingParam>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-K sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Stop sequences (only the first four are forwarded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Opaque client metadata; accepted and ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// System prompt: a plain string or an array of text blocks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Plain string form.
    Text(String),
    /// Block-array form.
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// Flatten to one string, joining blocks with blank lines.
    #[must_use]
    pub fn joined(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// One entry of a block-array system prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemBlock {
    /// Block type (always `"text"`).
    #[serde(rename = "type")]
    pub block_type: String,
    /// Text content.
    pub text: String,
}

/// Extended-thinking request parameter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThinkingParam {
    /// `"enabled"` or `"disabled"`.
    #[serde(rename = "type")]
    pub thinking_type: String,
    /// Thinking token budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

impl ThinkingParam {
    /// Whether thinking is switched on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.thinking_type == "enabled"
    }
}

/// A tool declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-Schema fragment for the input.
    pub input_schema: Value,
}

/// A conversation message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// `user` or `assistant`.
    pub role: Role,
    /// Message content.
    pub content: MessageContent,
}

impl Message {
    /// Build an assistant message from content blocks.
    #[must_use]
    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Blocks(blocks) }
    }

    /// Build a user message from plain text.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    /// The content as a block slice (empty for the plain-string form).
    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }
}

/// Message role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Downstream client.
    User,
    /// The model.
    Assistant,
}

/// Message content: a plain string or an array of blocks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Shorthand string form (equivalent to one text block).
    Text(String),
    /// Block-array form.
    Blocks(Vec<ContentBlock>),
}

/// A content block. Tagged by `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// An image.
    Image {
        /// Image source descriptor.
        source: ImageSource,
    },
    /// A tool invocation emitted by the model.
    ToolUse {
        /// Tool call ID.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input object.
        input: Value,
        /// Upstream thought signature riding on the call (upstream origin).
        #[serde(rename = "thoughtSignature", skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    /// A tool result supplied by the client.
    ToolResult {
        /// ID of the `tool_use` block this answers.
        tool_use_id: String,
        /// Result payload.
        #[serde(default)]
        content: ToolResultContent,
        /// Whether the tool failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// A reasoning trace, signed by the upstream.
    Thinking {
        /// The reasoning text.
        thinking: String,
        /// Integrity signature issued by the upstream.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// A reasoning trace withheld from the client.
    RedactedThinking {
        /// Opaque encrypted payload.
        data: String,
    },
}

impl ContentBlock {
    /// Build a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Whether this is a thinking or redacted-thinking block.
    #[must_use]
    pub fn is_thinking(&self) -> bool {
        matches!(self, Self::Thinking { .. } | Self::RedactedThinking { .. })
    }

    /// Whether this is a thinking block carrying a valid signature.
    /// Redacted thinking always counts as signed.
    #[must_use]
    pub fn has_valid_signature(&self) -> bool {
        match self {
            Self::Thinking { signature, .. } => {
                signature.as_deref().is_some_and(is_valid_signature)
            }
            Self::RedactedThinking { .. } => true,
            _ => false,
        }
    }
}

/// Whether a signature string passes the minimum-length check.
#[must_use]
pub fn is_valid_signature(signature: &str) -> bool {
    signature.len() >= SIGNATURE_MIN_LEN
}

/// Image source descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageSource {
    /// `base64` or `url`.
    #[serde(rename = "type")]
    pub source_type: String,
    /// MIME type (base64 form).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Base64 payload (base64 form).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Image URL (url form).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Tool result payload: plain string or structured blocks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain string form.
    Text(String),
    /// Structured block form (passed through verbatim).
    Blocks(Vec<Value>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response types
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /v1/messages` non-streaming response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Message ID.
    pub id: String,
    /// Always `"message"`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// Always `"assistant"`.
    pub role: String,
    /// Model that produced the response.
    pub model: String,
    /// Content blocks.
    pub content: Vec<ContentBlock>,
    /// Stop reason.
    pub stop_reason: Option<String>,
    /// Stop sequence that fired, when `stop_reason` is `stop_sequence`.
    pub stop_sequence: Option<String>,
    /// Token usage.
    pub usage: Usage,
}

/// Token usage report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens.
    pub input_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// Tokens served from the upstream prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
    /// Output token breakdown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens_details: Option<OutputTokensDetails>,
}

/// Output token breakdown.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputTokensDetails {
    /// Tokens spent on reasoning.
    pub reasoning_tokens: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming event types
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound SSE event. Serialized as the `data:` payload; the `event:` line
/// comes from [`StreamEvent::event_name`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of every stream.
    MessageStart {
        /// Skeleton message with the ID and model.
        message: MessageStart,
    },
    /// A new content block begins.
    ContentBlockStart {
        /// Block index (arrival order).
        index: usize,
        /// The opening block shape.
        content_block: StartBlock,
    },
    /// Incremental content for an open block.
    ContentBlockDelta {
        /// Block index.
        index: usize,
        /// The delta payload.
        delta: Delta,
    },
    /// A block closed. Thought blocks carry their final signature here.
    ContentBlockStop {
        /// Block index.
        index: usize,
        /// Final thought signature, for thinking blocks that received one.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Message-level trailer: stop reason and usage.
    MessageDelta {
        /// Stop reason delta.
        delta: MessageDeltaBody,
        /// Final usage.
        usage: Usage,
    },
    /// Stream complete.
    MessageStop,
    /// Keepalive.
    Ping,
    /// Terminal error event.
    Error {
        /// Error details.
        error: StreamError,
    },
}

impl StreamEvent {
    /// The SSE `event:` name for this event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Ping => "ping",
            Self::Error { .. } => "error",
        }
    }
}

/// Skeleton message inside `message_start`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageStart {
    /// Message ID.
    pub id: String,
    /// Always `"message"`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Always `"assistant"`.
    pub role: String,
    /// Model name.
    pub model: String,
    /// Always empty at start.
    pub content: Vec<ContentBlock>,
    /// Null at start.
    pub stop_reason: Option<String>,
    /// Usage known so far.
    pub usage: Usage,
}

/// Opening shape inside `content_block_start`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartBlock {
    /// A text block opens.
    Text {
        /// Always empty at start.
        text: String,
    },
    /// A thinking block opens.
    Thinking {
        /// Always empty at start.
        thinking: String,
    },
    /// A tool-use block opens; arguments stream as `input_json_delta`.
    ToolUse {
        /// Generated tool call ID.
        id: String,
        /// Tool name.
        name: String,
        /// Always `{}` at start.
        input: Value,
    },
}

/// Delta payload inside `content_block_delta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    /// Text fragment.
    TextDelta {
        /// The fragment.
        text: String,
    },
    /// Thinking fragment.
    ThinkingDelta {
        /// The fragment.
        thinking: String,
    },
    /// Tool-argument JSON fragment. Never re-parsed by the proxy.
    InputJsonDelta {
        /// Raw partial JSON.
        partial_json: String,
    },
}

/// Body of `message_delta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    /// Stop reason.
    pub stop_reason: Option<String>,
}

/// Error payload of the `error` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamError {
    /// Anthropic error type string.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Redacted message.
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Model registry
// ─────────────────────────────────────────────────────────────────────────────

/// Capability metadata for one served model.
#[derive(Clone, Debug)]
pub struct ModelInfo {
    /// Human-readable name.
    pub name: &'static str,
    /// `claude` or `gemini`.
    pub family: &'static str,
    /// Maximum output tokens the upstream accepts for this model.
    pub max_output: u32,
    /// Whether the model emits thinking.
    pub supports_thinking: bool,
}

/// Registry of models the proxy serves.
static MODELS: LazyLock<HashMap<&'static str, ModelInfo>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    let _ = m.insert("claude-sonnet-4-5", ModelInfo {
        name: "Claude Sonnet 4.5",
        family: "claude",
        max_output: 64_000,
        supports_thinking: true,
    });
    let _ = m.insert("claude-opus-4-5", ModelInfo {
        name: "Claude Opus 4.5",
        family: "claude",
        max_output: 32_000,
        supports_thinking: true,
    });
    let _ = m.insert("claude-haiku-4-5", ModelInfo {
        name: "Claude Haiku 4.5",
        family: "claude",
        max_output: 64_000,
        supports_thinking: false,
    });
    let _ = m.insert("gemini-3-pro-preview", ModelInfo {
        name: "Gemini 3 Pro (Preview)",
        family: "gemini",
        max_output: 65_536,
        supports_thinking: true,
    });
    let _ = m.insert("gemini-2.5-pro", ModelInfo {
        name: "Gemini 2.5 Pro",
        family: "gemini",
        max_output: 16_384,
        supports_thinking: true,
    });
    let _ = m.insert("gemini-2.5-flash", ModelInfo {
        name: "Gemini 2.5 Flash",
        family: "gemini",
        max_output: 16_384,
        supports_thinking: false,
    });
    m
});

/// Short aliases accepted in the `model` field.
static ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    let _ = m.insert("sonnet", "claude-sonnet-4-5");
    let _ = m.insert("opus", "claude-opus-4-5");
    let _ = m.insert("haiku", "claude-haiku-4-5");
    m
});

/// Look up model metadata by canonical ID.
#[must_use]
pub fn get_model(model_id: &str) -> Option<&'static ModelInfo> {
    MODELS.get(model_id)
}

/// All canonical model IDs.
#[must_use]
pub fn all_model_ids() -> Vec<&'static str> {
    let mut ids: Vec<_> = MODELS.keys().copied().collect();
    ids.sort_unstable();
    ids
}

/// Resolve an alias or dated ID to a canonical model ID.
///
/// Unknown names pass through unchanged; the upstream is the final judge.
#[must_use]
pub fn resolve_model(model: &str) -> String {
    if MODELS.contains_key(model) {
        return model.to_string();
    }
    if let Some(canonical) = ALIASES.get(model) {
        return (*canonical).to_string();
    }
    // Dated IDs like `claude-sonnet-4-5-20250929` collapse to the canonical.
    for canonical in MODELS.keys() {
        if model.starts_with(canonical)
            && model[canonical.len()..].chars().next() == Some('-')
        {
            return (*canonical).to_string();
        }
    }
    model.to_string()
}

/// Whether a model emits thinking (unknown models: assume not).
#[must_use]
pub fn is_thinking_model(model: &str) -> bool {
    get_model(model).is_some_and(|m| m.supports_thinking) || model.ends_with("-thinking")
}

/// Whether a model is Gemini-family (thinking budget applies).
#[must_use]
pub fn is_gemini_model(model: &str) -> bool {
    model.starts_with("gemini")
}

/// The output-token ceiling for a model (registry value or the global cap).
#[must_use]
pub fn max_output_for(model: &str) -> u32 {
    get_model(model).map_or(slipstream_core::constants::MAX_OUTPUT_TOKENS_CAP, |m| m.max_output)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Request parsing ──────────────────────────────────────────────────

    #[test]
    fn minimal_request_parses() {
        let json = serde_json::json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 32,
            "messages": [{"role": "user", "content": "Say hi"}]
        });
        let req: MessagesRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.model, "claude-sonnet-4-5");
        assert!(!req.stream);
        assert!(matches!(req.messages[0].content, MessageContent::Text(_)));
    }

    #[test]
    fn system_string_and_blocks() {
        let s: SystemPrompt = serde_json::from_value(serde_json::json!("be brief")).unwrap();
        assert_eq!(s.joined(), "be brief");

        let s: SystemPrompt = serde_json::from_value(serde_json::json!([
            {"type": "text", "text": "one"},
            {"type": "text", "text": "two"}
        ]))
        .unwrap();
        assert_eq!(s.joined(), "one\n\ntwo");
    }

    #[test]
    fn content_block_tags_roundtrip() {
        let blocks: Vec<ContentBlock> = serde_json::from_value(serde_json::json!([
            {"type": "text", "text": "hi"},
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "aGk="}},
            {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"loc": "Paris"}},
            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"},
            {"type": "thinking", "thinking": "hmm", "signature": "s"},
            {"type": "redacted_thinking", "data": "opaque"}
        ]))
        .unwrap();
        assert_eq!(blocks.len(), 6);
        assert!(matches!(&blocks[2], ContentBlock::ToolUse { name, .. } if name == "get_weather"));
        assert!(blocks[4].is_thinking());
        assert!(blocks[5].is_thinking());
    }

    #[test]
    fn tool_use_signature_passthrough() {
        let json = serde_json::json!({
            "type": "tool_use", "id": "t", "name": "n", "input": {},
            "thoughtSignature": "sig-abc"
        });
        let block: ContentBlock = serde_json::from_value(json).unwrap();
        match &block {
            ContentBlock::ToolUse { thought_signature, .. } => {
                assert_eq!(thought_signature.as_deref(), Some("sig-abc"));
            }
            _ => panic!("expected tool_use"),
        }
        let back = serde_json::to_value(&block).unwrap();
        assert_eq!(back["thoughtSignature"], "sig-abc");
    }

    #[test]
    fn tool_result_content_defaults_empty() {
        let json = serde_json::json!({"type": "tool_result", "tool_use_id": "t"});
        let block: ContentBlock = serde_json::from_value(json).unwrap();
        assert!(matches!(
            block,
            ContentBlock::ToolResult { content: ToolResultContent::Text(ref t), .. } if t.is_empty()
        ));
    }

    // ── Signature validity ───────────────────────────────────────────────

    #[test]
    fn short_signatures_are_invalid() {
        let block = ContentBlock::Thinking {
            thinking: "x".into(),
            signature: Some("short".into()),
        };
        assert!(!block.has_valid_signature());

        let block = ContentBlock::Thinking {
            thinking: "x".into(),
            signature: Some("s".repeat(SIGNATURE_MIN_LEN)),
        };
        assert!(block.has_valid_signature());
    }

    #[test]
    fn redacted_thinking_counts_as_signed() {
        let block = ContentBlock::RedactedThinking { data: "d".into() };
        assert!(block.has_valid_signature());
    }

    // ── Stream events ────────────────────────────────────────────────────

    #[test]
    fn event_names_match_wire() {
        let ev = StreamEvent::ContentBlockStop { index: 0, signature: None };
        assert_eq!(ev.event_name(), "content_block_stop");
        assert_eq!(StreamEvent::MessageStop.event_name(), "message_stop");
    }

    #[test]
    fn content_block_stop_omits_missing_signature() {
        let ev = StreamEvent::ContentBlockStop { index: 2, signature: None };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "content_block_stop");
        assert_eq!(json["index"], 2);
        assert!(json.get("signature").is_none());
    }

    #[test]
    fn input_json_delta_shape() {
        let ev = StreamEvent::ContentBlockDelta {
            index: 1,
            delta: Delta::InputJsonDelta { partial_json: "{\"loc\":".into() },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["delta"]["type"], "input_json_delta");
        assert_eq!(json["delta"]["partial_json"], "{\"loc\":");
    }

    // ── Model registry ───────────────────────────────────────────────────

    #[test]
    fn alias_resolution() {
        assert_eq!(resolve_model("sonnet"), "claude-sonnet-4-5");
        assert_eq!(resolve_model("opus"), "claude-opus-4-5");
        assert_eq!(resolve_model("claude-sonnet-4-5"), "claude-sonnet-4-5");
    }

    #[test]
    fn dated_id_collapses() {
        assert_eq!(resolve_model("claude-sonnet-4-5-20250929"), "claude-sonnet-4-5");
    }

    #[test]
    fn unknown_model_passes_through() {
        assert_eq!(resolve_model("mystery-model"), "mystery-model");
    }

    #[test]
    fn thinking_and_family_checks() {
        assert!(is_thinking_model("claude-sonnet-4-5"));
        assert!(!is_thinking_model("gemini-2.5-flash"));
        assert!(is_gemini_model("gemini-3-pro-preview"));
        assert!(!is_gemini_model("claude-opus-4-5"));
    }

    #[test]
    fn max_output_clamp_source() {
        assert_eq!(max_output_for("claude-opus-4-5"), 32_000);
        assert_eq!(
            max_output_for("mystery-model"),
            slipstream_core::constants::MAX_OUTPUT_TOKENS_CAP
        );
    }
}
