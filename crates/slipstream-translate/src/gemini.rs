//! Upstream (Cloud Code Generative AI) wire types.
//!
//! Parts are an untagged union; variant order matters for deserialization.
//! `Text` sits last with a defaulted `text` field so signature-only chunks
//! (a bare `thoughtSignature` attached to no visible text) still parse.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A content turn: one `user` or `model` entry of `contents`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Content {
    /// `user` or `model`.
    pub role: String,
    /// Ordered content parts.
    pub parts: Vec<Part>,
}

/// One part of a content turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    /// Model-issued function call.
    FunctionCall {
        /// The call payload.
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
        /// Thought signature attached at the part level.
        #[serde(rename = "thoughtSignature", skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    /// Client-supplied function result.
    FunctionResponse {
        /// The response payload.
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
    /// Inline binary data (images).
    InlineData {
        /// The data payload.
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    /// Text, possibly a thought. Must stay last: every field is optional,
    /// so it would shadow the other variants during untagged matching.
    Text {
        /// The text (may be empty on signature-only parts).
        #[serde(default)]
        text: String,
        /// Set on reasoning parts.
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
        /// Integrity signature for the thought.
        #[serde(rename = "thoughtSignature", skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
}

impl Part {
    /// Build a plain text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into(), thought: None, thought_signature: None }
    }

    /// Build a signed thought part.
    #[must_use]
    pub fn thought(text: impl Into<String>, signature: Option<String>) -> Self {
        Self::Text { text: text.into(), thought: Some(true), thought_signature: signature }
    }

    /// Whether this part is a thought.
    #[must_use]
    pub fn is_thought(&self) -> bool {
        matches!(self, Self::Text { thought: Some(true), .. })
    }
}

/// Function call payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name. Empty on argument-continuation parts.
    #[serde(default)]
    pub name: String,
    /// Arguments: an object once complete, or a raw JSON fragment while
    /// streaming.
    #[serde(default)]
    pub args: Value,
}

/// Function response payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Name of the function that produced the result.
    pub name: String,
    /// Result object.
    pub response: Value,
}

/// Inline binary data.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type.
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

/// System instruction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemInstruction {
    /// Text parts.
    pub parts: Vec<TextPart>,
}

/// A bare text part (system instruction only).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextPart {
    /// The text.
    pub text: String,
}

/// Generation parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Output token ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-K sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Thinking configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

/// Thinking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    /// Ask the upstream to surface thoughts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,
    /// Thinking token budget (Gemini-family models).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

/// One tool group: all function declarations for the request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Function declarations.
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A single sanitized function declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Normalized function name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Sanitized parameter schema.
    pub parameters: Value,
}

/// The inner generate-content request. The per-account envelope
/// (`project`, `model`, `request`, …) is added by the upstream client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Conversation turns.
    pub contents: Vec<Content>,
    /// System instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    /// Generation parameters.
    pub generation_config: GenerationConfig,
    /// Tool declarations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

/// A generate-content response or one streamed chunk of it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    /// Response candidates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Candidate>>,
    /// Token usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    /// In-band error (streaming).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl GenerateContentResponse {
    /// Unwrap the Cloud Code `{"response": …}` envelope when present.
    #[must_use]
    pub fn from_enveloped(value: &Value) -> Option<Self> {
        let inner = value.get("response").unwrap_or(value);
        serde_json::from_value(inner.clone()).ok()
    }
}

/// One response candidate.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Candidate content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<CandidateContent>,
    /// Finish reason (`STOP`, `MAX_TOKENS`, `SAFETY`, …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Content of one candidate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CandidateContent {
    /// Content parts.
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Role (always `model`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Token usage metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Prompt (input) tokens.
    #[serde(default)]
    pub prompt_token_count: u64,
    /// Candidate (output) tokens.
    #[serde(default)]
    pub candidates_token_count: u64,
    /// Total tokens.
    #[serde(default)]
    pub total_token_count: u64,
    /// Tokens served from the prompt cache.
    #[serde(default)]
    pub cached_content_token_count: u64,
    /// Tokens spent on reasoning.
    #[serde(default)]
    pub thoughts_token_count: u64,
}

/// In-band error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Numeric code (HTTP-ish).
    #[serde(default)]
    pub code: i64,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error status string (`RESOURCE_EXHAUSTED`, …).
    #[serde(default)]
    pub status: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
