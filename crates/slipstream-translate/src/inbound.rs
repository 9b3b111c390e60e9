//! Anthropic request → upstream request translation.
//!
//! Produces the *inner* [`GenerateContentRequest`]; the per-account
//! envelope (`project`, `model`, `requestId`, …) is attached by the
//! upstream client at dispatch time, because the project differs per
//! account.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use slipstream_core::constants::MAX_STOP_SEQUENCES;
use slipstream_core::{ProxyError, ProxyResult};

use crate::anthropic::{
    is_gemini_model, is_thinking_model, is_valid_signature, max_output_for, ContentBlock, Message,
    MessageContent, MessagesRequest, Role, ToolDefinition, ToolResultContent,
};
use crate::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerationConfig, InlineData, Part, SystemInstruction, TextPart, ThinkingConfig, Tool,
};
use crate::sanitize::{normalize_tool_name, sanitize_schema};
use crate::signature_cache::SignatureCache;

/// Default thinking budget for Gemini-family thinking models.
const DEFAULT_THINKING_BUDGET: u32 = 8_192;

/// Translate a validated Anthropic request into the upstream schema.
///
/// `model` is the already-resolved canonical model ID.
pub fn to_upstream(
    request: &MessagesRequest,
    model: &str,
    cache: &SignatureCache,
) -> ProxyResult<GenerateContentRequest> {
    let tool_names = collect_tool_use_names(&request.messages);

    let mut contents = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        let parts = match &message.content {
            MessageContent::Text(text) => {
                if text.is_empty() { vec![] } else { vec![Part::text(text.clone())] }
            }
            MessageContent::Blocks(blocks) => convert_blocks(blocks, &tool_names, cache)?,
        };
        if parts.is_empty() {
            continue;
        }
        contents.push(Content {
            role: match message.role {
                Role::User => "user".into(),
                Role::Assistant => "model".into(),
            },
            parts,
        });
    }

    let system_instruction = request.system.as_ref().and_then(|s| {
        let joined = s.joined();
        (!joined.is_empty())
            .then(|| SystemInstruction { parts: vec![TextPart { text: joined }] })
    });

    let tools = request
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|t| convert_tools(t));

    Ok(GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: build_generation_config(request, model),
        tools,
    })
}

/// Map tool-use IDs to tool names for `tool_result` resolution.
fn collect_tool_use_names(messages: &[Message]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for message in messages {
        for block in message.blocks() {
            if let ContentBlock::ToolUse { id, name, .. } = block {
                let _ = names.insert(id.clone(), name.clone());
            }
        }
    }
    names
}

fn convert_blocks(
    blocks: &[ContentBlock],
    tool_names: &HashMap<String, String>,
    cache: &SignatureCache,
) -> ProxyResult<Vec<Part>> {
    let mut parts = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    parts.push(Part::text(text.clone()));
                }
            }
            ContentBlock::Image { source } => match source.source_type.as_str() {
                "base64" => {
                    let (Some(media_type), Some(data)) = (&source.media_type, &source.data)
                    else {
                        return Err(ProxyError::InvalidRequest {
                            message: "base64 image source requires media_type and data".into(),
                        });
                    };
                    parts.push(Part::InlineData {
                        inline_data: InlineData {
                            mime_type: media_type.clone(),
                            data: data.clone(),
                        },
                    });
                }
                other => {
                    return Err(ProxyError::InvalidRequest {
                        message: format!("unsupported image source type: {other}"),
                    });
                }
            },
            ContentBlock::ToolUse { name, input, thought_signature, .. } => {
                parts.push(Part::FunctionCall {
                    function_call: FunctionCall { name: name.clone(), args: input.clone() },
                    thought_signature: thought_signature.clone(),
                });
            }
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                let name = tool_names
                    .get(tool_use_id)
                    .cloned()
                    .unwrap_or_else(|| tool_use_id.clone());
                let result = match content {
                    ToolResultContent::Text(text) => Value::String(text.clone()),
                    ToolResultContent::Blocks(blocks) => Value::Array(blocks.clone()),
                };
                let mut response = serde_json::Map::new();
                let _ = response.insert("result".into(), result);
                if is_error == &Some(true) {
                    let _ = response.insert("isError".into(), Value::Bool(true));
                }
                parts.push(Part::FunctionResponse {
                    function_response: FunctionResponse {
                        name,
                        response: Value::Object(response),
                    },
                });
            }
            ContentBlock::Thinking { thinking, signature } => {
                let restored = match signature.as_deref().filter(|s| is_valid_signature(s)) {
                    Some(sig) => Some(sig.to_string()),
                    None => cache.lookup(thinking),
                };
                match restored {
                    Some(sig) => parts.push(Part::thought(thinking.clone(), Some(sig))),
                    None => {
                        // Unsigned and unrestorable: the upstream would
                        // reject it, so it goes.
                        warn!("dropping unsigned thinking block");
                    }
                }
            }
            ContentBlock::RedactedThinking { .. } => {
                // Opaque to this upstream; nothing to forward.
            }
        }
    }

    Ok(parts)
}

fn build_generation_config(request: &MessagesRequest, model: &str) -> GenerationConfig {
    let max_tokens = request.max_tokens.min(max_output_for(model));

    let thinking_config = request
        .thinking
        .as_ref()
        .is_none_or(|t| t.is_enabled())
        .then(|| is_thinking_model(model))
        .filter(|enabled| *enabled)
        .map(|_| ThinkingConfig {
            include_thoughts: Some(true),
            thinking_budget: is_gemini_model(model).then(|| {
                request
                    .thinking
                    .as_ref()
                    .and_then(|t| t.budget_tokens)
                    .unwrap_or(DEFAULT_THINKING_BUDGET)
            }),
        });

    GenerationConfig {
        max_output_tokens: Some(max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop_sequences: request.stop_sequences.as_ref().filter(|s| !s.is_empty()).map(|s| {
            s.iter().take(MAX_STOP_SEQUENCES).cloned().collect()
        }),
        thinking_config,
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Tool> {
    let declarations = tools
        .iter()
        .map(|tool| FunctionDeclaration {
            name: normalize_tool_name(&tool.name),
            description: tool.description.clone().unwrap_or_default(),
            parameters: sanitize_schema(&tool.input_schema),
        })
        .collect();
    vec![Tool { function_declarations: declarations }]
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::{ImageSource, SystemPrompt, ThinkingParam};
    use serde_json::json;

    fn request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4-5".into(),
            max_tokens: 1024,
            messages,
            system: None,
            tools: None,
            stream: false,
            thinking: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            metadata: None,
        }
    }

    fn sig() -> String {
        "s".repeat(64)
    }

    // ── Roles and text ───────────────────────────────────────────────────

    #[test]
    fn roles_map_to_user_and_model() {
        let req = request(vec![
            Message::user_text("hi"),
            Message::assistant(vec![ContentBlock::text("hello")]),
        ]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert_eq!(out.contents[0].role, "user");
        assert_eq!(out.contents[1].role, "model");
    }

    #[test]
    fn empty_messages_are_skipped() {
        let req = request(vec![Message::user_text(""), Message::user_text("real")]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert_eq!(out.contents.len(), 1);
    }

    // ── System prompt ────────────────────────────────────────────────────

    #[test]
    fn system_blocks_concatenate() {
        let mut req = request(vec![Message::user_text("hi")]);
        req.system = Some(SystemPrompt::Blocks(vec![
            crate::anthropic::SystemBlock { block_type: "text".into(), text: "one".into() },
            crate::anthropic::SystemBlock { block_type: "text".into(), text: "two".into() },
        ]));
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert_eq!(out.system_instruction.unwrap().parts[0].text, "one\n\ntwo");
    }

    // ── Images ───────────────────────────────────────────────────────────

    #[test]
    fn base64_image_becomes_inline_data() {
        let req = request(vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".into(),
                    media_type: Some("image/png".into()),
                    data: Some("aGk=".into()),
                    url: None,
                },
            }]),
        }]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert!(matches!(
            &out.contents[0].parts[0],
            Part::InlineData { inline_data } if inline_data.mime_type == "image/png"
        ));
    }

    #[test]
    fn url_image_is_rejected() {
        let req = request(vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                source: ImageSource {
                    source_type: "url".into(),
                    media_type: None,
                    data: None,
                    url: Some("https://example.com/cat.png".into()),
                },
            }]),
        }]);
        let err = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest { .. }));
    }

    // ── Tool use and results ─────────────────────────────────────────────

    #[test]
    fn tool_result_resolves_name_from_prior_tool_use() {
        let req = request(vec![
            Message::assistant(vec![ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "get_weather".into(),
                input: json!({"loc": "Paris"}),
                thought_signature: None,
            }]),
            Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_1".into(),
                    content: ToolResultContent::Text("sunny".into()),
                    is_error: None,
                }]),
            },
        ]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        match &out.contents[1].parts[0] {
            Part::FunctionResponse { function_response } => {
                assert_eq!(function_response.name, "get_weather");
                assert_eq!(function_response.response["result"], "sunny");
            }
            _ => panic!("expected function response"),
        }
    }

    #[test]
    fn tool_result_error_flag_forwarded() {
        let req = request(vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_9".into(),
                content: ToolResultContent::Text("boom".into()),
                is_error: Some(true),
            }]),
        }]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        match &out.contents[0].parts[0] {
            Part::FunctionResponse { function_response } => {
                assert_eq!(function_response.response["isError"], true);
                // Unknown ID falls back to the ID itself.
                assert_eq!(function_response.name, "toolu_9");
            }
            _ => panic!("expected function response"),
        }
    }

    #[test]
    fn tool_use_signature_rides_the_part() {
        let req = request(vec![Message::assistant(vec![ContentBlock::ToolUse {
            id: "toolu_1".into(),
            name: "bash".into(),
            input: json!({}),
            thought_signature: Some(sig()),
        }])]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert!(matches!(
            &out.contents[0].parts[0],
            Part::FunctionCall { thought_signature: Some(s), .. } if *s == sig()
        ));
    }

    // ── Thinking blocks ──────────────────────────────────────────────────

    #[test]
    fn signed_thinking_forwarded() {
        let req = request(vec![Message::assistant(vec![
            ContentBlock::Thinking { thinking: "because".into(), signature: Some(sig()) },
            ContentBlock::text("answer"),
        ])]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert!(out.contents[0].parts[0].is_thought());
    }

    #[test]
    fn unsigned_thinking_restored_from_cache() {
        let cache = SignatureCache::new();
        cache.record("because reasons", &sig());
        let req = request(vec![Message::assistant(vec![
            ContentBlock::Thinking { thinking: "because reasons".into(), signature: None },
            ContentBlock::text("answer"),
        ])]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &cache).unwrap();
        match &out.contents[0].parts[0] {
            Part::Text { thought: Some(true), thought_signature, .. } => {
                assert_eq!(thought_signature.as_deref(), Some(sig().as_str()));
            }
            _ => panic!("expected restored thought"),
        }
    }

    #[test]
    fn unrestorable_thinking_dropped() {
        let req = request(vec![Message::assistant(vec![
            ContentBlock::Thinking { thinking: "lost".into(), signature: None },
            ContentBlock::text("answer"),
        ])]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert_eq!(out.contents[0].parts.len(), 1);
        assert!(!out.contents[0].parts[0].is_thought());
    }

    // ── Generation config ────────────────────────────────────────────────

    #[test]
    fn max_tokens_clamped_to_model_family() {
        let mut req = request(vec![Message::user_text("hi")]);
        req.max_tokens = 200_000;
        let out = to_upstream(&req, "claude-opus-4-5", &SignatureCache::new()).unwrap();
        assert_eq!(out.generation_config.max_output_tokens, Some(32_000));
    }

    #[test]
    fn stop_sequences_truncated_to_four() {
        let mut req = request(vec![Message::user_text("hi")]);
        req.stop_sequences = Some(vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert_eq!(out.generation_config.stop_sequences.unwrap().len(), 4);
    }

    #[test]
    fn sampling_params_forwarded() {
        let mut req = request(vec![Message::user_text("hi")]);
        req.temperature = Some(0.7);
        req.top_p = Some(0.9);
        req.top_k = Some(40);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert_eq!(out.generation_config.temperature, Some(0.7));
        assert_eq!(out.generation_config.top_p, Some(0.9));
        assert_eq!(out.generation_config.top_k, Some(40));
    }

    #[test]
    fn thinking_model_gets_include_thoughts() {
        let req = request(vec![Message::user_text("hi")]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        let tc = out.generation_config.thinking_config.unwrap();
        assert_eq!(tc.include_thoughts, Some(true));
        // Claude-family: no budget field.
        assert!(tc.thinking_budget.is_none());
    }

    #[test]
    fn gemini_thinking_model_gets_budget() {
        let mut req = request(vec![Message::user_text("hi")]);
        req.thinking = Some(ThinkingParam {
            thinking_type: "enabled".into(),
            budget_tokens: Some(4096),
        });
        let out = to_upstream(&req, "gemini-3-pro-preview", &SignatureCache::new()).unwrap();
        let tc = out.generation_config.thinking_config.unwrap();
        assert_eq!(tc.thinking_budget, Some(4096));
    }

    #[test]
    fn thinking_disabled_suppresses_config() {
        let mut req = request(vec![Message::user_text("hi")]);
        req.thinking = Some(ThinkingParam { thinking_type: "disabled".into(), budget_tokens: None });
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        assert!(out.generation_config.thinking_config.is_none());
    }

    #[test]
    fn non_thinking_model_has_no_config() {
        let req = request(vec![Message::user_text("hi")]);
        let out = to_upstream(&req, "gemini-2.5-flash", &SignatureCache::new()).unwrap();
        assert!(out.generation_config.thinking_config.is_none());
    }

    // ── Tools ────────────────────────────────────────────────────────────

    #[test]
    fn tools_sanitized_and_grouped() {
        let mut req = request(vec![Message::user_text("hi")]);
        req.tools = Some(vec![ToolDefinition {
            name: "my tool!".into(),
            description: Some("does things".into()),
            input_schema: json!({"type": "object", "additionalProperties": false}),
        }]);
        let out = to_upstream(&req, "claude-sonnet-4-5", &SignatureCache::new()).unwrap();
        let tools = out.tools.unwrap();
        assert_eq!(tools.len(), 1);
        let decl = &tools[0].function_declarations[0];
        assert_eq!(decl.name, "my_tool_");
        assert!(decl.parameters.get("additionalProperties").is_none());
    }
}
