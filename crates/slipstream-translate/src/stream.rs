//! Streaming translator: upstream chunks → Anthropic SSE events.
//!
//! A chunk-at-a-time state machine. Block indices are assigned in arrival
//! order; one block is open at a time because the upstream emits parts
//! sequentially. Tool-call arguments pass through as raw
//! `input_json_delta` fragments and are never re-parsed. When a thought
//! block closes, its final signature rides the `content_block_stop` event
//! and lands in the signature cache.

use serde_json::Value;
use tracing::debug;

use slipstream_core::ids::{new_message_id, new_tool_use_id};
use slipstream_core::redact::redact_sensitive;

use crate::anthropic::{
    is_valid_signature, Delta, MessageDeltaBody, MessageStart, StartBlock, StreamError,
    StreamEvent, Usage,
};
use crate::gemini::{FunctionCall, GenerateContentResponse, Part, UsageMetadata};
use crate::outbound::{map_stop_reason, map_usage};
use crate::signature_cache::SignatureCache;

/// Which kind of block is currently open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Open {
    Text,
    Thinking,
    ToolUse,
}

/// Stream translation state for one request.
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    message_id: String,
    started: bool,
    done: bool,
    next_index: usize,
    open: Option<(Open, usize)>,
    thinking_buf: String,
    block_signature: Option<String>,
    saw_tool_use: bool,
    finish_reason: Option<String>,
    usage: UsageMetadata,
}

impl StreamTranslator {
    /// Create a translator for one streamed request.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message_id: new_message_id(),
            started: false,
            done: false,
            next_index: 0,
            open: None,
            thinking_buf: String::new(),
            block_signature: None,
            saw_tool_use: false,
            finish_reason: None,
            usage: UsageMetadata::default(),
        }
    }

    /// Whether the terminal `message_stop` has been emitted.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Translate one upstream chunk into zero or more events.
    pub fn on_chunk(
        &mut self,
        chunk: &GenerateContentResponse,
        cache: &SignatureCache,
    ) -> Vec<StreamEvent> {
        if self.done {
            return vec![];
        }
        let mut events = Vec::new();
        self.ensure_started(&mut events);

        if let Some(error) = &chunk.error {
            debug!(code = error.code, "in-band upstream error");
            events.push(StreamEvent::Error {
                error: StreamError {
                    error_type: match error.code {
                        429 => "rate_limit_error",
                        400..=499 => "invalid_request_error",
                        _ => "api_error",
                    }
                    .into(),
                    message: redact_sensitive(&error.message),
                },
            });
            self.done = true;
            return events;
        }

        if let Some(usage) = &chunk.usage_metadata {
            self.usage = usage.clone();
        }

        let Some(candidate) = chunk.candidates.as_ref().and_then(|c| c.first()) else {
            return events;
        };

        if let Some(parts) = candidate.content.as_ref().map(|c| &c.parts) {
            for part in parts {
                self.on_part(part, cache, &mut events);
            }
        }

        if let Some(reason) = &candidate.finish_reason {
            self.finish_reason = Some(reason.clone());
            self.emit_trailer(cache, &mut events);
        }

        events
    }

    /// Flush state when the upstream stream ends.
    ///
    /// Synthesizes the trailer if the upstream never sent a finish reason.
    pub fn finish(&mut self, cache: &SignatureCache) -> Vec<StreamEvent> {
        if self.done {
            return vec![];
        }
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        self.emit_trailer(cache, &mut events);
        events
    }

    fn ensure_started(&mut self, events: &mut Vec<StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        events.push(StreamEvent::MessageStart {
            message: MessageStart {
                id: self.message_id.clone(),
                message_type: "message".into(),
                role: "assistant".into(),
                model: self.model.clone(),
                content: vec![],
                stop_reason: None,
                usage: Usage::default(),
            },
        });
    }

    fn on_part(&mut self, part: &Part, cache: &SignatureCache, events: &mut Vec<StreamEvent>) {
        match part {
            Part::Text { text, thought: Some(true), thought_signature } => {
                self.open_block(Open::Thinking, cache, events, |_| StartBlock::Thinking {
                    thinking: String::new(),
                });
                if !text.is_empty() {
                    self.thinking_buf.push_str(text);
                    events.push(StreamEvent::ContentBlockDelta {
                        index: self.open_index(),
                        delta: Delta::ThinkingDelta { thinking: text.clone() },
                    });
                }
                if let Some(sig) = thought_signature {
                    self.block_signature = Some(sig.clone());
                }
            }
            Part::Text { text, thought_signature, .. } => {
                // A bare trailing signature attaches to the open thought.
                if text.is_empty() {
                    if let Some(sig) = thought_signature {
                        if matches!(self.open, Some((Open::Thinking, _))) {
                            self.block_signature = Some(sig.clone());
                        }
                    }
                    return;
                }
                self.open_block(Open::Text, cache, events, |_| StartBlock::Text {
                    text: String::new(),
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.open_index(),
                    delta: Delta::TextDelta { text: text.clone() },
                });
            }
            Part::FunctionCall { function_call, thought_signature } => {
                self.on_function_call(function_call, thought_signature.as_deref(), cache, events);
            }
            Part::FunctionResponse { .. } | Part::InlineData { .. } => {}
        }
    }

    fn on_function_call(
        &mut self,
        call: &FunctionCall,
        thought_signature: Option<&str>,
        cache: &SignatureCache,
        events: &mut Vec<StreamEvent>,
    ) {
        // A nameless call continues the open tool block's arguments.
        if call.name.is_empty() {
            if matches!(self.open, Some((Open::ToolUse, _))) {
                let fragment = args_fragment(&call.args);
                if !fragment.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: self.open_index(),
                        delta: Delta::InputJsonDelta { partial_json: fragment },
                    });
                }
            }
            return;
        }

        self.close_open(cache, events);
        self.saw_tool_use = true;
        let index = self.next_index;
        self.next_index += 1;
        self.open = Some((Open::ToolUse, index));
        if let Some(sig) = thought_signature {
            self.block_signature = Some(sig.to_string());
        }
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: StartBlock::ToolUse {
                id: new_tool_use_id(),
                name: call.name.clone(),
                input: Value::Object(serde_json::Map::new()),
            },
        });
        let fragment = args_fragment(&call.args);
        if !fragment.is_empty() {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json: fragment },
            });
        }
    }

    /// Close the current block (if any) and open a block of `kind`.
    fn open_block(
        &mut self,
        kind: Open,
        cache: &SignatureCache,
        events: &mut Vec<StreamEvent>,
        start: impl FnOnce(usize) -> StartBlock,
    ) {
        if matches!(self.open, Some((open, _)) if open == kind) {
            return;
        }
        self.close_open(cache, events);
        let index = self.next_index;
        self.next_index += 1;
        self.open = Some((kind, index));
        if kind == Open::Thinking {
            self.thinking_buf.clear();
        }
        events.push(StreamEvent::ContentBlockStart { index, content_block: start(index) });
    }

    fn open_index(&self) -> usize {
        self.open.map(|(_, index)| index).unwrap_or_default()
    }

    fn close_open(&mut self, cache: &SignatureCache, events: &mut Vec<StreamEvent>) {
        let Some((kind, index)) = self.open.take() else {
            return;
        };
        let signature = self.block_signature.take();
        if kind == Open::Thinking {
            if let Some(sig) = signature.as_deref().filter(|s| is_valid_signature(s)) {
                cache.record(&self.thinking_buf, sig);
            }
        }
        events.push(StreamEvent::ContentBlockStop { index, signature });
    }

    fn emit_trailer(&mut self, cache: &SignatureCache, events: &mut Vec<StreamEvent>) {
        self.close_open(cache, events);
        let stop_reason = map_stop_reason(self.finish_reason.as_deref(), self.saw_tool_use);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody { stop_reason: Some(stop_reason.into()) },
            usage: map_usage(Some(&self.usage)),
        });
        events.push(StreamEvent::MessageStop);
        self.done = true;
    }
}

/// The raw argument fragment of a streamed function call.
///
/// A string value is already a partial JSON fragment and passes through
/// untouched; an object is serialized whole.
fn args_fragment(args: &Value) -> String {
    match args {
        Value::Null => String::new(),
        Value::String(fragment) => fragment.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
