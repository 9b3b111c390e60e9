//! Thinking-block integrity and conversation-state repair.
//!
//! The upstream enforces rules on resumed conversations that clients break
//! all the time:
//!
//! - every replayed thinking block must carry a valid signature, or go
//! - with thinking enabled, the last assistant message must *begin* with a
//!   thinking block
//! - an `assistant(tool_use)` answered by a plain user message instead of a
//!   `tool_result` is an interrupted tool and must be repaired
//!
//! The passes below run in a fixed order (restore → reorder →
//! trailing-drop → leading-thinking → tool-loop closure) and each is
//! idempotent.

use tracing::{debug, warn};

use crate::anthropic::{ContentBlock, Message, MessageContent, Role};
use crate::signature_cache::SignatureCache;

/// Placeholder prepended when the final assistant message lost its thinking.
const CONTINUATION_PLACEHOLDER: &str = "[Continuing from previous context]";

/// Synthetic text inserted after an interrupted tool call.
const INTERRUPTED_TEXT: &str = "[Tool call was interrupted.]";

/// Synthetic user nudge appended when closing a tool loop.
const CONTINUE_TEXT: &str = "[Continue]";

/// Conversation shape relevant to the repair decisions. Recomputed per
/// request; never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationState {
    /// Index of the last assistant message, if any.
    pub last_assistant_index: Option<usize>,
    /// Whether that message contains validly signed thinking.
    pub has_valid_thinking: bool,
    /// Whether that message issues any tool calls.
    pub last_assistant_has_tool_use: bool,
    /// `tool_result` blocks appearing after it.
    pub tool_result_count_after_last: usize,
    /// Whether a plain (non-tool-result) user message follows it.
    pub plain_user_after_last: bool,
}

impl ConversationState {
    /// An open tool loop: tool calls answered by tool results.
    #[must_use]
    pub fn in_tool_loop(&self) -> bool {
        self.last_assistant_has_tool_use && self.tool_result_count_after_last > 0
    }

    /// An interrupted tool: tool calls answered by a plain user message.
    #[must_use]
    pub fn interrupted_tool(&self) -> bool {
        self.last_assistant_has_tool_use
            && self.tool_result_count_after_last == 0
            && self.plain_user_after_last
    }
}

/// Compute the [`ConversationState`] for a message array.
#[must_use]
pub fn analyze_conversation(messages: &[Message]) -> ConversationState {
    let Some(last_assistant_index) = messages
        .iter()
        .rposition(|m| m.role == Role::Assistant)
    else {
        return ConversationState::default();
    };

    let last = &messages[last_assistant_index];
    let has_valid_thinking = last.blocks().iter().any(ContentBlock::has_valid_signature);
    let last_assistant_has_tool_use = last
        .blocks()
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }));

    let mut tool_result_count_after_last = 0;
    let mut plain_user_after_last = false;
    for message in &messages[last_assistant_index + 1..] {
        if message.role != Role::User {
            continue;
        }
        match &message.content {
            MessageContent::Text(text) => {
                if !text.trim().is_empty() {
                    plain_user_after_last = true;
                }
            }
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult { .. } => tool_result_count_after_last += 1,
                        ContentBlock::Text { text } if text.trim().is_empty() => {}
                        _ => plain_user_after_last = true,
                    }
                }
            }
        }
    }

    ConversationState {
        last_assistant_index: Some(last_assistant_index),
        has_valid_thinking,
        last_assistant_has_tool_use,
        tool_result_count_after_last,
        plain_user_after_last,
    }
}

/// Restore lost signatures from the cache; drop what cannot be restored.
///
/// Idempotent given a stable cache.
pub fn restore_signatures(messages: &mut Vec<Message>, cache: &SignatureCache) {
    for message in messages.iter_mut() {
        if message.role != Role::Assistant {
            continue;
        }
        let MessageContent::Blocks(blocks) = &mut message.content else {
            continue;
        };
        blocks.retain_mut(|block| {
            let ContentBlock::Thinking { thinking, signature } = block else {
                return true;
            };
            if signature.as_deref().is_some_and(crate::anthropic::is_valid_signature) {
                return true;
            }
            match cache.lookup(thinking) {
                Some(restored) => {
                    debug!("restored thinking signature from cache");
                    *signature = Some(restored);
                    true
                }
                None => {
                    warn!("dropping unrestorable thinking block");
                    false
                }
            }
        });
    }
}

/// Stable partition of assistant content into
/// `[thinking…, text…, tool_use…]`, dropping empty text blocks.
///
/// Idempotent.
pub fn reorder_assistant_content(messages: &mut [Message]) {
    for message in messages.iter_mut() {
        if message.role != Role::Assistant {
            continue;
        }
        let MessageContent::Blocks(blocks) = &mut message.content else {
            continue;
        };

        let mut thinking = Vec::new();
        let mut middle = Vec::new();
        let mut tool_use = Vec::new();
        for block in blocks.drain(..) {
            match &block {
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {
                    thinking.push(block);
                }
                ContentBlock::ToolUse { .. } => tool_use.push(block),
                ContentBlock::Text { text } if text.trim().is_empty() => {}
                _ => middle.push(block),
            }
        }
        blocks.extend(thinking);
        blocks.extend(middle);
        blocks.extend(tool_use);
    }
}

/// Remove trailing unsigned thinking from every assistant message. The
/// upstream tolerates an unsigned leading placeholder but rejects unsigned
/// thinking at the tail.
pub fn drop_trailing_unsigned(messages: &mut [Message]) {
    for message in messages.iter_mut() {
        if message.role != Role::Assistant {
            continue;
        }
        let MessageContent::Blocks(blocks) = &mut message.content else {
            continue;
        };
        while blocks
            .last()
            .is_some_and(|b| b.is_thinking() && !b.has_valid_signature())
        {
            warn!("dropping trailing unsigned thinking block");
            let _ = blocks.pop();
        }
    }
}

/// With thinking enabled, the final assistant message must begin with a
/// thinking block; synthesize an unsigned placeholder when it has none.
/// That leading position is the one spot the upstream tolerates unsigned.
pub fn ensure_leading_thinking(messages: &mut [Message], thinking_enabled: bool) {
    if !thinking_enabled {
        return;
    }
    let Some(last) = messages.iter_mut().rev().find(|m| m.role == Role::Assistant) else {
        return;
    };

    if let MessageContent::Text(text) = &last.content {
        last.content = MessageContent::Blocks(vec![ContentBlock::text(text.clone())]);
    }
    let MessageContent::Blocks(blocks) = &mut last.content else {
        return;
    };
    if blocks.iter().any(ContentBlock::is_thinking) {
        return;
    }
    debug!("prepending continuation placeholder thinking");
    blocks.insert(
        0,
        ContentBlock::Thinking { thinking: CONTINUATION_PLACEHOLDER.into(), signature: None },
    );
}

/// Repair broken tool sequences.
///
/// When the conversation is in a tool loop (or has an interrupted tool)
/// without valid thinking on the last assistant message, the upstream
/// rejects the resume. All thinking is stripped from the history, then:
///
/// - interrupted tool → a synthetic assistant text lands directly after the
///   offending assistant message
/// - tool loop → synthetic closing assistant text plus a `[Continue]` user
///   message are appended
pub fn close_tool_loops(messages: &mut Vec<Message>) {
    let state = analyze_conversation(messages);
    let interrupted = state.interrupted_tool();
    let in_loop = state.in_tool_loop();
    if state.has_valid_thinking || (!interrupted && !in_loop) {
        return;
    }

    strip_all_thinking(messages);

    if interrupted {
        let insert_at = state.last_assistant_index.unwrap_or(0) + 1;
        warn!("repairing interrupted tool call");
        messages.insert(insert_at, Message::assistant(vec![ContentBlock::text(INTERRUPTED_TEXT)]));
    } else {
        let completed = state.tool_result_count_after_last;
        warn!(completed, "closing open tool loop");
        messages.push(Message::assistant(vec![ContentBlock::text(format!(
            "[{completed} tool executions completed.]"
        ))]));
        messages.push(Message::user_text(CONTINUE_TEXT));
    }
}

/// Remove every thinking block in the history.
fn strip_all_thinking(messages: &mut [Message]) {
    for message in messages.iter_mut() {
        if let MessageContent::Blocks(blocks) = &mut message.content {
            blocks.retain(|b| !b.is_thinking());
        }
    }
}

/// Run every integrity pass in the required order.
pub fn apply_integrity(
    messages: &mut Vec<Message>,
    cache: &SignatureCache,
    thinking_enabled: bool,
) {
    restore_signatures(messages, cache);
    reorder_assistant_content(messages);
    drop_trailing_unsigned(messages);
    ensure_leading_thinking(messages, thinking_enabled);
    close_tool_loops(messages);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
