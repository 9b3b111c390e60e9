//! Generated identifiers for wire objects.
//!
//! The upstream does not assign tool-call or message IDs, so the proxy
//! mints Anthropic-shaped ones: `toolu_<24 alphanumerics>` and
//! `msg_<uuid-v7 simple>`. UUID v7 keeps message IDs time-ordered, which
//! makes interleaved request logs easy to correlate.

use rand::Rng;
use uuid::Uuid;

const TOOL_USE_SUFFIX_LEN: usize = 24;
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Mint a fresh `tool_use` block ID.
#[must_use]
pub fn new_tool_use_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..TOOL_USE_SUFFIX_LEN)
        .map(|_| ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())] as char)
        .collect();
    format!("toolu_{suffix}")
}

/// Mint a fresh message ID (time-ordered).
#[must_use]
pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::now_v7().simple())
}

/// Mint a fresh upstream request ID (time-ordered).
#[must_use]
pub fn new_request_id() -> String {
    format!("req_{}", Uuid::now_v7().simple())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
