//! Per-account token lifetime tracking and proactive-refresh policy.
//!
//! The registry is pure bookkeeping: it records when tokens were issued,
//! decides *when* a refresh is due (buffer before expiry, backoff after
//! failures), and enforces the single-flight invariant per email. The
//! actual refresh call is driven by the account store, which owns the
//! credentials.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use slipstream_core::constants::{
    MIN_TRACKED_LIFETIME_SEC, REFRESH_BACKOFF_BASE_MS, REFRESH_BACKOFF_CAP_MS, REFRESH_BUFFER_MS,
};

use crate::types::now_ms;

/// Lifetime metadata for one account's current access token.
#[derive(Clone, Debug, Default)]
struct TokenMeta {
    issued_at: i64,
    expires_at: i64,
    consecutive_failures: u32,
    last_failure_at: i64,
}

/// Coarse token state reported by [`TokenRegistry::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Token is valid and not near expiry.
    Valid,
    /// Token expires within the refresh buffer.
    ExpiringSoon,
    /// Token has expired.
    Expired,
    /// No token has been recorded for this account.
    Unknown,
}

/// Status report for one account's token.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TokenStatus {
    /// Coarse state.
    pub state: TokenState,
    /// Milliseconds until expiry (negative when expired, zero when unknown).
    pub expires_in_ms: i64,
}

/// Tracks token lifetimes and refresh eligibility across the pool.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: Mutex<HashMap<String, TokenMeta>>,
    in_flight: Mutex<std::collections::HashSet<String>>,
}

impl TokenRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly issued token. Lifetimes under five minutes are
    /// ignored; they churn faster than the refresh tick can follow.
    pub fn note_issued(&self, email: &str, expires_in_sec: i64) {
        if expires_in_sec < MIN_TRACKED_LIFETIME_SEC {
            tracing::debug!(expires_in_sec, "ignoring short-lived token");
            return;
        }
        let now = now_ms();
        let mut tokens = self.tokens.lock();
        let _ = tokens.insert(
            email.to_string(),
            TokenMeta {
                issued_at: now,
                expires_at: now + expires_in_sec * 1000,
                consecutive_failures: 0,
                last_failure_at: 0,
            },
        );
    }

    /// Record a failed refresh attempt; extends the backoff window.
    pub fn note_failure(&self, email: &str) {
        let mut tokens = self.tokens.lock();
        let meta = tokens.entry(email.to_string()).or_default();
        meta.consecutive_failures = meta.consecutive_failures.saturating_add(1);
        meta.last_failure_at = now_ms();
    }

    /// Drop tracking for an account (removal or invalidation).
    pub fn forget(&self, email: &str) {
        let _ = self.tokens.lock().remove(email);
    }

    /// Whether the account's token is due for a proactive refresh.
    ///
    /// True when expiry is within the refresh buffer *and* the failure
    /// backoff window (60 s · 2^(n−1), capped at 15 min) has elapsed.
    #[must_use]
    pub fn should_refresh(&self, email: &str) -> bool {
        let tokens = self.tokens.lock();
        let Some(meta) = tokens.get(email) else {
            return false;
        };
        let now = now_ms();
        if meta.expires_at - now > REFRESH_BUFFER_MS {
            return false;
        }
        backoff_elapsed(meta, now)
    }

    /// Status report for one account.
    #[must_use]
    pub fn status(&self, email: &str) -> TokenStatus {
        let tokens = self.tokens.lock();
        let Some(meta) = tokens.get(email) else {
            return TokenStatus { state: TokenState::Unknown, expires_in_ms: 0 };
        };
        let expires_in_ms = meta.expires_at - now_ms();
        let state = if expires_in_ms <= 0 {
            TokenState::Expired
        } else if expires_in_ms <= REFRESH_BUFFER_MS {
            TokenState::ExpiringSoon
        } else {
            TokenState::Valid
        };
        TokenStatus { state, expires_in_ms }
    }

    /// Emails whose tokens are due for refresh and not already in flight.
    ///
    /// Used by the 30-second background tick.
    #[must_use]
    pub fn due_for_refresh(&self) -> Vec<String> {
        let tokens = self.tokens.lock();
        let in_flight = self.in_flight.lock();
        let now = now_ms();
        tokens
            .iter()
            .filter(|(email, meta)| {
                meta.expires_at - now <= REFRESH_BUFFER_MS
                    && backoff_elapsed(meta, now)
                    && !in_flight.contains(*email)
            })
            .map(|(email, _)| email.clone())
            .collect()
    }

    /// Claim the single refresh slot for an email.
    ///
    /// Returns `false` if a refresh is already in flight; the caller must
    /// not start another one.
    #[must_use]
    pub fn try_begin_refresh(&self, email: &str) -> bool {
        self.in_flight.lock().insert(email.to_string())
    }

    /// Release the refresh slot claimed by [`Self::try_begin_refresh`].
    ///
    /// Outcome bookkeeping (`note_issued` / `note_failure`) is the refresh
    /// caller's job; doing it here too would double-count.
    pub fn end_refresh(&self, email: &str) {
        let _ = self.in_flight.lock().remove(email);
    }

    /// How long ago the token was issued (for diagnostics).
    #[must_use]
    pub fn age_ms(&self, email: &str) -> Option<i64> {
        let tokens = self.tokens.lock();
        tokens.get(email).map(|m| now_ms() - m.issued_at)
    }
}

/// Whether the failure backoff window for `meta` has elapsed at `now`.
fn backoff_elapsed(meta: &TokenMeta, now: i64) -> bool {
    if meta.consecutive_failures == 0 {
        return true;
    }
    let exponent = meta.consecutive_failures.saturating_sub(1).min(31);
    let backoff = REFRESH_BACKOFF_BASE_MS
        .saturating_mul(1_i64 << exponent)
        .min(REFRESH_BACKOFF_CAP_MS);
    now - meta.last_failure_at >= backoff
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── note_issued ──────────────────────────────────────────────────────

    #[test]
    fn short_lifetimes_are_ignored() {
        let reg = TokenRegistry::new();
        reg.note_issued("a@x.com", 120);
        assert_eq!(reg.status("a@x.com").state, TokenState::Unknown);
    }

    #[test]
    fn issued_token_is_valid() {
        let reg = TokenRegistry::new();
        reg.note_issued("a@x.com", 3600);
        let status = reg.status("a@x.com");
        assert_eq!(status.state, TokenState::Valid);
        assert!(status.expires_in_ms > 3_500_000);
    }

    // ── should_refresh ───────────────────────────────────────────────────

    #[test]
    fn fresh_token_not_due() {
        let reg = TokenRegistry::new();
        reg.note_issued("a@x.com", 3600);
        assert!(!reg.should_refresh("a@x.com"));
    }

    #[test]
    fn token_inside_buffer_is_due() {
        let reg = TokenRegistry::new();
        // 300s is the shortest tracked lifetime and sits inside the buffer
        reg.note_issued("a@x.com", 300);
        assert!(reg.should_refresh("a@x.com"));
    }

    #[test]
    fn unknown_account_not_due() {
        let reg = TokenRegistry::new();
        assert!(!reg.should_refresh("nobody@x.com"));
    }

    #[test]
    fn recent_failure_blocks_refresh() {
        let reg = TokenRegistry::new();
        reg.note_issued("a@x.com", 300);
        reg.note_failure("a@x.com");
        assert!(!reg.should_refresh("a@x.com"));
    }

    // ── status ───────────────────────────────────────────────────────────

    #[test]
    fn status_expiring_soon() {
        let reg = TokenRegistry::new();
        reg.note_issued("a@x.com", 300);
        assert_eq!(reg.status("a@x.com").state, TokenState::ExpiringSoon);
    }

    #[test]
    fn status_unknown_for_untracked() {
        let reg = TokenRegistry::new();
        let status = reg.status("ghost@x.com");
        assert_eq!(status.state, TokenState::Unknown);
        assert_eq!(status.expires_in_ms, 0);
    }

    // ── Single-flight ────────────────────────────────────────────────────

    #[test]
    fn second_begin_refresh_is_rejected() {
        let reg = TokenRegistry::new();
        assert!(reg.try_begin_refresh("a@x.com"));
        assert!(!reg.try_begin_refresh("a@x.com"));
        reg.end_refresh("a@x.com");
        assert!(reg.try_begin_refresh("a@x.com"));
    }

    #[test]
    fn in_flight_excluded_from_due_list() {
        let reg = TokenRegistry::new();
        reg.note_issued("a@x.com", 300);
        assert_eq!(reg.due_for_refresh(), vec!["a@x.com".to_string()]);
        assert!(reg.try_begin_refresh("a@x.com"));
        assert!(reg.due_for_refresh().is_empty());
    }

    #[test]
    fn failure_backoff_blocks_next_attempt() {
        let reg = TokenRegistry::new();
        reg.note_issued("a@x.com", 300);
        assert!(reg.try_begin_refresh("a@x.com"));
        reg.note_failure("a@x.com");
        reg.end_refresh("a@x.com");
        // Failure just now, so the backoff window blocks the next attempt.
        assert!(!reg.should_refresh("a@x.com"));
        assert!(reg.due_for_refresh().is_empty());
    }

    // ── Backoff math ─────────────────────────────────────────────────────

    #[test]
    fn backoff_doubles_and_caps() {
        let meta = |failures, last| TokenMeta {
            issued_at: 0,
            expires_at: 0,
            consecutive_failures: failures,
            last_failure_at: last,
        };
        // 1 failure: 60s window
        assert!(!backoff_elapsed(&meta(1, 100_000), 130_000));
        assert!(backoff_elapsed(&meta(1, 100_000), 160_000));
        // 2 failures: 120s window
        assert!(!backoff_elapsed(&meta(2, 100_000), 190_000));
        assert!(backoff_elapsed(&meta(2, 100_000), 220_000));
        // Many failures: capped at 15 minutes
        assert!(backoff_elapsed(&meta(20, 100_000), 100_000 + 900_000));
        assert!(!backoff_elapsed(&meta(20, 100_000), 100_000 + 899_000));
    }

    #[test]
    fn forget_removes_tracking() {
        let reg = TokenRegistry::new();
        reg.note_issued("a@x.com", 3600);
        reg.forget("a@x.com");
        assert_eq!(reg.status("a@x.com").state, TokenState::Unknown);
    }
}
