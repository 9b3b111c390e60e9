//! Token and persisted-account types.
//!
//! The accounts file mirrors what the enrollment CLI writes: account
//! identities plus the mutable scraps of state the proxy is allowed to
//! persist back (`lastUsed`, rate-limit flags). Timestamps are epoch
//! milliseconds throughout.

use serde::{Deserialize, Serialize};

/// An access token with its absolute expiry.
///
/// Held in memory only; refresh tokens live in [`StoredAccount`] and access
/// tokens are never written to disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokens {
    /// Bearer token for upstream requests.
    pub access_token: String,
    /// Absolute expiration, milliseconds since the Unix epoch.
    pub expires_at: i64,
}

impl OAuthTokens {
    /// Whether the token needs refreshing within `buffer_ms` of expiry.
    #[must_use]
    pub fn should_refresh(&self, buffer_ms: i64) -> bool {
        now_ms() + buffer_ms >= self.expires_at
    }
}

/// One enrolled account as persisted by the enrollment collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    /// Account email (primary key across the pool).
    pub email: String,
    /// OAuth refresh token from the enrollment flow.
    pub refresh_token: String,
    /// Cloud Code project ID, when enrollment resolved one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// When the account was enrolled (epoch ms).
    pub added_at: i64,
    /// Last successful use (epoch ms). Written back by the proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
    /// Coarse rate-limit flag persisted for dashboard display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_rate_limited: Option<bool>,
    /// When the persisted rate limit clears (epoch ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_time: Option<i64>,
    /// Terminal invalidation flag. Written back by the proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid: Option<bool>,
    /// Why the account was invalidated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

/// Free-form settings blob owned by the enrollment CLI. Preserved verbatim
/// on write-back.
pub type Settings = serde_json::Map<String, serde_json::Value>;

/// Top-level accounts file (`accounts.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsFile {
    /// Enrolled accounts.
    #[serde(default)]
    pub accounts: Vec<StoredAccount>,
    /// Settings owned by the enrollment CLI.
    #[serde(default)]
    pub settings: Settings,
    /// Index of the account the CLI last selected. The scheduler treats
    /// this as a startup hint only.
    #[serde(default)]
    pub active_index: usize,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a token issued now with `expires_in_seconds` left.
#[must_use]
pub fn calculate_expires_at(expires_in_seconds: i64) -> i64 {
    now_ms() + expires_in_seconds * 1000
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_camel_case_roundtrip() {
        let json = r#"{"accessToken":"ya29.tok","expiresAt":123}"#;
        let tokens: OAuthTokens = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.access_token, "ya29.tok");
        assert_eq!(tokens.expires_at, 123);
        let back = serde_json::to_value(&tokens).unwrap();
        assert_eq!(back["accessToken"], "ya29.tok");
    }

    #[test]
    fn should_refresh_expired_token() {
        let tokens = OAuthTokens { access_token: "t".into(), expires_at: 0 };
        assert!(tokens.should_refresh(0));
    }

    #[test]
    fn should_refresh_honors_buffer() {
        let tokens = OAuthTokens {
            access_token: "t".into(),
            expires_at: now_ms() + 60_000,
        };
        assert!(tokens.should_refresh(120_000));
        assert!(!tokens.should_refresh(0));
    }

    #[test]
    fn stored_account_minimal_fields() {
        let json = r#"{"email":"a@b.com","refreshToken":"1//rt","addedAt":5}"#;
        let acct: StoredAccount = serde_json::from_str(json).unwrap();
        assert_eq!(acct.email, "a@b.com");
        assert!(acct.project_id.is_none());
        assert!(acct.last_used.is_none());
    }

    #[test]
    fn accounts_file_defaults() {
        let file: AccountsFile = serde_json::from_str("{}").unwrap();
        assert!(file.accounts.is_empty());
        assert_eq!(file.active_index, 0);
    }

    #[test]
    fn accounts_file_preserves_settings() {
        let json = r#"{"accounts":[],"settings":{"theme":"dark"},"activeIndex":2}"#;
        let file: AccountsFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.settings["theme"], "dark");
        assert_eq!(file.active_index, 2);
        let back = serde_json::to_value(&file).unwrap();
        assert_eq!(back["settings"]["theme"], "dark");
    }

    #[test]
    fn calculate_expires_at_is_in_the_future() {
        let before = now_ms();
        let at = calculate_expires_at(3600);
        assert!(at >= before + 3_600_000);
    }
}
