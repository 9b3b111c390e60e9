//! Typed error taxonomy for the proxy.
//!
//! Internal errors are typed, never stringly matched. The dispatcher maps
//! them to the Anthropic-compatible wire taxonomy at the HTTP boundary via
//! [`ProxyError::http_status`] and [`ProxyError::anthropic_error_type`].
//! Text that leaves the process goes through [`ProxyError::client_message`],
//! which redacts account and credential material; full detail stays in the
//! internal logs.

use serde_json::json;
use thiserror::Error;

use crate::redact::redact_sensitive;

/// Result alias used throughout the slipstream crates.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Everything that can go wrong while serving one logical request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The client request failed validation or could not be translated.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Human-readable reason.
        message: String,
    },

    /// Upstream authentication failed (401, `invalid_grant`).
    #[error("authentication failed: {message}")]
    Auth {
        /// Human-readable reason.
        message: String,
    },

    /// Upstream denied access (403).
    #[error("permission denied: {message}")]
    Permission {
        /// Human-readable reason.
        message: String,
    },

    /// Every usable account is rate-limited past the fail-fast threshold.
    #[error("rate limited until {reset_at_ms}")]
    RateLimited {
        /// Absolute reset time, milliseconds since the Unix epoch.
        reset_at_ms: i64,
        /// Human-readable reason.
        message: String,
    },

    /// All endpoints returned 5xx or were unreachable across attempts.
    #[error("upstream unavailable: {message}")]
    ServiceUnavailable {
        /// Human-readable reason.
        message: String,
    },

    /// The upstream exceeded the per-request timeout.
    #[error("upstream timed out after {seconds}s")]
    Timeout {
        /// The timeout that elapsed.
        seconds: u64,
    },

    /// The account pool is empty or every account is terminally invalid.
    #[error("no usable accounts")]
    NoAccounts,

    /// A non-retryable upstream error that maps to none of the above.
    #[error("upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status returned by the upstream.
        status: u16,
        /// Upstream error message.
        message: String,
        /// Upstream error code (e.g. `PERMISSION_DENIED`), when present.
        code: Option<String>,
        /// Whether the scheduler may retry this on another account/endpoint.
        retryable: bool,
    },

    /// Request/response translation failed.
    #[error("translation failed: {message}")]
    Translation {
        /// Human-readable reason.
        message: String,
    },
}

impl ProxyError {
    /// HTTP status code surfaced to the downstream client.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::Auth { .. } => 401,
            Self::Permission { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::ServiceUnavailable { .. } => 502,
            Self::NoAccounts => 503,
            Self::Timeout { .. } => 504,
            Self::Upstream { status, .. } => {
                // 4xx pass through; anything else is a bad gateway.
                if (400..500).contains(status) { *status } else { 502 }
            }
            Self::Translation { .. } => 500,
        }
    }

    /// Anthropic wire error type string for the response body.
    #[must_use]
    pub fn anthropic_error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } | Self::Translation { .. } => "invalid_request_error",
            Self::Auth { .. } => "authentication_error",
            Self::Permission { .. } => "permission_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::ServiceUnavailable { .. } | Self::NoAccounts => "overloaded_error",
            Self::Timeout { .. } => "timeout_error",
            Self::Upstream { status, .. } => {
                if (400..500).contains(status) {
                    "invalid_request_error"
                } else {
                    "api_error"
                }
            }
        }
    }

    /// Redacted message suitable for the external payload.
    ///
    /// Never contains email addresses, tokens, project IDs, file paths, or
    /// internal endpoint hosts.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::NoAccounts => "No upstream accounts are currently available".into(),
            Self::Timeout { seconds } => {
                format!("Upstream request timed out after {seconds}s")
            }
            Self::RateLimited { .. } => "All accounts are rate limited".into(),
            other => redact_sensitive(&other.to_string()),
        }
    }

    /// Anthropic-shaped error body: `{type:"error", error:{type, message}}`.
    #[must_use]
    pub fn to_wire_json(&self) -> serde_json::Value {
        json!({
            "type": "error",
            "error": {
                "type": self.anthropic_error_type(),
                "message": self.client_message(),
            }
        })
    }

    /// Whether the scheduler is allowed to retry on another account.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Auth { .. } | Self::ServiceUnavailable { .. } | Self::Timeout { .. } => true,
            Self::Upstream { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
