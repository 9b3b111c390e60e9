//! The account scheduler: one logical request, retried across accounts,
//! endpoints, and (once) a fallback model.
//!
//! Selection prefers the sticky account for the model. A rate-limited
//! sticky with a short reset is waited out; anything longer moves on. When
//! every account is limited, the scheduler sleeps out the soonest reset if
//! it lands within two minutes and fails fast with the reset time
//! otherwise. The retry topology is a flat loop; the fallback model adds
//! at most one more pass, never recursion.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use slipstream_accounts::{AccountStore, StickyPins};
use slipstream_auth::types::now_ms;
use slipstream_core::constants::{
    MAX_RETRIES, MAX_WAIT_BEFORE_ERROR_MS, RATE_LIMIT_WAIT_SLACK_MS,
};
use slipstream_core::redact::redact_sensitive;
use slipstream_core::reset::parse_reset_at;
use slipstream_core::{ProxyError, ProxyResult};
use slipstream_translate::anthropic::{is_thinking_model, MessagesRequest};
use slipstream_translate::inbound::to_upstream;
use slipstream_translate::SignatureCache;

use crate::client::UpstreamClient;

/// A successful upstream dispatch, handed back to the request dispatcher.
#[derive(Debug)]
pub struct Dispatched {
    /// Account that served the request.
    pub email: String,
    /// Model actually used (differs from the request after fallback).
    pub model: String,
    /// Whether the response body is SSE.
    pub streaming: bool,
    /// The 200 upstream response, body unread.
    pub response: reqwest::Response,
}

/// Executes requests against the account pool.
pub struct Scheduler {
    store: Arc<AccountStore>,
    pins: Arc<StickyPins>,
    client: UpstreamClient,
    signatures: Arc<SignatureCache>,
    fallback_model: Option<String>,
}

impl Scheduler {
    /// Build a scheduler over the shared pool state.
    #[must_use]
    pub fn new(
        store: Arc<AccountStore>,
        pins: Arc<StickyPins>,
        client: UpstreamClient,
        signatures: Arc<SignatureCache>,
        fallback_model: Option<String>,
    ) -> Self {
        Self { store, pins, client, signatures, fallback_model }
    }

    /// Execute one logical request.
    ///
    /// `model` is the resolved canonical model. Thinking models always take
    /// the upstream SSE path; `stream_requested` only controls how the
    /// dispatcher consumes the body.
    #[instrument(skip_all, fields(model))]
    pub async fn execute(
        &self,
        request: &MessagesRequest,
        model: &str,
        stream_requested: bool,
    ) -> ProxyResult<Dispatched> {
        match self.run_attempts(request, model, stream_requested).await {
            Ok(dispatched) => Ok(dispatched),
            Err(err) if self.fallback_applies(&err, model) => {
                let fallback = self.fallback_model.as_deref().unwrap_or_default().to_string();
                warn!(%err, %fallback, "accounts exhausted, retrying on fallback model");
                self.run_attempts(request, &fallback, stream_requested).await
            }
            Err(err) => Err(err),
        }
    }

    /// Whether the fallback-model pass should run for this failure.
    fn fallback_applies(&self, err: &ProxyError, model: &str) -> bool {
        matches!(err, ProxyError::NoAccounts | ProxyError::ServiceUnavailable { .. })
            && self.fallback_model.as_deref().is_some_and(|f| f != model)
    }

    async fn run_attempts(
        &self,
        request: &MessagesRequest,
        model: &str,
        stream_requested: bool,
    ) -> ProxyResult<Dispatched> {
        // Idle housekeeping rides the scheduling path.
        self.signatures.sweep();
        self.store.clear_expired_rate_limits();

        let upstream_stream = stream_requested || is_thinking_model(model);
        let max_attempts =
            MAX_RETRIES.max(u32::try_from(self.store.len()).unwrap_or(0) + 1);
        let mut last_error: Option<ProxyError> = None;
        let mut skip_sticky = false;

        for attempt in 0..max_attempts {
            let email = match self.select_account(model, skip_sticky).await? {
                Some(email) => email,
                None => return Err(ProxyError::NoAccounts),
            };
            debug!(attempt, "dispatching");

            match self.attempt(&email, request, model, upstream_stream).await {
                Ok(response) => {
                    self.store.mark_used(&email, model);
                    self.pins.pin(model, &email);
                    return Ok(Dispatched {
                        email,
                        model: model.to_string(),
                        streaming: upstream_stream,
                        response,
                    });
                }
                Err(err) if !retry_on_next_account(&err) => return Err(err),
                Err(err) => {
                    warn!(attempt, %err, "attempt failed, rotating");
                    // Don't hand the failed sticky account straight back.
                    if self.pins.get(model).as_deref() == Some(email.as_str()) {
                        skip_sticky = true;
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(self.exhaustion_error(last_error, model))
    }

    /// Pick the account for this attempt, sleeping out short waits.
    async fn select_account(&self, model: &str, skip_sticky: bool) -> ProxyResult<Option<String>> {
        // Sticky preference: reuse the last successful account unless it is
        // currently limited or already failed this request.
        if let Some(pinned) = self.pins.get(model).filter(|_| !skip_sticky) {
            if self.store.is_available(&pinned, model) {
                return Ok(Some(pinned));
            }
            let wait = self.store.wait_ms_for(&pinned, model);
            if self.store.is_usable(&pinned) && wait > 0 && wait <= MAX_WAIT_BEFORE_ERROR_MS {
                info!(wait_ms = wait, "waiting out sticky account's rate limit");
                tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                self.store.clear_expired_rate_limits();
                if self.store.is_available(&pinned, model) {
                    return Ok(Some(pinned));
                }
            }
        }

        if let Some(email) = self.store.pick_next(model) {
            return Ok(Some(email));
        }

        if self.store.is_all_rate_limited(model) {
            let wait = self.store.min_wait_ms(model);
            if wait > MAX_WAIT_BEFORE_ERROR_MS {
                return Err(ProxyError::RateLimited {
                    reset_at_ms: now_ms() + i64::try_from(wait).unwrap_or(i64::MAX),
                    message: "all accounts rate limited".into(),
                });
            }
            info!(wait_ms = wait, "all accounts limited, waiting for soonest reset");
            tokio::time::sleep(std::time::Duration::from_millis(
                wait + RATE_LIMIT_WAIT_SLACK_MS,
            ))
            .await;
            self.store.clear_expired_rate_limits();
            if let Some(email) = self.store.pick_next(model) {
                return Ok(Some(email));
            }
            // The upstream clock disagreed with the reset we recorded.
            self.store.reset_rate_limits(model);
            return Ok(self.store.pick_next(model));
        }

        Ok(None)
    }

    /// One account's attempt: token, project, translate, endpoint loop.
    async fn attempt(
        &self,
        email: &str,
        request: &MessagesRequest,
        model: &str,
        upstream_stream: bool,
    ) -> ProxyResult<reqwest::Response> {
        let token = self.store.get_access_token(email).await?;
        let project = self.store.project_id(email).await?;
        let inner = to_upstream(request, model, &self.signatures)?;
        let envelope = UpstreamClient::envelope(model, &project, &inner);

        let mut last_error: Option<ProxyError> = None;
        for endpoint in self.client.endpoints() {
            let response = match self
                .client
                .generate(endpoint, &token, &envelope, upstream_stream)
                .await
            {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    warn!(%endpoint, "upstream timed out");
                    last_error = Some(ProxyError::Timeout {
                        seconds: if upstream_stream {
                            slipstream_core::constants::UPSTREAM_STREAM_TIMEOUT_SECS
                        } else {
                            slipstream_core::constants::UPSTREAM_TIMEOUT_SECS
                        },
                    });
                    continue;
                }
                Err(err) => {
                    warn!(%endpoint, "upstream unreachable: {err}");
                    last_error = Some(ProxyError::ServiceUnavailable {
                        message: redact_sensitive(&err.to_string()),
                    });
                    continue;
                }
            };

            let status = response.status().as_u16();
            match status {
                200 => return Ok(response),
                401 => {
                    self.store.invalidate_token(email);
                    return Err(ProxyError::Auth {
                        message: "upstream rejected the access token".into(),
                    });
                }
                403 => {
                    self.store.mark_invalid(email, "permission_denied");
                    self.pins.release_account(email);
                    return Err(ProxyError::Permission {
                        message: "upstream denied access for the account".into(),
                    });
                }
                429 => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    let body = response.text().await.unwrap_or_default();
                    let reset_at = parse_reset_at(retry_after.as_deref(), &body, now_ms());
                    self.store.mark_rate_limited(email, model, reset_at);
                    // The daily endpoint's quota is separate from prod's, so
                    // a 429 here still tries the next endpoint.
                    last_error = Some(ProxyError::Upstream {
                        status: 429,
                        message: redact_sensitive(&body),
                        code: Some("RESOURCE_EXHAUSTED".into()),
                        retryable: true,
                    });
                }
                500..=599 => {
                    warn!(%endpoint, status, "upstream server error");
                    last_error = Some(ProxyError::ServiceUnavailable {
                        message: format!("upstream returned {status}"),
                    });
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProxyError::Upstream {
                        status,
                        message: redact_sensitive(&body),
                        code: None,
                        retryable: false,
                    });
                }
            }
        }

        Err(last_error.unwrap_or(ProxyError::ServiceUnavailable {
            message: "no endpoint reachable".into(),
        }))
    }

    /// Final error once every attempt is spent.
    fn exhaustion_error(&self, last_error: Option<ProxyError>, model: &str) -> ProxyError {
        match last_error {
            Some(ProxyError::Upstream { status: 429, message, .. }) => {
                let wait = self.store.min_wait_ms(model);
                ProxyError::RateLimited {
                    reset_at_ms: now_ms() + i64::try_from(wait.max(1_000)).unwrap_or(i64::MAX),
                    message,
                }
            }
            Some(err @ (ProxyError::Auth { .. }
            | ProxyError::Permission { .. }
            | ProxyError::Timeout { .. })) => err,
            _ => ProxyError::ServiceUnavailable { message: "all attempts failed".into() },
        }
    }
}

/// Whether a failed attempt should rotate to another account.
fn retry_on_next_account(err: &ProxyError) -> bool {
    match err {
        ProxyError::Auth { .. }
        | ProxyError::Permission { .. }
        | ProxyError::Timeout { .. }
        | ProxyError::ServiceUnavailable { .. }
        | ProxyError::NoAccounts => true,
        ProxyError::Upstream { retryable, .. } => *retryable,
        ProxyError::InvalidRequest { .. }
        | ProxyError::RateLimited { .. }
        | ProxyError::Translation { .. } => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
