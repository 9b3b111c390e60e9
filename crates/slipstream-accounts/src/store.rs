//! The account store: pool state and token acquisition.
//!
//! Identity fields (`email`, `refresh_token`, `project_id`) are immutable
//! after load. Mutable state (enabled/invalid flags, last-use stamps,
//! per-model rate limits) changes only under the store's exclusive lock.
//! Once `invalid` is set the account never mutates again except by removal.
//!
//! Token acquisition deduplicates concurrent callers per email: the first
//! caller runs the refresh grant, everyone else awaits the same flight and
//! reads the cache.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, instrument, warn};

use slipstream_auth::refresh::{discover_project_id, exchange_refresh_token, RefreshError};
use slipstream_auth::types::{now_ms, AccountsFile, OAuthTokens, StoredAccount};
use slipstream_auth::TokenRegistry;
use slipstream_core::{ProxyError, ProxyResult};

/// Safety margin subtracted from token expiry at dispatch time.
const DISPATCH_EXPIRY_MARGIN_MS: i64 = 30_000;

/// One account's runtime state.
#[derive(Clone, Debug)]
struct Account {
    email: String,
    refresh_token: String,
    project_id: Option<String>,
    added_at: i64,
    enabled: bool,
    invalid: bool,
    invalid_reason: Option<String>,
    last_used: Option<i64>,
    /// `model → (reset_at_ms, observed_at_ms)`.
    rate_limits: HashMap<String, (i64, i64)>,
}

impl Account {
    fn usable(&self) -> bool {
        self.enabled && !self.invalid
    }

    fn limited_for(&self, model: &str, now: i64) -> bool {
        self.rate_limits.get(model).is_some_and(|(reset, _)| *reset > now)
    }
}

/// Per-model rate-limit status in a snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct ModelLimit {
    /// Model the limit applies to.
    pub model: String,
    /// Absolute reset time (epoch ms).
    pub reset_at: i64,
    /// Whether the limit is still in force.
    pub active: bool,
}

/// Read-only view of one account for the meta endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct AccountSnapshot {
    /// Account email.
    pub email: String,
    /// Whether the account is enabled.
    pub enabled: bool,
    /// Whether the account is terminally invalid.
    pub invalid: bool,
    /// Why the account was invalidated, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    /// Last successful use (epoch ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
    /// Active and recently cleared per-model limits.
    pub rate_limits: Vec<ModelLimit>,
}

/// Hook invoked with the persistable account state after a mutation.
pub type PersistHook = Arc<dyn Fn(Vec<StoredAccount>) + Send + Sync>;

/// The shared account pool.
pub struct AccountStore {
    accounts: RwLock<Vec<Account>>,
    tokens: RwLock<HashMap<String, OAuthTokens>>,
    flights: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    cursor: parking_lot::Mutex<usize>,
    registry: Arc<TokenRegistry>,
    client: reqwest::Client,
    token_url: Option<String>,
    discovery_endpoint: Option<String>,
    persist: RwLock<Option<PersistHook>>,
}

impl AccountStore {
    /// Build a store from the persisted accounts file.
    #[must_use]
    pub fn from_file(file: &AccountsFile, client: reqwest::Client, registry: Arc<TokenRegistry>) -> Self {
        let accounts = file
            .accounts
            .iter()
            .map(|a| Account {
                email: a.email.clone(),
                refresh_token: a.refresh_token.clone(),
                project_id: a.project_id.clone(),
                added_at: a.added_at,
                enabled: true,
                invalid: a.invalid.unwrap_or(false),
                invalid_reason: a.invalid_reason.clone(),
                last_used: a.last_used,
                rate_limits: HashMap::new(),
            })
            .collect();

        Self {
            accounts: RwLock::new(accounts),
            tokens: RwLock::new(HashMap::new()),
            flights: DashMap::new(),
            cursor: parking_lot::Mutex::new(file.active_index),
            registry,
            client,
            token_url: None,
            discovery_endpoint: None,
            persist: RwLock::new(None),
        }
    }

    /// Override the OAuth token endpoint (tests).
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Override the project-discovery endpoint (tests).
    #[must_use]
    pub fn with_discovery_endpoint(mut self, url: impl Into<String>) -> Self {
        self.discovery_endpoint = Some(url.into());
        self
    }

    /// Install the persistence hook called after state mutations.
    pub fn set_persist_hook(&self, hook: PersistHook) {
        *self.persist.write() = Some(hook);
    }

    /// The shared token registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// Total account count, including invalid ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    /// Count of accounts that are enabled and not invalid.
    #[must_use]
    pub fn usable_count(&self) -> usize {
        self.accounts.read().iter().filter(|a| a.usable()).count()
    }

    // ── Rate-limit state ─────────────────────────────────────────────────

    /// Record a rate limit for `(email, model)` until `reset_at` (epoch ms).
    pub fn mark_rate_limited(&self, email: &str, model: &str, reset_at: i64) {
        {
            let mut accounts = self.accounts.write();
            let Some(acct) = accounts.iter_mut().find(|a| a.email == email) else {
                return;
            };
            if acct.invalid {
                return;
            }
            let _ = acct.rate_limits.insert(model.to_string(), (reset_at, now_ms()));
            warn!(model, reset_in_ms = reset_at - now_ms(), "account rate limited");
        }
        self.run_persist_hook();
    }

    /// Terminally invalidate an account. No further mutation except removal.
    pub fn mark_invalid(&self, email: &str, reason: &str) {
        {
            let mut accounts = self.accounts.write();
            let Some(acct) = accounts.iter_mut().find(|a| a.email == email) else {
                return;
            };
            if acct.invalid {
                return;
            }
            acct.invalid = true;
            acct.invalid_reason = Some(reason.to_string());
            warn!(reason, "account invalidated");
        }
        let _ = self.tokens.write().remove(email);
        self.registry.forget(email);
        self.run_persist_hook();
    }

    /// Drop rate-limit entries whose reset time has passed.
    pub fn clear_expired_rate_limits(&self) {
        let now = now_ms();
        let mut accounts = self.accounts.write();
        for acct in accounts.iter_mut() {
            acct.rate_limits.retain(|_, (reset, _)| *reset > now);
        }
    }

    /// Drop every rate-limit entry for `model` (last-resort reset).
    pub fn reset_rate_limits(&self, model: &str) {
        let mut accounts = self.accounts.write();
        for acct in accounts.iter_mut() {
            let _ = acct.rate_limits.remove(model);
        }
    }

    /// Whether every usable account is currently limited for `model`.
    #[must_use]
    pub fn is_all_rate_limited(&self, model: &str) -> bool {
        let now = now_ms();
        let accounts = self.accounts.read();
        let mut any_usable = false;
        for acct in accounts.iter().filter(|a| a.usable()) {
            any_usable = true;
            if !acct.limited_for(model, now) {
                return false;
            }
        }
        any_usable
    }

    /// Milliseconds until the soonest limit for `model` resets.
    ///
    /// Zero when some usable account is already clear.
    #[must_use]
    pub fn min_wait_ms(&self, model: &str) -> u64 {
        let now = now_ms();
        let accounts = self.accounts.read();
        let mut min: Option<i64> = None;
        for acct in accounts.iter().filter(|a| a.usable()) {
            match acct.rate_limits.get(model) {
                Some((reset, _)) if *reset > now => {
                    let wait = reset - now;
                    min = Some(min.map_or(wait, |m| m.min(wait)));
                }
                _ => return 0,
            }
        }
        min.map_or(0, |m| u64::try_from(m).unwrap_or(0))
    }

    /// Whether `email` is usable and clear of limits for `model` right now.
    #[must_use]
    pub fn is_available(&self, email: &str, model: &str) -> bool {
        let now = now_ms();
        let accounts = self.accounts.read();
        accounts
            .iter()
            .find(|a| a.email == email)
            .is_some_and(|a| a.usable() && !a.limited_for(model, now))
    }

    /// Whether `email` is enabled and not terminally invalid.
    #[must_use]
    pub fn is_usable(&self, email: &str) -> bool {
        let accounts = self.accounts.read();
        accounts.iter().find(|a| a.email == email).is_some_and(Account::usable)
    }

    /// Milliseconds until `email`'s limit for `model` resets (0 if clear).
    #[must_use]
    pub fn wait_ms_for(&self, email: &str, model: &str) -> u64 {
        let now = now_ms();
        let accounts = self.accounts.read();
        accounts
            .iter()
            .find(|a| a.email == email)
            .and_then(|a| a.rate_limits.get(model))
            .map_or(0, |(reset, _)| u64::try_from(reset - now).unwrap_or(0))
    }

    /// Round-robin pick of the next usable, unlimited account for `model`.
    #[must_use]
    pub fn pick_next(&self, model: &str) -> Option<String> {
        let now = now_ms();
        let accounts = self.accounts.read();
        if accounts.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock();
        let len = accounts.len();
        for offset in 0..len {
            let idx = (*cursor + offset) % len;
            let acct = &accounts[idx];
            if acct.usable() && !acct.limited_for(model, now) {
                *cursor = (idx + 1) % len;
                return Some(acct.email.clone());
            }
        }
        None
    }

    /// Record a successful use of `email` (updates `last_used`, clears the
    /// model's limit entry, persists).
    pub fn mark_used(&self, email: &str, model: &str) {
        {
            let mut accounts = self.accounts.write();
            if let Some(acct) = accounts.iter_mut().find(|a| a.email == email) {
                if acct.invalid {
                    return;
                }
                acct.last_used = Some(now_ms());
                let _ = acct.rate_limits.remove(model);
            }
        }
        self.run_persist_hook();
    }

    // ── Token acquisition ────────────────────────────────────────────────

    /// Drop the cached access token for `email` (after an upstream 401).
    pub fn invalidate_token(&self, email: &str) {
        if self.tokens.write().remove(email).is_some() {
            info!("cached access token dropped");
        }
    }

    /// Get a valid access token for `email`, refreshing if stale.
    ///
    /// Concurrent callers for the same email share one refresh flight.
    #[instrument(skip(self))]
    pub async fn get_access_token(&self, email: &str) -> ProxyResult<String> {
        if let Some(token) = self.cached_token(email) {
            return Ok(token);
        }

        let flight = self.flight(email);
        let _guard = flight.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached_token(email) {
            return Ok(token);
        }

        self.refresh_access_token(email).await
    }

    /// The account's project ID, discovering one on first use if missing.
    pub async fn project_id(&self, email: &str) -> ProxyResult<String> {
        if let Some(existing) = self
            .accounts
            .read()
            .iter()
            .find(|a| a.email == email)
            .and_then(|a| a.project_id.clone())
        {
            return Ok(existing);
        }

        let token = self.get_access_token(email).await?;
        let project = discover_project_id(&self.client, &token, self.discovery_endpoint.as_deref())
            .await
            .map_err(|e| ProxyError::Auth { message: e.to_string() })?;

        {
            let mut accounts = self.accounts.write();
            if let Some(acct) = accounts.iter_mut().find(|a| a.email == email) {
                acct.project_id = Some(project.clone());
            }
        }
        self.run_persist_hook();
        Ok(project)
    }

    /// Run the refresh grant for `email` and cache the result.
    ///
    /// Callers must hold the per-email flight lock.
    pub(crate) async fn refresh_access_token(&self, email: &str) -> ProxyResult<String> {
        let refresh_token = {
            let accounts = self.accounts.read();
            let acct = accounts
                .iter()
                .find(|a| a.email == email)
                .ok_or(ProxyError::NoAccounts)?;
            if !acct.usable() {
                return Err(ProxyError::Auth {
                    message: "account is disabled or invalid".into(),
                });
            }
            acct.refresh_token.clone()
        };

        match exchange_refresh_token(&self.client, &refresh_token, self.token_url.as_deref()).await
        {
            Ok(fresh) => {
                let tokens = OAuthTokens {
                    access_token: fresh.access_token.clone(),
                    expires_at: now_ms() + fresh.expires_in * 1000 - DISPATCH_EXPIRY_MARGIN_MS,
                };
                let _ = self.tokens.write().insert(email.to_string(), tokens);
                self.registry.note_issued(email, fresh.expires_in);
                Ok(fresh.access_token)
            }
            Err(RefreshError::InvalidGrant) => {
                self.mark_invalid(email, "invalid_grant");
                Err(ProxyError::Auth {
                    message: "refresh token revoked".into(),
                })
            }
            Err(e) => {
                self.registry.note_failure(email);
                Err(ProxyError::Auth { message: e.to_string() })
            }
        }
    }

    /// The per-email flight mutex (created on first use).
    pub(crate) fn flight(&self, email: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.flights
            .entry(email.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn cached_token(&self, email: &str) -> Option<String> {
        let tokens = self.tokens.read();
        let entry = tokens.get(email)?;
        (entry.expires_at > now_ms()).then(|| entry.access_token.clone())
    }

    // ── Snapshots and persistence ────────────────────────────────────────

    /// Snapshot all accounts for the meta endpoints.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AccountSnapshot> {
        let now = now_ms();
        self.accounts
            .read()
            .iter()
            .map(|a| AccountSnapshot {
                email: a.email.clone(),
                enabled: a.enabled,
                invalid: a.invalid,
                invalid_reason: a.invalid_reason.clone(),
                last_used: a.last_used,
                rate_limits: a
                    .rate_limits
                    .iter()
                    .map(|(model, (reset, _))| ModelLimit {
                        model: model.clone(),
                        reset_at: *reset,
                        active: *reset > now,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Persistable view of the pool (identity + write-back fields).
    #[must_use]
    pub fn to_stored(&self) -> Vec<StoredAccount> {
        let now = now_ms();
        self.accounts
            .read()
            .iter()
            .map(|a| {
                let active_limit = a.rate_limits.values().filter(|(reset, _)| *reset > now).map(|(reset, _)| *reset).max();
                StoredAccount {
                    email: a.email.clone(),
                    refresh_token: a.refresh_token.clone(),
                    project_id: a.project_id.clone(),
                    added_at: a.added_at,
                    last_used: a.last_used,
                    is_rate_limited: active_limit.is_some().then_some(true),
                    rate_limit_reset_time: active_limit,
                    invalid: a.invalid.then_some(true),
                    invalid_reason: a.invalid_reason.clone(),
                }
            })
            .collect()
    }

    fn run_persist_hook(&self) {
        let hook = self.persist.read().clone();
        if let Some(hook) = hook {
            hook(self.to_stored());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
