//! Meta endpoints: model list, health, rate-limit status, forced refresh.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{info, instrument};

use slipstream_accounts::AccountSnapshot;
use slipstream_translate::anthropic::{all_model_ids, get_model};

use crate::state::AppState;

/// Handle `GET /v1/models`.
pub async fn handle_list_models() -> Response {
    let data: Vec<_> = all_model_ids()
        .into_iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "display_name": get_model(id).map_or(id, |m| m.name),
                "owned_by": "slipstream",
            })
        })
        .collect();
    Json(serde_json::json!({ "data": data })).into_response()
}

/// Health response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server runs.
    pub status: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Account pool summary.
    pub accounts: AccountsSummary,
}

/// Account pool summary for `/health`.
#[derive(Debug, Serialize)]
pub struct AccountsSummary {
    /// All accounts, including invalid ones.
    pub total: usize,
    /// Enabled, non-invalid accounts.
    pub available: usize,
    /// Per-account detail.
    pub list: Vec<AccountSnapshot>,
}

/// Handle `GET /health`.
pub async fn handle_health(State(state): State<AppState>) -> Response {
    let list = state.store.snapshot();
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        accounts: AccountsSummary {
            total: state.store.len(),
            available: state.store.usable_count(),
            list,
        },
    })
    .into_response()
}

/// Handle `GET /account-limits`.
pub async fn handle_account_limits(State(state): State<AppState>) -> Response {
    let accounts: Vec<_> = state
        .store
        .snapshot()
        .into_iter()
        .map(|snapshot| {
            let token = state.store.registry().status(&snapshot.email);
            serde_json::json!({
                "email": snapshot.email,
                "invalid": snapshot.invalid,
                "token": token,
                "limits": snapshot.rate_limits,
            })
        })
        .collect();
    Json(serde_json::json!({ "accounts": accounts })).into_response()
}

/// Handle `POST /refresh-token`: drop cached tokens and mint fresh ones.
///
/// The response reports counts only, never any token material.
#[instrument(skip_all)]
pub async fn handle_refresh_token(State(state): State<AppState>) -> Response {
    let mut refreshed = 0usize;
    let mut failed = 0usize;

    for snapshot in state.store.snapshot() {
        if snapshot.invalid {
            continue;
        }
        state.store.invalidate_token(&snapshot.email);
        match state.store.get_access_token(&snapshot.email).await {
            Ok(_) => refreshed += 1,
            Err(_) => failed += 1,
        }
    }
    info!(refreshed, failed, "forced token refresh");

    Json(serde_json::json!({
        "status": "ok",
        "refreshed": refreshed,
        "failed": failed,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn model_list_contains_registry() {
        let response = handle_list_models().await;
        assert_eq!(response.status(), 200);
    }
}
