//! OAuth refresh grant and Cloud Code project discovery.
//!
//! The refresh grant is the standard OAuth 2.0 `refresh_token` exchange
//! against Google's token endpoint using the public Gemini CLI client.
//! `invalid_grant` is surfaced as its own variant so the account store can
//! mark the account terminally invalid instead of retrying forever.
//!
//! Accounts enrolled without a project ID get one resolved lazily via
//! `loadCodeAssist`, falling back to `onboardUser` for accounts that have
//! never touched Cloud Code.

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{info, instrument, warn};

/// Google OAuth token endpoint.
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Public OAuth client the upstream CLI ships with.
const CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";

/// Companion secret for the public client (not confidential by design).
const CLIENT_SECRET: &str = "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";

/// Cloud Code endpoint used for project discovery.
const DISCOVERY_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com/v1internal";

/// Errors from the token exchange or project discovery.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The refresh token was revoked or expired. Terminal for the account.
    #[error("refresh token rejected (invalid_grant)")]
    InvalidGrant,

    /// Transport-level failure; safe to retry later.
    #[error("token endpoint unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response that is not `invalid_grant`.
    #[error("token endpoint returned {status}")]
    Status {
        /// HTTP status from the token endpoint.
        status: u16,
    },

    /// Discovery could not resolve a project for the account.
    #[error("project discovery failed: {message}")]
    Discovery {
        /// Human-readable reason.
        message: String,
    },
}

/// A freshly minted access token.
#[derive(Clone, Debug)]
pub struct RefreshedToken {
    /// The bearer token.
    pub access_token: String,
    /// Seconds until expiry, as reported by the endpoint.
    pub expires_in: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
}

/// Exchange a refresh token for a fresh access token.
#[instrument(skip_all)]
pub async fn exchange_refresh_token(
    client: &reqwest::Client,
    refresh_token: &str,
    token_url: Option<&str>,
) -> Result<RefreshedToken, RefreshError> {
    let url = token_url.unwrap_or(TOKEN_URL);

    let body = serde_json::json!({
        "grant_type": "refresh_token",
        "refresh_token": refresh_token,
        "client_id": CLIENT_ID,
        "client_secret": CLIENT_SECRET,
    });

    let response = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&text) {
            if err.error == "invalid_grant" {
                warn!("refresh token rejected with invalid_grant");
                return Err(RefreshError::InvalidGrant);
            }
        }
        warn!(status = status.as_u16(), "token refresh failed");
        return Err(RefreshError::Status { status: status.as_u16() });
    }

    let data: TokenResponse = response.json().await?;
    info!(expires_in = data.expires_in, "access token refreshed");

    Ok(RefreshedToken {
        access_token: data.access_token,
        expires_in: data.expires_in,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadCodeAssistResponse {
    cloudaicompanion_project: Option<String>,
    #[serde(default)]
    allowed_tiers: Vec<TierInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TierInfo {
    id: Option<String>,
    #[serde(default)]
    is_default: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnboardResponse {
    #[serde(default)]
    done: bool,
    response: Option<OnboardResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnboardResult {
    cloudaicompanion_project: Option<ProjectRef>,
}

#[derive(Deserialize)]
struct ProjectRef {
    id: Option<String>,
}

/// Resolve the Cloud Code project for an account that enrolled without one.
///
/// `loadCodeAssist` answers immediately for accounts that already have a
/// companion project; new accounts go through one `onboardUser` round.
#[instrument(skip_all)]
pub async fn discover_project_id(
    client: &reqwest::Client,
    access_token: &str,
    endpoint: Option<&str>,
) -> Result<String, RefreshError> {
    let base = endpoint.unwrap_or(DISCOVERY_ENDPOINT);

    let load: LoadCodeAssistResponse = client
        .post(format!("{base}:loadCodeAssist"))
        .bearer_auth(access_token)
        .json(&serde_json::json!({
            "metadata": { "pluginType": "GEMINI" }
        }))
        .send()
        .await?
        .error_for_status()
        .map_err(|e| RefreshError::Discovery { message: e.to_string() })?
        .json()
        .await?;

    if let Some(project) = load.cloudaicompanion_project {
        info!("project resolved via loadCodeAssist");
        return Ok(project);
    }

    let tier = load
        .allowed_tiers
        .iter()
        .find(|t| t.is_default)
        .and_then(|t| t.id.clone())
        .unwrap_or_else(|| "free-tier".into());

    let onboard: OnboardResponse = client
        .post(format!("{base}:onboardUser"))
        .bearer_auth(access_token)
        .json(&serde_json::json!({
            "tierId": tier,
            "metadata": { "pluginType": "GEMINI" }
        }))
        .send()
        .await?
        .error_for_status()
        .map_err(|e| RefreshError::Discovery { message: e.to_string() })?
        .json()
        .await?;

    if onboard.done {
        if let Some(id) = onboard
            .response
            .and_then(|r| r.cloudaicompanion_project)
            .and_then(|p| p.id)
        {
            info!("project resolved via onboardUser");
            return Ok(id);
        }
    }

    Err(RefreshError::Discovery {
        message: "onboarding did not return a project".into(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn refresh_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_partial_json(serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": "1//rt"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/token", server.uri());
        let token = exchange_refresh_token(&client, "1//rt", Some(&url))
            .await
            .unwrap();
        assert_eq!(token.access_token, "ya29.fresh");
        assert_eq!(token.expires_in, 3599);
    }

    #[tokio::test]
    async fn refresh_invalid_grant_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/token", server.uri());
        let err = exchange_refresh_token(&client, "1//rt", Some(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::InvalidGrant));
    }

    #[tokio::test]
    async fn refresh_other_failure_is_not_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/token", server.uri());
        let err = exchange_refresh_token(&client, "1//rt", Some(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn discovery_existing_project() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cloudaicompanionProject": "existing-project-123"
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let base = format!("{}/v1internal", server.uri());
        let project = discover_project_id(&client, "ya29.tok", Some(&base))
            .await
            .unwrap();
        assert_eq!(project, "existing-project-123");
    }

    #[tokio::test]
    async fn discovery_onboards_new_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "allowedTiers": [{"id": "free-tier", "isDefault": true}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1internal:onboardUser"))
            .and(body_partial_json(serde_json::json!({"tierId": "free-tier"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "done": true,
                "response": {"cloudaicompanionProject": {"id": "fresh-project-456"}}
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let base = format!("{}/v1internal", server.uri());
        let project = discover_project_id(&client, "ya29.tok", Some(&base))
            .await
            .unwrap();
        assert_eq!(project, "fresh-project-456");
    }

    #[tokio::test]
    async fn discovery_incomplete_onboarding_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1internal:onboardUser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "done": false
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let base = format!("{}/v1internal", server.uri());
        let err = discover_project_id(&client, "ya29.tok", Some(&base))
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Discovery { .. }));
    }
}
