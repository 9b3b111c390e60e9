//! The Cloud Code upstream HTTP client.
//!
//! Two endpoints are tried in order on every attempt: the daily-quota
//! sandbox host first, then production. A 429 from one does not preclude
//! the other; their quotas differ. Thinking models stream from the
//! upstream even for non-streaming client requests, so the client exposes
//! [`aggregate_stream`] to fold an SSE body back into a single response.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use slipstream_core::constants::{UPSTREAM_STREAM_TIMEOUT_SECS, UPSTREAM_TIMEOUT_SECS};
use slipstream_core::ids::new_request_id;
use slipstream_translate::gemini::{
    Candidate, CandidateContent, GenerateContentRequest, GenerateContentResponse, Part,
};

use crate::sse::data_payloads;

/// Daily-quota sandbox endpoint; tried first.
pub const DAILY_ENDPOINT: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";

/// Production endpoint.
pub const PROD_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";

/// API version path segment.
pub const API_VERSION: &str = "v1internal";

/// Client identifier sent with every request.
const CLIENT_IDENT: &str = "slipstream-proxy/0.1.0";

/// HTTP client over the upstream endpoints.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl UpstreamClient {
    /// Create with the standard endpoint fallback order.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoints: vec![DAILY_ENDPOINT.to_string(), PROD_ENDPOINT.to_string()],
        }
    }

    /// Create with explicit endpoints (tests).
    #[must_use]
    pub fn with_endpoints(client: reqwest::Client, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    /// The endpoints in fallback order.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Wrap the inner request in the per-account envelope.
    #[must_use]
    pub fn envelope(model: &str, project: &str, inner: &GenerateContentRequest) -> Value {
        serde_json::json!({
            "model": model,
            "project": project,
            "request": inner,
            "requestType": "proxy",
            "userAgent": CLIENT_IDENT,
            "requestId": new_request_id(),
        })
    }

    /// Issue one generate-content call against `endpoint`.
    ///
    /// `stream` selects the SSE path and the longer timeout. The response
    /// is returned as-is; status classification is the scheduler's job.
    #[instrument(skip_all, fields(endpoint, stream))]
    pub async fn generate(
        &self,
        endpoint: &str,
        access_token: &str,
        envelope: &Value,
        stream: bool,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let (method, query, timeout) = if stream {
            (
                "streamGenerateContent",
                "?alt=sse",
                Duration::from_secs(UPSTREAM_STREAM_TIMEOUT_SECS),
            )
        } else {
            ("generateContent", "", Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
        };
        let url = format!("{endpoint}/{API_VERSION}:{method}{query}");
        debug!(%url, "upstream request");

        self.client
            .post(&url)
            .headers(self.headers(access_token, stream))
            .timeout(timeout)
            .json(envelope)
            .send()
            .await
    }

    fn headers(&self, access_token: &str, stream: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert(
            ACCEPT,
            HeaderValue::from_static(if stream { "text/event-stream" } else { "application/json" }),
        );
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {access_token}")) {
            let _ = headers.insert(AUTHORIZATION, value);
        }
        let _ = headers.insert("user-agent", HeaderValue::from_static(CLIENT_IDENT));
        let _ = headers.insert("x-goog-api-client", HeaderValue::from_static(CLIENT_IDENT));
        headers
    }
}

/// Fold an SSE response body back into one [`GenerateContentResponse`].
///
/// Used when the client asked for a non-streaming answer but the upstream
/// only speaks SSE for the model (thinking models). Parts are concatenated
/// in arrival order; the last finish reason and usage win.
pub async fn aggregate_stream(response: reqwest::Response) -> GenerateContentResponse {
    let mut parts: Vec<Part> = Vec::new();
    let mut finish_reason = None;
    let mut usage = None;
    let mut error = None;

    let mut payloads = Box::pin(data_payloads(response.bytes_stream()));
    while let Some(payload) = payloads.next().await {
        let Ok(value) = serde_json::from_str::<Value>(&payload) else {
            debug!("skipping unparseable SSE payload");
            continue;
        };
        let Some(chunk) = GenerateContentResponse::from_enveloped(&value) else {
            continue;
        };
        if chunk.error.is_some() {
            error = chunk.error;
            break;
        }
        if let Some(meta) = chunk.usage_metadata {
            usage = Some(meta);
        }
        if let Some(candidate) = chunk.candidates.and_then(|mut c| {
            if c.is_empty() { None } else { Some(c.remove(0)) }
        }) {
            if let Some(content) = candidate.content {
                parts.extend(content.parts);
            }
            if candidate.finish_reason.is_some() {
                finish_reason = candidate.finish_reason;
            }
        }
    }

    GenerateContentResponse {
        candidates: Some(vec![Candidate {
            content: Some(CandidateContent { parts, role: Some("model".into()) }),
            finish_reason,
        }]),
        usage_metadata: usage,
        error,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use slipstream_translate::gemini::GenerationConfig;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inner() -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![],
            system_instruction: None,
            generation_config: GenerationConfig::default(),
            tools: None,
        }
    }

    // ── Envelope ─────────────────────────────────────────────────────────

    #[test]
    fn envelope_shape() {
        let env = UpstreamClient::envelope("claude-sonnet-4-5", "proj-1", &inner());
        assert_eq!(env["model"], "claude-sonnet-4-5");
        assert_eq!(env["project"], "proj-1");
        assert!(env["request"].get("contents").is_some());
        assert!(env["requestId"].as_str().unwrap().starts_with("req_"));
    }

    // ── Endpoints ────────────────────────────────────────────────────────

    #[test]
    fn default_endpoint_order_is_daily_then_prod() {
        let client = UpstreamClient::new(reqwest::Client::new());
        assert_eq!(client.endpoints(), [DAILY_ENDPOINT, PROD_ENDPOINT]);
    }

    // ── Request wiring ───────────────────────────────────────────────────

    #[tokio::test]
    async fn non_streaming_path_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:generateContent"))
            .and(header("authorization", "Bearer ya29.tok"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::with_endpoints(reqwest::Client::new(), vec![server.uri()]);
        let env = UpstreamClient::envelope("m", "p", &inner());
        let resp = client.generate(&server.uri(), "ya29.tok", &env, false).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn streaming_path_uses_sse_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: {}\n\n"))
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::with_endpoints(reqwest::Client::new(), vec![server.uri()]);
        let env = UpstreamClient::envelope("m", "p", &inner());
        let resp = client.generate(&server.uri(), "ya29.tok", &env, true).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    // ── Aggregation ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn aggregates_sse_body_into_one_response() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"thinking...\",\"thought\":true}],\"role\":\"model\"}}]}}\n\n",
            "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hi\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2}}}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = UpstreamClient::with_endpoints(reqwest::Client::new(), vec![server.uri()]);
        let env = UpstreamClient::envelope("m", "p", &inner());
        let resp = client.generate(&server.uri(), "tok", &env, true).await.unwrap();
        let merged = aggregate_stream(resp).await;

        let candidate = &merged.candidates.as_ref().unwrap()[0];
        let parts = &candidate.content.as_ref().unwrap().parts;
        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_thought());
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(merged.usage_metadata.as_ref().unwrap().prompt_token_count, 4);
    }

    #[tokio::test]
    async fn aggregation_stops_on_in_band_error() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"error\":{\"code\":429,\"message\":\"quota\"}}\n\n",
            "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"never\"}]}}]}}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = UpstreamClient::with_endpoints(reqwest::Client::new(), vec![server.uri()]);
        let env = UpstreamClient::envelope("m", "p", &inner());
        let resp = client.generate(&server.uri(), "tok", &env, true).await.unwrap();
        let merged = aggregate_stream(resp).await;

        assert!(merged.error.is_some());
        assert!(merged.candidates.unwrap()[0].content.as_ref().unwrap().parts.is_empty());
    }
}
