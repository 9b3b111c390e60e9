//! `POST /v1/messages`: the request dispatcher.
//!
//! Pipeline: validate the raw JSON → resolve the model alias → run the
//! thinking-integrity passes → hand the request to the scheduler →
//! translate the upstream answer back, either as one JSON body or as an
//! Anthropic-compatible SSE stream.
//!
//! Streaming uses a bounded channel between the upstream reader and the
//! response body, which gives backpressure for free and makes client
//! disconnect visible as a send failure. A failed send before any frame
//! went out releases the sticky pin (the request produced nothing); after
//! the first frame the stream just closes; the response is no longer
//! idempotent from the client's point of view, so nothing retries.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use slipstream_core::{ProxyError, ProxyResult};
use slipstream_translate::anthropic::{
    is_thinking_model, resolve_model, MessagesRequest, StreamError, StreamEvent,
};
use slipstream_translate::gemini::GenerateContentResponse;
use slipstream_translate::integrity::apply_integrity;
use slipstream_translate::outbound::from_upstream;
use slipstream_translate::stream::StreamTranslator;
use slipstream_upstream::client::aggregate_stream;
use slipstream_upstream::sse::data_payloads;
use slipstream_upstream::Dispatched;

use crate::state::AppState;
use crate::validate::validate_messages_request;

/// Channel depth between the upstream reader and the SSE writer.
const STREAM_CHANNEL_DEPTH: usize = 32;

/// Handle `POST /v1/messages`.
#[instrument(skip_all)]
pub async fn handle_messages(State(state): State<AppState>, body: Bytes) -> Response {
    match dispatch(state, &body).await {
        Ok(response) => response,
        Err(err) => error_response(&err),
    }
}

/// Map a typed error to the wire taxonomy.
pub fn error_response(err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    error!(status = status.as_u16(), "request failed: {err}");
    (status, Json(err.to_wire_json())).into_response()
}

async fn dispatch(state: AppState, body: &[u8]) -> ProxyResult<Response> {
    let raw: Value = serde_json::from_slice(body).map_err(|e| ProxyError::InvalidRequest {
        message: format!("malformed JSON: {e}"),
    })?;
    validate_messages_request(&raw)?;

    let mut request: MessagesRequest =
        serde_json::from_value(raw).map_err(|e| ProxyError::InvalidRequest {
            message: format!("malformed request: {e}"),
        })?;

    let model = resolve_model(&request.model);
    let thinking_enabled = request.thinking.as_ref().is_none_or(|t| t.is_enabled())
        && is_thinking_model(&model);

    apply_integrity(&mut request.messages, &state.signatures, thinking_enabled);

    let dispatched = state.scheduler.execute(&request, &model, request.stream).await?;
    info!(model = %dispatched.model, streaming = request.stream, "upstream accepted");

    if request.stream {
        Ok(stream_response(state, dispatched))
    } else {
        non_streaming_response(&state, dispatched).await
    }
}

/// Read a complete upstream answer and return one JSON body.
async fn non_streaming_response(state: &AppState, dispatched: Dispatched) -> ProxyResult<Response> {
    let upstream = if dispatched.streaming {
        // Thinking models only speak SSE; fold the stream back together.
        aggregate_stream(dispatched.response).await
    } else {
        let bytes = dispatched.response.bytes().await.map_err(|e| {
            ProxyError::ServiceUnavailable {
                message: slipstream_core::redact::redact_sensitive(&e.to_string()),
            }
        })?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| ProxyError::Translation {
                message: format!("unparseable upstream body: {e}"),
            })?;
        GenerateContentResponse::from_enveloped(&value).ok_or(ProxyError::Translation {
            message: "upstream body did not match the response schema".into(),
        })?
    };

    if let Some(error) = &upstream.error {
        return Err(ProxyError::Upstream {
            status: u16::try_from(error.code).unwrap_or(502),
            message: slipstream_core::redact::redact_sensitive(&error.message),
            code: Some(error.status.clone()),
            retryable: false,
        });
    }

    let response = from_upstream(&dispatched.model, &upstream, &state.signatures);
    Ok(Json(response).into_response())
}

/// Pipe the upstream SSE body through the streaming translator.
fn stream_response(state: AppState, dispatched: Dispatched) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::convert::Infallible>>(
        STREAM_CHANNEL_DEPTH,
    );

    let _ = tokio::spawn(async move {
        let model = dispatched.model;
        let mut translator = StreamTranslator::new(&model);
        let mut payloads = Box::pin(data_payloads(dispatched.response.bytes_stream()));
        let mut sent_any = false;
        let mut saw_payload = false;

        while let Some(payload) = payloads.next().await {
            saw_payload = true;
            let Ok(value) = serde_json::from_str::<Value>(&payload) else {
                debug!("skipping unparseable upstream payload");
                continue;
            };
            let Some(chunk) = GenerateContentResponse::from_enveloped(&value) else {
                continue;
            };
            for event in translator.on_chunk(&chunk, &state.signatures) {
                if tx.send(Ok(frame(&event))).await.is_err() {
                    // Client went away: dropping the upstream response
                    // aborts the fetch.
                    warn!("client disconnected mid-stream");
                    if !sent_any {
                        state.pins.release(&model);
                    }
                    return;
                }
                sent_any = true;
            }
            if translator.is_done() {
                break;
            }
        }

        if !saw_payload {
            // The upstream accepted the request and then produced nothing.
            warn!("upstream stream carried no data");
            state.pins.release(&model);
            let event = StreamEvent::Error {
                error: StreamError {
                    error_type: "overloaded_error".into(),
                    message: "upstream produced an empty stream".into(),
                },
            };
            let _ = tx.send(Ok(frame(&event))).await;
            return;
        }

        for event in translator.finish(&state.signatures) {
            if tx.send(Ok(frame(&event))).await.is_err() {
                return;
            }
        }
        // Trailer for OpenAI-style clients.
        let _ = tx.send(Ok(Bytes::from("data: [DONE]\n\n"))).await;
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Serialize one event as an SSE frame.
fn frame(event: &StreamEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
    Bytes::from(format!("event: {}\ndata: {data}\n\n", event.event_name()))
}

/// Handle `POST /v1/messages/count_tokens`.
///
/// A cheap local estimate (~4 characters per token over all text content);
/// the upstream has no counting endpoint for this API surface.
pub async fn handle_count_tokens(body: Bytes) -> Response {
    let Ok(raw) = serde_json::from_slice::<Value>(&body) else {
        return error_response(&ProxyError::InvalidRequest {
            message: "malformed JSON".into(),
        });
    };

    let mut chars = 0usize;
    if let Some(system) = raw.get("system") {
        chars += count_text_chars(system);
    }
    if let Some(messages) = raw.get("messages") {
        chars += count_text_chars(messages);
    }

    Json(serde_json::json!({ "input_tokens": chars.div_ceil(4) })).into_response()
}

fn count_text_chars(value: &Value) -> usize {
    match value {
        Value::String(text) => text.chars().count(),
        Value::Array(items) => items.iter().map(count_text_chars).sum(),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| matches!(key.as_str(), "text" | "content" | "thinking"))
            .map(|(_, sub)| count_text_chars(sub))
            .sum(),
        _ => 0,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
