//! Rate-limit reset extraction from upstream 429 responses.
//!
//! The upstream reports reset times in three shapes, tried in priority
//! order:
//!
//! 1. `Retry-After` header: delta seconds or an HTTP-date
//! 2. `error.details[*].retryDelay`: a protobuf duration string (`"30s"`,
//!    `"3.5s"`)
//! 3. `error.metadata.quotaResetTime`: an ISO 8601 timestamp
//!
//! When none parse, a 60-second fallback applies. The resulting delta is
//! clamped to `[1s, 24h]` and returned as an absolute epoch-millisecond
//! reset time.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Fallback delay when no reset information parses (60 seconds).
const FALLBACK_DELAY_MS: i64 = 60_000;

/// Lower clamp on the extracted delay (1 second).
const MIN_DELAY_MS: i64 = 1_000;

/// Upper clamp on the extracted delay (24 hours).
const MAX_DELAY_MS: i64 = 86_400_000;

/// Extract an absolute reset time from a 429 response.
///
/// `retry_after` is the raw `Retry-After` header value, when present;
/// `body` is the raw response body (JSON expected but not required).
#[must_use]
pub fn parse_reset_at(retry_after: Option<&str>, body: &str, now_ms: i64) -> i64 {
    let delta = parse_retry_after(retry_after)
        .or_else(|| parse_body_retry_delay(body))
        .or_else(|| parse_body_quota_reset(body, now_ms))
        .unwrap_or(FALLBACK_DELAY_MS);

    now_ms + delta.clamp(MIN_DELAY_MS, MAX_DELAY_MS)
}

/// Parse a `Retry-After` header: integer seconds or HTTP-date.
fn parse_retry_after(value: Option<&str>) -> Option<i64> {
    let raw = value?.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs.saturating_mul(1000));
    }
    let date = DateTime::parse_from_rfc2822(raw).ok()?;
    Some(date.timestamp_millis() - Utc::now().timestamp_millis())
}

/// Parse `error.details[*].retryDelay` duration strings out of the body.
fn parse_body_retry_delay(body: &str) -> Option<i64> {
    let json: Value = serde_json::from_str(body).ok()?;
    let details = json.get("error")?.get("details")?.as_array()?;
    details
        .iter()
        .find_map(|d| d.get("retryDelay").and_then(Value::as_str))
        .and_then(parse_duration_ms)
}

/// Parse `error.metadata.quotaResetTime` (ISO 8601) out of the body.
fn parse_body_quota_reset(body: &str, now_ms: i64) -> Option<i64> {
    let json: Value = serde_json::from_str(body).ok()?;
    let raw = json.get("error")?.get("metadata")?.get("quotaResetTime")?.as_str()?;
    let ts = DateTime::parse_from_rfc3339(raw).ok()?;
    Some(ts.timestamp_millis() - now_ms)
}

/// Parse a protobuf-style duration string (`"30s"`, `"3.5s"`) to ms.
fn parse_duration_ms(raw: &str) -> Option<i64> {
    let trimmed = raw.trim().strip_suffix('s')?;
    let secs: f64 = trimmed.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some((secs * 1000.0) as i64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
