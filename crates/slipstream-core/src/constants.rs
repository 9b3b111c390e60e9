//! Shared tunables for scheduling, caching, and request validation.

/// Maximum scheduler attempts for a single logical request.
///
/// The effective attempt count is `max(MAX_RETRIES, account_count + 1)` so a
/// large pool always gets one shot per account plus one.
pub const MAX_RETRIES: u32 = 5;

/// Longest the scheduler will block on a rate-limit reset before failing
/// fast with a `RateLimited` error (2 minutes).
pub const MAX_WAIT_BEFORE_ERROR_MS: u64 = 120_000;

/// Slack added after sleeping out a rate-limit window, so the upstream
/// clock being slightly behind ours does not produce an instant second 429.
pub const RATE_LIMIT_WAIT_SLACK_MS: u64 = 500;

/// Refresh access tokens this long before they expire (5 minutes).
pub const REFRESH_BUFFER_MS: i64 = 300_000;

/// Token lifetimes shorter than this are not worth tracking (5 minutes).
pub const MIN_TRACKED_LIFETIME_SEC: i64 = 300;

/// Base delay for token-refresh failure backoff (60 seconds).
pub const REFRESH_BACKOFF_BASE_MS: i64 = 60_000;

/// Ceiling for token-refresh failure backoff (15 minutes).
pub const REFRESH_BACKOFF_CAP_MS: i64 = 900_000;

/// Interval of the background refresh tick.
pub const REFRESH_TICK_SECS: u64 = 30;

/// Sticky account pins expire after this much idle time (10 minutes).
pub const STICKY_IDLE_MS: u64 = 600_000;

/// Upstream request timeout for non-streaming calls.
pub const UPSTREAM_TIMEOUT_SECS: u64 = 60;

/// Upstream request timeout for streaming calls.
pub const UPSTREAM_STREAM_TIMEOUT_SECS: u64 = 180;

/// Minimum accepted length for a thinking-block signature. Anything shorter
/// is treated as absent (the upstream rejects it anyway).
pub const SIGNATURE_MIN_LEN: usize = 50;

/// Signature cache entry time-to-live (2 hours).
pub const SIGNATURE_TTL_MS: i64 = 7_200_000;

/// Signature cache entry cap; oldest entries are evicted beyond this.
pub const SIGNATURE_CACHE_MAX: usize = 500;

/// Length of the normalized-content prefix used as the secondary cache key.
pub const SIGNATURE_PREFIX_LEN: usize = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Request validation caps
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of messages in one request.
pub const MAX_MESSAGES: usize = 500;

/// Maximum number of tool declarations in one request.
pub const MAX_TOOLS: usize = 100;

/// Maximum size of a single text block in bytes (1 MiB).
pub const MAX_TEXT_BLOCK_BYTES: usize = 1_048_576;

/// Maximum size of base64 image data in bytes (10 MiB).
pub const MAX_IMAGE_BYTES: usize = 10_485_760;

/// Inclusive `max_tokens` ceiling accepted from clients.
pub const MAX_OUTPUT_TOKENS_CAP: u32 = 200_000;

/// Number of stop sequences forwarded upstream.
pub const MAX_STOP_SEQUENCES: usize = 4;
