//! SSE payload extraction from upstream byte streams.
//!
//! The upstream streams `data: <json>` lines over chunked transfer, with
//! chunk boundaries landing anywhere, including mid-line. [`SseBuffer`]
//! accumulates bytes and yields complete data payloads; [`SseBuffer::flush`]
//! recovers a final payload when the stream ends without a trailing
//! newline, which this upstream does on the last chunk.

use bytes::BytesMut;
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::warn;

/// Incremental SSE line buffer.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buf: BytesMut,
}

impl SseBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(8 * 1024) }
    }

    /// Feed a chunk; returns every complete data payload it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let Ok(text) = std::str::from_utf8(&line) else {
                warn!("skipping non-UTF-8 SSE line");
                continue;
            };
            if let Some(data) = extract_data(text) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Recover a trailing payload after the stream ends mid-line.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let text = std::str::from_utf8(&self.buf).ok()?.trim().to_string();
        self.buf.clear();
        extract_data(&text)
    }
}

/// The `data:` payload of one SSE line, if it carries one.
///
/// Comments, bare event/id fields, empty data, and `[DONE]` markers all
/// yield `None`.
fn extract_data(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

/// Adapt a reqwest byte stream into a stream of SSE data payloads.
pub fn data_payloads<S>(byte_stream: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    futures::stream::unfold(
        (byte_stream, SseBuffer::new(), Vec::<String>::new(), false),
        |(mut stream, mut buffer, mut pending, ended)| async move {
            loop {
                if let Some(payload) = pending.pop() {
                    return Some((payload, (stream, buffer, pending, ended)));
                }
                if ended {
                    return None;
                }
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        let mut payloads = buffer.push(&chunk);
                        payloads.reverse(); // pop() drains front-first
                        pending = payloads;
                    }
                    Some(Err(e)) => {
                        warn!("upstream stream read error: {e}");
                        return None;
                    }
                    None => {
                        if let Some(trailing) = buffer.flush() {
                            pending.push(trailing);
                        }
                        return match pending.pop() {
                            Some(payload) => Some((payload, (stream, buffer, pending, true))),
                            None => None,
                        };
                    }
                }
            }
        },
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── SseBuffer ────────────────────────────────────────────────────────

    #[test]
    fn single_line_payload() {
        let mut buf = SseBuffer::new();
        let out = buf.push(b"data: {\"a\":1}\n\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn payload_split_across_chunks() {
        let mut buf = SseBuffer::new();
        assert!(buf.push(b"data: {\"par").is_empty());
        let out = buf.push(b"tial\":true}\n");
        assert_eq!(out, vec!["{\"partial\":true}".to_string()]);
    }

    #[test]
    fn multiple_payloads_in_one_chunk() {
        let mut buf = SseBuffer::new();
        let out = buf.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn crlf_lines_handled() {
        let mut buf = SseBuffer::new();
        let out = buf.push(b"data: {\"crlf\":true}\r\n\r\n");
        assert_eq!(out, vec!["{\"crlf\":true}".to_string()]);
    }

    #[test]
    fn comments_events_and_done_skipped() {
        let mut buf = SseBuffer::new();
        let out = buf.push(b": keepalive\nevent: chunk\nid: 7\ndata: [DONE]\ndata: \ndata: {\"v\":1}\n");
        assert_eq!(out, vec!["{\"v\":1}".to_string()]);
    }

    #[test]
    fn no_space_after_colon() {
        let mut buf = SseBuffer::new();
        let out = buf.push(b"data:{\"tight\":true}\n");
        assert_eq!(out, vec!["{\"tight\":true}".to_string()]);
    }

    #[test]
    fn flush_recovers_trailing_payload() {
        let mut buf = SseBuffer::new();
        assert!(buf.push(b"data: {\"tail\":true}").is_empty());
        assert_eq!(buf.flush(), Some("{\"tail\":true}".to_string()));
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn flush_empty_is_none() {
        let mut buf = SseBuffer::new();
        assert_eq!(buf.flush(), None);
    }

    // ── data_payloads stream ─────────────────────────────────────────────

    #[tokio::test]
    async fn stream_yields_in_order() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from("data: {\"n\":1}\n\ndata: {\"n\":2}\n\n")),
            Ok(bytes::Bytes::from("data: {\"n\":3}\n\n")),
        ];
        let out: Vec<String> =
            data_payloads(futures::stream::iter(chunks)).collect().await;
        assert_eq!(out, vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]);
    }

    #[tokio::test]
    async fn stream_flushes_trailing_buffer() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> =
            vec![Ok(bytes::Bytes::from("data: {\"last\":true}"))];
        let out: Vec<String> =
            data_payloads(futures::stream::iter(chunks)).collect().await;
        assert_eq!(out, vec!["{\"last\":true}"]);
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![];
        let out: Vec<String> =
            data_payloads(futures::stream::iter(chunks)).collect().await;
        assert!(out.is_empty());
    }
}
