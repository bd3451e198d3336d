//! Unidirectional SSE fallback connector
//!
//! The degraded transport: a long-lived `text/event-stream` GET scoped to
//! the session id. Read-only with respect to the session stream: there
//! is no outbound channel, so `Connection.outbound` is `None` and
//! outbound traffic must go through the separate request path.
//!
//! The parser accumulates raw bytes and splits on blank lines (`\n\n`).
//! `data:` values are forwarded as frames, `id:` values are remembered
//! and replayed as `Last-Event-ID` on the next open so a recovered
//! stream resumes where it dropped, and ping events are discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, RwLock};

use crate::error::{FormStreamError, Result};
use crate::stream::{Connection, Connector, TransportKind};

/// Connector for the unidirectional push fallback
#[derive(Debug, Clone)]
pub struct SseConnector {
    /// Underlying reqwest HTTP client
    http_client: reqwest::Client,
    /// Service base URL
    base_url: url::Url,
    /// Static headers merged into every request (credentials go here)
    headers: HashMap<String, String>,
    /// Last SSE event id, replayed on reopen for stream resumption
    last_event_id: Arc<RwLock<Option<String>>>,
}

impl SseConnector {
    /// Construct a connector targeting `base_url`.
    ///
    /// The connect timeout applies to establishing the stream; once open
    /// the response body streams without a deadline.
    pub fn new(
        base_url: url::Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            // Default client construction only fails if TLS initialisation
            // fails, which is a fatal startup condition.
            .expect("failed to build reqwest client");

        Self {
            http_client,
            base_url,
            headers,
            last_event_id: Arc::new(RwLock::new(None)),
        }
    }

    /// The push endpoint URL for `session_id`.
    fn endpoint(&self, session_id: &str) -> Result<url::Url> {
        self.base_url
            .join(&format!("sessions/{}/events", session_id))
            .map_err(|e| anyhow::anyhow!(FormStreamError::Config(format!(
                "invalid events endpoint: {}",
                e
            ))))
    }
}

#[async_trait::async_trait]
impl Connector for SseConnector {
    /// Open one push stream for `session_id`.
    ///
    /// Issues a GET with `Accept: text/event-stream` plus the configured
    /// headers and, when resuming, `Last-Event-ID`. On success a parser
    /// task is spawned; the frame receiver closes when the body stream
    /// ends.
    ///
    /// # Errors
    ///
    /// Returns [`FormStreamError::Transport`] if the GET fails or the
    /// server answers with a non-success status.
    async fn open(&self, session_id: &str) -> Result<Connection> {
        let endpoint = self.endpoint(session_id)?;

        let mut req = self
            .http_client
            .get(endpoint.as_str())
            .header("Accept", "text/event-stream");

        {
            let lei = self.last_event_id.read().await;
            if let Some(ref id) = *lei {
                req = req.header("Last-Event-ID", id.as_str());
            }
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.send().await.map_err(|e| {
            anyhow::anyhow!(FormStreamError::Transport(format!(
                "event stream request failed: {}",
                e
            )))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!(FormStreamError::Transport(format!(
                "event stream returned HTTP {}",
                status
            ))));
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let byte_stream = response.bytes_stream();
        let last_event_id = Arc::clone(&self.last_event_id);

        tokio::spawn(async move {
            parse_sse_stream(byte_stream, frames_tx, last_event_id).await;
        });

        Ok(Connection {
            kind: TransportKind::Unidirectional,
            frames: frames_rx,
            outbound: None,
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Unidirectional
    }
}

// ---------------------------------------------------------------------------
// SSE parser
// ---------------------------------------------------------------------------

/// Parse an SSE byte stream and forward complete `data:` events.
///
/// Runs inside a `tokio::spawn` and consumes the stream until it ends or
/// errors; dropping `frames_tx` at that point is the loss signal for the
/// stream transport.
pub async fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    frames_tx: mpsc::UnboundedSender<String>,
    last_event_id: Arc<RwLock<Option<String>>>,
) {
    use futures::StreamExt;

    // Buffer accumulates raw bytes between `\n\n` boundaries. The split
    // happens at the byte level, so a chunk boundary that lands inside a
    // multi-byte UTF-8 character cannot corrupt the surrounding event.
    let mut buffer: Vec<u8> = Vec::new();

    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(_) => break,
        };

        buffer.extend_from_slice(&chunk);

        // SSE events are separated by blank lines (`\n\n`).
        while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
            let event_block: Vec<u8> = buffer.drain(..pos + 2).collect();
            decode_sse_event(&event_block[..pos], &frames_tx, &last_event_id).await;
        }
    }

    // Process any remaining partial event in the buffer.
    if !buffer.is_empty() {
        decode_sse_event(&buffer, &frames_tx, &last_event_id).await;
    }
}

/// Decode one raw event block as UTF-8 and process it.
///
/// A block that is not valid UTF-8 is logged, counted, and dropped
/// without touching the rest of the stream.
async fn decode_sse_event(
    block: &[u8],
    frames_tx: &mpsc::UnboundedSender<String>,
    last_event_id: &Arc<RwLock<Option<String>>>,
) {
    match std::str::from_utf8(block) {
        Ok(text) => process_sse_event(text, frames_tx, last_event_id).await,
        Err(e) => {
            metrics::increment_counter!("formstream_frames_dropped_total");
            tracing::warn!("dropping non-UTF-8 event block: {}", e);
        }
    }
}

/// Process a single SSE event block (the text between two `\n\n` delimiters).
async fn process_sse_event(
    event_block: &str,
    frames_tx: &mpsc::UnboundedSender<String>,
    last_event_id: &Arc<RwLock<Option<String>>>,
) {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;
    let mut event_id: Option<&str> = None;

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("id:") {
            event_id = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
        // Lines starting with `:` are SSE comments; all others are ignored.
    }

    // Store event id for stream resumption.
    if let Some(id) = event_id {
        let mut guard = last_event_id.write().await;
        *guard = Some(id.to_string());
    }

    // Keep-alive pings carry no session event.
    if let Some(et) = event_type {
        if et.eq_ignore_ascii_case("ping") {
            return;
        }
    }

    let data = data_lines.join("\n");
    if data.eq_ignore_ascii_case("[ping]") || data.is_empty() {
        return;
    }

    let _ = frames_tx.send(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connector(base: &str) -> SseConnector {
        SseConnector::new(
            url::Url::parse(base).unwrap(),
            HashMap::new(),
            Duration::from_secs(5),
        )
    }

    /// The endpoint is scoped to the session id.
    #[test]
    fn test_endpoint_scopes_session() {
        let connector = make_connector("http://localhost:4000/");
        let endpoint = connector.endpoint("sess-1").unwrap();
        assert_eq!(endpoint.as_str(), "http://localhost:4000/sessions/sess-1/events");
    }

    /// The connector reports itself as unidirectional.
    #[test]
    fn test_kind_is_unidirectional() {
        let connector = make_connector("http://localhost:4000/");
        assert_eq!(connector.kind(), TransportKind::Unidirectional);
    }

    /// A single `data:` event is forwarded as one frame.
    #[tokio::test]
    async fn test_parse_sse_single_data_event_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let last_event_id = Arc::new(RwLock::new(None::<String>));

        let body = b"data: {\"type\":\"typing\",\"data\":{\"is_typing\":true}}\n\n".to_vec();
        let byte_stream = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from(body))]);

        parse_sse_stream(byte_stream, tx, Arc::clone(&last_event_id)).await;

        let frame = rx.try_recv().expect("expected a frame");
        assert_eq!(frame, r#"{"type":"typing","data":{"is_typing":true}}"#);
    }

    /// Two events in one chunk both arrive, in order.
    #[tokio::test]
    async fn test_parse_sse_two_events_ordered() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let last_event_id = Arc::new(RwLock::new(None::<String>));

        let body = b"data: first\n\ndata: second\n\n".to_vec();
        let byte_stream = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from(body))]);

        parse_sse_stream(byte_stream, tx, Arc::clone(&last_event_id)).await;

        assert_eq!(rx.try_recv().unwrap(), "first");
        assert_eq!(rx.try_recv().unwrap(), "second");
    }

    /// An event split across chunks is reassembled.
    #[tokio::test]
    async fn test_parse_sse_event_split_across_chunks() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let last_event_id = Arc::new(RwLock::new(None::<String>));

        let chunks = vec![
            Ok::<_, reqwest::Error>(Bytes::from_static(b"data: par")),
            Ok::<_, reqwest::Error>(Bytes::from_static(b"tial\n\n")),
        ];
        let byte_stream = futures::stream::iter(chunks);

        parse_sse_stream(byte_stream, tx, Arc::clone(&last_event_id)).await;

        assert_eq!(rx.try_recv().unwrap(), "partial");
    }

    /// Ping events (both spellings) are discarded.
    #[tokio::test]
    async fn test_parse_sse_pings_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let last_event_id = Arc::new(RwLock::new(None::<String>));

        let body = b"event: ping\ndata: ignored\n\ndata: [PING]\n\ndata: real\n\n".to_vec();
        let byte_stream = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from(body))]);

        parse_sse_stream(byte_stream, tx, Arc::clone(&last_event_id)).await;

        assert_eq!(rx.try_recv().unwrap(), "real");
        assert!(rx.try_recv().is_err(), "no more frames expected");
    }

    /// A chunk boundary inside a multi-byte character does not corrupt
    /// the event on either side of it.
    #[tokio::test]
    async fn test_parse_sse_multibyte_char_split_across_chunks() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let last_event_id = Arc::new(RwLock::new(None::<String>));

        let full = "data: {\"content\":\"caf\u{e9} au lait\"}\n\ndata: next\n\n".as_bytes();
        // Split in the middle of the two-byte encoding of 'é'.
        let split = full.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let chunks = vec![
            Ok::<_, reqwest::Error>(Bytes::copy_from_slice(&full[..split])),
            Ok::<_, reqwest::Error>(Bytes::copy_from_slice(&full[split..])),
        ];

        parse_sse_stream(futures::stream::iter(chunks), tx, Arc::clone(&last_event_id)).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            "{\"content\":\"caf\u{e9} au lait\"}"
        );
        assert_eq!(rx.try_recv().unwrap(), "next");
    }

    /// A block that is not valid UTF-8 is dropped without taking the
    /// rest of the stream with it.
    #[tokio::test]
    async fn test_parse_sse_invalid_utf8_block_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let last_event_id = Arc::new(RwLock::new(None::<String>));

        let body = b"data: bad \xff\xfe\n\ndata: good\n\n".to_vec();
        let byte_stream = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from(body))]);

        parse_sse_stream(byte_stream, tx, Arc::clone(&last_event_id)).await;

        assert_eq!(rx.try_recv().unwrap(), "good");
        assert!(rx.try_recv().is_err(), "no more frames expected");
    }

    /// The `id:` field is remembered for resumption.
    #[tokio::test]
    async fn test_parse_sse_id_field_stored() {
        let (tx, _rx) = mpsc::unbounded_channel::<String>();
        let last_event_id = Arc::new(RwLock::new(None::<String>));

        let body = b"id: evt-42\ndata: payload\n\n".to_vec();
        let byte_stream = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from(body))]);

        parse_sse_stream(byte_stream, tx, Arc::clone(&last_event_id)).await;

        let guard = last_event_id.read().await;
        assert_eq!(*guard, Some("evt-42".to_string()));
    }
}
