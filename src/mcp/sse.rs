//! SSE Client Transport
//!
//! Opens the server's event stream with a GET request and learns the
//! message submission URL from the first `endpoint` event. Server messages
//! arrive as `message` events; client messages are POSTed as JSON.

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{
    errors::{MCPError, MCPResult},
    protocol::MCPMessage,
    transport::{ChannelPair, ChannelReceiver, MessageSender, TransportConfig},
};

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the stream did not name one
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Chunks may split lines anywhere; an event is dispatched on the blank line
/// that ends it.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk, returning every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes held back waiting for a line terminator
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry carry nothing this transport uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Whether a response declares an event stream body
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"))
        .unwrap_or(false)
}

/// Resolve the `endpoint` event against the stream URL.
///
/// The submission URL must share the stream's origin.
pub fn resolve_endpoint(base: &Url, data: &str) -> MCPResult<Url> {
    let endpoint = base
        .join(data.trim())
        .map_err(|e| MCPError::connection(format!("Invalid endpoint '{}': {}", data, e)))?;

    if endpoint.origin() != base.origin() {
        return Err(MCPError::connection(format!(
            "Endpoint origin does not match server: {}",
            endpoint
        )));
    }
    Ok(endpoint)
}

/// Connector for the HTTP/SSE channel pair
pub struct SseTransport;

impl SseTransport {
    /// Open the event stream and wait for the endpoint event
    pub async fn connect(config: &TransportConfig) -> MCPResult<ChannelPair> {
        let server_url = Url::parse(&config.endpoint).map_err(|e| {
            MCPError::connection(format!("Invalid server URL '{}': {}", config.endpoint, e))
        })?;
        let client = build_client(config)?;
        let timeout_ms = config.connect_timeout.as_millis() as u64;

        info!(url = %server_url, "opening SSE stream");
        let response = tokio::time::timeout(
            config.connect_timeout,
            client
                .get(server_url.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| MCPError::timeout(timeout_ms))?
        .map_err(|e| MCPError::connection(format!("Could not connect to {}: {}", server_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MCPError::connection(format!(
                "Server returned HTTP {} for {}",
                status, server_url
            )));
        }
        if !is_event_stream(response.headers()) {
            return Err(MCPError::connection(
                "Server did not return an event stream",
            ));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_events(
            response,
            server_url,
            config.max_message_size,
            endpoint_tx,
            inbound_tx,
        ));

        let endpoint = match tokio::time::timeout(config.connect_timeout, endpoint_rx).await {
            Ok(Ok(Ok(endpoint))) => endpoint,
            Ok(Ok(Err(error))) => {
                reader.abort();
                return Err(error);
            }
            Ok(Err(_)) => {
                reader.abort();
                return Err(MCPError::connection(
                    "Event stream ended before the endpoint event",
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(MCPError::timeout(timeout_ms));
            }
        };
        info!(%endpoint, "SSE session established");

        let sender = SsePostSender {
            client,
            endpoint,
            max_message_size: config.max_message_size,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
            order: tokio::sync::Mutex::new(()),
        };
        Ok(ChannelPair::new(
            Arc::new(sender),
            Box::new(ChannelReceiver::new(inbound_rx)),
        ))
    }
}

fn build_client(config: &TransportConfig) -> MCPResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| MCPError::connection(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| MCPError::connection(format!("Invalid header value: {}", e)))?;
        headers.insert(name, value);
    }

    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(concat!("wiki-mcp/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()
        .map_err(|e| MCPError::connection(format!("Could not build HTTP client: {}", e)))
}

async fn read_events(
    response: reqwest::Response,
    base: Url,
    max_message_size: usize,
    endpoint_tx: oneshot::Sender<MCPResult<Url>>,
    inbound: mpsc::UnboundedSender<MCPMessage>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::default();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                warn!(%error, "SSE stream failed");
                break;
            }
        };

        for event in decoder.push(&chunk) {
            match event.event.as_str() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(resolve_endpoint(&base, &event.data));
                    }
                    None => debug!("ignoring repeated endpoint event"),
                },
                "message" => {
                    if event.data.len() > max_message_size {
                        warn!(size = event.data.len(), "discarding oversized message");
                        continue;
                    }
                    match MCPMessage::from_json(&event.data) {
                        Ok(message) => {
                            trace!(kind = message.kind(), "message received");
                            if inbound.send(message).is_err() {
                                return;
                            }
                        }
                        Err(error) => warn!(%error, "discarding malformed message"),
                    }
                }
                other => debug!(event = other, "ignoring SSE event"),
            }
        }

        if decoder.buffered_len() > max_message_size {
            warn!("SSE line exceeds the maximum message size");
            break;
        }
    }

    debug!("SSE stream ended");
}

struct SsePostSender {
    client: reqwest::Client,
    endpoint: Url,
    max_message_size: usize,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    /// Serializes submissions so the server sees them in send order
    order: tokio::sync::Mutex<()>,
}

#[async_trait]
impl MessageSender for SsePostSender {
    async fn send(&self, message: MCPMessage) -> MCPResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MCPError::connection("Transport closed"));
        }

        let body = message.to_json()?;
        if body.len() > self.max_message_size {
            return Err(MCPError::internal(format!(
                "Message of {} bytes exceeds the {} byte limit",
                body.len(),
                self.max_message_size
            )));
        }

        let _order = self.order.lock().await;
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| MCPError::connection(format!("Failed to submit message: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MCPError::connection(format!(
                "Failed to submit message: HTTP {}",
                status
            )));
        }
        Ok(())
    }

    async fn close(&self) -> MCPResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        Ok(())
    }
}

impl Drop for SsePostSender {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: endp").is_empty());
        assert!(decoder.push(b"oint\ndata: /messages?session_id=abc\n").is_empty());

        let events = decoder.push(b"\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".to_string(),
                data: "/messages?session_id=abc".to_string(),
            }]
        );
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_decoder_defaults_and_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": keep-alive\r\n\r\ndata: {\"a\":1}\r\n\r\ndata:x\ndata: y\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "x\ny");
    }

    #[test]
    fn test_decoder_ignores_event_without_data() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: ping\n\n").is_empty());
        // event name does not leak into the next event
        let events = decoder.push(b"data: hi\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_resolve_endpoint() {
        let base = Url::parse("http://localhost:8000/sse").unwrap();
        let endpoint = resolve_endpoint(&base, "/messages?session_id=abc").unwrap();
        assert_eq!(endpoint.as_str(), "http://localhost:8000/messages?session_id=abc");

        let foreign = resolve_endpoint(&base, "http://evil.example/messages");
        assert!(matches!(foreign, Err(MCPError::Connection { .. })));
    }

    #[test]
    fn test_is_event_stream() {
        let mut headers = HeaderMap::new();
        assert!(!is_event_stream(&headers));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        assert!(is_event_stream(&headers));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = TransportConfig::new(format!("http://{}/sse", addr));
        let result = SseTransport::connect(&config).await;
        assert!(matches!(result, Err(MCPError::Connection { .. })));
    }
}
