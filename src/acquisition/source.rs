//! Intake source abstraction.
//!
//! The pipeline consumes `(topic, payload)` frames from a pluggable
//! [`EventSource`]: a TCP subscription to the broker/simulator, stdin
//! (pipe from the simulator), or a pre-loaded replay for tests.
//!
//! Wire format is line-based: after connecting, the TCP source sends
//! `SUBSCRIBE <topic>,<topic>,...` and the broker streams one frame per
//! line as `PUB <topic> <json-payload>`.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Initial reconnection delay (doubles each attempt).
const INITIAL_RECONNECT_DELAY_SECS: u64 = 2;

/// Maximum reconnection delay cap (seconds).
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Consecutive failed reconnection attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Transport-level failures. Sources reconnect with backoff internally;
/// an error out of [`EventSource::next_frame`] is unrecoverable.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {addr} failed: {message}")]
    ConnectionFailed { addr: String, message: String },

    #[error("gave up reconnecting to {addr} after {attempts} attempts")]
    ReconnectExhausted { addr: String, attempts: u32 },

    #[error("I/O error on intake stream: {0}")]
    Io(#[from] std::io::Error),
}

/// One raw message off the transport, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeFrame {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Events produced by an intake source.
pub enum SourceEvent {
    /// A frame was read.
    Frame(IntakeFrame),
    /// Source reached end of data (EOF for stdin/replay, permanent
    /// disconnect for TCP).
    Eof,
}

/// Trait abstracting where telemetry frames come from.
///
/// Implementations handle framing, reconnection, and pacing internally.
/// The intake task calls [`next_frame`](EventSource::next_frame) in a
/// `select!` with cancellation.
#[async_trait]
pub trait EventSource: Send + 'static {
    async fn next_frame(&mut self) -> Result<SourceEvent, TransportError>;

    /// Human-readable name for logging (e.g. "TCP", "stdin", "replay").
    fn source_name(&self) -> &str;
}

/// Parse one `PUB <topic> <json>` line (the `PUB ` verb is optional so
/// hand-fed stdin input also works). Returns `None` for lines that do
/// not carry a frame.
fn parse_frame(line: &str) -> Option<IntakeFrame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let body = line.strip_prefix("PUB ").unwrap_or(line);
    let (topic, payload) = body.split_once(' ')?;
    if topic.is_empty() || payload.trim().is_empty() {
        return None;
    }
    Some(IntakeFrame {
        topic: topic.to_string(),
        payload: payload.trim().as_bytes().to_vec(),
    })
}

// ============================================================================
// TCP Source
// ============================================================================

/// TCP subscription source with exponential-backoff reconnection.
///
/// Upstream producers keep retrying delivery (at-least-once transport),
/// so a lost connection is handled by reconnecting rather than
/// terminating the gateway.
pub struct TcpSource {
    host: String,
    port: u16,
    topics: Vec<String>,
    reader: Option<BufReader<TcpStream>>,
    line_buffer: String,
    /// Consecutive reconnection attempts (resets on success).
    reconnect_attempts: u32,
    /// Total frames received since creation.
    frames_received: u64,
    /// Total reconnections performed.
    reconnections: u64,
}

impl TcpSource {
    pub fn new(host: &str, port: u16, topics: Vec<String>) -> Self {
        Self {
            host: host.to_string(),
            port,
            topics,
            reader: None,
            line_buffer: String::with_capacity(2048),
            reconnect_attempts: 0,
            frames_received: 0,
            reconnections: 0,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect and subscribe to the configured topics.
    async fn connect(&mut self) -> Result<(), TransportError> {
        let addr = self.addr();
        let stream =
            TcpStream::connect(&addr)
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    addr: addr.clone(),
                    message: e.to_string(),
                })?;
        let mut reader = BufReader::new(stream);
        let subscribe = format!("SUBSCRIBE {}\n", self.topics.join(","));
        reader.get_mut().write_all(subscribe.as_bytes()).await?;

        info!("📡 Subscribed to {} topics at {addr}", self.topics.len());
        self.reader = Some(reader);
        self.reconnect_attempts = 0;
        Ok(())
    }

    /// Reconnect with exponential backoff, up to the attempt cap.
    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.reader = None;
        loop {
            if self.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
                info!(
                    "TCP intake giving up after {} frames and {} reconnections",
                    self.frames_received, self.reconnections
                );
                return Err(TransportError::ReconnectExhausted {
                    addr: self.addr(),
                    attempts: self.reconnect_attempts,
                });
            }
            let delay = (INITIAL_RECONNECT_DELAY_SECS << self.reconnect_attempts.min(5))
                .min(MAX_RECONNECT_DELAY_SECS);
            self.reconnect_attempts += 1;
            warn!(
                "Intake connection lost — reconnect attempt {}/{} in {}s",
                self.reconnect_attempts, MAX_RECONNECT_ATTEMPTS, delay
            );
            tokio::time::sleep(tokio::time::Duration::from_secs(delay)).await;

            match self.connect().await {
                Ok(()) => {
                    self.reconnections += 1;
                    return Ok(());
                }
                Err(e) => warn!("Reconnect failed: {e}"),
            }
        }
    }
}

#[async_trait]
impl EventSource for TcpSource {
    async fn next_frame(&mut self) -> Result<SourceEvent, TransportError> {
        loop {
            if self.reader.is_none() {
                if self.reconnect_attempts == 0 && self.reconnections == 0 {
                    // First connection: fail fast on an unreachable broker
                    // only after the same backoff discipline.
                    match self.connect().await {
                        Ok(()) => {}
                        Err(e) => {
                            warn!("Initial intake connection failed: {e}");
                            self.reconnect().await?;
                        }
                    }
                } else {
                    self.reconnect().await?;
                }
            }

            let reader = self.reader.as_mut().expect("reader set after connect");
            self.line_buffer.clear();
            match reader.read_line(&mut self.line_buffer).await {
                Ok(0) => {
                    // Peer closed the stream; reconnect.
                    self.reader = None;
                    continue;
                }
                Ok(_) => match parse_frame(&self.line_buffer) {
                    Some(frame) => {
                        self.frames_received += 1;
                        return Ok(SourceEvent::Frame(frame));
                    }
                    None => {
                        warn!("Skipping unframed intake line: {:?}", self.line_buffer.trim());
                        continue;
                    }
                },
                Err(e) => {
                    warn!("Intake read error: {e}");
                    self.reader = None;
                    continue;
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "TCP"
    }
}

// ============================================================================
// Stdin Source
// ============================================================================

/// Reads `PUB <topic> <json>` frames from stdin.
///
/// Used with the simulator: `fabsentry-simulate | fabsentry --stdin`.
pub struct StdinSource {
    reader: BufReader<tokio::io::Stdin>,
    line_buffer: String,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            line_buffer: String::with_capacity(2048),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for StdinSource {
    async fn next_frame(&mut self) -> Result<SourceEvent, TransportError> {
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            match parse_frame(&self.line_buffer) {
                Some(frame) => return Ok(SourceEvent::Frame(frame)),
                None => {
                    warn!("Skipping unframed stdin line: {:?}", self.line_buffer.trim());
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

// ============================================================================
// Replay Source (tests / demos)
// ============================================================================

/// Replays pre-loaded frames with optional inter-frame delay.
pub struct ReplaySource {
    frames: std::vec::IntoIter<IntakeFrame>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(frames: Vec<IntakeFrame>, delay_ms: u64) -> Self {
        Self {
            frames: frames.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    async fn next_frame(&mut self) -> Result<SourceEvent, TransportError> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.frames.next() {
            Some(frame) => {
                self.yielded_first = true;
                Ok(SourceEvent::Frame(frame))
            }
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pub_frame() {
        let frame = parse_frame("PUB factory/line2/etching {\"wafer_id\":\"W-1\"}\n").unwrap();
        assert_eq!(frame.topic, "factory/line2/etching");
        assert_eq!(frame.payload, b"{\"wafer_id\":\"W-1\"}".to_vec());
    }

    #[test]
    fn parses_bare_frame_without_verb() {
        let frame = parse_frame("factory/line1/lithography {}").unwrap();
        assert_eq!(frame.topic, "factory/line1/lithography");
    }

    #[test]
    fn rejects_lines_without_payload() {
        assert!(parse_frame("").is_none());
        assert!(parse_frame("   ").is_none());
        assert!(parse_frame("PUB factory/line1/lithography").is_none());
        assert!(parse_frame("PUB factory/line1/lithography   ").is_none());
    }

    #[tokio::test]
    async fn replay_source_yields_then_eof() {
        let mut source = ReplaySource::new(
            vec![IntakeFrame {
                topic: "t".into(),
                payload: b"{}".to_vec(),
            }],
            0,
        );
        assert!(matches!(
            source.next_frame().await.unwrap(),
            SourceEvent::Frame(_)
        ));
        assert!(matches!(source.next_frame().await.unwrap(), SourceEvent::Eof));
    }
}
