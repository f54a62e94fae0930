//! Telemetry acquisition: intake sources and payload decoding.

pub mod decoder;
pub mod source;

pub use decoder::{DecodeError, TelemetryDecoder};
pub use source::{EventSource, IntakeFrame, ReplaySource, SourceEvent, StdinSource, TcpSource, TransportError};
