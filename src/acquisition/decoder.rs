//! Telemetry payload decoder.
//!
//! Turns a raw intake payload plus its transport topic into a typed
//! [`TelemetryEvent`]. Decoding is pure and all-or-nothing: a single
//! missing or malformed field rejects the whole event, so no partially
//! populated record can reach the pipeline.

use crate::config::TopicBinding;
use crate::types::{ProductionLine, TelemetryEvent};
use thiserror::Error;

/// Decode failures. Each one drops exactly one event; none are fatal.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The topic is not bound to any production line in the config.
    #[error("no production line bound to topic {0:?}")]
    UnknownTopic(String),

    /// Payload is not well-formed JSON, or a required field is absent
    /// or not coercible to its expected type.
    #[error("malformed telemetry payload: {0}")]
    Malformed(String),

    /// Payload claims a different line than the topic it arrived on.
    #[error("payload for line {payload_line} arrived on {topic_line} topic {topic:?}")]
    LineMismatch {
        topic: String,
        topic_line: ProductionLine,
        payload_line: ProductionLine,
    },
}

/// Stateless decoder configured with the topic → line bindings.
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    bindings: Vec<TopicBinding>,
}

impl TelemetryDecoder {
    pub fn new(bindings: Vec<TopicBinding>) -> Self {
        Self { bindings }
    }

    /// Decode one payload received on `topic`.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<TelemetryEvent, DecodeError> {
        let topic_line = self
            .bindings
            .iter()
            .find(|b| b.topic == topic)
            .map(|b| b.line)
            .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;

        let event: TelemetryEvent =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        // A publisher wired to the wrong topic would otherwise corrupt
        // the other line's state.
        if event.production_line != topic_line {
            return Err(DecodeError::LineMismatch {
                topic: topic.to_string(),
                topic_line,
                payload_line: event.production_line,
            });
        }

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntakeConfig;

    fn decoder() -> TelemetryDecoder {
        TelemetryDecoder::new(IntakeConfig::default().topics)
    }

    fn payload(line: &str) -> String {
        format!(
            r#"{{
                "process_id": "P-2001",
                "timestamp": "2026-03-01T09:00:00",
                "production_line": "{line}",
                "wafer_id": "W-77",
                "chamber_temperature": 71.8,
                "gas_flow_rate": 120.4,
                "rf_power": 1502.0,
                "etch_depth": 3.1,
                "rotation_speed": 2980.0,
                "vacuum_pressure": 0.0019,
                "stage_alignment_error": 0.015,
                "vibration_level": 0.35,
                "uv_exposure_intensity": 305.5,
                "particle_count": 9,
                "join_status": "OK",
                "actual_defect": 0
            }}"#
        )
    }

    #[test]
    fn decodes_well_formed_payload() {
        let event = decoder()
            .decode("factory/line2/etching", payload("Etching").as_bytes())
            .unwrap();
        assert_eq!(event.production_line, ProductionLine::Etching);
        assert_eq!(event.wafer_id, "W-77");
        assert_eq!(event.particle_count, 9);
        assert_eq!(event.actual_defect, Some(false));
    }

    #[test]
    fn missing_field_rejects_whole_event() {
        let body = payload("Etching").replace(r#""rf_power": 1502.0,"#, "");
        let err = decoder()
            .decode("factory/line2/etching", body.as_bytes())
            .unwrap_err();
        match err {
            DecodeError::Malformed(msg) => assert!(msg.contains("rf_power"), "{msg}"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_reading_rejects_whole_event() {
        let body = payload("Etching").replace("1502.0", r#""hot""#);
        assert!(matches!(
            decoder().decode("factory/line2/etching", body.as_bytes()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_line_name_rejects_whole_event() {
        let body = payload("Packaging");
        assert!(matches!(
            decoder().decode("factory/line2/etching", body.as_bytes()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn unbound_topic_is_rejected() {
        assert!(matches!(
            decoder().decode("factory/line9/metrology", payload("Etching").as_bytes()),
            Err(DecodeError::UnknownTopic(_))
        ));
    }

    #[test]
    fn topic_line_mismatch_is_rejected() {
        let err = decoder()
            .decode("factory/line1/lithography", payload("Etching").as_bytes())
            .unwrap_err();
        assert!(matches!(err, DecodeError::LineMismatch { .. }));
    }

    #[test]
    fn not_json_is_rejected() {
        assert!(matches!(
            decoder().decode("factory/line2/etching", b"&&0108 1234!!"),
            Err(DecodeError::Malformed(_))
        ));
    }
}
