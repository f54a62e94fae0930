//! Durable store for inspection outcomes.
//!
//! Backed by an embedded sled database with three named trees mirroring
//! the logical tables the dashboard consumes:
//!
//! - `production_lines` — one row per line, keyed by line name
//! - `sensor_data`      — append-only inspection rows, keyed by
//!                        monotonic u64 id (big-endian, so iteration is
//!                        insertion-ordered)
//! - `alerts`           — append-only alert rows, keyed the same way
//!
//! The per-event unit of work ([`FabStore::record_inspection`]) runs as
//! a single multi-tree sled transaction: the sensor row, the line-state
//! upsert, and the conditional alert commit together or not at all.
//! Values are JSON, matching how the rest of the system serializes.

use crate::types::{
    AlertRecord, InspectionRecord, LineStateRecord, LineStatus, PredictionResult, ProductionLine,
    TelemetryEvent,
};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

const LINES_TREE: &str = "production_lines";
const EVENTS_TREE: &str = "sensor_data";
const ALERTS_TREE: &str = "alerts";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt stored record: {0}")]
    Corrupt(String),

    #[error("alert {0} not found")]
    AlertNotFound(u64),

    #[error("alert {0} is already acknowledged")]
    AlreadyAcknowledged(u64),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

fn ser<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Ids written by one successful unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InspectionOutcome {
    pub event_id: u64,
    /// Present iff the prediction decision was true.
    pub alert_id: Option<u64>,
}

/// Handle to the durable store. Cheap to clone; safe to share across
/// workers (sled trees are internally synchronized, and the unit of
/// work is transactional).
#[derive(Clone)]
pub struct FabStore {
    db: sled::Db,
    lines: sled::Tree,
    events: sled::Tree,
    alerts: sled::Tree,
}

impl FabStore {
    /// Open (or create) the store and provision one Idle row per
    /// production line that does not have state yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        let lines = db.open_tree(LINES_TREE)?;
        let events = db.open_tree(EVENTS_TREE)?;
        let alerts = db.open_tree(ALERTS_TREE)?;

        for line in ProductionLine::ALL {
            let key = line.as_str().as_bytes();
            if lines.get(key)?.is_none() {
                lines.insert(key, ser(&LineStateRecord::idle(line))?)?;
            }
        }
        db.flush()?;

        info!(
            "✅ Store opened at {:?} ({} inspections, {} alerts on disk)",
            path.as_ref(),
            events.len(),
            alerts.len()
        );
        Ok(Self {
            db,
            lines,
            events,
            alerts,
        })
    }

    // ========================================================================
    // Unit of work
    // ========================================================================

    /// Persist one inspection outcome atomically: sensor row, line-state
    /// upsert, and — iff the decision is true — a new active alert.
    ///
    /// The line upsert is most-recent-wins on the *event* timestamp, so
    /// a delayed out-of-order event cannot clobber fresher line state.
    /// Conflicting concurrent writers serialize via sled's transaction
    /// retry; everything fed to the closure is precomputed so retries
    /// are idempotent.
    pub fn record_inspection(
        &self,
        event: &TelemetryEvent,
        prediction: &PredictionResult,
    ) -> Result<InspectionOutcome, StoreError> {
        let event_id = self.db.generate_id()?;
        let row_bytes = ser(&InspectionRecord {
            id: event_id,
            event: event.clone(),
            predicted_defect: prediction.decision,
            defect_probability: prediction.probability,
        })?;

        let alert = if prediction.decision {
            let alert_id = self.db.generate_id()?;
            let record = AlertRecord {
                id: alert_id,
                production_line: event.production_line,
                wafer_id: event.wafer_id.clone(),
                message: format!("Defect detected on {} line", event.production_line),
                defect_probability: prediction.probability,
                created_at: Utc::now(),
                acknowledged: false,
                acknowledged_at: None,
            };
            Some((alert_id, ser(&record)?))
        } else {
            None
        };

        let line_key = event.production_line.as_str().as_bytes();
        let event_key = event_id.to_be_bytes();

        (&self.events, &self.lines, &self.alerts)
            .transaction(|(tx_events, tx_lines, tx_alerts)| {
                tx_events.insert(&event_key[..], row_bytes.as_slice())?;

                let current = match tx_lines.get(line_key)? {
                    Some(bytes) => serde_json::from_slice::<LineStateRecord>(&bytes).map_err(
                        |e| {
                            ConflictableTransactionError::Abort(StoreError::Corrupt(format!(
                                "line state for {}: {e}",
                                event.production_line
                            )))
                        },
                    )?,
                    None => LineStateRecord::idle(event.production_line),
                };
                let next = if current
                    .last_updated
                    .map_or(true, |prev| event.timestamp >= prev)
                {
                    LineStateRecord {
                        line: event.production_line,
                        status: LineStatus::Running,
                        current_wafer_id: Some(event.wafer_id.clone()),
                        last_updated: Some(event.timestamp),
                    }
                } else {
                    // Out-of-order delivery: keep the fresher state.
                    current
                };
                let next_bytes = ser(&next).map_err(ConflictableTransactionError::Abort)?;
                tx_lines.insert(line_key, next_bytes)?;

                if let Some((alert_id, bytes)) = &alert {
                    let alert_key = alert_id.to_be_bytes();
                    tx_alerts.insert(&alert_key[..], bytes.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StoreError::Database(e.to_string()),
            })?;

        self.db.flush()?;
        debug!(
            "Persisted inspection {event_id} for {} (alert: {:?})",
            event.production_line,
            alert.as_ref().map(|(id, _)| id)
        );
        Ok(InspectionOutcome {
            event_id,
            alert_id: alert.map(|(id, _)| id),
        })
    }

    // ========================================================================
    // Alert lifecycle
    // ========================================================================

    /// Acknowledge an active alert. Terminal: an acknowledged alert is
    /// never re-opened. Never touches line state — alerts are advisory,
    /// production continues regardless of disposition.
    pub fn acknowledge_alert(&self, id: u64) -> Result<AlertRecord, StoreError> {
        let key = id.to_be_bytes();
        loop {
            let current = self.alerts.get(key)?.ok_or(StoreError::AlertNotFound(id))?;
            let mut record: AlertRecord = serde_json::from_slice(&current)
                .map_err(|e| StoreError::Corrupt(format!("alert {id}: {e}")))?;
            if record.acknowledged {
                return Err(StoreError::AlreadyAcknowledged(id));
            }
            record.acknowledged = true;
            record.acknowledged_at = Some(Utc::now());
            let next = ser(&record)?;

            match self
                .alerts
                .compare_and_swap(key, Some(current), Some(next))?
            {
                Ok(()) => {
                    self.db.flush()?;
                    info!("Alert {id} acknowledged ({})", record.production_line);
                    return Ok(record);
                }
                // Lost a race with a concurrent acknowledger; re-read.
                Err(_) => continue,
            }
        }
    }

    // ========================================================================
    // Dashboard queries
    // ========================================================================

    pub fn line_state(&self, line: ProductionLine) -> Result<LineStateRecord, StoreError> {
        match self.lines.get(line.as_str().as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("line state for {line}: {e}"))),
            None => Ok(LineStateRecord::idle(line)),
        }
    }

    pub fn line_states(&self) -> Result<Vec<LineStateRecord>, StoreError> {
        ProductionLine::ALL
            .into_iter()
            .map(|line| self.line_state(line))
            .collect()
    }

    /// Most recent inspections, newest first.
    pub fn recent_inspections(&self, limit: usize) -> Vec<InspectionRecord> {
        self.events
            .iter()
            .rev()
            .take(limit)
            .filter_map(|item| match item {
                Ok((_, value)) => match serde_json::from_slice(&value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("Skipping corrupt inspection row: {e}");
                        None
                    }
                },
                Err(e) => {
                    warn!("Inspection scan error: {e}");
                    None
                }
            })
            .collect()
    }

    /// Unacknowledged alerts, newest first.
    pub fn active_alerts(&self) -> Vec<AlertRecord> {
        self.scan_alerts()
            .into_iter()
            .rev()
            .filter(|a| !a.acknowledged)
            .collect()
    }

    /// Recently acknowledged alerts, most recently acknowledged first.
    pub fn acknowledged_alerts(&self, limit: usize) -> Vec<AlertRecord> {
        let mut acked: Vec<AlertRecord> = self
            .scan_alerts()
            .into_iter()
            .filter(|a| a.acknowledged)
            .collect();
        acked.sort_by(|a, b| b.acknowledged_at.cmp(&a.acknowledged_at));
        acked.truncate(limit);
        acked
    }

    pub fn inspection_count(&self) -> usize {
        self.events.len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    fn scan_alerts(&self) -> Vec<AlertRecord> {
        self.alerts
            .iter()
            .filter_map(|item| match item {
                Ok((_, value)) => match serde_json::from_slice(&value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("Skipping corrupt alert row: {e}");
                        None
                    }
                },
                Err(e) => {
                    warn!("Alert scan error: {e}");
                    None
                }
            })
            .collect()
    }

    /// Test hook: overwrite a line-state row with arbitrary bytes so the
    /// transaction's read path can be forced to fail mid-unit.
    #[cfg(test)]
    fn corrupt_line_state_for_test(&self, line: ProductionLine) -> Result<(), StoreError> {
        self.lines
            .insert(line.as_str().as_bytes(), &b"not json"[..])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn event(line: ProductionLine, wafer: &str) -> TelemetryEvent {
        TelemetryEvent {
            process_id: "P-1".into(),
            timestamp: Utc::now(),
            production_line: line,
            wafer_id: wafer.into(),
            chamber_temperature: 70.0,
            gas_flow_rate: 120.0,
            rf_power: 1500.0,
            etch_depth: 3.0,
            rotation_speed: 3000.0,
            vacuum_pressure: 0.002,
            stage_alignment_error: 0.01,
            vibration_level: 0.3,
            uv_exposure_intensity: 300.0,
            particle_count: 10,
            join_status: "OK".into(),
            actual_defect: Some(false),
        }
    }

    fn ok_prediction() -> PredictionResult {
        PredictionResult {
            probability: 0.10,
            decision: false,
        }
    }

    fn defect_prediction() -> PredictionResult {
        PredictionResult {
            probability: 0.92,
            decision: true,
        }
    }

    fn open_store() -> (tempfile::TempDir, FabStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FabStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_provisions_idle_lines() {
        let (_dir, store) = open_store();
        let states = store.line_states().unwrap();
        assert_eq!(states.len(), 3);
        for state in states {
            assert_eq!(state.status, LineStatus::Idle);
            assert_eq!(state.current_wafer_id, None);
            assert_eq!(state.last_updated, None);
        }
    }

    #[test]
    fn clean_event_writes_row_and_line_but_no_alert() {
        let (_dir, store) = open_store();
        let outcome = store
            .record_inspection(&event(ProductionLine::Etching, "W-1"), &ok_prediction())
            .unwrap();
        assert!(outcome.alert_id.is_none());
        assert_eq!(store.inspection_count(), 1);
        assert_eq!(store.alert_count(), 0);

        let state = store.line_state(ProductionLine::Etching).unwrap();
        assert_eq!(state.status, LineStatus::Running);
        assert_eq!(state.current_wafer_id.as_deref(), Some("W-1"));
        assert!(state.last_updated.is_some());

        // Other lines untouched.
        let other = store.line_state(ProductionLine::Deposition).unwrap();
        assert_eq!(other.status, LineStatus::Idle);
    }

    #[test]
    fn defect_event_additionally_creates_active_alert() {
        let (_dir, store) = open_store();
        let outcome = store
            .record_inspection(&event(ProductionLine::Etching, "W-2"), &defect_prediction())
            .unwrap();
        let alert_id = outcome.alert_id.unwrap();

        let alerts = store.active_alerts();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.id, alert_id);
        assert_eq!(alert.production_line, ProductionLine::Etching);
        assert_eq!(alert.wafer_id, "W-2");
        assert!((alert.defect_probability - 0.92).abs() < 1e-9);
        assert!(!alert.acknowledged);
        assert_eq!(alert.acknowledged_at, None);
        assert_eq!(alert.message, "Defect detected on Etching line");
    }

    #[test]
    fn stale_event_does_not_clobber_fresher_line_state() {
        let (_dir, store) = open_store();
        let fresh = event(ProductionLine::Lithography, "W-NEW");
        let mut stale = event(ProductionLine::Lithography, "W-OLD");
        stale.timestamp = fresh.timestamp - Duration::minutes(5);

        store.record_inspection(&fresh, &ok_prediction()).unwrap();
        store.record_inspection(&stale, &ok_prediction()).unwrap();

        // Both rows persisted; line state reflects the newer event.
        assert_eq!(store.inspection_count(), 2);
        let state = store.line_state(ProductionLine::Lithography).unwrap();
        assert_eq!(state.current_wafer_id.as_deref(), Some("W-NEW"));
        assert_eq!(state.last_updated, Some(fresh.timestamp));
    }

    #[test]
    fn acknowledge_is_terminal_and_leaves_line_state_alone() {
        let (_dir, store) = open_store();
        let outcome = store
            .record_inspection(&event(ProductionLine::Deposition, "W-3"), &defect_prediction())
            .unwrap();
        let alert_id = outcome.alert_id.unwrap();
        let line_before = store.line_state(ProductionLine::Deposition).unwrap();

        let acked = store.acknowledge_alert(alert_id).unwrap();
        assert!(acked.acknowledged);
        assert!(acked.acknowledged_at.is_some());
        assert!(store.active_alerts().is_empty());
        assert_eq!(store.acknowledged_alerts(10).len(), 1);

        // Second acknowledgment is a reported no-op.
        assert!(matches!(
            store.acknowledge_alert(alert_id),
            Err(StoreError::AlreadyAcknowledged(id)) if id == alert_id
        ));

        // Production continues: acknowledging never alters line state.
        let line_after = store.line_state(ProductionLine::Deposition).unwrap();
        assert_eq!(line_after, line_before);
    }

    #[test]
    fn acknowledging_unknown_alert_is_reported() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.acknowledge_alert(12345),
            Err(StoreError::AlertNotFound(12345))
        ));
    }

    #[test]
    fn failed_unit_of_work_leaves_no_partial_state() {
        let (_dir, store) = open_store();
        store
            .record_inspection(&event(ProductionLine::Etching, "W-1"), &ok_prediction())
            .unwrap();

        // Force the line-state read inside the transaction to fail after
        // the sensor row insert has already been staged.
        store
            .corrupt_line_state_for_test(ProductionLine::Etching)
            .unwrap();
        let err = store
            .record_inspection(&event(ProductionLine::Etching, "W-2"), &defect_prediction())
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));

        // Rolled back: no new sensor row, no alert.
        assert_eq!(store.inspection_count(), 1);
        assert_eq!(store.alert_count(), 0);
    }

    #[test]
    fn recent_inspections_are_newest_first() {
        let (_dir, store) = open_store();
        for i in 0..5 {
            store
                .record_inspection(
                    &event(ProductionLine::Etching, &format!("W-{i}")),
                    &ok_prediction(),
                )
                .unwrap();
        }
        let recent = store.recent_inspections(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].event.wafer_id, "W-4");
        assert_eq!(recent[2].event.wafer_id, "W-2");
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FabStore::open(dir.path()).unwrap();
            store
                .record_inspection(&event(ProductionLine::Etching, "W-9"), &defect_prediction())
                .unwrap();
        }
        let store = FabStore::open(dir.path()).unwrap();
        assert_eq!(store.inspection_count(), 1);
        assert_eq!(store.active_alerts().len(), 1);
        let state = store.line_state(ProductionLine::Etching).unwrap();
        assert_eq!(state.status, LineStatus::Running);
    }
}
