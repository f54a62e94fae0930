//! Edge processing pipeline.
//!
//! ```text
//! intake source ──► bounded queue ──► worker pool (fixed size)
//!                                        │
//!                     Decode → Transform → Infer → Persist
//!                                        │
//!                              stats + alert/line state
//! ```
//!
//! Per-event errors drop that event (counted, logged); only startup
//! validation and transport exhaustion are fatal.

pub mod stats;
pub mod worker;

pub use stats::{DropCounts, DropReason, StatsAggregator, StatsSnapshot};
pub use worker::{run_intake, spawn_workers, EdgePipeline, EventError, ProcessedEvent};
