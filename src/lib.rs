// ============================================================================
// Durable Counter Library
// ============================================================================

//! Embedded counter persistence engine.
//!
//! The counter lives in memory and is served lock-free. A background task
//! writes it to a local JSON file whenever it changed, using a checksummed
//! record, an advisory lock and an atomic rename; shutdown flushes once more.

pub mod config;
pub mod core;
pub mod engine;
pub mod metrics;
pub mod storage;

pub use config::EngineConfig;
pub use crate::core::{AtomicCounter, CounterError, CounterSnapshot, Result};
pub use engine::retry::{Backoff, RetryPolicy};
pub use engine::{PersistOutcome, PersistenceEngine};
pub use metrics::{EngineMetrics, MetricsSink, NoopMetrics, Operation};
pub use storage::{FileStore, PersistedRecord, RecordRejection, RecordStore};
