//! Metrics capability consumed by the engine.
//!
//! Exporters live outside the crate; `EngineMetrics` is an in-process
//! recorder they (and tests) can read from.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Increment,
    Get,
    /// One persist sequence, retries included.
    Save,
    /// One physical write attempt.
    Write,
    Load,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Increment,
        Operation::Get,
        Operation::Save,
        Operation::Write,
        Operation::Load,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Increment => "increment",
            Operation::Get => "get",
            Operation::Save => "save",
            Operation::Write => "write",
            Operation::Load => "load",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

pub trait MetricsSink: Send + Sync {
    fn record_operation(&self, op: Operation);
    fn observe_duration(&self, op: Operation, elapsed: Duration);
    fn record_persist_error(&self);
    fn set_counter_value(&self, value: i64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_operation(&self, _op: Operation) {}
    fn observe_duration(&self, _op: Operation, _elapsed: Duration) {}
    fn record_persist_error(&self) {}
    fn set_counter_value(&self, _value: i64) {}
}

#[derive(Debug, Default)]
pub struct EngineMetrics {
    operations: [AtomicU64; 5],
    duration_micros: [AtomicU64; 5],
    persist_errors: AtomicU64,
    counter_value: AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub operations: Vec<(Operation, u64)>,
    pub total_duration: Vec<(Operation, Duration)>,
    pub persist_errors: u64,
    pub counter_value: i64,
}

impl MetricsSnapshot {
    pub fn operation_count(&self, op: Operation) -> u64 {
        self.operations
            .iter()
            .find(|(o, _)| *o == op)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist_errors(&self) -> u64 {
        self.persist_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: Operation::ALL
                .iter()
                .map(|op| (*op, self.operations[op.index()].load(Ordering::Relaxed)))
                .collect(),
            total_duration: Operation::ALL
                .iter()
                .map(|op| {
                    let micros = self.duration_micros[op.index()].load(Ordering::Relaxed);
                    (*op, Duration::from_micros(micros))
                })
                .collect(),
            persist_errors: self.persist_errors(),
            counter_value: self.counter_value.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for EngineMetrics {
    fn record_operation(&self, op: Operation) {
        self.operations[op.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn observe_duration(&self, op: Operation, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.duration_micros[op.index()].fetch_add(micros, Ordering::Relaxed);
    }

    fn record_persist_error(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn set_counter_value(&self, value: i64) {
        self.counter_value.store(value, Ordering::Relaxed);
    }
}
