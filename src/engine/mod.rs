//! Counter persistence engine.
//!
//! Owns the in-memory counter, loads it from the store at open, persists it on
//! a timer while dirty, and flushes once more on shutdown. Counting never fails
//! because of persistence trouble; only `persist` and `shutdown` report errors.

pub mod retry;
pub mod worker;

use crate::config::EngineConfig;
use crate::core::{AtomicCounter, CounterError, Result};
use crate::metrics::{MetricsSink, NoopMetrics, Operation};
use crate::storage::{FileStore, RecordStore, codec};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use worker::{PersistWorker, spawn_persist_worker};

/// Result of a successful `persist` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Nothing changed since the last save; no write happened.
    Clean,
    Saved { visits: i64 },
}

pub(crate) struct EngineShared {
    counter: AtomicCounter,
    store: Arc<dyn RecordStore>,
    metrics: Arc<dyn MetricsSink>,
    config: EngineConfig,
    /// At most one physical save in flight.
    persist_lock: Mutex<()>,
}

impl EngineShared {
    /// Save-with-retry. Each attempt takes the persist lock and a fresh snapshot.
    async fn persist(&self) -> Result<PersistOutcome> {
        if !self.counter.is_dirty() {
            debug!("Counter is clean, skipping persist");
            return Ok(PersistOutcome::Clean);
        }

        debug!("Persisting counter to disk");
        let started = Instant::now();
        self.metrics.record_operation(Operation::Save);
        let policy = self.config.retry_policy();

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let err = match self.save_once().await {
                Ok(outcome) => break Ok(outcome),
                Err(err) => err,
            };

            self.metrics.record_persist_error();
            warn!(
                error = %err,
                attempt,
                max_attempts = policy.attempts,
                "Save attempt failed"
            );

            match policy.delay_after(attempt) {
                Some(delay) if err.is_transient() => tokio::time::sleep(delay).await,
                _ => {
                    break Err(CounterError::PersistFailed {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
            }
        };

        self.metrics.observe_duration(Operation::Save, started.elapsed());
        if let Err(err) = &result {
            error!(error = %err, "Failed to save counter after multiple attempts");
        }
        result
    }

    async fn save_once(&self) -> Result<PersistOutcome> {
        let _guard = self.persist_lock.lock().await;
        if !self.counter.is_dirty() {
            return Ok(PersistOutcome::Clean);
        }

        let snapshot = self.counter.snapshot();
        let bytes = codec::encode(snapshot.value, Utc::now(), &self.config.record_version)?;

        self.metrics.record_operation(Operation::Write);
        let started = Instant::now();
        let store = Arc::clone(&self.store);
        let written = tokio::task::spawn_blocking(move || store.save(&bytes)).await;
        self.metrics.observe_duration(Operation::Write, started.elapsed());
        written??;

        self.counter.mark_clean(&snapshot);
        Ok(PersistOutcome::Saved {
            visits: snapshot.value,
        })
    }
}

async fn load_initial_value(store: Arc<dyn RecordStore>, metrics: &dyn MetricsSink) -> Result<i64> {
    metrics.record_operation(Operation::Load);
    let started = Instant::now();
    let location = store.location();

    let loaded = tokio::task::spawn_blocking(move || {
        match store.recover() {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed stale temp files"),
            Err(err) => warn!(error = %err, "Failed to clean up stale temp files"),
        }
        store.load()
    })
    .await;
    metrics.observe_duration(Operation::Load, started.elapsed());

    let Some(bytes) = loaded?? else {
        info!(path = %location, "Counter file does not exist or is empty, starting with zero");
        return Ok(0);
    };

    match codec::validate(&bytes) {
        Ok(record) => {
            info!(path = %location, visits = record.visits, "Counter loaded successfully");
            Ok(record.visits)
        }
        Err(rejection) => {
            warn!(path = %location, reason = %rejection, "Counter file rejected, starting with zero");
            Ok(0)
        }
    }
}

/// Counter engine shared by request handlers.
///
/// # Examples
///
/// ```no_run
/// use durable_counter::{EngineConfig, PersistenceEngine};
///
/// # async fn run() -> durable_counter::Result<()> {
/// let engine = PersistenceEngine::open(EngineConfig::new("data/counter.json")).await?;
/// engine.increment();
/// engine.persist().await?;
/// engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct PersistenceEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<PersistWorker>>,
}

impl PersistenceEngine {
    /// Open the engine on the configured file and start background persistence.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(FileStore::new(&config.path, config.permissions));
        Self::open_with(config, store, Arc::new(NoopMetrics)).await
    }

    /// Open with an explicit store and metrics sink.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn open_with(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        config.validate()?;

        let initial = load_initial_value(Arc::clone(&store), metrics.as_ref()).await?;
        metrics.set_counter_value(initial);

        let shared = Arc::new(EngineShared {
            counter: AtomicCounter::new(initial),
            store,
            metrics,
            config,
            persist_lock: Mutex::new(()),
        });
        let worker = spawn_persist_worker(Arc::clone(&shared));

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn increment(&self) -> i64 {
        self.add(1)
    }

    /// Add an arbitrary delta (wrapping) and return the new value.
    pub fn add(&self, delta: i64) -> i64 {
        let value = self.shared.counter.add(delta);
        self.shared.metrics.set_counter_value(value);
        self.shared.metrics.record_operation(Operation::Increment);
        value
    }

    pub fn get_value(&self) -> i64 {
        self.shared.metrics.record_operation(Operation::Get);
        self.shared.counter.get_value()
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.counter.is_dirty()
    }

    pub fn last_persisted_value(&self) -> i64 {
        self.shared.counter.last_persisted_value()
    }

    /// Persist now if dirty. Serialized against the background loop.
    pub async fn persist(&self) -> Result<PersistOutcome> {
        self.shared.persist().await
    }

    /// Stop the background loop, then flush once more.
    ///
    /// A second call finds no worker and only flushes.
    pub async fn shutdown(&self) -> Result<PersistOutcome> {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.stop().await;
        }

        let outcome = self.shared.persist().await?;
        info!(visits = self.shared.counter.get_value(), "Counter engine shut down");
        Ok(outcome)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn location(&self) -> String {
        self.shared.store.location()
    }
}
