//! Fault-injecting `RecordStore` wrappers shared by the integration tests.
//!
//! Lives under `tests/support/` so it is not compiled as its own test target.

#![allow(dead_code)]

use durable_counter::storage::{codec, durable};
use durable_counter::{FileStore, RecordStore, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

/// Fails the first `failures` saves, then delegates.
pub struct FlakyStore {
    inner: FileStore,
    failures: usize,
    save_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: FileStore, failures: usize) -> Self {
        Self {
            inner,
            failures,
            save_calls: AtomicUsize::new(0),
        }
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

impl RecordStore for FlakyStore {
    fn save(&self, bytes: &[u8]) -> Result<()> {
        let call = self.save_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(std::io::Error::other("injected save failure").into());
        }
        self.inner.save(bytes)
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        self.inner.load()
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}

/// Panics on every save, surfacing as a failed blocking task.
pub struct PanickingStore {
    inner: FileStore,
    save_calls: AtomicUsize,
}

impl PanickingStore {
    pub fn new(inner: FileStore) -> Self {
        Self {
            inner,
            save_calls: AtomicUsize::new(0),
        }
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

impl RecordStore for PanickingStore {
    fn save(&self, _bytes: &[u8]) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        panic!("injected panic in save");
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        self.inner.load()
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}

/// Parks the first save between two barrier waits so a test can act while
/// the write is in flight.
pub struct GatedStore {
    inner: FileStore,
    gate: Arc<Barrier>,
    armed: AtomicBool,
}

impl GatedStore {
    pub fn new(inner: FileStore) -> (Self, Arc<Barrier>) {
        let gate = Arc::new(Barrier::new(2));
        let store = Self {
            inner,
            gate: Arc::clone(&gate),
            armed: AtomicBool::new(true),
        };
        (store, gate)
    }
}

impl RecordStore for GatedStore {
    fn save(&self, bytes: &[u8]) -> Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.gate.wait(); // entered
            self.gate.wait(); // released
        }
        self.inner.save(bytes)
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        self.inner.load()
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}

pub fn counter_path(dir: &Path) -> PathBuf {
    dir.join("counter.json")
}

/// Value currently on disk as a fresh process would see it.
pub fn visits_on_disk(path: &Path) -> Option<i64> {
    let bytes = durable::load(path).unwrap()?;
    codec::decode(&bytes).map(|record| record.visits)
}

pub fn temp_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
        .collect()
}
