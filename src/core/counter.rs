//! Lock-free in-memory counter with dirty tracking.
//!
//! Dirtiness is derived from two generation numbers instead of a bare flag:
//! every mutation bumps `generation`, every successful persist records the
//! generation its snapshot was taken at. The counter is dirty while the two
//! differ, so a persist that raced with an increment can never hide it.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Point-in-time view of the counter handed to the persistence path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub value: i64,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicI64,
    generation: AtomicU64,
    persisted_generation: AtomicU64,
    last_saved: AtomicI64,
}

impl AtomicCounter {
    /// Counter starting at `initial`, considered clean (it came from disk or is zero).
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            generation: AtomicU64::new(0),
            persisted_generation: AtomicU64::new(0),
            last_saved: AtomicI64::new(initial),
        }
    }

    pub fn increment(&self) -> i64 {
        self.add(1)
    }

    /// Adds `delta` with wrapping arithmetic and returns the new value.
    pub fn add(&self, delta: i64) -> i64 {
        // value first, generation second: a snapshot that observes the new
        // generation is guaranteed to observe the new value as well.
        let new_value = self.value.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta);
        self.generation.fetch_add(1, Ordering::SeqCst);
        new_value
    }

    pub fn get_value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.persisted_generation.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let generation = self.generation.load(Ordering::SeqCst);
        let value = self.value.load(Ordering::SeqCst);
        CounterSnapshot { value, generation }
    }

    /// Records that `snapshot` is durable.
    ///
    /// Idempotent, and safe when the counter moved on after the snapshot: the
    /// dirty state then survives and the next persist writes the newer value.
    /// An older snapshot never overrides a newer one.
    pub fn mark_clean(&self, snapshot: &CounterSnapshot) {
        let previous = self
            .persisted_generation
            .fetch_max(snapshot.generation, Ordering::SeqCst);
        if snapshot.generation >= previous {
            self.last_saved.store(snapshot.value, Ordering::SeqCst);
        }
    }

    /// Value carried by the most recent successful persist (or the loaded value).
    pub fn last_persisted_value(&self) -> i64 {
        self.last_saved.load(Ordering::SeqCst)
    }
}
