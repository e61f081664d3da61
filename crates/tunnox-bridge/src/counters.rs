//! Small atomic-counter handle. The design note in the specification
//! calls for a "counter handle abstraction rather than raw pointers" so
//! the cross-node splice path can update a bridge's traffic counters
//! from outside the bridge without touching its locks — an `Arc` clone
//! of this handle is exactly that, with none of the aliasing hazards a
//! raw pointer would carry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CounterHandle(Arc<AtomicU64>);

impl CounterHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
