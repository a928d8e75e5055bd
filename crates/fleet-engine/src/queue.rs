//! Per-instance queue admission
//!
//! The depth counter is checked-then-incremented in one atomic
//! compare-exchange loop, so the bound holds exactly even under concurrent
//! admission. The returned permit decrements on drop, covering every exit
//! path including timeouts and panics.

use dashmap::DashMap;
use fleet_core::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Keyed bounded admission counters, one per instance
#[derive(Debug, Default)]
pub struct AdmissionControl {
    depths: DashMap<String, Arc<AtomicUsize>>,
}

impl AdmissionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one request against `instance_id`, bounded by `limit`.
    ///
    /// Fails with a non-retriable queue-full error the instant the counter
    /// would exceed the bound. No await point between check and increment.
    pub fn acquire(&self, instance_id: &str, limit: usize) -> Result<QueuePermit> {
        let counter = self
            .depths
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();

        let mut current = counter.load(Ordering::SeqCst);
        loop {
            if current >= limit {
                return Err(Error::Capacity {
                    instance_id: instance_id.to_string(),
                    depth: current,
                    limit,
                });
            }
            match counter.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(QueuePermit { counter }),
                Err(observed) => current = observed,
            }
        }
    }

    /// Current queue depth for an instance
    pub fn depth(&self, instance_id: &str) -> usize {
        self.depths
            .get(instance_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

/// RAII admission slot; dropping it releases the slot
#[derive(Debug)]
pub struct QueuePermit {
    counter: Arc<AtomicUsize>,
}

impl Drop for QueuePermit {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
