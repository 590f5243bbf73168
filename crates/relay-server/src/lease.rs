//! Open-stream bookkeeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tracing::debug;

use crate::metrics::{STREAMS_ACTIVE, STREAMS_OPENED_TOTAL};

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    opened: AtomicU64,
    next_id: AtomicU64,
}

/// Tracks how many streams are open. Cloning shares the counters.
#[derive(Clone, Debug, Default)]
pub struct StreamRegistry {
    counters: Arc<Counters>,
}

impl StreamRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream.
    pub fn acquire(&self) -> StreamLease {
        let id = self.counters.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.counters.opened.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(STREAMS_OPENED_TOTAL).increment(1);
        #[allow(clippy::cast_precision_loss)]
        let gauge = active as f64;
        metrics::gauge!(STREAMS_ACTIVE).set(gauge);
        StreamLease {
            conn_id: format!("stream-{id}"),
            counters: self.counters.clone(),
            released: AtomicBool::new(false),
        }
    }

    /// Streams currently open.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Streams opened since startup.
    pub fn opened(&self) -> u64 {
        self.counters.opened.load(Ordering::Relaxed)
    }
}

/// One open stream's slot in a [`StreamRegistry`].
///
/// Released exactly once, either explicitly or on drop.
#[derive(Debug)]
pub struct StreamLease {
    conn_id: String,
    counters: Arc<Counters>,
    released: AtomicBool,
}

impl StreamLease {
    /// Connection id for log fields.
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Release the slot. Returns `false` if it was already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        let active = self.counters.active.fetch_sub(1, Ordering::SeqCst) - 1;
        #[allow(clippy::cast_precision_loss)]
        let gauge = active as f64;
        metrics::gauge!(STREAMS_ACTIVE).set(gauge);
        debug!(conn_id = %self.conn_id, active, "stream lease released");
        true
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
