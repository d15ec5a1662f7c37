//! Wall-clock time source shared by the scheduler, buffers and engine.
//!
//! All protocol timestamps are integer milliseconds since the Unix epoch,
//! matching the `<w n="…"/>` granularity on the wire.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// A source of wall-clock timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock handle shared between all components of one engine.
pub type SharedClock = Arc<dyn Clock>;

/// Real wall clock.
///
/// Anchored to `SystemTime` once at construction and advanced by the tokio
/// monotonic clock afterwards, so timestamps never run backward and tokio's
/// paused test time drives it as well.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
    origin_millis: Timestamp,
}

impl SystemClock {
    pub fn new() -> Self {
        let origin_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or(0);
        Self {
            origin: tokio::time::Instant::now(),
            origin_millis,
        }
    }

    /// Convenience constructor for the shared form.
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        self.origin_millis + self.origin.elapsed().as_millis() as Timestamp
    }
}

/// Manually driven clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(start),
        })
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward by `millis` and return the new time.
    pub fn advance(&self, millis: i64) -> Timestamp {
        self.now.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
