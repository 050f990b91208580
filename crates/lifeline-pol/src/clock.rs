//! Time sources.
//!
//! The manager never reads the wall clock directly so liveness deadlines can be
//! driven from tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unix time in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Clock set by hand
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Unix time anchored at `origin` and advanced by tokio's clock.
///
/// Under `tokio::time::pause()` this moves exactly with the scheduler's
/// ticks, so days of heartbeats can run in a test instantly.
#[derive(Debug)]
pub struct TokioClock {
    origin: u64,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(origin: u64) -> Self {
        Self {
            origin,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> u64 {
        self.origin + self.start.elapsed().as_secs()
    }
}
