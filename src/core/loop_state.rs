//! Run state shared by a loop, its timers and its control surface
//!
//! One [`LoopState`] exists per direction for the life of the process. It is
//! shared between the main loop, any periodic task and the callers of
//! `stats()`, so every field is either atomic or behind a short lock.

use crate::core::sync::lock_recover;
use crate::core::time::{Clock, SystemClock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Time after start before a throughput figure is published
pub const THROUGHPUT_WARMUP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct RunClock {
    started_at: Instant,
    last_report_at: Instant,
}

/// Counters and timestamps of one producer or consumer loop
pub struct LoopState {
    running: AtomicBool,
    message_count: AtomicU64,
    run_clock: Mutex<Option<RunClock>>,
    clock: Arc<dyn Clock>,
}

/// Point-in-time view of a loop, as returned by the control surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopStats {
    pub running: bool,
    pub message_count: u64,
    pub elapsed_seconds: f64,
    pub throughput: f64,
}

impl LoopStats {
    /// Snapshot reported whenever a loop has nothing meaningful to say
    pub fn quiescent(running: bool) -> Self {
        Self {
            running,
            message_count: 0,
            elapsed_seconds: 0.0,
            throughput: 0.0,
        }
    }
}

/// Totals for one completed run, logged on stop
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub message_count: u64,
    pub elapsed_seconds: f64,
    pub average_throughput: f64,
}

impl LoopState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            running: AtomicBool::new(false),
            message_count: AtomicU64::new(0),
            run_clock: Mutex::new(None),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Reset counters, stamp the start time and mark the loop running
    pub fn begin(&self) {
        let now = self.clock.now();
        self.message_count.store(0, Ordering::Release);
        *lock_recover(self.run_clock.lock()) = Some(RunClock {
            started_at: now,
            last_report_at: now,
        });
        self.running.store(true, Ordering::Release);
    }

    /// Mark the loop stopped and return the totals of the run
    pub fn finish(&self) -> RunSummary {
        self.running.store(false, Ordering::Release);
        let message_count = self.message_count.load(Ordering::Acquire);
        let elapsed_seconds = self
            .elapsed_since_start()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        RunSummary {
            message_count,
            elapsed_seconds,
            average_throughput: rate(message_count, elapsed_seconds),
        }
    }

    /// Add handled messages and return the new total
    pub fn add_messages(&self, count: u64) -> u64 {
        self.message_count.fetch_add(count, Ordering::AcqRel) + count
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Acquire)
    }

    fn elapsed_since_start(&self) -> Option<Duration> {
        let run_clock = (*lock_recover(self.run_clock.lock()))?;
        Some(self.clock.now().saturating_duration_since(run_clock.started_at))
    }

    /// Messages per second since start
    ///
    /// `None` while stopped and during the warm-up second after start.
    pub fn throughput(&self) -> Option<f64> {
        if !self.is_running() {
            return None;
        }
        let elapsed = self.elapsed_since_start()?;
        if elapsed < THROUGHPUT_WARMUP {
            return None;
        }
        Some(rate(self.message_count(), elapsed.as_secs_f64()))
    }

    /// True at most once per `interval`; claims the report slot when it fires
    pub fn report_due(&self, interval: Duration) -> bool {
        let now = self.clock.now();
        let mut guard = lock_recover(self.run_clock.lock());
        match guard.as_mut() {
            Some(run_clock) if now.saturating_duration_since(run_clock.last_report_at) >= interval => {
                run_clock.last_report_at = now;
                true
            }
            _ => false,
        }
    }

    pub fn stats(&self) -> LoopStats {
        let running = self.is_running();
        let message_count = self.message_count();
        if !running || message_count == 0 {
            return LoopStats::quiescent(running);
        }
        let elapsed_seconds = self
            .elapsed_since_start()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        LoopStats {
            running,
            message_count,
            elapsed_seconds: round2(elapsed_seconds),
            throughput: round2(rate(message_count, elapsed_seconds)),
        }
    }
}

fn rate(count: u64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds <= 0.0 {
        0.0
    } else {
        count as f64 / elapsed_seconds
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Creates the stop signal pair for one run of a loop
pub fn run_token() -> (RunHandle, RunToken) {
    let (tx, rx) = watch::channel(false);
    (RunHandle { tx }, RunToken { rx })
}

/// Owner side of a run's stop signal, held by the service
#[derive(Debug)]
pub struct RunHandle {
    tx: watch::Sender<bool>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> RunToken {
        RunToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Task side of a run's stop signal
///
/// Each run gets its own token, so a loop left over from a previous run can
/// never be revived by a later `start()`.
#[derive(Debug, Clone)]
pub struct RunToken {
    rx: watch::Receiver<bool>,
}

impl RunToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Completes once the run is cancelled or its handle is gone
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
