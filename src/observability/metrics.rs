//! Scheduler counters.
//!
//! Counters are plain atomics so a snapshot can be taken from any OS
//! thread, including while the run loop is parked on I/O.

use portable_atomic::{AtomicU64, Ordering};

/// Events counted by [`SchedulerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    Spawned,
    Exited,
    Failed,
    ContextSwitches,
    Yields,
    MutexContentions,
    CondWaits,
    SignalsDelivered,
    IoWaits,
    Deadlocks,
}

/// Runtime-wide scheduler metrics.
#[derive(Debug)]
pub struct SchedulerMetrics {
    enabled: bool,
    /// Threads spawned (main excluded)
    spawned: AtomicU64,
    /// Threads whose body returned or raised
    exited: AtomicU64,
    /// Threads that exited with an error
    failed: AtomicU64,
    /// Switches between two different threads
    context_switches: AtomicU64,
    /// Yields that actually gave up the processor
    yields: AtomicU64,
    /// Lock attempts that had to queue
    mutex_contentions: AtomicU64,
    /// Condition waits entered
    cond_waits: AtomicU64,
    /// Signals deposited into another thread
    signals_delivered: AtomicU64,
    /// I/O waits entered
    io_waits: AtomicU64,
    /// Run loop found nothing runnable
    deadlocks: AtomicU64,
}

impl SchedulerMetrics {
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            spawned: AtomicU64::new(0),
            exited: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            mutex_contentions: AtomicU64::new(0),
            cond_waits: AtomicU64::new(0),
            signals_delivered: AtomicU64::new(0),
            io_waits: AtomicU64::new(0),
            deadlocks: AtomicU64::new(0),
        }
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Spawned => &self.spawned,
            Counter::Exited => &self.exited,
            Counter::Failed => &self.failed,
            Counter::ContextSwitches => &self.context_switches,
            Counter::Yields => &self.yields,
            Counter::MutexContentions => &self.mutex_contentions,
            Counter::CondWaits => &self.cond_waits,
            Counter::SignalsDelivered => &self.signals_delivered,
            Counter::IoWaits => &self.io_waits,
            Counter::Deadlocks => &self.deadlocks,
        }
    }

    pub(crate) fn record(&self, counter: Counter) {
        if self.enabled {
            self.counter(counter).fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            spawned: load(&self.spawned),
            exited: load(&self.exited),
            failed: load(&self.failed),
            context_switches: load(&self.context_switches),
            yields: load(&self.yields),
            mutex_contentions: load(&self.mutex_contentions),
            cond_waits: load(&self.cond_waits),
            signals_delivered: load(&self.signals_delivered),
            io_waits: load(&self.io_waits),
            deadlocks: load(&self.deadlocks),
        }
    }
}

/// Point-in-time copy of [`SchedulerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub spawned: u64,
    pub exited: u64,
    pub failed: u64,
    pub context_switches: u64,
    pub yields: u64,
    pub mutex_contentions: u64,
    pub cond_waits: u64,
    pub signals_delivered: u64,
    pub io_waits: u64,
    pub deadlocks: u64,
}

impl MetricsSnapshot {
    /// Threads spawned but not yet exited.
    pub fn live_spawned(&self) -> u64 {
        self.spawned.saturating_sub(self.exited)
    }
}
