//! Observability for the scheduler: counters and embedder reports.

pub mod metrics;

pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub(crate) use metrics::Counter;

use crate::error::{Signal, ThreadError};
use crate::introspection::ThreadInfo;

/// Conditions surfaced to the embedding environment rather than to a
/// script thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// A signal aimed at the main thread. It is not delivered, since
    /// unwinding the main thread would tear down the top level.
    MainSignaled { signal: Signal },
    /// An error escaped the main thread's body.
    MainFailed { error: ThreadError },
    /// The run loop found no runnable thread and nothing waiting on I/O.
    Deadlock { blocked: Vec<ThreadInfo> },
}
