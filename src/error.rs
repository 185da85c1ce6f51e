//! Error types for the event loop.
//!
//! Two distinct failure domains, kept as separate types:
//!
//! - [`Failure`] travels *through tasks*: it is injected into a suspended
//!   task (cancellation, timeout) or produced by the task's own computation.
//!   A failure never terminates the loop unless it escapes the task driving
//!   [`run_until_complete`](crate::sched::EventLoop::run_until_complete).
//! - [`SchedError`] is *loop-fatal*: a fixed-capacity queue overflowed, the
//!   poller broke, or the top-level task failed. `run_forever` returns it and
//!   the loop is done.
//!
//! Cancellation and timeout share a classification
//! ([`Failure::is_cancellation`]) because a timeout is delivered as a
//! cancellation with a different label: both mean "unwind cooperatively and
//! finish", and the loop treats either escaping a task as a successful
//! unwind, not an error.

use core::fmt;

/// The kind of a [`Failure`], for classification without matching payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Cooperative unwind requested by `cancel`.
    Cancelled,
    /// Cooperative unwind requested by a `wait_for` timer.
    TimedOut,
    /// The task violated the scheduler's usage contract.
    Usage,
    /// An I/O error surfaced through a task.
    Io,
}

/// A failure delivered to, or escaping from, a task.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    /// Cancellation was injected via [`cancel`](crate::sched::EventLoop::cancel).
    #[error("cancelled")]
    Cancelled,
    /// A `wait_for` timeout fired before the wrapped task completed.
    #[error("timed out")]
    TimedOut,
    /// The task broke the suspension protocol (unmatched `*Done`, stale
    /// handle, low-priority yield without a low-priority queue, ...).
    #[error("usage error: {0}")]
    Usage(String),
    /// An I/O error from the task's own stream operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Failure {
    /// Classifies this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Cancelled => FailureKind::Cancelled,
            Self::TimedOut => FailureKind::TimedOut,
            Self::Usage(_) => FailureKind::Usage,
            Self::Io(_) => FailureKind::Io,
        }
    }

    /// Returns true for the cooperative-unwind kinds (cancelled, timed out).
    ///
    /// Timeout is a sub-kind of cancellation: either escaping a task means
    /// the unwind succeeded and the task is dropped without an error log.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut)
    }

    /// Shorthand for a usage failure.
    #[must_use]
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }
}

/// Which fixed-capacity queue overflowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// The FIFO ready queue.
    Ready,
    /// The timed wait queue.
    TimedWait,
    /// The low-priority queue.
    LowPriority,
    /// The immediate-I/O queue.
    Io,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::TimedWait => "timed-wait",
            Self::LowPriority => "low-priority",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

/// A loop-fatal error. `run_forever`/`run_until_complete` return this.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// A fixed-capacity queue was pushed past its configured capacity.
    ///
    /// Capacities are a startup-time sizing contract on this embedded
    /// target; exceeding one is a configuration error, never a silent drop.
    #[error("{queue} queue overflowed its configured capacity of {capacity}")]
    QueueOverflow {
        /// The queue that overflowed.
        queue: QueueKind,
        /// Its configured capacity.
        capacity: usize,
    },
    /// Low-priority scheduling was requested but the loop was configured
    /// without a low-priority queue.
    #[error("no low-priority queue configured")]
    NoLowPriorityQueue,
    /// The readiness poller failed at the loop level.
    #[error("poller error: {0}")]
    Poller(#[source] std::io::Error),
    /// A failure escaped the task driving `run_until_complete`.
    #[error("main task failed: {0}")]
    Task(#[source] Failure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_counts_as_cancellation() {
        assert!(Failure::Cancelled.is_cancellation());
        assert!(Failure::TimedOut.is_cancellation());
        assert!(!Failure::usage("x").is_cancellation());
        assert_eq!(Failure::TimedOut.kind(), FailureKind::TimedOut);
    }

    #[test]
    fn queue_overflow_names_the_queue() {
        let err = SchedError::QueueOverflow {
            queue: QueueKind::TimedWait,
            capacity: 16,
        };
        assert!(err.to_string().contains("timed-wait"));
        assert!(err.to_string().contains("16"));
    }
}
