//! Tickloop: a single-threaded cooperative scheduler with wrap-safe
//! millisecond deadlines, priority tiers, and poller-backed I/O readiness.
//!
//! # Overview
//!
//! Tickloop multiplexes many suspended computations over one execution
//! thread. A task is an explicit state machine: each time the loop resumes
//! it, the task either completes or yields a *wait descriptor* naming its
//! next suspension (a timed sleep, a low-priority sleep, readiness on an
//! I/O handle, or a loop stop). The loop is the only entity that resumes
//! tasks, moves them between queues, or talks to the OS poller, so none of
//! the scheduler's state needs a lock.
//!
//! # Core Guarantees
//!
//! - **Wrap-safe deadlines**: all tick comparisons go through a signed
//!   wraparound difference; plain ordering on raw ticks does not exist
//! - **Bounded queues**: every queue's capacity is fixed at configuration
//!   time; overflow is a fatal configuration error, never a silent drop
//! - **Exactly-once resumption**: cancellation, timeout, timer, and I/O
//!   wakeups race deterministically on the single thread; a task is never
//!   resumed twice for one suspension
//! - **Failure containment**: a failure escaping a background task is
//!   logged and the task dropped; only the task driving
//!   `run_until_complete` can surface a failure to the caller
//!
//! # Module Structure
//!
//! - [`clock`]: monotonic millisecond ticks and the wrap-safe comparator
//! - [`config`]: queue capacities and the escalation threshold
//! - [`error`]: task-level failures and loop-fatal errors
//! - [`task`]: the suspension protocol (coroutines, wait descriptors)
//! - [`queue`]: the FIFO ready queue and the deadline heaps
//! - [`reactor`]: the I/O readiness table over the OS poller
//! - [`sched`]: the event loop that owns and drives all of the above
//! - [`timeout`]: the `wait_for` timeout wrapper
//! - [`stream`]: reader/writer helpers over non-blocking sources
//! - [`util`]: the generational arena behind task and handle identity

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod reactor;
pub mod sched;
pub mod stream;
pub mod task;
pub mod timeout;
pub mod util;

pub use clock::{MonoClock, Ticks, TICKS_PERIOD};
pub use config::{ConfigError, LoopBuilder, LoopConfig};
pub use error::{Failure, FailureKind, QueueKind, SchedError};
pub use reactor::{Direction, IoHandle};
pub use sched::EventLoop;
pub use stream::{NbSocket, NbSource, StreamReader, StreamStep, StreamWriter};
pub use task::{Coro, Resume, Step, StepResult, TaskId, Value, Wait};
pub use timeout::{wait_for, wait_for_ms, WaitFor};
