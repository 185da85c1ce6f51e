//! Tasks and the suspension protocol.
//!
//! A task is a suspendable computation implementing [`Coro`]. Each resumption
//! either makes progress and yields a [`Wait`] descriptor naming the next
//! suspension condition, or finishes: `Ok(Step::Done)` for natural
//! completion, `Err(failure)` when an injected failure unwound it.
//!
//! The loop is the only caller of [`Coro::resume`]; user code registers a
//! task with [`create_task`](crate::sched::EventLoop::create_task) and then
//! communicates with it only through cancellation or shared state.
//!
//! # Writing a task
//!
//! Tasks are hand-written state machines. A task that sleeps and then stops
//! the loop:
//!
//! ```ignore
//! struct SleepThenStop(u8);
//!
//! impl Coro for SleepThenStop {
//!     fn resume(&mut self, _lp: &mut EventLoop, input: Resume) -> StepResult {
//!         input.check()?; // propagate injected cancellation
//!         match self.0 {
//!             0 => { self.0 = 1; Ok(Step::Pending(Wait::Sleep(100))) }
//!             _ => Ok(Step::Pending(Wait::Stop(Value::unit()))),
//!         }
//!     }
//! }
//! ```

use crate::error::Failure;
use crate::reactor::IoHandle;
use crate::sched::EventLoop;
use crate::util::ArenaIndex;
use core::fmt;
use std::any::Any;
use std::time::Duration;

/// A value produced by a task or carried by [`Wait::Stop`].
///
/// A boxed `Any` with a typed accessor, so heterogeneous tasks can share
/// one completion channel.
pub struct Value(Box<dyn Any>);

impl Value {
    /// Wraps a concrete value.
    #[must_use]
    pub fn new<T: Any>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// The unit value, for tasks with nothing to return.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Attempts to take the value as `T`.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged if the contained type is not `T`.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(boxed) => Err(Self(boxed)),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Value(..)")
    }
}

/// What a resumed task was handed at its suspension point.
#[derive(Debug)]
pub enum Resume {
    /// The awaited condition held; continue normally.
    Ready,
    /// A failure was injected (cancel, timeout). A well-behaved task unwinds
    /// and returns `Err` with this failure, possibly after cleanup.
    Failure(Failure),
}

impl Resume {
    /// Propagates an injected failure, the common prologue of `resume`.
    ///
    /// # Errors
    ///
    /// Returns the injected failure when one was delivered.
    pub fn check(self) -> Result<(), Failure> {
        match self {
            Self::Ready => Ok(()),
            Self::Failure(failure) => Err(failure),
        }
    }
}

/// The wait descriptor a task yields at each suspension point.
///
/// Exactly one descriptor is produced per suspension, and the loop matches
/// it exhaustively; adding a kind is a compile-time change. The unstructured
/// "resume me next pass" and "someone else will requeue me" shorthands are
/// explicit variants here ([`Wait::Yield`], [`Wait::Park`]).
pub enum Wait {
    /// Resume after `delay` milliseconds via the timed wait queue
    /// (0 resumes on the next pass).
    Sleep(u32),
    /// Low-priority sleep, relative seconds sub-kind.
    After(Duration),
    /// Low-priority sleep, relative milliseconds sub-kind.
    AfterMs(u32),
    /// Resume when the handle becomes readable. The task is parked in the
    /// readiness table; it re-enters only via the poller.
    IoRead(IoHandle),
    /// Resume when the handle becomes writable.
    IoWrite(IoHandle),
    /// Read interest is done: unregister the direction and resume via the
    /// configured I/O path. Usage error without a prior matching `IoRead`.
    IoReadDone(IoHandle),
    /// Write interest is done; counterpart of `IoReadDone`.
    IoWriteDone(IoHandle),
    /// Resume on the next pass (FIFO, behind already-ready work).
    Yield,
    /// Do not requeue; something else (a callback, another task) will.
    Park,
    /// Terminate the loop, returning the value from `run_until_complete`.
    Stop(Value),
}

impl Wait {
    /// Sleep for a whole-unit duration (timed wait queue).
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        Self::Sleep(duration.as_millis().min(u128::from(u32::MAX)) as u32)
    }

    /// Sleep for `ms` milliseconds (timed wait queue).
    #[must_use]
    pub const fn sleep_ms(ms: u32) -> Self {
        Self::Sleep(ms)
    }

    /// Low-priority sleep for a duration.
    #[must_use]
    pub const fn after(duration: Duration) -> Self {
        Self::After(duration)
    }

    /// Low-priority sleep for `ms` milliseconds.
    #[must_use]
    pub const fn after_ms(ms: u32) -> Self {
        Self::AfterMs(ms)
    }
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleep(ms) => write!(f, "Sleep({ms}ms)"),
            Self::After(d) => write!(f, "After({d:?})"),
            Self::AfterMs(ms) => write!(f, "AfterMs({ms}ms)"),
            Self::IoRead(h) => write!(f, "IoRead({h})"),
            Self::IoWrite(h) => write!(f, "IoWrite({h})"),
            Self::IoReadDone(h) => write!(f, "IoReadDone({h})"),
            Self::IoWriteDone(h) => write!(f, "IoWriteDone({h})"),
            Self::Yield => f.write_str("Yield"),
            Self::Park => f.write_str("Park"),
            Self::Stop(_) => f.write_str("Stop(..)"),
        }
    }
}

/// The outcome of one resumption step.
pub enum Step {
    /// The task suspended again with the given descriptor.
    Pending(Wait),
    /// The task completed naturally with a result. Background task results
    /// are dropped; `run_until_complete` surfaces the main task's.
    Done(Value),
}

impl Step {
    /// Completion with the unit value.
    #[must_use]
    pub fn done() -> Self {
        Self::Done(Value::unit())
    }
}

/// The result of resuming a task once.
pub type StepResult = Result<Step, Failure>;

/// A suspendable computation driven by the event loop.
///
/// `resume` receives the loop itself, so a running task can schedule
/// callbacks, create tasks, or cancel other tasks directly; the loop takes
/// the coroutine out of its record before resuming, so the borrow is sound
/// and a task can never observe itself in a queue.
pub trait Coro {
    /// Advances the computation from its last suspension point.
    fn resume(&mut self, sched: &mut EventLoop, input: Resume) -> StepResult;
}

impl<F> Coro for F
where
    F: FnMut(&mut EventLoop, Resume) -> StepResult,
{
    fn resume(&mut self, sched: &mut EventLoop, input: Resume) -> StepResult {
        self(sched, input)
    }
}

/// Stable identifier of a registered task.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) ArenaIndex);

impl TaskId {
    /// Creates a task id from raw parts (tests only).
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({:?})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0.index())
    }
}

/// The pending-throw slot: at most one outstanding injected failure or
/// wakeup marker per task.
///
/// | State | Meaning |
/// |-------|---------|
/// | `Idle` | nothing pending; next resume delivers `Resume::Ready` |
/// | `IoArmed` | parked in the readiness table for one direction |
/// | `WakeToken` | a natural wakeup is queued in a deadline queue |
/// | `Failure` | an injected failure awaits the next resume |
#[derive(Debug)]
pub(crate) enum PendSlot {
    Idle,
    IoArmed(IoHandle, crate::reactor::Direction),
    WakeToken,
    Failure(Failure),
}

/// Per-task record owned by the loop's task arena.
pub(crate) struct TaskRecord {
    /// The computation; `None` while the loop is inside `resume`.
    pub(crate) coro: Option<Box<dyn Coro>>,
    pub(crate) slot: PendSlot,
}

impl TaskRecord {
    pub(crate) fn new(coro: Box<dyn Coro>) -> Self {
        Self {
            coro: Some(coro),
            slot: PendSlot::Idle,
        }
    }
}
