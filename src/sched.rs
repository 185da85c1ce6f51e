//! The scheduler loop.
//!
//! [`EventLoop`] owns every scheduling structure — the FIFO ready queue, the
//! timed and low-priority deadline heaps, the optional immediate-I/O queue,
//! the readiness table, and the task arena — and is the only entity that
//! resumes tasks or moves them between queues. All of it runs on one logical
//! thread; no locks guard any of this state.
//!
//! # Loop iteration
//!
//! ```text
//! ┌─▶ 1. escalate overdue low-priority head (at most one per pass)
//! │   2. promote every due timed-wait entry into ready, deadline order
//! │   3. drain: run a snapshot of the ready queue (interleaving the
//! │      immediate-I/O queue when configured)
//! └── 4. block in the poller until the next deadline or an I/O event
//! ```
//!
//! The loop terminates only through a [`Wait::Stop`] descriptor (or a
//! loop-fatal [`SchedError`]); `run_until_complete` wraps its task so that
//! natural completion becomes `Stop`.
//!
//! # Cancellation races
//!
//! Injected failures go through the task's pending-throw slot. A task parked
//! in a deadline queue has a wake token in the slot; cancelling it then puts
//! the task id into the canned set and requeues the task immediately, and
//! the stale deadline entry becomes a no-op when it finally pops. A task
//! parked on I/O is disarmed from the readiness table before requeueing, so
//! it resumes exactly once. Strict single-threading, not locking, makes
//! these races deterministic.

use crate::clock::{MonoClock, Ticks};
use crate::config::{ConfigError, LoopConfig};
use crate::error::{Failure, QueueKind, SchedError};
use crate::queue::{ReadyQueue, TimerQueue};
use crate::reactor::{Direction, Fired, IoHandle, IoTable, IoTableError};
use crate::task::{Coro, PendSlot, Resume, Step, StepResult, TaskId, TaskRecord, Value, Wait};
use crate::util::Arena;
use core::fmt;
use std::collections::HashSet;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{debug, error, trace};

/// A deferred callback. Runs on the loop with full scheduling access;
/// arguments are captured in the closure.
pub type Callback = Box<dyn FnOnce(&mut EventLoop)>;

/// A queue entry: a registered task or a plain callback.
pub(crate) enum Runnable {
    Task(TaskId),
    Callback(Callback),
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "Task({id})"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// The cooperative event loop.
///
/// Constructed once at process start from a validated [`LoopConfig`] and
/// driven by [`run_forever`](Self::run_forever) or
/// [`run_until_complete`](Self::run_until_complete); collaborators receive
/// it by `&mut` rather than through a process-wide global.
pub struct EventLoop {
    clock: MonoClock,
    tasks: Arena<TaskRecord>,
    ready: ReadyQueue<Runnable>,
    timed: TimerQueue<Runnable>,
    low: Option<TimerQueue<Runnable>>,
    /// Immediate-I/O queue; present when configured with capacity > 0.
    ioq: Option<ReadyQueue<Runnable>>,
    io: IoTable<Runnable>,
    /// Tasks cancelled between being scheduled for a natural wakeup and that
    /// wakeup popping; the pop becomes a no-op.
    canned: HashSet<TaskId>,
    /// The task currently inside `resume`, if any.
    current: Option<TaskId>,
    /// The task driving `run_until_complete`, if any.
    main_task: Option<TaskId>,
    /// Set by a `Stop` descriptor or `stop()`; returned by `run_forever`.
    stop_value: Option<Value>,
    /// A failure that escaped the main task; surfaced to the caller.
    main_failure: Option<Failure>,
    max_overdue_ms: u32,
    /// Reused buffer for poller deliveries.
    fired_buf: Vec<Fired<Runnable>>,
}

impl EventLoop {
    /// Builds a loop from a configuration.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if the OS poller cannot be created.
    pub fn new(config: LoopConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let io = IoTable::new().map_err(ConfigError::Poller)?;
        Ok(Self {
            clock: MonoClock::new(),
            tasks: Arena::new(),
            ready: ReadyQueue::new(config.ready_capacity),
            timed: TimerQueue::new(config.timed_capacity),
            low: (config.low_priority_capacity > 0)
                .then(|| TimerQueue::new(config.low_priority_capacity)),
            ioq: (config.io_queue_capacity > 0)
                .then(|| ReadyQueue::new(config.io_queue_capacity)),
            io,
            canned: HashSet::new(),
            current: None,
            main_task: None,
            stop_value: None,
            main_failure: None,
            max_overdue_ms: config.max_overdue_ms,
            fired_buf: Vec::new(),
        })
    }

    /// Builds a loop with the default configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the OS poller cannot be created.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(LoopConfig::default())
    }

    /// Current tick count.
    #[must_use]
    pub fn now(&self) -> Ticks {
        self.clock.now()
    }

    /// The id of the task currently being resumed, if any.
    ///
    /// Valid only while the loop is inside a task's `resume`; wrapper
    /// coroutines use it to learn their own identity.
    #[must_use]
    pub const fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    /// The low-priority escalation threshold in milliseconds.
    #[must_use]
    pub const fn max_overdue_ms(&self) -> u32 {
        self.max_overdue_ms
    }

    /// Adjusts the escalation threshold at runtime.
    ///
    /// # Errors
    ///
    /// [`SchedError::NoLowPriorityQueue`] when a non-zero threshold is set
    /// on a loop configured without a low-priority queue.
    pub fn set_max_overdue_ms(&mut self, ms: u32) -> Result<(), SchedError> {
        if ms > 0 && self.low.is_none() {
            return Err(SchedError::NoLowPriorityQueue);
        }
        self.max_overdue_ms = ms;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Task registration and callback scheduling
    // ------------------------------------------------------------------

    /// Registers a task and schedules its first resumption.
    ///
    /// # Errors
    ///
    /// [`SchedError::QueueOverflow`] if the ready queue is full.
    pub fn create_task(&mut self, coro: impl Coro + 'static) -> Result<TaskId, SchedError> {
        let id = TaskId(self.tasks.insert(TaskRecord::new(Box::new(coro))));
        trace!(task = %id, "created task");
        self.push_ready(Runnable::Task(id))?;
        Ok(id)
    }

    /// Schedules a callback on the next pass (FIFO).
    ///
    /// # Errors
    ///
    /// [`SchedError::QueueOverflow`] if the ready queue is full.
    pub fn call_soon(
        &mut self,
        cb: impl FnOnce(&mut EventLoop) + 'static,
    ) -> Result<(), SchedError> {
        trace!("scheduling callback in ready queue");
        self.push_ready(Runnable::Callback(Box::new(cb)))
    }

    /// Schedules a callback after `delay_ms` milliseconds. Zero delay routes
    /// to [`call_soon`](Self::call_soon).
    ///
    /// # Errors
    ///
    /// [`SchedError::QueueOverflow`] if the target queue is full.
    pub fn call_later_ms(
        &mut self,
        delay_ms: u32,
        cb: impl FnOnce(&mut EventLoop) + 'static,
    ) -> Result<(), SchedError> {
        if delay_ms == 0 {
            return self.call_soon(cb);
        }
        let deadline = self.now().wrapping_add_ms(delay_ms);
        trace!(delay_ms, deadline = %deadline, "scheduling callback in timed queue");
        self.push_timed(deadline, Runnable::Callback(Box::new(cb)))
    }

    /// Schedules a callback after a duration.
    ///
    /// # Errors
    ///
    /// [`SchedError::QueueOverflow`] if the target queue is full.
    pub fn call_later(
        &mut self,
        delay: Duration,
        cb: impl FnOnce(&mut EventLoop) + 'static,
    ) -> Result<(), SchedError> {
        self.call_later_ms(clamp_ms(delay), cb)
    }

    /// Schedules a low-priority callback after `delay_ms` milliseconds.
    ///
    /// # Errors
    ///
    /// [`SchedError::NoLowPriorityQueue`] when no low-priority queue is
    /// configured; [`SchedError::QueueOverflow`] when it is full.
    pub fn call_after_ms(
        &mut self,
        delay_ms: u32,
        cb: impl FnOnce(&mut EventLoop) + 'static,
    ) -> Result<(), SchedError> {
        let deadline = self.now().wrapping_add_ms(delay_ms);
        trace!(delay_ms, deadline = %deadline, "scheduling callback in low-priority queue");
        self.push_low(deadline, Runnable::Callback(Box::new(cb)))
    }

    /// Schedules a low-priority callback after a duration.
    ///
    /// # Errors
    ///
    /// As [`call_after_ms`](Self::call_after_ms).
    pub fn call_after(
        &mut self,
        delay: Duration,
        cb: impl FnOnce(&mut EventLoop) + 'static,
    ) -> Result<(), SchedError> {
        self.call_after_ms(clamp_ms(delay), cb)
    }

    /// Requests an orderly stop: the loop returns the unit value once the
    /// request is processed in queue order.
    ///
    /// # Errors
    ///
    /// [`SchedError::QueueOverflow`] if the ready queue is full.
    pub fn stop(&mut self) -> Result<(), SchedError> {
        self.call_soon(|lp| lp.request_stop(Value::unit()))
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Injects a cancellation into `task`.
    ///
    /// Returns `false` if the task no longer exists. Cancelling twice is a
    /// no-op; cancelling a task parked on I/O deregisters its interest and
    /// requeues it immediately.
    ///
    /// # Errors
    ///
    /// [`SchedError::QueueOverflow`] if the requeue target is full.
    pub fn cancel(&mut self, task: TaskId) -> Result<bool, SchedError> {
        self.throw_into(task, Failure::Cancelled)
    }

    /// Injects an arbitrary failure into `task` (the raw primitive behind
    /// [`cancel`](Self::cancel) and `wait_for` timeouts).
    ///
    /// # Errors
    ///
    /// [`SchedError::QueueOverflow`] if the requeue target is full.
    pub fn throw_into(&mut self, task: TaskId, failure: Failure) -> Result<bool, SchedError> {
        enum Action {
            None,
            Requeue,
            DisarmAndRequeue(IoHandle, Direction),
        }

        let Some(record) = self.tasks.get_mut(task.0) else {
            return Ok(false);
        };
        let action = match record.slot {
            PendSlot::Failure(_) => {
                // Idempotent double-cancel.
                trace!(task = %task, "failure already pending; ignoring");
                return Ok(true);
            }
            PendSlot::Idle => {
                // Queued or running: deliver at the next resume point.
                record.slot = PendSlot::Failure(failure);
                Action::None
            }
            PendSlot::WakeToken => {
                // A natural wakeup is queued; can it and run now instead.
                record.slot = PendSlot::Failure(failure);
                Action::Requeue
            }
            PendSlot::IoArmed(handle, direction) => {
                record.slot = PendSlot::Failure(failure);
                Action::DisarmAndRequeue(handle, direction)
            }
        };
        match action {
            Action::None => {}
            Action::Requeue => {
                debug!(task = %task, "cancelling queued wakeup");
                self.canned.insert(task);
                self.call_io_runnable(Runnable::Task(task))?;
            }
            Action::DisarmAndRequeue(handle, direction) => {
                debug!(task = %task, handle = %handle, %direction, "cancelling i/o wait");
                if let Err(e) = self.io.disarm(handle, direction) {
                    debug!(task = %task, error = %e, "disarm during cancel failed");
                }
                self.call_io_runnable(Runnable::Task(task))?;
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Raw I/O registration
    // ------------------------------------------------------------------

    /// Mints a stable handle for a file descriptor.
    ///
    /// The caller keeps ownership of the descriptor and must keep it open
    /// while the handle is live.
    pub fn register_io(&mut self, fd: RawFd) -> IoHandle {
        let handle = self.io.register(fd);
        trace!(handle = %handle, fd, "registered i/o handle");
        handle
    }

    /// Retires a handle, dropping any interest it still holds.
    ///
    /// # Errors
    ///
    /// [`IoTableError::UnknownHandle`] for a stale handle.
    pub fn deregister_io(&mut self, handle: IoHandle) -> Result<(), IoTableError> {
        trace!(handle = %handle, "deregistering i/o handle");
        self.io.deregister(handle)
    }

    /// Arms a callback on readable readiness of `handle`.
    ///
    /// # Errors
    ///
    /// Table errors propagate ([`IoTableError`]).
    pub fn add_reader(
        &mut self,
        handle: IoHandle,
        cb: impl FnOnce(&mut EventLoop) + 'static,
    ) -> Result<(), IoTableError> {
        self.io
            .arm(handle, Direction::Read, Runnable::Callback(Box::new(cb)))
    }

    /// Clears readable interest on `handle`, dropping an armed callback.
    ///
    /// # Errors
    ///
    /// Table errors propagate ([`IoTableError`]).
    pub fn remove_reader(&mut self, handle: IoHandle) -> Result<(), IoTableError> {
        self.io.disarm(handle, Direction::Read).map(drop)
    }

    /// Arms a callback on writable readiness of `handle`.
    ///
    /// # Errors
    ///
    /// Table errors propagate ([`IoTableError`]).
    pub fn add_writer(
        &mut self,
        handle: IoHandle,
        cb: impl FnOnce(&mut EventLoop) + 'static,
    ) -> Result<(), IoTableError> {
        self.io
            .arm(handle, Direction::Write, Runnable::Callback(Box::new(cb)))
    }

    /// Clears writable interest on `handle`, dropping an armed callback.
    ///
    /// # Errors
    ///
    /// Table errors propagate ([`IoTableError`]).
    pub fn remove_writer(&mut self, handle: IoHandle) -> Result<(), IoTableError> {
        self.io.disarm(handle, Direction::Write).map(drop)
    }

    // ------------------------------------------------------------------
    // Loop drivers
    // ------------------------------------------------------------------

    /// Runs until a task yields [`Wait::Stop`] (or `stop()` is processed),
    /// returning the stop value.
    ///
    /// # Errors
    ///
    /// Loop-fatal errors: queue overflow, poller failure, or a failure
    /// escaping the main task.
    pub fn run_forever(&mut self) -> Result<Value, SchedError> {
        loop {
            if let Some(value) = self.stop_value.take() {
                debug!("loop stopped");
                return Ok(value);
            }
            if let Some(failure) = self.main_failure.take() {
                return Err(SchedError::Task(failure));
            }
            let tnow = self.now();
            self.escalate_low_priority(tnow)?;
            self.promote_due_timers(tnow)?;
            self.drain()?;
            if self.stop_value.is_some() || self.main_failure.is_some() {
                continue;
            }
            let timeout = self.idle_timeout();
            trace!(timeout = ?timeout, "blocking in poller");
            self.poll_io(timeout)?;
        }
    }

    /// Drives `coro` as the main task; its natural completion stops the
    /// loop and its result is returned.
    ///
    /// # Errors
    ///
    /// As [`run_forever`](Self::run_forever); a failure escaping `coro`
    /// (including cancellation) surfaces as [`SchedError::Task`].
    pub fn run_until_complete(&mut self, coro: impl Coro + 'static) -> Result<Value, SchedError> {
        struct RunAndStop<C> {
            inner: C,
        }
        impl<C: Coro> Coro for RunAndStop<C> {
            fn resume(&mut self, sched: &mut EventLoop, input: Resume) -> StepResult {
                match self.inner.resume(sched, input)? {
                    Step::Done(value) => Ok(Step::Pending(Wait::Stop(value))),
                    pending => Ok(pending),
                }
            }
        }

        let id = self.create_task(RunAndStop { inner: coro })?;
        self.main_task = Some(id);
        let result = self.run_forever();
        self.main_task = None;
        result
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn request_stop(&mut self, value: Value) {
        self.stop_value = Some(value);
    }

    fn push_ready(&mut self, item: Runnable) -> Result<(), SchedError> {
        let capacity = self.ready.capacity();
        self.ready.push(item).map_err(|_| SchedError::QueueOverflow {
            queue: QueueKind::Ready,
            capacity,
        })
    }

    fn push_timed(&mut self, deadline: Ticks, item: Runnable) -> Result<(), SchedError> {
        let capacity = self.timed.capacity();
        self.timed
            .push(deadline, item)
            .map_err(|_| SchedError::QueueOverflow {
                queue: QueueKind::TimedWait,
                capacity,
            })
    }

    fn push_low(&mut self, deadline: Ticks, item: Runnable) -> Result<(), SchedError> {
        let Some(low) = &mut self.low else {
            return Err(SchedError::NoLowPriorityQueue);
        };
        let capacity = low.capacity();
        low.push(deadline, item)
            .map_err(|_| SchedError::QueueOverflow {
                queue: QueueKind::LowPriority,
                capacity,
            })
    }

    /// Routes a wakeup through the immediate-I/O queue when configured,
    /// else through the ready queue.
    fn call_io_runnable(&mut self, item: Runnable) -> Result<(), SchedError> {
        if let Some(ioq) = &mut self.ioq {
            let capacity = ioq.capacity();
            ioq.push(item).map_err(|_| SchedError::QueueOverflow {
                queue: QueueKind::Io,
                capacity,
            })
        } else {
            self.push_ready(item)
        }
    }

    /// Parks a task for a natural wakeup `delay_ms` from now.
    fn schedule_task_wakeup(
        &mut self,
        delay_ms: u32,
        task: TaskId,
        low_priority: bool,
    ) -> Result<(), SchedError> {
        let Some(record) = self.tasks.get_mut(task.0) else {
            return Ok(());
        };
        // A failure injected while the task was running must not be parked
        // behind a deadline: deliver it on the next pass.
        if matches!(record.slot, PendSlot::Failure(_)) {
            return self.push_ready(Runnable::Task(task));
        }
        if !low_priority && delay_ms == 0 {
            return self.push_ready(Runnable::Task(task));
        }
        record.slot = PendSlot::WakeToken;
        let deadline = self.now().wrapping_add_ms(delay_ms);
        trace!(task = %task, delay_ms, deadline = %deadline, low_priority, "parking task for timed wakeup");
        if low_priority {
            self.push_low(deadline, Runnable::Task(task))
        } else {
            self.push_timed(deadline, Runnable::Task(task))
        }
    }

    /// The `runq_add` step: moves a popped deadline entry into the ready
    /// queue, consuming a canned cancellation if one raced the wakeup.
    fn wake_from_deadline(&mut self, item: Runnable) -> Result<(), SchedError> {
        match item {
            Runnable::Callback(cb) => self.push_ready(Runnable::Callback(cb)),
            Runnable::Task(id) => {
                if self.canned.remove(&id) {
                    trace!(task = %id, "wakeup cancelled; dropping stale entry");
                    return Ok(());
                }
                if let Some(record) = self.tasks.get_mut(id.0) {
                    if matches!(record.slot, PendSlot::WakeToken) {
                        record.slot = PendSlot::Idle;
                    }
                    self.push_ready(Runnable::Task(id))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// The low-priority escalation rule, evaluated once per pass.
    ///
    /// Promotes the head when it is overdue past `max_overdue_ms`, or when
    /// nothing else is runnable and the timed queue has nothing due sooner.
    fn escalate_low_priority(&mut self, tnow: Ticks) -> Result<(), SchedError> {
        let Some(low) = &mut self.low else {
            return Ok(());
        };
        let Some(head) = low.peek_deadline() else {
            return Ok(());
        };
        let overdue = tnow.diff(head);
        let mut promote = self.max_overdue_ms > 0 && overdue > self.max_overdue_ms as i32;
        if promote {
            debug!(overdue_ms = overdue, threshold = self.max_overdue_ms, "escalating overdue low-priority entry");
        } else if self.ready.is_empty() {
            promote = overdue >= 0;
            if promote {
                if let Some(next_timed) = self.timed.peek_deadline() {
                    promote = next_timed.diff(tnow) > 0;
                }
            }
        }
        if promote {
            if let Some((_, item)) = self.low.as_mut().and_then(TimerQueue::pop_min) {
                self.wake_from_deadline(item)?;
            }
        }
        Ok(())
    }

    /// Moves every due timed entry into the ready queue, deadline order.
    fn promote_due_timers(&mut self, tnow: Ticks) -> Result<(), SchedError> {
        while let Some((_, item)) = self.timed.pop_due(tnow) {
            self.wake_from_deadline(item)?;
        }
        Ok(())
    }

    /// Runs a snapshot of the ready queue, interleaving immediate I/O.
    fn drain(&mut self) -> Result<(), SchedError> {
        let mut remaining = self.ready.len();
        let io_enabled = self.ioq.is_some();
        loop {
            let entry = if io_enabled {
                // Zero-timeout poll gives fresh I/O work priority
                // interleaving with compute-bound ready entries.
                self.poll_io(Some(Duration::ZERO))?;
                if let Some(entry) = self.ioq.as_mut().and_then(ReadyQueue::pop) {
                    Some(entry)
                } else if remaining == 0 {
                    None
                } else {
                    remaining -= 1;
                    self.ready.pop()
                }
            } else if remaining > 0 {
                remaining -= 1;
                self.ready.pop()
            } else {
                None
            };
            let Some(entry) = entry else {
                break;
            };
            self.execute(entry)?;
            if self.stop_value.is_some() || self.main_failure.is_some() {
                break;
            }
        }
        Ok(())
    }

    fn execute(&mut self, entry: Runnable) -> Result<(), SchedError> {
        match entry {
            Runnable::Callback(cb) => {
                cb(self);
                Ok(())
            }
            Runnable::Task(id) => self.resume_task(id),
        }
    }

    /// Resumes one task and files its yielded descriptor.
    fn resume_task(&mut self, id: TaskId) -> Result<(), SchedError> {
        let Some(record) = self.tasks.get_mut(id.0) else {
            return Ok(());
        };
        let input = match std::mem::replace(&mut record.slot, PendSlot::Idle) {
            PendSlot::Failure(failure) => Resume::Failure(failure),
            _ => Resume::Ready,
        };
        let Some(mut coro) = record.coro.take() else {
            return Ok(());
        };

        let previous = self.current.replace(id);
        let step = coro.resume(self, input);
        self.current = previous;

        match step {
            Ok(Step::Pending(wait)) => {
                if let Some(record) = self.tasks.get_mut(id.0) {
                    record.coro = Some(coro);
                }
                self.file_descriptor(id, wait)
            }
            Ok(Step::Done(_value)) => {
                trace!(task = %id, "task completed");
                self.tasks.remove(id.0);
                Ok(())
            }
            Err(failure) => {
                self.tasks.remove(id.0);
                if self.main_task == Some(id) {
                    self.main_failure = Some(failure);
                } else if failure.is_cancellation() {
                    debug!(task = %id, kind = ?failure.kind(), "task unwound cooperatively");
                } else {
                    error!(task = %id, error = %failure, "task failed; dropping it");
                }
                Ok(())
            }
        }
    }

    /// Files a yielded wait descriptor, matched exhaustively.
    fn file_descriptor(&mut self, id: TaskId, wait: Wait) -> Result<(), SchedError> {
        match wait {
            Wait::Sleep(ms) => self.schedule_task_wakeup(ms, id, false),
            Wait::AfterMs(ms) => self.schedule_low_wakeup(id, ms),
            Wait::After(duration) => self.schedule_low_wakeup(id, clamp_ms(duration)),
            Wait::Yield => self.push_ready(Runnable::Task(id)),
            Wait::Park => Ok(()),
            Wait::Stop(value) => {
                debug!(task = %id, "stop requested");
                self.request_stop(value);
                Ok(())
            }
            Wait::IoRead(handle) => self.arm_task_io(id, handle, Direction::Read),
            Wait::IoWrite(handle) => self.arm_task_io(id, handle, Direction::Write),
            Wait::IoReadDone(handle) => self.finish_task_io(id, handle, Direction::Read),
            Wait::IoWriteDone(handle) => self.finish_task_io(id, handle, Direction::Write),
        }
    }

    fn schedule_low_wakeup(&mut self, id: TaskId, delay_ms: u32) -> Result<(), SchedError> {
        if self.low.is_none() {
            self.fail_task(id, Failure::usage("no low-priority queue configured"));
            return Ok(());
        }
        self.schedule_task_wakeup(delay_ms, id, true)
    }

    /// Parks a task on one I/O direction.
    fn arm_task_io(
        &mut self,
        id: TaskId,
        handle: IoHandle,
        direction: Direction,
    ) -> Result<(), SchedError> {
        // A failure injected during this resume wins over parking.
        if let Some(record) = self.tasks.get(id.0) {
            if matches!(record.slot, PendSlot::Failure(_)) {
                return self.push_ready(Runnable::Task(id));
            }
        }
        match self.io.arm(handle, direction, Runnable::Task(id)) {
            Ok(()) => {
                if let Some(record) = self.tasks.get_mut(id.0) {
                    record.slot = PendSlot::IoArmed(handle, direction);
                }
                Ok(())
            }
            Err(IoTableError::Poller(e)) => Err(SchedError::Poller(e)),
            Err(e) => {
                self.fail_task(id, Failure::usage(e.to_string()));
                Ok(())
            }
        }
    }

    /// Handles `IoReadDone`/`IoWriteDone`: drop the direction, re-enter via
    /// the configured I/O path.
    fn finish_task_io(
        &mut self,
        id: TaskId,
        handle: IoHandle,
        direction: Direction,
    ) -> Result<(), SchedError> {
        match self.io.disarm(handle, direction) {
            Ok(_stale_waiter) => self.call_io_runnable(Runnable::Task(id)),
            Err(IoTableError::Poller(e)) => Err(SchedError::Poller(e)),
            Err(e) => {
                self.fail_task(id, Failure::usage(e.to_string()));
                Ok(())
            }
        }
    }

    /// Drops a task for a usage violation; fatal to the task, not the loop.
    fn fail_task(&mut self, id: TaskId, failure: Failure) {
        error!(task = %id, error = %failure, "dropping task");
        self.tasks.remove(id.0);
        if self.main_task == Some(id) {
            self.main_failure = Some(failure);
        }
    }

    /// Blocking timeout for the idle phase: zero when ready work exists,
    /// the nearest deadline otherwise, unbounded when there are no timers.
    fn idle_timeout(&self) -> Option<Duration> {
        if !self.ready.is_empty() || self.ioq.as_ref().is_some_and(|q| !q.is_empty()) {
            return Some(Duration::ZERO);
        }
        let tnow = self.now();
        let mut delay: Option<u32> = None;
        if let Some(deadline) = self.timed.peek_deadline() {
            delay = Some(deadline.diff(tnow).max(0) as u32);
        }
        if let Some(low) = &self.low {
            if let Some(deadline) = low.peek_deadline() {
                let lp = deadline.diff(tnow).max(0) as u32;
                delay = Some(delay.map_or(lp, |d| d.min(lp)));
            }
        }
        delay.map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// One poller pass: collect fired waiters and dispatch them. Callbacks
    /// run inline; tasks re-enter through the configured I/O path.
    fn poll_io(&mut self, timeout: Option<Duration>) -> Result<(), SchedError> {
        let mut fired = std::mem::take(&mut self.fired_buf);
        fired.clear();
        let result = self.io.wait(timeout, &mut fired);
        match result {
            Ok(0) => {}
            Ok(n) => trace!(events = n, "poller delivered events"),
            Err(e) => {
                self.fired_buf = fired;
                return Err(SchedError::Poller(e));
            }
        }
        for delivery in fired.drain(..) {
            match delivery.waiter {
                Runnable::Callback(cb) => cb(self),
                Runnable::Task(id) => {
                    if let Some(record) = self.tasks.get_mut(id.0) {
                        if matches!(record.slot, PendSlot::IoArmed(..)) {
                            record.slot = PendSlot::Idle;
                        }
                        trace!(task = %id, direction = %delivery.direction, "i/o ready; waking task");
                        self.call_io_runnable(Runnable::Task(id))?;
                    }
                }
            }
        }
        self.fired_buf = fired;
        Ok(())
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("tasks", &self.tasks.len())
            .field("ready", &self.ready.len())
            .field("timed", &self.timed.len())
            .field("low", &self.low.as_ref().map_or(0, TimerQueue::len))
            .field("max_overdue_ms", &self.max_overdue_ms)
            .finish_non_exhaustive()
    }
}

/// Saturating `Duration` → millisecond conversion.
fn clamp_ms(duration: Duration) -> u32 {
    duration.as_millis().min(u128::from(u32::MAX)) as u32
}
