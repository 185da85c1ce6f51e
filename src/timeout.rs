//! Timeout wrapping for tasks.
//!
//! [`wait_for_ms`] races a coroutine against a timer. The timer is an
//! ordinary timed-queue callback that injects [`Failure::TimedOut`] into the
//! wrapped task; the wrapper disarms it through a shared flag when the inner
//! coroutine finishes first. Both sides run on the loop's single thread, so
//! whichever is processed first wins and the other becomes a no-op. There is
//! no lock anywhere in this race.
//!
//! The timeout is delivered through the same pending-throw path as
//! [`cancel`](crate::sched::EventLoop::cancel): the inner coroutine observes
//! [`Resume::Failure`] at its next suspension point and is expected to unwind
//! by returning the failure.

use crate::error::Failure;
use crate::sched::EventLoop;
use crate::task::{Coro, Resume, Step, StepResult};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// A coroutine racing its inner coroutine against a timer.
///
/// Built by [`wait_for_ms`] / [`wait_for`]; run it like any other task
/// (typically via `create_task` or `run_until_complete`).
pub struct WaitFor<C> {
    inner: C,
    timeout_ms: u32,
    /// `Some` once the timer is armed; the flag stays `true` while the
    /// timer may still fire.
    armed: Option<Rc<Cell<bool>>>,
}

/// Wraps `inner` so that [`Failure::TimedOut`] is injected if it has not
/// completed within `timeout_ms` milliseconds.
pub fn wait_for_ms<C: Coro>(inner: C, timeout_ms: u32) -> WaitFor<C> {
    WaitFor {
        inner,
        timeout_ms,
        armed: None,
    }
}

/// [`wait_for_ms`] with a `Duration` deadline (millisecond resolution).
pub fn wait_for<C: Coro>(inner: C, timeout: Duration) -> WaitFor<C> {
    wait_for_ms(
        inner,
        timeout.as_millis().min(u128::from(u32::MAX)) as u32,
    )
}

impl<C: Coro> Coro for WaitFor<C> {
    fn resume(&mut self, sched: &mut EventLoop, input: Resume) -> StepResult {
        if self.armed.is_none() {
            let Some(task) = sched.current_task() else {
                return Err(Failure::usage("wait_for must run inside a task"));
            };
            let live = Rc::new(Cell::new(true));
            let flag = Rc::clone(&live);
            let timeout_ms = self.timeout_ms;
            sched
                .call_later_ms(timeout_ms, move |lp| {
                    if !flag.get() {
                        trace!(task = %task, "timeout disarmed before firing");
                        return;
                    }
                    debug!(task = %task, timeout_ms, "timeout fired; injecting failure");
                    if let Err(e) = lp.throw_into(task, Failure::TimedOut) {
                        debug!(task = %task, error = %e, "timeout injection failed");
                    }
                })
                .map_err(|e| Failure::usage(e.to_string()))?;
            self.armed = Some(live);
        }

        let step = self.inner.resume(sched, input);
        match &step {
            Ok(Step::Done(_)) | Err(_) => {
                // Finished (either way) before the timer: disarm it. The
                // timed-queue entry still pops later and does nothing.
                if let Some(live) = &self.armed {
                    live.set(false);
                }
            }
            Ok(Step::Pending(_)) => {}
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedError;
    use crate::sched::EventLoop;
    use crate::task::{Value, Wait};

    fn new_loop() -> EventLoop {
        EventLoop::with_defaults().expect("loop")
    }

    /// Sleeps once for `delay_ms`, then completes with `result`.
    fn sleeper(delay_ms: u32, result: u32) -> impl Coro {
        let mut slept = false;
        move |_: &mut EventLoop, input: Resume| -> StepResult {
            input.check()?;
            if slept {
                Ok(Step::Done(Value::new(result)))
            } else {
                slept = true;
                Ok(Step::Pending(Wait::sleep_ms(delay_ms)))
            }
        }
    }

    #[test]
    fn inner_completion_beats_timer() {
        let mut lp = new_loop();
        let value = lp
            .run_until_complete(wait_for_ms(sleeper(10, 7), 10_000))
            .unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 7);
    }

    #[test]
    fn timer_beats_slow_inner() {
        let mut lp = new_loop();
        let err = lp
            .run_until_complete(wait_for_ms(sleeper(10_000, 7), 20))
            .unwrap_err();
        assert!(matches!(err, SchedError::Task(Failure::TimedOut)));
    }

    #[test]
    fn zero_timeout_fires_before_first_sleep_elapses() {
        let mut lp = new_loop();
        let err = lp
            .run_until_complete(wait_for_ms(sleeper(5_000, 7), 0))
            .unwrap_err();
        assert!(matches!(err, SchedError::Task(Failure::TimedOut)));
    }

    #[test]
    fn background_timeout_does_not_touch_the_loop() {
        let mut lp = new_loop();
        lp.create_task(wait_for_ms(sleeper(10_000, 0), 20)).unwrap();
        // The background task times out and is dropped quietly while the
        // main task runs to completion.
        let value = lp.run_until_complete(sleeper(60, 3)).unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 3);
    }

    #[test]
    fn duration_form_converts_to_milliseconds() {
        let mut lp = new_loop();
        let value = lp
            .run_until_complete(wait_for(sleeper(5, 9), Duration::from_secs(30)))
            .unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 9);
    }
}
