//! Cancellation delivery: exactly one resumption, poller interest dropped.

mod common;
use common::*;

use std::cell::RefCell;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use tickloop::{EventLoop, Failure, Resume, SchedError, Step, StepResult, Wait};

#[test]
fn cancel_of_io_blocked_task_resumes_exactly_once() {
    let mut lp = test_loop();
    let (ours, theirs) = UnixStream::pair().expect("socketpair");
    ours.set_nonblocking(true).expect("nonblocking");
    let handle = lp.register_io(ours.as_raw_fd());

    let resumes: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    let reader = {
        let resumes = Rc::clone(&resumes);
        lp.create_task(move |_: &mut EventLoop, input: Resume| -> StepResult {
            match input {
                Resume::Ready => {
                    resumes.borrow_mut().push("ready");
                    Ok(Step::Pending(Wait::IoRead(handle)))
                }
                Resume::Failure(failure) => {
                    resumes.borrow_mut().push("failure");
                    Err(failure)
                }
            }
        })
        .expect("reader task")
    };

    // Cancel once the reader is parked on the poller.
    lp.call_later_ms(20, move |inner| {
        assert!(inner.cancel(reader).expect("cancel"));
        // Idempotent: a second cancel on the pending failure is a no-op.
        assert!(inner.cancel(reader).expect("second cancel"));
    })
    .expect("schedule cancel");

    // After the cancel, data arriving on the pair must not wake anything:
    // interest was dropped when the task was cancelled.
    let mut peer = theirs;
    lp.call_later_ms(40, move |_| {
        peer.write_all(b"late").expect("peer write");
    })
    .expect("schedule write");

    lp.run_until_complete(sleeper(80, 0)).expect("run");
    assert_eq!(*resumes.borrow(), vec!["ready", "failure"]);
    drop(ours);
}

#[test]
fn cancel_of_finished_task_reports_gone() {
    let mut lp = test_loop();
    let quick = lp
        .create_task(|_: &mut EventLoop, input: Resume| -> StepResult {
            input.check()?;
            Ok(Step::done())
        })
        .expect("task");
    lp.run_until_complete(sleeper(10, 0)).expect("run");
    // The task completed and its record was dropped; the id is stale.
    assert!(!lp.cancel(quick).expect("cancel"));
}

#[test]
fn cancelled_main_task_surfaces_as_error() {
    let mut lp = test_loop();
    lp.call_later_ms(10, |inner| {
        // The only live task is the main one; cancel whatever is parked.
        let main = inner.current_task();
        assert!(main.is_none(), "no task is mid-resume inside a callback");
    })
    .expect("probe");

    let captured: Rc<RefCell<Option<tickloop::TaskId>>> = Rc::default();
    let slot = Rc::clone(&captured);
    let err = lp
        .run_until_complete(move |sched: &mut EventLoop, input: Resume| -> StepResult {
            input.check()?;
            let me = sched.current_task().expect("running inside a task");
            if slot.borrow_mut().replace(me).is_none() {
                // First resume: arrange our own cancellation, then park.
                sched
                    .call_later_ms(10, move |inner| {
                        inner.cancel(me).expect("cancel");
                    })
                    .map_err(|e| Failure::usage(e.to_string()))?;
            }
            Ok(Step::Pending(Wait::sleep_ms(10_000)))
        })
        .expect_err("cancellation escapes the main task");
    assert!(matches!(err, SchedError::Task(Failure::Cancelled)));
}
