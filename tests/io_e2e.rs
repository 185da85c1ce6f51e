//! End-to-end I/O scheduling over a Unix socketpair.

mod common;
use common::*;

use std::cell::RefCell;
use std::io::Write as _;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use tickloop::stream::{NbSocket, StreamReader, StreamStep, StreamWriter};
use tickloop::{EventLoop, Resume, Step, StepResult, Value, Wait};

#[test]
fn io_ready_task_resumes_before_a_longer_sleeper() {
    let mut lp = test_loop();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let (ours, theirs) = UnixStream::pair().expect("socketpair");
    ours.set_nonblocking(true).expect("nonblocking");
    let handle = lp.register_io(ours.as_raw_fd());

    // Reader task: parks on readability, completes once data arrives.
    {
        let order = Rc::clone(&order);
        let mut stream = StreamReader::new(NbSocket::new(ours), handle);
        let mut op = None;
        lp.create_task(move |_: &mut EventLoop, input: Resume| -> StepResult {
            let op = op.get_or_insert_with(|| stream.read(64));
            match op.step(&mut stream, input)? {
                StreamStep::Pending(wait) => Ok(Step::Pending(wait)),
                StreamStep::Complete(data) => {
                    assert_eq!(data, b"ping");
                    order.borrow_mut().push("io");
                    Ok(Step::done())
                }
            }
        })
        .expect("reader task");
    }

    // The peer becomes readable at 50ms.
    let mut peer = theirs;
    lp.call_later_ms(50, move |_| {
        peer.write_all(b"ping").expect("peer write");
    })
    .expect("schedule write");

    // The sleeper outlasts the I/O readiness.
    let order_main = Rc::clone(&order);
    let mut slept = false;
    lp.run_until_complete(move |_: &mut EventLoop, input: Resume| -> StepResult {
        input.check()?;
        if slept {
            order_main.borrow_mut().push("sleep");
            Ok(Step::Done(Value::unit()))
        } else {
            slept = true;
            Ok(Step::Pending(Wait::sleep_ms(100)))
        }
    })
    .expect("run");

    assert_eq!(*order.borrow(), vec!["io", "sleep"]);
}

#[test]
fn line_echo_roundtrip_between_two_stream_tasks() {
    let mut lp = test_loop();
    let lines: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();

    let (write_side, read_side) = UnixStream::pair().expect("socketpair");
    write_side.set_nonblocking(true).expect("nonblocking");
    read_side.set_nonblocking(true).expect("nonblocking");
    let write_handle = lp.register_io(write_side.as_raw_fd());
    let read_handle = lp.register_io(read_side.as_raw_fd());

    // Reader task arms first.
    {
        let lines = Rc::clone(&lines);
        let mut stream = StreamReader::new(NbSocket::new(read_side), read_handle);
        let mut op = None;
        lp.create_task(move |_: &mut EventLoop, input: Resume| -> StepResult {
            let op = op.get_or_insert_with(|| stream.readline());
            match op.step(&mut stream, input)? {
                StreamStep::Pending(wait) => Ok(Step::Pending(wait)),
                StreamStep::Complete(line) => {
                    lines.borrow_mut().push(line);
                    Ok(Step::done())
                }
            }
        })
        .expect("reader task");
    }

    // Writer task sleeps briefly so the reader is parked, then writes.
    {
        let mut stream = StreamWriter::new(NbSocket::new(write_side), write_handle);
        let mut op = None;
        let mut slept = false;
        lp.create_task(move |_: &mut EventLoop, input: Resume| -> StepResult {
            if !slept {
                input.check()?;
                slept = true;
                return Ok(Step::Pending(Wait::sleep_ms(20)));
            }
            let op = op.get_or_insert_with(|| stream.awrite(b"status ok\n".to_vec()));
            match op.step(&mut stream, input)? {
                StreamStep::Pending(wait) => Ok(Step::Pending(wait)),
                StreamStep::Complete(()) => Ok(Step::done()),
            }
        })
        .expect("writer task");
    }

    lp.run_until_complete(sleeper(100, 0)).expect("run");
    assert_eq!(*lines.borrow(), vec![b"status ok\n".to_vec()]);
}

#[test]
fn immediate_io_queue_interleaves_with_a_ready_backlog() {
    let mut lp = test_loop_with_io_queue(8);
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let (ours, theirs) = UnixStream::pair().expect("socketpair");
    ours.set_nonblocking(true).expect("nonblocking");
    let handle = lp.register_io(ours.as_raw_fd());

    // Data is already waiting when the loop starts.
    let mut peer = theirs;
    peer.write_all(b"ping").expect("peer write");

    {
        let order = Rc::clone(&order);
        let mut stream = StreamReader::new(NbSocket::new(ours), handle);
        let mut op = None;
        lp.create_task(move |_: &mut EventLoop, input: Resume| -> StepResult {
            let op = op.get_or_insert_with(|| stream.read(4));
            match op.step(&mut stream, input)? {
                StreamStep::Pending(wait) => Ok(Step::Pending(wait)),
                StreamStep::Complete(data) => {
                    assert_eq!(data, b"ping");
                    order.borrow_mut().push("io");
                    Ok(Step::done())
                }
            }
        })
        .expect("reader task");
    }

    // A compute-bound task keeps the ready queue occupied.
    {
        let order = Rc::clone(&order);
        let mut spins = 0u32;
        lp.create_task(move |_: &mut EventLoop, input: Resume| -> StepResult {
            input.check()?;
            order.borrow_mut().push("busy");
            spins += 1;
            if spins < 3 {
                Ok(Step::Pending(Wait::Yield))
            } else {
                Ok(Step::done())
            }
        })
        .expect("busy task");
    }

    lp.run_until_complete(sleeper(30, 0)).expect("run");

    let order = order.borrow();
    assert_eq!(order.iter().filter(|s| **s == "io").count(), 1);
    let io_pos = order.iter().position(|s| *s == "io").unwrap();
    let busy_pos = order.iter().position(|s| *s == "busy").unwrap();
    // The fresh readiness jumps the queued compute work: the zero-timeout
    // poll between ready entries drains the I/O queue first.
    assert!(io_pos < busy_pos, "order: {order:?}");
}

#[test]
fn aclose_retires_the_handle() {
    let mut lp = test_loop();
    let (ours, _theirs) = UnixStream::pair().expect("socketpair");
    ours.set_nonblocking(true).expect("nonblocking");
    let handle = lp.register_io(ours.as_raw_fd());
    let stream = StreamReader::new(NbSocket::new(ours), handle);
    stream.aclose(&mut lp).expect("close");
    // The registration is gone; the stale handle is rejected.
    assert!(lp.add_reader(handle, |_| {}).is_err());
}

#[test]
fn add_reader_callback_fires_inline_on_readiness() {
    let mut lp = test_loop();
    let fired: Rc<RefCell<u32>> = Rc::default();

    let (ours, theirs) = UnixStream::pair().expect("socketpair");
    ours.set_nonblocking(true).expect("nonblocking");
    let handle = lp.register_io(ours.as_raw_fd());
    {
        let fired = Rc::clone(&fired);
        lp.add_reader(handle, move |_| {
            *fired.borrow_mut() += 1;
        })
        .expect("add_reader");
    }

    let mut peer = theirs;
    lp.call_later_ms(20, move |_| {
        peer.write_all(b"x").expect("peer write");
    })
    .expect("schedule write");

    lp.run_until_complete(sleeper(60, 0)).expect("run");
    // Oneshot semantics: the registration is consumed by its first event.
    assert_eq!(*fired.borrow(), 1);
    drop(ours);
}
