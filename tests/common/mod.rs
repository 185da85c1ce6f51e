#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::Once;
use tickloop::{Coro, EventLoop, LoopBuilder, Resume, Step, StepResult, Value, Wait};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A default-capacity loop with logging initialized.
pub fn test_loop() -> EventLoop {
    init_test_logging();
    EventLoop::with_defaults().expect("event loop")
}

/// A loop with a low-priority queue and escalation threshold.
pub fn test_loop_with_low_priority(capacity: usize, max_overdue_ms: u32) -> EventLoop {
    init_test_logging();
    let config = LoopBuilder::new()
        .low_priority_capacity(capacity)
        .max_overdue_ms(max_overdue_ms)
        .build()
        .expect("config");
    EventLoop::new(config).expect("event loop")
}

/// A loop with a dedicated immediate-I/O queue.
pub fn test_loop_with_io_queue(capacity: usize) -> EventLoop {
    init_test_logging();
    let config = LoopBuilder::new()
        .io_queue_capacity(capacity)
        .build()
        .expect("config");
    EventLoop::new(config).expect("event loop")
}

/// A coroutine that sleeps once for `delay_ms` and completes with `result`.
pub fn sleeper(delay_ms: u32, result: u32) -> impl Coro {
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
