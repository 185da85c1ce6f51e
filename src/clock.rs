//! Millisecond tick clock with fixed-width wraparound.
//!
//! The scheduler measures time in milliseconds on a counter that wraps at
//! 2^30 ms (about 12.4 days). All deadline arithmetic must go through
//! [`Ticks::wrapping_add_ms`] and [`Ticks::diff`]; comparing raw tick values
//! with `<`/`>` is wrong exactly at the wrap boundary and is deliberately not
//! implemented (`Ticks` derives neither `PartialOrd` nor `Ord`).
//!
//! # Contract
//!
//! | Operation | Meaning |
//! |-----------|---------|
//! | `MonoClock::now()` | monotonic ticks since clock creation, modulo 2^30 |
//! | `a.diff(b)` | signed distance `a - b`, valid while within half a period |
//! | `a.wrapping_add_ms(d)` | deadline `a + d`, wrapped into the period |

use core::fmt;
use std::time::Instant;

/// The tick counter period. Ticks live in `0..TICKS_PERIOD`.
pub const TICKS_PERIOD: u32 = 1 << 30;

const TICKS_HALF_PERIOD: u32 = TICKS_PERIOD / 2;

/// A millisecond timestamp on the wrapping tick counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ticks(u32);

impl Ticks {
    /// The zero instant.
    pub const ZERO: Self = Self(0);

    /// Creates a tick value, wrapping the input into the period.
    #[must_use]
    pub const fn new(ms: u32) -> Self {
        Self(ms % TICKS_PERIOD)
    }

    /// Returns the raw counter value in `0..TICKS_PERIOD`.
    #[must_use]
    pub const fn as_ms(self) -> u32 {
        self.0
    }

    /// Adds a millisecond delay, wrapping modulo the period.
    #[must_use]
    pub const fn wrapping_add_ms(self, delta: u32) -> Self {
        Self((self.0 + (delta % TICKS_PERIOD)) % TICKS_PERIOD)
    }

    /// Signed difference `self - other`, interpreted on the wrapping counter.
    ///
    /// The result is exact while the true distance between the two instants
    /// is less than half the period (about 6.2 days), which bounds every
    /// delay the scheduler accepts. Negative means `self` is earlier.
    #[must_use]
    pub const fn diff(self, other: Self) -> i32 {
        // The classic ticks_diff construction: ((a - b + P/2) mod P) - P/2.
        let delta = self.0.wrapping_sub(other.0).wrapping_add(TICKS_HALF_PERIOD) % TICKS_PERIOD;
        delta as i32 - TICKS_HALF_PERIOD as i32
    }
}

impl fmt::Debug for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticks({}ms)", self.0)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Monotonic source of [`Ticks`].
///
/// Wraps a process-local [`Instant`] origin; successive `now()` calls are
/// non-decreasing until the counter wraps.
#[derive(Debug)]
pub struct MonoClock {
    origin: Instant,
}

impl MonoClock {
    /// Creates a clock whose counter starts near zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current tick count.
    #[must_use]
    pub fn now(&self) -> Ticks {
        let ms = self.origin.elapsed().as_millis();
        Ticks::new((ms % u128::from(TICKS_PERIOD)) as u32)
    }
}

impl Default for MonoClock {
    fn default() -> Self {
        Self::new()
    }
}
