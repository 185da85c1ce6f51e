//! Fixed-capacity scheduler queues.
//!
//! Two shapes, both bounded at construction time:
//!
//! - [`ReadyQueue`]: plain FIFO. First-in-first-out is the fairness contract
//!   for ready work; there is no priority ordering inside it.
//! - [`TimerQueue`]: binary min-heap keyed by absolute wake time, ordered by
//!   the wraparound-safe comparator [`Ticks::diff`]. A `BinaryHeap` with a
//!   derived `Ord` cannot be used here: tick ordering is only defined within
//!   half a wrap period, so the comparator must be applied pairwise.
//!
//! Pushing past capacity is reported to the caller and treated by the loop
//! as fatal (the capacities are a sizing contract, not a hint). Entries with
//! equal deadlines have no defined relative order.

use crate::clock::Ticks;
use std::collections::VecDeque;

/// Marker result for a push that exceeded the configured capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Bounded FIFO queue.
#[derive(Debug)]
pub struct ReadyQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> ReadyQueue<T> {
    /// Creates a queue bounded at `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when the queue is at capacity; the entry is
    /// dropped, and the caller must treat this as fatal.
    pub fn push(&mut self, item: T) -> Result<(), QueueFull> {
        if self.items.len() >= self.capacity {
            return Err(QueueFull);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Pops the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when no entries are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Bounded deadline-ordered min-heap.
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: Vec<(Ticks, T)>,
    capacity: usize,
}

impl<T> TimerQueue<T> {
    /// Creates a queue bounded at `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes an entry at an absolute deadline. O(log n).
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when the queue is at capacity.
    pub fn push(&mut self, deadline: Ticks, item: T) -> Result<(), QueueFull> {
        if self.heap.len() >= self.capacity {
            return Err(QueueFull);
        }
        self.heap.push((deadline, item));
        self.sift_up(self.heap.len() - 1);
        Ok(())
    }

    /// Deadline of the soonest entry. O(1).
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Ticks> {
        self.heap.first().map(|(deadline, _)| *deadline)
    }

    /// Pops the soonest entry. O(log n).
    pub fn pop_min(&mut self) -> Option<(Ticks, T)> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let entry = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        entry
    }

    /// Pops the soonest entry if its deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Ticks) -> Option<(Ticks, T)> {
        let head = self.peek_deadline()?;
        if head.diff(now) <= 0 {
            self.pop_min()
        } else {
            None
        }
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true when no entries are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn earlier(&self, a: usize, b: usize) -> bool {
        self.heap[a].0.diff(self.heap[b].0) < 0
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.earlier(i, parent) {
                self.heap.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut min = i;
            if left < len && self.earlier(left, min) {
                min = left;
            }
            if right < len && self.earlier(right, min) {
                min = right;
            }
            if min == i {
                break;
            }
            self.heap.swap(i, min);
            i = min;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TICKS_PERIOD;

    #[test]
    fn ready_queue_is_fifo_and_bounded() {
        let mut q = ReadyQueue::new(2);
        q.push('a').unwrap();
        q.push('b').unwrap();
        assert_eq!(q.push('c'), Err(QueueFull));
        assert_eq!(q.pop(), Some('a'));
        assert_eq!(q.pop(), Some('b'));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn timer_queue_pops_in_deadline_order() {
        let mut q = TimerQueue::new(8);
        for (deadline, tag) in [(300, 'c'), (100, 'a'), (200, 'b'), (400, 'd')] {
            q.push(Ticks::new(deadline), tag).unwrap();
        }
        let order: Vec<char> = std::iter::from_fn(|| q.pop_min().map(|(_, t)| t)).collect();
        assert_eq!(order, vec!['a', 'b', 'c', 'd']);
    }

    #[test]
    fn timer_queue_orders_across_wrap_boundary() {
        // A deadline just before the wrap must pop before one just after it,
        // even though the raw counter value of the later one is smaller.
        let before = Ticks::new(TICKS_PERIOD - 50);
        let after = before.wrapping_add_ms(100);
        let mut q = TimerQueue::new(4);
        q.push(after, "after").unwrap();
        q.push(before, "before").unwrap();
        assert_eq!(q.pop_min().unwrap().1, "before");
        assert_eq!(q.pop_min().unwrap().1, "after");
    }

    #[test]
    fn pop_due_respects_now() {
        let mut q = TimerQueue::new(4);
        q.push(Ticks::new(100), "x").unwrap();
        assert!(q.pop_due(Ticks::new(99)).is_none());
        assert_eq!(q.pop_due(Ticks::new(100)).unwrap().1, "x");
    }

    #[test]
    fn timer_queue_rejects_overflow() {
        let mut q = TimerQueue::new(1);
        q.push(Ticks::new(1), ()).unwrap();
        assert_eq!(q.push(Ticks::new(2), ()), Err(QueueFull));
    }

    #[test]
    fn due_at_wrap_boundary_counts_as_due() {
        let now = Ticks::new(10); // wrapped past the boundary
        let deadline = Ticks::new(TICKS_PERIOD - 10); // 20ms overdue
        let mut q = TimerQueue::new(2);
        q.push(deadline, ()).unwrap();
        assert!(q.pop_due(now).is_some());
    }
}
