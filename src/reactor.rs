//! I/O readiness table backed by the `polling` crate.
//!
//! The table maps a minted [`IoHandle`] to a file descriptor plus one waiter
//! per direction (read/write). Interest flags accumulate by union: arming a
//! second direction widens the existing poller registration instead of
//! creating another one, and disarming clears only its own direction. The
//! descriptor leaves the OS poller entirely once both directions are clear.
//!
//! ```text
//! ┌──────────┐  arm(handle, dir, waiter)   ┌─────────────┐
//! │ EventLoop│ ──────────────────────────▶ │  IoTable    │
//! │          │ ◀────────────────────────── │ (arena+fd)  │
//! └──────────┘   wait() → Fired{waiter}    └──────┬──────┘
//!                                                 │ add/modify/delete/wait
//!                                                 ▼
//!                                          ┌─────────────┐
//!                                          │   Poller    │
//!                                          │(epoll/kqueue│
//!                                          └─────────────┘
//! ```
//!
//! # Delivery discipline
//!
//! The poller is used in its native oneshot mode. When an event arrives, the
//! fired direction's waiter is taken out of the table *before* anything is
//! woken, so one readiness event produces exactly one resumption and a
//! re-delivered event for a consumed direction is impossible. Any remaining
//! direction is re-armed immediately after delivery.
//!
//! Hangup and error conditions surface as readiness on the fired directions
//! (the safe poller API folds them into readable/writable), so registered
//! waiters unwind through their normal resume path instead of hanging.

use crate::util::{Arena, ArenaIndex};
use core::fmt;
use polling::{Event, Poller};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Stable identifier of a registered I/O descriptor.
///
/// Minted by [`IoTable::register`]; identity never depends on the runtime
/// address of the underlying object, and a stale handle resolves to an
/// error rather than aliasing a reused slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoHandle(pub(crate) ArenaIndex);

impl IoHandle {
    /// Builds a handle from raw parts, for tests that never touch a poller.
    #[cfg(test)]
    pub(crate) const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }
}

impl fmt::Debug for IoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IoHandle({:?})", self.0)
    }
}

impl fmt::Display for IoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0.index())
    }
}

/// A poll direction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    /// Readable interest.
    Read,
    /// Writable interest.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Errors from table operations (distinct from poller I/O errors).
#[derive(Debug, thiserror::Error)]
pub enum IoTableError {
    /// The handle is stale or was never registered.
    #[error("unknown or stale i/o handle")]
    UnknownHandle,
    /// The direction already has a waiter armed.
    #[error("{0} direction already armed")]
    AlreadyArmed(Direction),
    /// The direction has no armed or fired registration to drop.
    #[error("{0} direction was never armed")]
    NotArmed(Direction),
    /// The underlying poller refused the operation.
    #[error("poller: {0}")]
    Poller(#[from] io::Error),
}

/// Per-direction registration state.
///
/// `Fired` marks a direction whose waiter was consumed by an event but whose
/// `*Done` acknowledgement has not arrived yet; dropping it then is legal,
/// dropping a never-armed direction is a usage error.
#[derive(Debug)]
enum DirState<W> {
    Empty,
    Armed(W),
    Fired,
}

impl<W> DirState<W> {
    const fn is_armed(&self) -> bool {
        matches!(self, Self::Armed(_))
    }

    const fn is_engaged(&self) -> bool {
        !matches!(self, Self::Empty)
    }
}

#[derive(Debug)]
struct IoEntry<W> {
    fd: RawFd,
    in_poller: bool,
    read: DirState<W>,
    write: DirState<W>,
}

/// A waiter delivered by [`IoTable::wait`].
#[derive(Debug)]
pub struct Fired<W> {
    /// The waiter that was armed on the fired direction.
    pub waiter: W,
    /// The direction that became ready.
    pub direction: Direction,
}

/// The readiness table plus the OS poller.
///
/// Generic over the waiter payload so the scheduler can store its own
/// runnable type without this module depending on it.
pub struct IoTable<W> {
    poller: Poller,
    entries: Arena<IoEntry<W>>,
    /// Reused buffer for poller results.
    events: Vec<Event>,
}

impl<W> IoTable<W> {
    /// Creates the table and its poller.
    ///
    /// # Errors
    ///
    /// Fails if the OS readiness primitive cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            entries: Arena::new(),
            events: Vec::new(),
        })
    }

    /// Mints a handle for `fd`.
    ///
    /// The descriptor is not handed to the OS poller until a direction is
    /// armed. The caller retains ownership of the descriptor and must keep
    /// it open while the handle is live.
    pub fn register(&mut self, fd: RawFd) -> IoHandle {
        let index = self.entries.insert(IoEntry {
            fd,
            in_poller: false,
            read: DirState::Empty,
            write: DirState::Empty,
        });
        IoHandle(index)
    }

    /// Retires a handle, dropping any armed waiters and leaving the poller.
    ///
    /// # Errors
    ///
    /// [`IoTableError::UnknownHandle`] for a stale handle; poller errors
    /// propagate.
    pub fn deregister(&mut self, handle: IoHandle) -> Result<(), IoTableError> {
        let entry = self
            .entries
            .remove(handle.0)
            .ok_or(IoTableError::UnknownHandle)?;
        if entry.in_poller {
            self.poller.delete(entry.fd)?;
        }
        Ok(())
    }

    /// Arms `waiter` on one direction of `handle`, unioning poll interest.
    ///
    /// # Errors
    ///
    /// [`IoTableError::AlreadyArmed`] if the direction already holds a
    /// waiter (a handle appears at most once per direction).
    pub fn arm(
        &mut self,
        handle: IoHandle,
        direction: Direction,
        waiter: W,
    ) -> Result<(), IoTableError> {
        let entry = self
            .entries
            .get_mut(handle.0)
            .ok_or(IoTableError::UnknownHandle)?;
        let slot = match direction {
            Direction::Read => &mut entry.read,
            Direction::Write => &mut entry.write,
        };
        if slot.is_armed() {
            return Err(IoTableError::AlreadyArmed(direction));
        }
        *slot = DirState::Armed(waiter);
        tracing::trace!(handle = %handle, %direction, "arming i/o interest");
        Self::sync_poller(&self.poller, handle, entry)?;
        Ok(())
    }

    /// Clears one direction, returning its waiter if one was still armed.
    ///
    /// Clearing a direction that fired but was not yet acknowledged returns
    /// `None`. The handle leaves the OS poller when its last direction is
    /// cleared.
    ///
    /// # Errors
    ///
    /// [`IoTableError::NotArmed`] if the direction was never armed — the
    /// `*Done`-without-registration usage error.
    pub fn disarm(
        &mut self,
        handle: IoHandle,
        direction: Direction,
    ) -> Result<Option<W>, IoTableError> {
        let entry = self
            .entries
            .get_mut(handle.0)
            .ok_or(IoTableError::UnknownHandle)?;
        let slot = match direction {
            Direction::Read => &mut entry.read,
            Direction::Write => &mut entry.write,
        };
        if !slot.is_engaged() {
            return Err(IoTableError::NotArmed(direction));
        }
        let waiter = match std::mem::replace(slot, DirState::Empty) {
            DirState::Armed(waiter) => Some(waiter),
            DirState::Empty | DirState::Fired => None,
        };
        tracing::trace!(handle = %handle, %direction, "disarming i/o interest");
        Self::sync_poller(&self.poller, handle, entry)?;
        Ok(waiter)
    }

    /// Blocks for up to `timeout` (`None` = indefinitely) and collects fired
    /// waiters into `fired`, in poller-report order.
    ///
    /// # Errors
    ///
    /// Propagates poller failures. Interrupted waits surface as zero events.
    pub fn wait(
        &mut self,
        timeout: Option<Duration>,
        fired: &mut Vec<Fired<W>>,
    ) -> io::Result<usize> {
        self.events.clear();
        match self.poller.wait(&mut self.events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        let mut delivered = 0;
        for i in 0..self.events.len() {
            let event = self.events[i];
            let index = ArenaIndex::from_packed(event.key as u64);
            let handle = IoHandle(index);
            let Some(entry) = self.entries.get_mut(index) else {
                // Stale key: the handle was deregistered after the event
                // was queued. Nothing to wake.
                continue;
            };
            if event.readable && entry.read.is_armed() {
                if let DirState::Armed(waiter) =
                    std::mem::replace(&mut entry.read, DirState::Fired)
                {
                    fired.push(Fired {
                        waiter,
                        direction: Direction::Read,
                    });
                    delivered += 1;
                }
            }
            if event.writable && entry.write.is_armed() {
                if let DirState::Armed(waiter) =
                    std::mem::replace(&mut entry.write, DirState::Fired)
                {
                    fired.push(Fired {
                        waiter,
                        direction: Direction::Write,
                    });
                    delivered += 1;
                }
            }
            // Oneshot delivery disarmed the OS side; re-arm whatever is
            // still wanted (or leave the poller if nothing is).
            Self::sync_poller(&self.poller, handle, entry)?;
        }
        Ok(delivered)
    }

    /// Number of live handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.entries.len()
    }

    /// True if `handle` currently has a waiter armed on `direction`.
    #[must_use]
    pub fn is_armed(&self, handle: IoHandle, direction: Direction) -> bool {
        self.entries.get(handle.0).is_some_and(|entry| match direction {
            Direction::Read => entry.read.is_armed(),
            Direction::Write => entry.write.is_armed(),
        })
    }

    /// Reconciles one entry's interest union with the OS poller.
    fn sync_poller(
        poller: &Poller,
        handle: IoHandle,
        entry: &mut IoEntry<W>,
    ) -> io::Result<()> {
        let key = handle.0.packed() as usize;
        let interest = Event {
            key,
            readable: entry.read.is_armed(),
            writable: entry.write.is_armed(),
        };
        if interest.readable || interest.writable {
            if entry.in_poller {
                poller.modify(entry.fd, interest)?;
            } else {
                poller.add(entry.fd, interest)?;
                entry.in_poller = true;
            }
        } else if entry.in_poller {
            poller.delete(entry.fd)?;
            entry.in_poller = false;
        }
        Ok(())
    }
}

impl<W> fmt::Debug for IoTable<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoTable")
            .field("handles", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().expect("socketpair");
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn readable_event_fires_once_per_arm() {
        let (a, mut b) = pair();
        let mut table: IoTable<&str> = IoTable::new().unwrap();
        let handle = table.register(a.as_raw_fd());
        table.arm(handle, Direction::Read, "reader").unwrap();

        b.write_all(b"x").unwrap();
        let mut fired = Vec::new();
        table
            .wait(Some(Duration::from_millis(500)), &mut fired)
            .unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].waiter, "reader");
        assert_eq!(fired[0].direction, Direction::Read);

        // Waiter consumed: the same readiness cannot wake anything else.
        fired.clear();
        table
            .wait(Some(Duration::from_millis(50)), &mut fired)
            .unwrap();
        assert!(fired.is_empty());
        table.deregister(handle).unwrap();
    }

    #[test]
    fn directions_are_independent() {
        let (a, _b) = pair();
        let mut table: IoTable<u8> = IoTable::new().unwrap();
        let handle = table.register(a.as_raw_fd());
        table.arm(handle, Direction::Read, 1).unwrap();
        table.arm(handle, Direction::Write, 2).unwrap();
        assert!(matches!(
            table.arm(handle, Direction::Read, 3),
            Err(IoTableError::AlreadyArmed(Direction::Read))
        ));

        // A fresh socket is writable immediately; only the writer fires.
        let mut fired = Vec::new();
        table
            .wait(Some(Duration::from_millis(500)), &mut fired)
            .unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].waiter, 2);

        // Read interest survives the write delivery.
        assert!(table.is_armed(handle, Direction::Read));
        assert_eq!(table.disarm(handle, Direction::Read).unwrap(), Some(1));
        table.deregister(handle).unwrap();
    }

    #[test]
    fn disarm_never_armed_is_an_error() {
        let (a, _b) = pair();
        let mut table: IoTable<()> = IoTable::new().unwrap();
        let handle = table.register(a.as_raw_fd());
        assert!(matches!(
            table.disarm(handle, Direction::Write),
            Err(IoTableError::NotArmed(Direction::Write))
        ));
    }

    #[test]
    fn stale_handle_is_rejected() {
        let (a, _b) = pair();
        let mut table: IoTable<()> = IoTable::new().unwrap();
        let handle = table.register(a.as_raw_fd());
        table.deregister(handle).unwrap();
        assert!(matches!(
            table.arm(handle, Direction::Read, ()),
            Err(IoTableError::UnknownHandle)
        ));
        assert!(matches!(
            table.deregister(handle),
            Err(IoTableError::UnknownHandle)
        ));
    }
}
