//! Stream helpers over non-blocking sources.
//!
//! [`StreamReader`] and [`StreamWriter`] are convenience layers built purely
//! from the public wait descriptors ([`Wait::IoRead`], [`Wait::IoWrite`] and
//! their `*Done` acknowledgements); nothing here is inside the scheduler's
//! trust boundary. Any source exposing non-blocking read/readline/write with
//! a "no data yet" sentinel adapts via the [`NbSource`] trait;
//! [`NbSocket`] adapts the standard library's socket types.
//!
//! Because tasks are explicit state machines, each operation is a small
//! sub-machine ([`Read`], [`ReadExactly`], [`ReadLine`], [`Write`]) that the
//! owning coroutine drives from its own `resume`: call
//! [`step`](Read::step) with each resumption, forward any
//! [`StreamStep::Pending`] descriptor as the coroutine's own yield, and use
//! the payload once [`StreamStep::Complete`] arrives.
//!
//! Write operations try the source optimistically before waiting for
//! writability, so a write that completes in one call never arms (and
//! therefore never acknowledges) poller interest.

use crate::error::Failure;
use crate::reactor::{IoHandle, IoTableError};
use crate::sched::EventLoop;
use crate::task::{Resume, Wait};
use std::io;
use std::os::unix::io::AsRawFd;

/// A non-blocking byte source/sink.
///
/// The `Option` layer is the readiness sentinel: `None` means "nothing yet,
/// wait for the poller", never an error. EOF is an empty `Some` buffer.
pub trait NbSource {
    /// Reads up to `max` bytes. `Some(empty)` is end of stream.
    ///
    /// # Errors
    ///
    /// Real I/O errors only; would-block is `Ok(None)`.
    fn read(&mut self, max: usize) -> io::Result<Option<Vec<u8>>>;

    /// Reads one line, including the terminating newline when present.
    /// Returns the partial remainder at end of stream.
    ///
    /// # Errors
    ///
    /// Real I/O errors only; an incomplete line is `Ok(None)`.
    fn readline(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Writes from `buf`, returning how many bytes were accepted.
    ///
    /// # Errors
    ///
    /// Real I/O errors only; would-block is `Ok(None)`.
    fn write(&mut self, buf: &[u8]) -> io::Result<Option<usize>>;
}

/// Adapts a non-blocking socket-like object (anything `Read + Write +
/// AsRawFd`, already switched to non-blocking mode) to [`NbSource`].
#[derive(Debug)]
pub struct NbSocket<T> {
    inner: T,
    /// Partial line carried across would-block boundaries.
    line_buf: Vec<u8>,
}

impl<T: io::Read + io::Write + AsRawFd> NbSocket<T> {
    /// Wraps `inner`. The caller must have set it non-blocking already.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            line_buf: Vec::new(),
        }
    }

    /// The raw descriptor, for registering with the loop.
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        self.inner.as_raw_fd()
    }

    /// Unwraps the adapted object.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: io::Read + io::Write + AsRawFd> NbSource for NbSocket<T> {
    fn read(&mut self, max: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; max];
        match self.inner.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn readline(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(Some(std::mem::take(&mut self.line_buf))),
                Ok(_) => {
                    self.line_buf.push(byte[0]);
                    if byte[0] == b'\n' {
                        return Ok(Some(std::mem::take(&mut self.line_buf)));
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<Option<usize>> {
        match self.inner.write(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// One step of a stream operation: either a descriptor to yield from the
/// owning task, or the operation's result.
#[derive(Debug)]
pub enum StreamStep<T> {
    /// Yield this descriptor and call `step` again on the next resume.
    Pending(Wait),
    /// The operation finished.
    Complete(T),
}

/// The read half of a stream: the source plus its loop handle.
#[derive(Debug)]
pub struct StreamReader<S> {
    source: S,
    handle: IoHandle,
}

impl<S: NbSource> StreamReader<S> {
    /// Pairs a source with the handle minted for its descriptor by
    /// [`register_io`](crate::sched::EventLoop::register_io).
    pub fn new(source: S, handle: IoHandle) -> Self {
        Self { source, handle }
    }

    /// The loop handle backing this reader.
    #[must_use]
    pub const fn handle(&self) -> IoHandle {
        self.handle
    }

    /// Starts a bounded read of up to `max` bytes.
    pub fn read(&self, max: usize) -> Read {
        Read {
            max,
            state: ReadState::Arm,
        }
    }

    /// Starts a read of exactly `n` bytes (short only at end of stream).
    pub fn read_exactly(&self, n: usize) -> ReadExactly {
        ReadExactly {
            needed: n,
            buf: Vec::new(),
            state: ReadState::Arm,
        }
    }

    /// Starts a line read.
    pub fn readline(&self) -> ReadLine {
        ReadLine {
            state: ReadState::Arm,
        }
    }

    /// Closes the reader: drops the handle's registration with the loop and
    /// closes the source by dropping it.
    ///
    /// Synchronous; any interest still armed on the handle is discarded, so
    /// close after (not during) in-flight operations.
    ///
    /// # Errors
    ///
    /// [`IoTableError::UnknownHandle`] if the handle was already retired.
    pub fn aclose(self, lp: &mut EventLoop) -> Result<(), IoTableError> {
        lp.deregister_io(self.handle)
    }

    /// Consumes the reader, returning the source. The caller keeps the
    /// handle's registration alive.
    pub fn into_source(self) -> S {
        self.source
    }
}

enum ReadState {
    /// Ask for readable readiness.
    Arm,
    /// Readiness fired; try the source.
    Try,
    /// Data in hand; acknowledging interest before completing.
    Finish(Vec<u8>),
}

impl std::fmt::Debug for ReadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Arm => "Arm",
            Self::Try => "Try",
            Self::Finish(_) => "Finish",
        };
        f.write_str(name)
    }
}

/// In-flight `read(max)` operation.
#[derive(Debug)]
pub struct Read {
    max: usize,
    state: ReadState,
}

impl Read {
    /// Advances the read with one resumption.
    ///
    /// # Errors
    ///
    /// An injected failure or a source I/O error unwinds the operation.
    pub fn step<S: NbSource>(
        &mut self,
        stream: &mut StreamReader<S>,
        input: Resume,
    ) -> Result<StreamStep<Vec<u8>>, Failure> {
        input.check()?;
        match std::mem::replace(&mut self.state, ReadState::Arm) {
            ReadState::Arm => {
                self.state = ReadState::Try;
                Ok(StreamStep::Pending(Wait::IoRead(stream.handle)))
            }
            ReadState::Try => match stream.source.read(self.max)? {
                None => {
                    self.state = ReadState::Try;
                    Ok(StreamStep::Pending(Wait::IoRead(stream.handle)))
                }
                Some(data) => {
                    self.state = ReadState::Finish(data);
                    Ok(StreamStep::Pending(Wait::IoReadDone(stream.handle)))
                }
            },
            ReadState::Finish(data) => Ok(StreamStep::Complete(data)),
        }
    }
}

/// In-flight `read_exactly(n)` operation.
#[derive(Debug)]
pub struct ReadExactly {
    needed: usize,
    buf: Vec<u8>,
    state: ReadState,
}

impl ReadExactly {
    /// Advances the read with one resumption. Completes short only at end
    /// of stream.
    ///
    /// # Errors
    ///
    /// An injected failure or a source I/O error unwinds the operation.
    pub fn step<S: NbSource>(
        &mut self,
        stream: &mut StreamReader<S>,
        input: Resume,
    ) -> Result<StreamStep<Vec<u8>>, Failure> {
        input.check()?;
        match std::mem::replace(&mut self.state, ReadState::Arm) {
            ReadState::Arm => {
                if self.needed == self.buf.len() {
                    // Zero-byte request: nothing to wait for.
                    return Ok(StreamStep::Complete(std::mem::take(&mut self.buf)));
                }
                self.state = ReadState::Try;
                Ok(StreamStep::Pending(Wait::IoRead(stream.handle)))
            }
            ReadState::Try => {
                match stream.source.read(self.needed - self.buf.len())? {
                    None => {
                        self.state = ReadState::Try;
                        return Ok(StreamStep::Pending(Wait::IoRead(stream.handle)));
                    }
                    Some(chunk) if chunk.is_empty() => {
                        // EOF short of the target: hand back what arrived.
                        self.state = ReadState::Finish(Vec::new());
                        return Ok(StreamStep::Pending(Wait::IoReadDone(stream.handle)));
                    }
                    Some(chunk) => self.buf.extend_from_slice(&chunk),
                }
                if self.buf.len() == self.needed {
                    self.state = ReadState::Finish(Vec::new());
                    Ok(StreamStep::Pending(Wait::IoReadDone(stream.handle)))
                } else {
                    self.state = ReadState::Try;
                    Ok(StreamStep::Pending(Wait::IoRead(stream.handle)))
                }
            }
            ReadState::Finish(_) => Ok(StreamStep::Complete(std::mem::take(&mut self.buf))),
        }
    }
}

/// In-flight `readline()` operation.
#[derive(Debug)]
pub struct ReadLine {
    state: ReadState,
}

impl ReadLine {
    /// Advances the line read with one resumption.
    ///
    /// # Errors
    ///
    /// An injected failure or a source I/O error unwinds the operation.
    pub fn step<S: NbSource>(
        &mut self,
        stream: &mut StreamReader<S>,
        input: Resume,
    ) -> Result<StreamStep<Vec<u8>>, Failure> {
        input.check()?;
        match std::mem::replace(&mut self.state, ReadState::Arm) {
            ReadState::Arm => {
                self.state = ReadState::Try;
                Ok(StreamStep::Pending(Wait::IoRead(stream.handle)))
            }
            ReadState::Try => match stream.source.readline()? {
                None => {
                    self.state = ReadState::Try;
                    Ok(StreamStep::Pending(Wait::IoRead(stream.handle)))
                }
                Some(line) => {
                    self.state = ReadState::Finish(line);
                    Ok(StreamStep::Pending(Wait::IoReadDone(stream.handle)))
                }
            },
            ReadState::Finish(line) => Ok(StreamStep::Complete(line)),
        }
    }
}

/// The write half of a stream.
#[derive(Debug)]
pub struct StreamWriter<S> {
    sink: S,
    handle: IoHandle,
}

impl<S: NbSource> StreamWriter<S> {
    /// Pairs a sink with the handle minted for its descriptor.
    pub fn new(sink: S, handle: IoHandle) -> Self {
        Self { sink, handle }
    }

    /// The loop handle backing this writer.
    #[must_use]
    pub const fn handle(&self) -> IoHandle {
        self.handle
    }

    /// Starts writing the whole of `buf`.
    pub fn awrite(&self, buf: Vec<u8>) -> Write {
        Write {
            buf,
            off: 0,
            state: WriteState::Try,
            armed: false,
        }
    }

    /// Closes the writer: drops the handle's registration and the sink.
    ///
    /// # Errors
    ///
    /// [`IoTableError::UnknownHandle`] if the handle was already retired.
    pub fn aclose(self, lp: &mut EventLoop) -> Result<(), IoTableError> {
        lp.deregister_io(self.handle)
    }

    /// Consumes the writer, returning the sink. The caller keeps the
    /// handle's registration alive.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[derive(Debug)]
enum WriteState {
    /// Try the sink (optimistically on the first pass).
    Try,
    /// All bytes accepted; acknowledging interest before completing.
    Finish,
    /// Acknowledged; report completion.
    Complete,
}

/// In-flight `awrite(buf)` operation.
#[derive(Debug)]
pub struct Write {
    buf: Vec<u8>,
    off: usize,
    state: WriteState,
    /// Whether writable interest was ever armed; a one-shot write that
    /// never waited must not acknowledge interest it never registered.
    armed: bool,
}

impl Write {
    /// Advances the write with one resumption.
    ///
    /// # Errors
    ///
    /// An injected failure or a sink I/O error unwinds the operation.
    pub fn step<S: NbSource>(
        &mut self,
        stream: &mut StreamWriter<S>,
        input: Resume,
    ) -> Result<StreamStep<()>, Failure> {
        input.check()?;
        loop {
            match self.state {
                WriteState::Try => {
                    if self.off == self.buf.len() {
                        self.state = WriteState::Finish;
                        continue;
                    }
                    match stream.sink.write(&self.buf[self.off..])? {
                        Some(n) => {
                            self.off += n;
                            if self.off == self.buf.len() {
                                self.state = WriteState::Finish;
                                continue;
                            }
                        }
                        None => {}
                    }
                    self.armed = true;
                    return Ok(StreamStep::Pending(Wait::IoWrite(stream.handle)));
                }
                WriteState::Finish => {
                    self.state = WriteState::Complete;
                    if self.armed {
                        return Ok(StreamStep::Pending(Wait::IoWriteDone(stream.handle)));
                    }
                    return Ok(StreamStep::Complete(()));
                }
                WriteState::Complete => return Ok(StreamStep::Complete(())),
            }
        }
    }
}
