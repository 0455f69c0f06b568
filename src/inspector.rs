use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use tracing::{debug, info, trace};

use crate::error::Error;
use crate::interrupt::{self, Interrupt};
use crate::repr::Format;

const READ_SIZE: usize = 1024;

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    EndOfStream,
    Interrupted(Signal),
}

/// What to do with the result of one read.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Emit(usize),
    Skip,
    End,
}

fn classify(read: io::Result<usize>, hangup: bool) -> io::Result<Step> {
    match read {
        Ok(0) if hangup => Ok(Step::End),
        Ok(0) => Ok(Step::Skip),
        Ok(n) => Ok(Step::Emit(n)),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Step::Skip),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Step::Skip),
        // A terminal whose other side went away reports EIO rather than EOF.
        Err(err) if hangup && err.raw_os_error() == Some(Errno::EIO as i32) => Ok(Step::End),
        Err(err) => Err(err),
    }
}

/// Prints every read from the input, one line each.
pub struct Inspector<W> {
    format: Format,
    out: W,
    interrupt_key: Option<u8>,
}

impl<W: Write> Inspector<W> {
    pub fn new(format: Format, out: W) -> Self {
        Self {
            format,
            out,
            interrupt_key: None,
        }
    }

    /// Ends the loop as if interrupted once `key` is read. For terminals that
    /// deliver the interrupt key as a byte instead of a signal.
    pub fn with_interrupt_key(mut self, key: u8) -> Self {
        self.interrupt_key = Some(key);
        self
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Reads `input` until end of stream or interruption.
    ///
    /// On interruption the notice is printed before returning, so it lands
    /// ahead of anything written after the terminal is restored.
    pub fn run<R: Read + AsFd>(&mut self, input: &mut R, interrupt: &Interrupt) -> Result<Outcome, Error> {
        let mut buf = [0u8; READ_SIZE];
        loop {
            let (ready, woken) = wait(input.as_fd(), interrupt.fd())?;

            if woken {
                if let Some(signal) = interrupt.take()? {
                    info!(signal = signal.as_str(), "interrupted");
                    return self.interrupted(signal);
                }
            }
            if ready.is_empty() {
                continue;
            }
            if ready.contains(PollFlags::POLLNVAL) {
                return Err(Error::Read(io::Error::from(Errno::EBADF)));
            }

            let hangup = ready.intersects(PollFlags::POLLHUP | PollFlags::POLLERR);
            match classify(input.read(&mut buf), hangup).map_err(Error::Read)? {
                Step::Emit(n) => {
                    let bytes = &buf[..n];
                    trace!(len = n, "read");
                    self.emit(bytes)?;
                    if let Some(key) = self.interrupt_key {
                        if bytes.contains(&key) {
                            info!("interrupt key read");
                            return self.interrupted(Signal::SIGINT);
                        }
                    }
                }
                Step::Skip => trace!("empty read"),
                Step::End => {
                    debug!("end of stream");
                    return Ok(Outcome::EndOfStream);
                }
            }
        }
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<(), Error> {
        writeln!(self.out, "{}", self.format.render(bytes)).map_err(Error::Write)?;
        self.out.flush().map_err(Error::Write)
    }

    fn interrupted(&mut self, signal: Signal) -> Result<Outcome, Error> {
        writeln!(self.out, "{}", interrupt::notice(signal)).map_err(Error::Write)?;
        self.out.flush().map_err(Error::Write)?;
        Ok(Outcome::Interrupted(signal))
    }
}

/// Blocks until the input or the interrupt is ready. Returns the input's
/// events and whether the interrupt fired; both are empty after `EINTR`.
fn wait(input: BorrowedFd<'_>, interrupt: BorrowedFd<'_>) -> Result<(PollFlags, bool), Error> {
    let mut fds = [
        PollFd::new(input, PollFlags::POLLIN),
        PollFd::new(interrupt, PollFlags::POLLIN),
    ];
    match poll(&mut fds, PollTimeout::NONE) {
        Ok(_) => {}
        // The handler has already written its wake-up; check it anyway.
        Err(Errno::EINTR) => return Ok((PollFlags::empty(), true)),
        Err(err) => return Err(Error::Read(err.into())),
    }
    let ready = fds[0].revents().unwrap_or_else(PollFlags::empty);
    let woken = fds[1].revents().is_some_and(|r| !r.is_empty());
    Ok((ready, woken))
}
