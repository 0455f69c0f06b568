//! Signal handlers only record the signal and wake the read loop through a
//! socket pair, so the session still unwinds and restores the terminal.

use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nix::sys::signal::Signal;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::SigId;
use tracing::debug;

use crate::error::Error;

/// Signals that end the session instead of killing the process.
pub const SIGNALS: [i32; 4] = [SIGINT, SIGTERM, SIGHUP, SIGQUIT];

pub struct Interrupt {
    wake: UnixStream,
    last: Arc<AtomicUsize>,
    ids: Vec<SigId>,
}

#[cfg(test)]
pub struct Trigger {
    notify: UnixStream,
    last: Arc<AtomicUsize>,
}

impl Interrupt {
    pub fn install() -> Result<Self, Error> {
        let (wake, notify) = UnixStream::pair().map_err(Error::Signal)?;
        wake.set_nonblocking(true).map_err(Error::Signal)?;
        notify.set_nonblocking(true).map_err(Error::Signal)?;
        let last = Arc::new(AtomicUsize::new(0));

        let mut ids = Vec::with_capacity(SIGNALS.len() * 2);
        for signal in SIGNALS {
            // The flag is registered first so it is set before the wake-up.
            ids.push(
                signal_hook::flag::register_usize(signal, Arc::clone(&last), signal as usize)
                    .map_err(Error::Signal)?,
            );
            let notify = notify.try_clone().map_err(Error::Signal)?;
            ids.push(signal_hook::low_level::pipe::register(signal, notify).map_err(Error::Signal)?);
        }
        debug!(signals = ?SIGNALS, "installed signal handlers");

        Ok(Self { wake, last, ids })
    }

    #[cfg(test)]
    pub fn pair() -> io::Result<(Self, Trigger)> {
        let (wake, notify) = UnixStream::pair()?;
        wake.set_nonblocking(true)?;
        let last = Arc::new(AtomicUsize::new(0));
        let trigger = Trigger {
            notify,
            last: Arc::clone(&last),
        };
        Ok((
            Self {
                wake,
                last,
                ids: Vec::new(),
            },
            trigger,
        ))
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.wake.as_fd()
    }

    /// Consumes pending wake-ups and returns the most recent signal.
    pub fn take(&self) -> Result<Option<Signal>, Error> {
        let mut buf = [0u8; 16];
        loop {
            match (&self.wake).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Signal(err)),
            }
        }
        let signal = match self.last.swap(0, Ordering::SeqCst) {
            0 => None,
            n => Signal::try_from(n as i32).ok(),
        };
        Ok(signal)
    }
}

impl Drop for Interrupt {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

#[cfg(test)]
impl Trigger {
    pub fn fire(&self, signal: Signal) -> io::Result<()> {
        use std::io::Write;

        self.last.store(signal as i32 as usize, Ordering::SeqCst);
        (&self.notify).write_all(&[1])
    }
}

pub fn notice(signal: Signal) -> String {
    match signal {
        Signal::SIGINT => "^C".to_string(),
        other => format!("terminated by {}", other.as_str()),
    }
}
