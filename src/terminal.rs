use std::io;
use std::os::fd::{AsFd, OwnedFd};

use nix::sys::termios::{
    self, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices, Termios,
};
use tracing::{debug, error};

use crate::error::Error;

pub const RAW_LOCAL_FLAGS: LocalFlags = LocalFlags::ICANON.union(LocalFlags::ECHO);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RawMode {
    /// Canonical input and echo off, everything else untouched.
    #[default]
    Cbreak,
    /// `cfmakeraw(3)`, keeping output post-processing on.
    Full,
}

pub fn stdin_fd() -> io::Result<OwnedFd> {
    io::stdin().as_fd().try_clone_to_owned()
}

pub fn to_ctrl_byte(c: char) -> u8 {
    let byte = c as u8;
    byte & 0b0001_1111
}

#[derive(Debug, Clone)]
pub struct TerminalAttributes {
    termios: Termios,
}

impl TerminalAttributes {
    /// Reads the current attributes of `fd`. Never modifies the terminal.
    pub fn capture<Fd: AsFd>(fd: Fd) -> Result<Self, Error> {
        let fd = fd.as_fd();
        if !termion::is_tty(&fd) {
            return Err(Error::NotATerminal);
        }
        let termios = termios::tcgetattr(fd).map_err(Error::Query)?;
        let attrs = Self { termios };
        debug!(local_flags = ?attrs.local_flags(), "captured terminal attributes");
        Ok(attrs)
    }

    #[cfg(test)]
    pub fn termios(&self) -> &Termios {
        &self.termios
    }

    pub fn local_flags(&self) -> LocalFlags {
        self.termios.local_flags
    }

    /// The byte the driver turns into `SIGINT`, unless it is disabled.
    pub fn interrupt_key(&self) -> Option<u8> {
        match self.termios.control_chars[SpecialCharacterIndices::VINTR as usize] {
            0 => None,
            key => Some(key),
        }
    }
}

/// Clears the cbreak bits from `flags`, returning the new flags and the bits
/// that were actually set before.
pub fn raw_local_flags(flags: LocalFlags) -> (LocalFlags, LocalFlags) {
    (flags - RAW_LOCAL_FLAGS, flags & RAW_LOCAL_FLAGS)
}

pub fn restored_local_flags(raw: LocalFlags, cleared: LocalFlags) -> LocalFlags {
    raw | cleared
}

#[derive(Debug, Clone)]
pub struct RawModeFlags {
    termios: Termios,
    cleared: LocalFlags,
    mode: RawMode,
}

impl RawModeFlags {
    pub fn derive(original: &TerminalAttributes, mode: RawMode) -> Self {
        let mut termios = original.termios.clone();
        let cleared = match mode {
            RawMode::Cbreak => {
                let (flags, cleared) = raw_local_flags(termios.local_flags);
                termios.local_flags = flags;
                cleared
            }
            RawMode::Full => {
                termios::cfmakeraw(&mut termios);
                termios.output_flags |= original.termios.output_flags & OutputFlags::OPOST;
                original.termios.local_flags - termios.local_flags
            }
        };
        Self {
            termios,
            cleared,
            mode,
        }
    }

    pub fn termios(&self) -> &Termios {
        &self.termios
    }

    pub fn cleared(&self) -> LocalFlags {
        self.cleared
    }

    /// Cbreak mode ORs the cleared bits back; full mode rewrote several
    /// fields and goes back to the snapshot.
    pub fn restored(&self, original: &TerminalAttributes) -> Termios {
        match self.mode {
            RawMode::Cbreak => {
                let mut termios = self.termios.clone();
                termios.local_flags = restored_local_flags(termios.local_flags, self.cleared);
                termios
            }
            RawMode::Full => original.termios.clone(),
        }
    }
}

/// A terminal in raw mode. Dropping it restores the original attributes.
#[derive(Debug)]
pub struct RawSession {
    fd: OwnedFd,
    original: TerminalAttributes,
    raw: RawModeFlags,
    active: bool,
}

impl RawSession {
    /// Applies raw mode to `fd` immediately. On error the terminal is untouched.
    pub fn enter(fd: OwnedFd, original: TerminalAttributes, mode: RawMode) -> Result<Self, Error> {
        let raw = RawModeFlags::derive(&original, mode);
        termios::tcsetattr(&fd, SetArg::TCSANOW, raw.termios()).map_err(Error::Configure)?;
        debug!(?mode, cleared = ?raw.cleared(), "entered raw mode");
        Ok(Self {
            fd,
            original,
            raw,
            active: true,
        })
    }

    pub fn restore(mut self) -> Result<(), Error> {
        self.active = false;
        self.apply_restore()
    }

    fn apply_restore(&self) -> Result<(), Error> {
        let termios = self.raw.restored(&self.original);
        termios::tcsetattr(&self.fd, SetArg::TCSANOW, &termios).map_err(Error::Restore)?;
        debug!(local_flags = ?termios.local_flags, "restored terminal attributes");
        Ok(())
    }
}

impl Drop for RawSession {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(err) = self.apply_restore() {
            error!("{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::libc;
    use nix::pty::{openpty, OpenptyResult, Winsize};
    use proptest::prelude::*;

    fn pty() -> OpenptyResult {
        openpty(None::<&Winsize>, None::<&Termios>).expect("openpty")
    }

    fn assert_same_termios(a: &Termios, b: &Termios) {
        assert_eq!(a.input_flags, b.input_flags);
        assert_eq!(a.output_flags, b.output_flags);
        assert_eq!(a.control_flags, b.control_flags);
        assert_eq!(a.local_flags, b.local_flags);
        assert_eq!(a.control_chars, b.control_chars);
    }

    #[test]
    fn ctrl_byte() {
        assert_eq!(to_ctrl_byte('c'), 0x03);
        assert_eq!(to_ctrl_byte('q'), 0x11);
        assert_eq!(to_ctrl_byte('d'), 0x04);
    }

    #[test]
    fn raw_flags_clear_only_icanon_and_echo() {
        let flags = LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG | LocalFlags::IEXTEN;
        let (raw, cleared) = raw_local_flags(flags);
        assert_eq!(raw, LocalFlags::ISIG | LocalFlags::IEXTEN);
        assert_eq!(cleared, LocalFlags::ICANON | LocalFlags::ECHO);
    }

    #[test]
    fn restore_does_not_set_bits_that_were_off() {
        let flags = LocalFlags::ICANON | LocalFlags::ISIG;
        let (raw, cleared) = raw_local_flags(flags);
        assert_eq!(cleared, LocalFlags::ICANON);
        assert_eq!(restored_local_flags(raw, cleared), flags);
    }

    proptest! {
        #[test]
        fn restore_inverts_raw(bits in any::<u32>()) {
            let flags = LocalFlags::from_bits_truncate(bits as libc::tcflag_t);
            let (raw, cleared) = raw_local_flags(flags);
            prop_assert!(!raw.intersects(RAW_LOCAL_FLAGS));
            prop_assert_eq!(raw & !RAW_LOCAL_FLAGS, flags & !RAW_LOCAL_FLAGS);
            prop_assert_eq!(restored_local_flags(raw, cleared), flags);
        }

        #[test]
        fn restore_is_idempotent(bits in any::<u32>()) {
            let flags = LocalFlags::from_bits_truncate(bits as libc::tcflag_t);
            let (raw, cleared) = raw_local_flags(flags);
            let once = restored_local_flags(raw, cleared);
            prop_assert_eq!(restored_local_flags(once, cleared), once);
        }
    }

    #[test]
    fn capture_rejects_non_terminal() {
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        let err = TerminalAttributes::capture(&a).unwrap_err();
        assert!(matches!(err, Error::NotATerminal));
    }

    #[test]
    fn capture_pty() {
        let pty = pty();
        let attrs = TerminalAttributes::capture(&pty.slave).unwrap();
        assert!(attrs.local_flags().contains(LocalFlags::ICANON | LocalFlags::ECHO));
        assert_eq!(attrs.interrupt_key(), Some(to_ctrl_byte('c')));
    }

    #[test]
    fn cbreak_derivation_keeps_other_fields() {
        let pty = pty();
        let attrs = TerminalAttributes::capture(&pty.slave).unwrap();
        let raw = RawModeFlags::derive(&attrs, RawMode::Cbreak);
        let (a, b) = (attrs.termios(), raw.termios());
        assert_eq!(a.input_flags, b.input_flags);
        assert_eq!(a.output_flags, b.output_flags);
        assert_eq!(a.control_flags, b.control_flags);
        assert_eq!(a.control_chars, b.control_chars);
        assert_eq!(b.local_flags, a.local_flags - RAW_LOCAL_FLAGS);
        assert_same_termios(&raw.restored(&attrs), a);
    }

    #[test]
    fn full_derivation_keeps_output_processing() {
        let pty = pty();
        let attrs = TerminalAttributes::capture(&pty.slave).unwrap();
        let raw = RawModeFlags::derive(&attrs, RawMode::Full);
        assert!(!raw.termios().local_flags.intersects(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG));
        assert_eq!(
            raw.termios().output_flags.contains(OutputFlags::OPOST),
            attrs.termios().output_flags.contains(OutputFlags::OPOST)
        );
        assert!(raw.cleared().contains(LocalFlags::ISIG));
        assert_same_termios(&raw.restored(&attrs), attrs.termios());
    }

    #[test]
    fn session_enters_and_restores() {
        let pty = pty();
        let fd = pty.slave.try_clone().unwrap();
        let before = termios::tcgetattr(&pty.slave).unwrap();
        let attrs = TerminalAttributes::capture(&fd).unwrap();

        let session = RawSession::enter(fd, attrs, RawMode::Cbreak).unwrap();
        let during = termios::tcgetattr(&pty.slave).unwrap();
        assert!(!during.local_flags.intersects(RAW_LOCAL_FLAGS));

        session.restore().unwrap();
        let after = termios::tcgetattr(&pty.slave).unwrap();
        assert_same_termios(&before, &after);
    }

    #[test]
    fn session_restores_on_drop() {
        let pty = pty();
        let before = termios::tcgetattr(&pty.slave).unwrap();
        {
            let fd = pty.slave.try_clone().unwrap();
            let attrs = TerminalAttributes::capture(&fd).unwrap();
            let _session = RawSession::enter(fd, attrs, RawMode::Full).unwrap();
            let during = termios::tcgetattr(&pty.slave).unwrap();
            assert!(!during.local_flags.contains(LocalFlags::ISIG));
        }
        let after = termios::tcgetattr(&pty.slave).unwrap();
        assert_same_termios(&before, &after);
    }

    #[test]
    fn session_restores_on_panic() {
        let pty = pty();
        let before = termios::tcgetattr(&pty.slave).unwrap();
        let fd = pty.slave.try_clone().unwrap();
        let result = std::panic::catch_unwind(move || {
            let attrs = TerminalAttributes::capture(&fd).unwrap();
            let _session = RawSession::enter(fd, attrs, RawMode::Cbreak).unwrap();
            panic!("read loop blew up");
        });
        assert!(result.is_err());
        let after = termios::tcgetattr(&pty.slave).unwrap();
        assert_same_termios(&before, &after);
    }

    #[test]
    fn second_restore_changes_nothing() {
        let pty = pty();
        let fd = pty.slave.try_clone().unwrap();
        let attrs = TerminalAttributes::capture(&fd).unwrap();
        let raw = RawModeFlags::derive(&attrs, RawMode::Cbreak);

        let session = RawSession::enter(fd, attrs.clone(), RawMode::Cbreak).unwrap();
        session.restore().unwrap();
        let once = termios::tcgetattr(&pty.slave).unwrap();

        termios::tcsetattr(&pty.slave, SetArg::TCSANOW, &raw.restored(&attrs)).unwrap();
        let twice = termios::tcgetattr(&pty.slave).unwrap();
        assert_same_termios(&once, &twice);
    }
}
