use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Everything that can go wrong while a terminal session is set up, used or
/// torn down.
#[derive(Debug, Error)]
pub enum Error {
    #[error("standard input is not a terminal")]
    NotATerminal,

    #[error("failed to read terminal attributes: {0}")]
    Query(Errno),

    #[error("failed to enter raw mode: {0}")]
    Configure(Errno),

    /// The terminal is left in raw mode.
    #[error("failed to restore terminal attributes, the terminal is still in raw mode (try `stty sane`): {0}")]
    Restore(Errno),

    #[error("failed to read from terminal: {0}")]
    Read(io::Error),

    #[error("failed to write output: {0}")]
    Write(io::Error),

    #[error("failed to watch for signals: {0}")]
    Signal(io::Error),
}

