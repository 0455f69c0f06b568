mod error;
mod inspector;
mod interrupt;
mod repr;
mod terminal;

use std::fs::File;
use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser};
use nix::errno::Errno;
use tracing::{debug, error, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::error::Error;
use crate::inspector::{Inspector, Outcome};
use crate::interrupt::Interrupt;
use crate::repr::Format;
use crate::terminal::{RawMode, RawSession, TerminalAttributes};

/// Print the raw bytes a terminal sends, one line per read.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// How each read is printed
    #[arg(short, long, value_enum, default_value_t = Format::Repr)]
    format: Format,

    /// Full raw mode: signals and flow control off, the interrupt key is read as a byte and ends the session
    #[arg(long)]
    full: bool,

    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_ansi(false)
        .without_time()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rawkeys: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let interrupt = Interrupt::install()?;

    let fd = terminal::stdin_fd().context("failed to open standard input")?;
    let original = TerminalAttributes::capture(&fd)?;

    let mode = if cli.full { RawMode::Full } else { RawMode::Cbreak };
    let interrupt_key = match mode {
        RawMode::Cbreak => None,
        RawMode::Full => Some(original.interrupt_key().unwrap_or(terminal::to_ctrl_byte('c'))),
    };

    let mut input = File::from(fd.try_clone().context("failed to open standard input")?);
    let session = RawSession::enter(fd, original, mode)?;

    let stdout = io::stdout();
    let mut inspector = Inspector::new(cli.format, stdout.lock());
    if let Some(key) = interrupt_key {
        inspector = inspector.with_interrupt_key(key);
    }
    let outcome = inspector.run(&mut input, &interrupt);
    drop(inspector);

    let restored = session.restore();
    match (outcome, restored) {
        (Ok(outcome), Ok(())) => {
            debug!(?outcome, "session ended");
            Ok(())
        }
        (Ok(Outcome::EndOfStream), Err(err @ Error::Restore(Errno::EIO | Errno::ENOTTY))) => {
            warn!("terminal hung up before its attributes could be restored");
            Err(err.into())
        }
        (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err.into()),
        (Err(read), Err(restore)) => {
            error!("{}", read);
            Err(restore.into())
        }
    }
}
