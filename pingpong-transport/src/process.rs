//! Consumer process orchestration.
//!
//! The producer spawns the consumer executable with the arguments its
//! transport needs and, for transports with no connection handshake of their
//! own (UDP and shared memory), waits for it to become ready before any cycle
//! is timed.
//!
//! Every consumer's stdin is a pipe held by the producer. The pipe transport
//! carries its frames over it; every other consumer only watches it for end
//! of stream, which is how it learns the producer is gone even when the
//! producer was killed and never ran its teardown.

use crate::error::TransportError;
use crate::shm::{SegmentHandle, WaitStrategy};
use crate::transport::TransportKind;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::Duration;

/// Line a consumer prints on stdout once its transport is set up.
pub const READY_LINE: &str = "READY";

/// Default name of the consumer executable.
pub const CONSUMER_BIN: &str = "pingpong-consumer";

/// How the producer decides a freshly spawned consumer is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// Sleep for a fixed delay after spawning. Race-prone: a slow consumer may
    /// still be setting up when the first message is sent.
    Settle(Duration),
    /// Block until the consumer prints [`READY_LINE`] on its stdout.
    #[default]
    Handshake,
}

/// Per-transport consumer arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerArgs {
    /// Talk over inherited stdin/stdout.
    Pipe,
    /// Connect to the producer's listener.
    Tcp {
        /// Producer listener port.
        port: u16,
        /// Disable Nagle's algorithm on the consumer's socket.
        nodelay: bool,
    },
    /// Bind `our_port`, send replies to `their_port`.
    Udp {
        /// Port the consumer binds.
        our_port: u16,
        /// Port the producer is bound to.
        their_port: u16,
        /// `SO_RCVBUF` for the consumer socket. `None` keeps the OS default.
        recv_buffer_size: Option<usize>,
    },
    /// Attach to an existing shared segment.
    Shm {
        /// Segment to open.
        handle: SegmentHandle,
        /// Wait strategy for the consumer's polls.
        wait: WaitStrategy,
    },
}

impl ConsumerArgs {
    /// Returns the transport these arguments are for.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Pipe => TransportKind::Pipe,
            Self::Tcp { .. } => TransportKind::Tcp,
            Self::Udp { .. } => TransportKind::Udp,
            Self::Shm { .. } => TransportKind::Shm,
        }
    }

    /// Renders the command line arguments.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Pipe => vec!["pipe".into()],
            Self::Tcp { port, nodelay } => {
                vec!["tcp".into(), port.to_string(), nodelay.to_string()]
            }
            Self::Udp {
                our_port,
                their_port,
                recv_buffer_size,
            } => {
                let mut args = vec!["udp".into(), our_port.to_string(), their_port.to_string()];
                if let Some(size) = recv_buffer_size {
                    args.push("--recv-buffer".into());
                    args.push(size.to_string());
                }
                args
            }
            Self::Shm { handle, wait } => vec![
                "shm".into(),
                handle.to_string(),
                "--wait".into(),
                wait.to_string(),
            ],
        }
    }

    fn needs_readiness(&self) -> bool {
        matches!(self, Self::Udp { .. } | Self::Shm { .. })
    }
}

/// How to launch the consumer executable.
#[derive(Debug, Clone)]
pub struct ConsumerCommand {
    /// Path to the consumer executable.
    pub program: PathBuf,
    /// Readiness policy for UDP and shared memory.
    pub readiness: Readiness,
}

impl ConsumerCommand {
    /// Creates a command for the given executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            readiness: Readiness::default(),
        }
    }

    /// Locates [`CONSUMER_BIN`] next to the running executable.
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if the current executable path is
    /// unknown.
    pub fn sibling() -> Result<Self, TransportError> {
        let exe = std::env::current_exe()
            .map_err(|e| TransportError::connection(format!("locate current executable: {e}")))?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::new(
            dir.join(format!("{CONSUMER_BIN}{}", std::env::consts::EXE_SUFFIX)),
        ))
    }

    /// Sets the readiness policy.
    #[must_use]
    pub fn readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    /// Spawns the consumer and waits until it is ready.
    ///
    /// Stdin and stdout are always piped. Pipe consumers exchange frames over
    /// them; all others use stdout for the readiness line and keep stdin open
    /// until the [`ConsumerProcess`] is dropped or the producer dies. Stderr is
    /// inherited so consumer logs stay visible.
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if the executable cannot be
    /// spawned or exits before signalling readiness.
    pub fn spawn(&self, args: &ConsumerArgs) -> Result<ConsumerProcess, TransportError> {
        let child = Command::new(&self.program)
            .args(args.to_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                TransportError::connection(format!(
                    "spawn consumer {}: {e}",
                    self.program.display()
                ))
            })?;

        let mut process = ConsumerProcess { child };
        tracing::debug!(pid = process.id(), kind = %args.kind(), "spawned consumer");

        if args.needs_readiness() {
            match self.readiness {
                Readiness::Settle(delay) => std::thread::sleep(delay),
                Readiness::Handshake => process.await_ready()?,
            }
        }

        Ok(process)
    }
}

/// A spawned consumer. Killed and reaped on drop.
#[derive(Debug)]
pub struct ConsumerProcess {
    child: Child,
}

impl ConsumerProcess {
    /// Returns the OS process id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Takes the consumer's stdin.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Takes the consumer's stdout.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Returns the exit status if the consumer has already exited.
    ///
    /// # Errors
    /// Returns IO error if the status cannot be queried.
    pub fn try_exited(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    fn await_ready(&mut self) -> Result<(), TransportError> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .ok_or_else(|| TransportError::connection("consumer stdout is not piped"))?;

        // Consumers print nothing else on stdout, so the reader cannot buffer
        // past the readiness line.
        let mut line = String::new();
        let read = BufReader::new(stdout)
            .read_line(&mut line)
            .map_err(|e| TransportError::connection(format!("read consumer readiness: {e}")))?;

        if read == 0 {
            return Err(TransportError::connection(
                "consumer exited before signalling readiness",
            ));
        }
        if line.trim_end() != READY_LINE {
            return Err(TransportError::connection(format!(
                "unexpected readiness line {:?}",
                line.trim_end()
            )));
        }

        tracing::debug!(pid = self.id(), "consumer ready");
        Ok(())
    }
}

impl Drop for ConsumerProcess {
    fn drop(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(pid = self.child.id(), %status, "consumer already exited");
            }
            _ => {
                self.child.kill().ok();
                match self.child.wait() {
                    Ok(status) => {
                        tracing::debug!(pid = self.child.id(), %status, "consumer terminated");
                    }
                    Err(e) => {
                        tracing::warn!(
                            pid = self.child.id(),
                            error = %e,
                            "failed to reap consumer"
                        );
                    }
                }
            }
        }
    }
}

/// Blocks until `reader` reaches end of stream, discarding anything read.
///
/// # Errors
/// Returns the first IO error other than `Interrupted`.
pub fn wait_for_hangup<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<()> {
    let mut sink = [0u8; 64];
    loop {
        match reader.read(&mut sink) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Exits the consumer process once the producer closes its stdin.
///
/// Starts a watcher thread so the serving loop never checks for it. The
/// producer's end of the pipe closes when the producer exits for any reason,
/// including `SIGKILL`. `on_hangup` runs on the watcher thread right before
/// the process exits.
///
/// # Errors
/// Returns IO error if the watcher thread cannot be started.
pub fn exit_on_hangup<F>(on_hangup: F) -> std::io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name("hangup-watch".into())
        .spawn(move || {
            if let Err(e) = wait_for_hangup(&mut std::io::stdin().lock()) {
                tracing::warn!(error = %e, "stdin watch failed");
            }
            tracing::info!("producer hung up, exiting");
            on_hangup();
            std::process::exit(0);
        })?;
    Ok(())
}

/// Announces readiness from inside a consumer process.
///
/// # Errors
/// Returns IO error if stdout is closed.
pub fn announce_ready() -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{READY_LINE}")?;
    stdout.flush()
}
