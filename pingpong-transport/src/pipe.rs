//! Anonymous pipe transport.
//!
//! The producer writes into the consumer's stdin and reads the consumer's
//! stdout. Both directions carry 5-byte line frames (`ping\n`, `pong\n`).
//!
//! The two ends are asymmetric: the consumer answers frames it
//! does not recognise with the literal `Error`, while the producer treats any
//! reply other than the complement as a fatal protocol violation.

use crate::error::TransportError;
use crate::framing::read_frame;
use crate::process::{ConsumerArgs, ConsumerCommand, ConsumerProcess};
use crate::transport::{RoundTrip, Transport, TransportKind};
use pingpong_core::{ERROR_LINE, LINE_LEN, Line, Message, reply_line};
use std::io::{self, Read, Write};
use std::process::{ChildStdin, ChildStdout};

/// Producer end of the pipe transport.
#[derive(Debug)]
pub struct PipeTransport {
    stdin: ChildStdin,
    stdout: ChildStdout,
    // Dropped last: closing stdin first lets the consumer see end of stream.
    consumer: ConsumerProcess,
}

impl PipeTransport {
    /// Spawns a pipe consumer and takes its standard streams.
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if the consumer cannot be spawned.
    pub fn connect(command: &ConsumerCommand) -> Result<Self, TransportError> {
        let mut consumer = command.spawn(&ConsumerArgs::Pipe)?;
        let stdin = consumer
            .take_stdin()
            .ok_or_else(|| TransportError::connection("consumer stdin is not piped"))?;
        let stdout = consumer
            .take_stdout()
            .ok_or_else(|| TransportError::connection("consumer stdout is not piped"))?;

        tracing::info!(pid = consumer.id(), "pipe transport connected");
        Ok(Self {
            stdin,
            stdout,
            consumer,
        })
    }

    /// Returns the spawned consumer.
    #[must_use]
    pub fn consumer(&self) -> &ConsumerProcess {
        &self.consumer
    }
}

impl Transport for PipeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }

    #[inline]
    fn run_cycle(&mut self) -> Result<RoundTrip, TransportError> {
        let received = exchange(&mut self.stdout, &mut self.stdin, Message::Ping)?;
        Ok(RoundTrip {
            sent: Message::Ping,
            received,
        })
    }
}

/// Writes `message` as a line frame and strictly validates the line reply.
///
/// # Errors
/// Returns [`TransportError::ProtocolViolation`] for any reply other than the
/// complement, [`TransportError::ConnectionClosed`] if the reader ends.
pub fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    message: Message,
) -> Result<Message, TransportError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    writer.write_all(message.line())?;
    writer.flush()?;

    let mut reply: Line = [0; LINE_LEN];
    if !read_frame(reader, &mut reply).map_err(|e| TransportError::from_recv(e, None))? {
        return Err(TransportError::ConnectionClosed);
    }
    Ok(message.check_reply_line(&reply)?)
}

/// Consumer loop: answers every 5-byte frame until the input ends.
///
/// Unknown frames are answered with `Error` and do not stop the loop.
///
/// # Returns
/// Number of frames answered.
///
/// # Errors
/// Returns IO error if reading or writing fails, including input that ends in
/// the middle of a frame.
pub fn serve<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut frame: Line = [0; LINE_LEN];
    let mut served = 0u64;
    while read_frame(reader, &mut frame)? {
        let reply = reply_line(&frame);
        if reply == ERROR_LINE {
            tracing::warn!(frame = %frame.escape_ascii(), "unrecognised pipe frame");
        }
        writer.write_all(reply)?;
        writer.flush()?;
        served += 1;
    }
    Ok(served)
}
