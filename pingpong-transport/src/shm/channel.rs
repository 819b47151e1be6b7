//! Half-duplex ping/pong over the shared segment.
//!
//! One cycle, each side writing only its own flag:
//!
//! ```text
//! initiator                           responder
//! ---------                           ---------
//! own := Clear              ------>   wait initiator == Clear (not before the first request)
//! wait responder == Clear   <------   own := Clear
//! write request
//! own := Signaled           ------>   wait initiator == Signaled
//!                                     read request
//!                                     write reply
//! wait responder == Signaled <-----   own := Signaled
//! read reply
//! ```
//!
//! The initiator only writes once the responder has cleared its flag in answer
//! to the initiator's own `Clear`, so a flag left `Signaled` by the previous
//! cycle is never mistaken for a fresh reply. Before the first request both
//! flags start `Clear`, which lets either process start first.

use super::event::{EventLock, EventState, WaitStrategy, WaitTimeout};
use super::segment::{Segment, default_segment_dir};
use crate::error::TransportError;
use crate::process::{ConsumerArgs, ConsumerCommand, ConsumerProcess};
use crate::transport::{RoundTrip, Transport, TransportKind};
use pingpong_core::Message;
use std::path::PathBuf;

/// Configuration for the shared-memory transport.
#[derive(Debug, Clone)]
pub struct ShmConfig {
    /// Directory the segment's backing file is created in.
    pub dir: PathBuf,
    /// What the producer does between polls. Also passed to the consumer.
    pub wait: WaitStrategy,
    /// Bound on each wait inside a cycle.
    pub timeout: WaitTimeout,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            dir: default_segment_dir(),
            wait: WaitStrategy::Spin,
            timeout: WaitTimeout::Infinite,
        }
    }
}

impl ShmConfig {
    /// Sets the segment directory.
    #[must_use]
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Sets the wait strategy.
    #[must_use]
    pub fn wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the per-wait timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: WaitTimeout) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One side of the handoff protocol over a mapped segment.
#[derive(Debug)]
pub struct ShmChannel {
    segment: Segment,
    wait: WaitStrategy,
    timeout: WaitTimeout,
    answered: bool,
}

impl ShmChannel {
    /// Wraps a mapped segment.
    #[must_use]
    pub fn new(segment: Segment, wait: WaitStrategy, timeout: WaitTimeout) -> Self {
        Self {
            segment,
            wait,
            timeout,
            answered: false,
        }
    }

    /// Returns the underlying segment.
    #[must_use]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    fn own(&self) -> EventLock<'_> {
        self.segment.lock(self.segment.side(), self.wait)
    }

    fn peer(&self) -> EventLock<'_> {
        self.segment.lock(self.segment.side().peer(), self.wait)
    }

    /// Marks the start of a write: clears the own flag and waits until the
    /// peer has cleared its flag in response.
    fn signal_start(&self) -> Result<(), TransportError> {
        self.own().set(EventState::Clear);
        self.peer().wait_for(EventState::Clear, self.timeout)
    }

    fn signal_finished(&self) {
        self.own().set(EventState::Signaled);
    }

    /// Sends `message` and waits for its complement.
    ///
    /// # Errors
    /// Returns [`TransportError::Timeout`] if a bounded wait elapses, or
    /// [`TransportError::ProtocolViolation`] if the reply is not the complement.
    pub fn initiate(&mut self, message: Message) -> Result<Message, TransportError> {
        self.signal_start()?;
        self.segment.write_data(message.payload());
        self.signal_finished();

        self.peer().wait(self.timeout)?;
        let reply = self.segment.read_data();
        Ok(message.check_reply(&reply)?)
    }

    /// Waits for one request and answers it.
    ///
    /// # Returns
    /// The request that was answered.
    ///
    /// # Errors
    /// Returns [`TransportError::Timeout`] if a bounded wait elapses, or
    /// [`TransportError::ProtocolViolation`] if the request is not a valid
    /// payload. Nothing is written back in that case.
    pub fn respond(&mut self) -> Result<Message, TransportError> {
        if self.answered {
            self.peer().wait_for(EventState::Clear, self.timeout)?;
        }
        self.own().set(EventState::Clear);

        self.peer().wait(self.timeout)?;
        let request = Message::from_payload(&self.segment.read_data())?;
        self.segment.write_data(request.reply().payload());
        self.signal_finished();
        self.answered = true;
        Ok(request)
    }
}

/// Producer end of the shared-memory transport.
///
/// Owns the segment and the consumer attached to it.
#[derive(Debug)]
pub struct ShmTransport {
    consumer: Option<ConsumerProcess>,
    channel: ShmChannel,
}

impl ShmTransport {
    /// Creates a segment, spawns a consumer attached to it and waits for it.
    ///
    /// # Errors
    /// Returns [`TransportError::Resource`] if the segment cannot be created,
    /// or [`TransportError::Connection`] if the consumer cannot be spawned.
    pub fn connect(config: &ShmConfig, command: &ConsumerCommand) -> Result<Self, TransportError> {
        let segment = Segment::create(&config.dir)?;
        let consumer = command.spawn(&ConsumerArgs::Shm {
            handle: segment.handle().clone(),
            wait: config.wait,
        })?;

        tracing::info!(
            handle = %segment.handle(),
            wait = %config.wait,
            "shared memory transport connected"
        );
        Ok(Self {
            consumer: Some(consumer),
            channel: ShmChannel::new(segment, config.wait, config.timeout),
        })
    }

    /// Wraps an owner-side channel whose responder is managed elsewhere.
    #[must_use]
    pub fn from_channel(channel: ShmChannel) -> Self {
        Self {
            consumer: None,
            channel,
        }
    }

    /// Returns the spawned consumer, if this transport owns one.
    #[must_use]
    pub fn consumer(&self) -> Option<&ConsumerProcess> {
        self.consumer.as_ref()
    }
}

impl Transport for ShmTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Shm
    }

    #[inline]
    fn run_cycle(&mut self) -> Result<RoundTrip, TransportError> {
        let received = self.channel.initiate(Message::Ping)?;
        Ok(RoundTrip {
            sent: Message::Ping,
            received,
        })
    }
}

/// Consumer loop: answers requests until `limit` is reached or an error occurs.
///
/// With `limit = None` this runs until the process is terminated.
///
/// # Errors
/// Returns the first error from [`ShmChannel::respond`].
pub fn serve(channel: &mut ShmChannel, limit: Option<u64>) -> Result<u64, TransportError> {
    let mut served = 0u64;
    while limit.is_none_or(|limit| served < limit) {
        channel.respond()?;
        served += 1;
    }
    Ok(served)
}
