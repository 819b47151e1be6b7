//! The uniform transport contract.

use crate::error::TransportError;
use crate::pipe::PipeTransport;
use crate::process::ConsumerCommand;
use crate::shm::{ShmConfig, ShmTransport};
use crate::tcp::{TcpConfig, TcpTransport};
use crate::udp::{UdpConfig, UdpTransport};
use pingpong_core::Message;
use std::fmt;
use std::str::FromStr;

/// Transport variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// stdin/stdout of the consumer process.
    Pipe,
    /// Loopback TCP connection.
    Tcp,
    /// Loopback UDP datagrams.
    Udp,
    /// Shared-memory segment.
    Shm,
}

impl TransportKind {
    /// All variants, in reporting order.
    pub const ALL: [Self; 4] = [Self::Pipe, Self::Tcp, Self::Udp, Self::Shm];

    /// Returns the short name used on command lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Shm => "shm",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown transport \"{s}\""))
    }
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTrip {
    /// Message the producer sent.
    pub sent: Message,
    /// Validated reply.
    pub received: Message,
}

/// A connected producer end.
///
/// `run_cycle` takes `&mut self`: cycles on one handle are strictly sequential.
pub trait Transport {
    /// Returns the variant.
    fn kind(&self) -> TransportKind;

    /// Sends `ping` and blocks until the validated `pong` arrives.
    ///
    /// # Errors
    /// Returns [`TransportError::ProtocolViolation`] on any reply other than the
    /// complement, or the transport's IO/timeout error.
    fn run_cycle(&mut self) -> Result<RoundTrip, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    #[inline]
    fn run_cycle(&mut self) -> Result<RoundTrip, TransportError> {
        (**self).run_cycle()
    }
}

/// Connection parameters, one variant per transport.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Pipe transport (no parameters).
    Pipe,
    /// TCP transport.
    Tcp(TcpConfig),
    /// UDP transport.
    Udp(UdpConfig),
    /// Shared-memory transport.
    Shm(ShmConfig),
}

impl TransportConfig {
    /// Returns the default configuration for a variant.
    #[must_use]
    pub fn default_for(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Pipe => Self::Pipe,
            TransportKind::Tcp => Self::Tcp(TcpConfig::default()),
            TransportKind::Udp => Self::Udp(UdpConfig::default()),
            TransportKind::Shm => Self::Shm(ShmConfig::default()),
        }
    }

    /// Returns the variant.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Pipe => TransportKind::Pipe,
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Udp(_) => TransportKind::Udp,
            Self::Shm(_) => TransportKind::Shm,
        }
    }
}

/// A connected transport of any variant.
///
/// Dropping the handle tears the variant down: streams and sockets close, the
/// segment is unmapped and removed, and the consumer is terminated.
#[derive(Debug)]
pub enum TransportHandle {
    /// Pipe transport.
    Pipe(PipeTransport),
    /// TCP transport.
    Tcp(TcpTransport),
    /// UDP transport.
    Udp(UdpTransport),
    /// Shared-memory transport.
    Shm(ShmTransport),
}

impl TransportHandle {
    /// Spawns a consumer and connects to it.
    ///
    /// All setup happens here, before any cycle is run.
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] or [`TransportError::Resource`]
    /// if the variant cannot be set up.
    pub fn connect(
        config: &TransportConfig,
        command: &ConsumerCommand,
    ) -> Result<Self, TransportError> {
        let handle = match config {
            TransportConfig::Pipe => Self::Pipe(PipeTransport::connect(command)?),
            TransportConfig::Tcp(tcp) => Self::Tcp(TcpTransport::connect(tcp, command)?),
            TransportConfig::Udp(udp) => Self::Udp(UdpTransport::connect(udp, command)?),
            TransportConfig::Shm(shm) => Self::Shm(ShmTransport::connect(shm, command)?),
        };
        Ok(handle)
    }
}

impl Transport for TransportHandle {
    fn kind(&self) -> TransportKind {
        match self {
            Self::Pipe(t) => t.kind(),
            Self::Tcp(t) => t.kind(),
            Self::Udp(t) => t.kind(),
            Self::Shm(t) => t.kind(),
        }
    }

    #[inline]
    fn run_cycle(&mut self) -> Result<RoundTrip, TransportError> {
        match self {
            Self::Pipe(t) => t.run_cycle(),
            Self::Tcp(t) => t.run_cycle(),
            Self::Udp(t) => t.run_cycle(),
            Self::Shm(t) => t.run_cycle(),
        }
    }
}
