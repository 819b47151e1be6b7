//! UDP transport.
//!
//! "Connecting" a datagram socket only fixes its default peer; nothing
//! confirms the peer is bound. The orchestrator's readiness policy is what
//! keeps the first `ping` from going to a socket that does not exist yet.
//! Lost datagrams are not retransmitted.

use crate::error::TransportError;
use crate::process::{ConsumerArgs, ConsumerCommand, ConsumerProcess};
use crate::transport::{RoundTrip, Transport, TransportKind};
use pingpong_core::Message;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Receive buffer large enough to notice oversized datagrams.
const RECV_BUFFER_LEN: usize = 64;

/// Configuration for the UDP transport.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Address both sockets bind to.
    pub bind_ip: IpAddr,
    /// Read timeout on the producer socket. `None` blocks forever.
    pub recv_timeout: Option<Duration>,
    /// `SO_RCVBUF` for both sockets, passed to the consumer on its command
    /// line. `None` keeps the OS default.
    pub recv_buffer_size: Option<usize>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            recv_timeout: Some(Duration::from_secs(5)),
            recv_buffer_size: None,
        }
    }
}

impl UdpConfig {
    /// Sets the producer read timeout.
    #[must_use]
    pub fn recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Sets the socket receive buffer size.
    #[must_use]
    pub fn recv_buffer_size(mut self, size: Option<usize>) -> Self {
        self.recv_buffer_size = size;
        self
    }
}

/// Binds a datagram socket.
///
/// # Errors
/// Returns [`TransportError::Connection`] if binding or configuring fails.
pub fn bind(
    addr: SocketAddr,
    recv_buffer_size: Option<usize>,
) -> Result<UdpSocket, TransportError> {
    let open = || -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if let Some(size) = recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        socket.bind(&addr.into())?;
        Ok(socket.into())
    };
    open().map_err(|e| TransportError::connection(format!("bind udp {addr}: {e}")))
}

/// Picks a currently free port by binding and releasing it.
///
/// Another process may take the port before the consumer binds it; a bind
/// failure in the consumer then surfaces as a readiness error.
fn reserve_port(ip: IpAddr) -> Result<u16, TransportError> {
    let spare = bind(SocketAddr::new(ip, 0), None)?;
    Ok(spare.local_addr()?.port())
}

/// Producer end of the UDP transport.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    recv_timeout: Option<Duration>,
    buffer: [u8; RECV_BUFFER_LEN],
    consumer: Option<ConsumerProcess>,
}

impl UdpTransport {
    /// Binds the producer socket, spawns the consumer on a second port and
    /// sets it as the default peer.
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if binding or spawning fails.
    pub fn connect(config: &UdpConfig, command: &ConsumerCommand) -> Result<Self, TransportError> {
        let socket = bind(SocketAddr::new(config.bind_ip, 0), config.recv_buffer_size)?;
        let our_port = socket.local_addr()?.port();
        let their_port = reserve_port(config.bind_ip)?;
        let peer = SocketAddr::new(config.bind_ip, their_port);
        socket.connect(peer)?;

        let consumer = command.spawn(&ConsumerArgs::Udp {
            our_port: their_port,
            their_port: our_port,
            recv_buffer_size: config.recv_buffer_size,
        })?;

        tracing::info!(our_port, their_port, "udp transport connected");
        let mut transport = Self::from_socket(socket, config.recv_timeout)?;
        transport.consumer = Some(consumer);
        Ok(transport)
    }

    /// Wraps a socket already connected to a peer managed elsewhere.
    ///
    /// # Errors
    /// Returns IO error if the read timeout cannot be applied.
    pub fn from_socket(
        socket: UdpSocket,
        recv_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        socket.set_read_timeout(recv_timeout)?;
        Ok(Self {
            socket,
            recv_timeout,
            buffer: [0; RECV_BUFFER_LEN],
            consumer: None,
        })
    }

    /// Returns the spawned consumer, if this transport owns one.
    #[must_use]
    pub fn consumer(&self) -> Option<&ConsumerProcess> {
        self.consumer.as_ref()
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    #[inline]
    fn run_cycle(&mut self) -> Result<RoundTrip, TransportError> {
        self.socket.send(Message::Ping.payload())?;
        let len = self
            .socket
            .recv(&mut self.buffer)
            .map_err(|e| TransportError::from_recv(e, self.recv_timeout))?;
        let received = Message::Ping.check_reply(&self.buffer[..len])?;
        Ok(RoundTrip {
            sent: Message::Ping,
            received,
        })
    }
}

/// Consumer loop: answers datagrams from the connected peer.
///
/// With `limit = None` this runs until an error occurs or the process is
/// terminated; UDP has no end-of-stream.
///
/// # Errors
/// Returns [`TransportError::ProtocolViolation`] on the first datagram that is
/// not a valid payload, or the socket error.
pub fn serve(socket: &UdpSocket, limit: Option<u64>) -> Result<u64, TransportError> {
    let mut buffer = [0u8; RECV_BUFFER_LEN];
    let mut served = 0u64;
    while limit.is_none_or(|limit| served < limit) {
        let len = socket
            .recv(&mut buffer)
            .map_err(|e| TransportError::from_recv(e, None))?;
        let request = Message::from_payload(&buffer[..len])?;
        socket.send(request.reply().payload())?;
        served += 1;
    }
    Ok(served)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn connected_pair() -> (UdpSocket, UdpSocket) {
        let localhost = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let a = bind(localhost, None).unwrap();
        let b = bind(localhost, Some(64 * 1024)).unwrap();
        a.connect(b.local_addr().unwrap()).unwrap();
        b.connect(a.local_addr().unwrap()).unwrap();
        (a, b)
    }

    #[test]
    fn test_udp_config_default() {
        let config = UdpConfig::default();
        assert!(config.bind_ip.is_loopback());
        assert_eq!(config.recv_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.recv_buffer_size, None);
    }

    #[test]
    fn test_udp_config_builder() {
        let config = UdpConfig::default()
            .recv_timeout(None)
            .recv_buffer_size(Some(1 << 20));
        assert_eq!(config.recv_timeout, None);
        assert_eq!(config.recv_buffer_size, Some(1 << 20));
    }

    #[test]
    fn test_reserve_port_is_nonzero() {
        assert_ne!(reserve_port(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap(), 0);
    }

    #[test]
    fn test_round_trips_over_loopback() {
        let (producer, consumer) = connected_pair();
        let server = thread::spawn(move || serve(&consumer, Some(100)).unwrap());

        let mut transport =
            UdpTransport::from_socket(producer, Some(Duration::from_secs(5))).unwrap();
        for _ in 0..100 {
            assert_eq!(transport.run_cycle().unwrap().received, Message::Pong);
        }
        assert_eq!(server.join().unwrap(), 100);
    }

    #[test]
    fn test_producer_rejects_wrong_reply() {
        let (producer, consumer) = connected_pair();
        let bogus = thread::spawn(move || {
            let mut buf = [0u8; RECV_BUFFER_LEN];
            consumer.recv(&mut buf).unwrap();
            consumer.send(b"ping").unwrap();
        });

        let mut transport =
            UdpTransport::from_socket(producer, Some(Duration::from_secs(5))).unwrap();
        let err = transport.run_cycle().unwrap_err();
        assert!(err.is_protocol_violation());
        bogus.join().unwrap();
    }

    #[test]
    fn test_producer_rejects_oversized_reply() {
        let (producer, consumer) = connected_pair();
        let bogus = thread::spawn(move || {
            let mut buf = [0u8; RECV_BUFFER_LEN];
            consumer.recv(&mut buf).unwrap();
            consumer.send(b"pong\n").unwrap();
        });

        let mut transport =
            UdpTransport::from_socket(producer, Some(Duration::from_secs(5))).unwrap();
        assert!(transport.run_cycle().unwrap_err().is_protocol_violation());
        bogus.join().unwrap();
    }

    #[test]
    fn test_silent_peer_times_out() {
        let (producer, _silent) = connected_pair();
        let mut transport =
            UdpTransport::from_socket(producer, Some(Duration::from_millis(20))).unwrap();
        let err = transport.run_cycle().unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }

    #[test]
    fn test_serve_rejects_garbage() {
        let (producer, consumer) = connected_pair();
        producer.send(b"pin").unwrap();
        let err = serve(&consumer, None).unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_serve_answers_pong_with_ping() {
        let (producer, consumer) = connected_pair();
        producer
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let server = thread::spawn(move || serve(&consumer, Some(2)).unwrap());

        let mut buf = [0u8; RECV_BUFFER_LEN];
        producer.send(b"pong").unwrap();
        let len = producer.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"ping");

        producer.send(b"ping").unwrap();
        let len = producer.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"pong");

        assert_eq!(server.join().unwrap(), 2);
    }
}
