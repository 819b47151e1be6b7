//! TCP transport.
//!
//! The producer listens on an ephemeral loopback port, spawns the consumer
//! with that port, accepts exactly one connection and then exchanges bare
//! 4-byte frames. There is no length prefix: both ends know the frame size.

use crate::error::TransportError;
use crate::framing::read_frame;
use crate::process::{ConsumerArgs, ConsumerCommand, ConsumerProcess};
use crate::transport::{RoundTrip, Transport, TransportKind};
use pingpong_core::{Message, PAYLOAD_LEN, Payload};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

/// Configuration for the TCP transport.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Listener address. Port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Disable Nagle's algorithm on both ends.
    pub nodelay: bool,
    /// How long to wait for the consumer to connect.
    pub accept_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            nodelay: true,
            accept_timeout: Duration::from_secs(5),
        }
    }
}

impl TcpConfig {
    /// Sets TCP_NODELAY.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// Sets the listener address.
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the accept timeout.
    #[must_use]
    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }
}

/// Creates the single-connection listener.
///
/// # Errors
/// Returns [`TransportError::Connection`] if the socket cannot be bound.
pub fn listen(addr: SocketAddr) -> Result<TcpListener, TransportError> {
    let bind = || -> std::io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        Ok(socket.into())
    };
    bind().map_err(|e| TransportError::connection(format!("listen on {addr}: {e}")))
}

/// Connects from the consumer side.
///
/// # Errors
/// Returns [`TransportError::Connection`] if the producer is not listening.
pub fn connect_to(addr: SocketAddr, nodelay: bool) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect(addr)
        .map_err(|e| TransportError::connection(format!("connect to {addr}: {e}")))?;
    stream.set_nodelay(nodelay)?;
    Ok(stream)
}

/// Producer end of the TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer_addr: SocketAddr,
    consumer: Option<ConsumerProcess>,
}

impl TcpTransport {
    /// Listens, spawns the consumer and accepts its connection.
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if any step fails, the consumer
    /// exits before connecting, or nothing connects within the accept timeout.
    pub fn connect(config: &TcpConfig, command: &ConsumerCommand) -> Result<Self, TransportError> {
        let listener = listen(config.bind_addr)?;
        let local = listener.local_addr()?;

        let mut consumer = command.spawn(&ConsumerArgs::Tcp {
            port: local.port(),
            nodelay: config.nodelay,
        })?;

        let (stream, peer_addr) = accept(&listener, &mut consumer, config.accept_timeout)?;
        stream.set_nodelay(config.nodelay)?;

        tracing::info!(
            %local,
            peer = %peer_addr,
            nodelay = config.nodelay,
            "tcp transport connected"
        );
        Ok(Self {
            stream,
            peer_addr,
            consumer: Some(consumer),
        })
    }

    /// Wraps an already connected stream whose peer is managed elsewhere.
    ///
    /// # Errors
    /// Returns IO error if the peer address cannot be read.
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer_addr,
            consumer: None,
        })
    }

    /// Returns the consumer's address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns the spawned consumer, if this transport owns one.
    #[must_use]
    pub fn consumer(&self) -> Option<&ConsumerProcess> {
        self.consumer.as_ref()
    }
}

fn accept(
    listener: &TcpListener,
    consumer: &mut ConsumerProcess,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), TransportError> {
    listener.set_nonblocking(true)?;
    let start = Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(false)?;
                return Ok((stream, addr));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if let Some(status) = consumer.try_exited()? {
                    return Err(TransportError::connection(format!(
                        "consumer exited before connecting: {status}"
                    )));
                }
                if start.elapsed() >= timeout {
                    return Err(TransportError::connection(format!(
                        "no consumer connection within {timeout:?}"
                    )));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(TransportError::connection(format!("accept: {e}"))),
        }
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    #[inline]
    fn run_cycle(&mut self) -> Result<RoundTrip, TransportError> {
        let received = exchange(&mut self.stream, Message::Ping)?;
        Ok(RoundTrip {
            sent: Message::Ping,
            received,
        })
    }
}

/// Writes `message` and strictly validates the 4-byte reply.
///
/// # Errors
/// Returns [`TransportError::ProtocolViolation`] for any reply other than the
/// complement, [`TransportError::ConnectionClosed`] if the peer hangs up.
pub fn exchange<S: Read + Write + ?Sized>(
    stream: &mut S,
    message: Message,
) -> Result<Message, TransportError> {
    stream.write_all(message.payload())?;

    let mut reply: Payload = [0; PAYLOAD_LEN];
    if !read_frame(stream, &mut reply).map_err(|e| TransportError::from_recv(e, None))? {
        return Err(TransportError::ConnectionClosed);
    }
    Ok(message.check_reply(&reply)?)
}

/// Consumer loop: answers 4-byte frames until the producer hangs up.
///
/// # Returns
/// Number of frames answered.
///
/// # Errors
/// Returns [`TransportError::ProtocolViolation`] on the first frame that is
/// not a valid payload, or the IO error that ended the stream.
pub fn serve<S: Read + Write + ?Sized>(stream: &mut S) -> Result<u64, TransportError> {
    let mut frame: Payload = [0; PAYLOAD_LEN];
    let mut served = 0u64;
    while read_frame(stream, &mut frame).map_err(|e| TransportError::from_recv(e, None))? {
        let request = Message::from_payload(&frame)?;
        stream.write_all(request.reply().payload())?;
        served += 1;
    }
    Ok(served)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = listen(TcpConfig::default().bind_addr).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = connect_to(addr, true).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.bind_addr.port(), 0);
        assert!(config.bind_addr.ip().is_loopback());
        assert!(config.nodelay);
        assert_eq!(config.accept_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_tcp_config_builder() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = TcpConfig::default()
            .nodelay(false)
            .bind_addr(addr)
            .accept_timeout(Duration::from_millis(250));
        assert!(!config.nodelay);
        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.accept_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_listen_picks_ephemeral_port() {
        let listener = listen(TcpConfig::default().bind_addr).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_round_trips_over_loopback() {
        let (producer, mut consumer) = loopback_pair();
        let server = thread::spawn(move || serve(&mut consumer).unwrap());

        let mut transport = TcpTransport::from_stream(producer).unwrap();
        assert_eq!(transport.kind(), TransportKind::Tcp);
        for _ in 0..100 {
            let trip = transport.run_cycle().unwrap();
            assert_eq!(trip.received, Message::Pong);
        }
        drop(transport);
        assert_eq!(server.join().unwrap(), 100);
    }

    #[test]
    fn test_producer_rejects_wrong_reply() {
        let (producer, mut consumer) = loopback_pair();
        let bogus = thread::spawn(move || {
            let mut frame = [0u8; PAYLOAD_LEN];
            consumer.read_exact(&mut frame).unwrap();
            consumer.write_all(b"pang").unwrap();
        });

        let mut transport = TcpTransport::from_stream(producer).unwrap();
        let err = transport.run_cycle().unwrap_err();
        assert!(err.is_protocol_violation());
        bogus.join().unwrap();
    }

    #[test]
    fn test_producer_sees_hang_up() {
        let (producer, consumer) = loopback_pair();
        drop(consumer);

        let mut transport = TcpTransport::from_stream(producer).unwrap();
        assert!(transport.run_cycle().is_err());
    }

    #[test]
    fn test_serve_rejects_garbage() {
        let (mut producer, mut consumer) = loopback_pair();
        producer.write_all(b"PING").unwrap();

        let err = serve(&mut consumer).unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_serve_answers_pong_with_ping() {
        let (mut producer, mut consumer) = loopback_pair();
        let server = thread::spawn(move || serve(&mut consumer).unwrap());

        assert_eq!(exchange(&mut producer, Message::Pong).unwrap(), Message::Ping);
        assert_eq!(exchange(&mut producer, Message::Ping).unwrap(), Message::Pong);

        drop(producer);
        assert_eq!(server.join().unwrap(), 2);
    }
}
