//! Consumer end of the pingpong benchmark.
//!
//! Spawned by the `pingpong` producer with one subcommand per transport.
//! Stdout is a data channel (pipe transport) or carries the single readiness
//! line, so all logging goes to stderr. Outside the pipe transport stdin is
//! only watched: when it closes the producer is gone and the consumer exits.

use clap::{ArgAction, Parser, Subcommand};
use pingpong_transport::process::{announce_ready, exit_on_hangup};
use pingpong_transport::shm::{Segment, SegmentHandle, ShmChannel, WaitStrategy, WaitTimeout};
use pingpong_transport::{pipe, shm, tcp, udp};
use std::net::{Ipv4Addr, SocketAddr};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pingpong-consumer")]
#[command(version)]
#[command(about = "Answers ping with pong over one IPC transport", long_about = None)]
struct Cli {
    #[command(subcommand)]
    transport: Consumer,
}

#[derive(Subcommand)]
enum Consumer {
    /// Answer 5-byte frames on stdin/stdout
    Pipe,

    /// Connect to the producer's TCP listener
    Tcp {
        /// Producer port on 127.0.0.1
        port: u16,
        /// Disable Nagle's algorithm
        #[arg(action = ArgAction::Set)]
        nodelay: bool,
    },

    /// Exchange datagrams with the producer
    Udp {
        /// Port to bind on 127.0.0.1
        our_port: u16,
        /// Producer port on 127.0.0.1
        their_port: u16,
        /// Socket receive buffer size in bytes
        #[arg(long = "recv-buffer", value_name = "BYTES")]
        recv_buffer: Option<usize>,
    },

    /// Attach to the producer's shared segment
    Shm {
        /// Segment handle
        handle: String,
        /// Poll strategy: spin, yield or sleep-us=N
        #[arg(long, default_value = "spin")]
        wait: WaitStrategy,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let served = match cli.transport {
        Consumer::Pipe => {
            let mut stdin = std::io::stdin().lock();
            let mut stdout = std::io::stdout().lock();
            pipe::serve(&mut stdin, &mut stdout)?
        }

        Consumer::Tcp { port, nodelay } => {
            exit_on_hangup(|| {})?;
            let producer = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            let mut stream = tcp::connect_to(producer, nodelay)?;
            tracing::debug!(port, nodelay, "connected");
            tcp::serve(&mut stream)?
        }

        Consumer::Udp {
            our_port,
            their_port,
            recv_buffer,
        } => {
            exit_on_hangup(|| {})?;
            let socket = udp::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, our_port)), recv_buffer)?;
            socket.connect(SocketAddr::from((Ipv4Addr::LOCALHOST, their_port)))?;
            announce_ready()?;
            tracing::debug!(our_port, their_port, "bound");
            udp::serve(&socket, None)?
        }

        Consumer::Shm { handle, wait } => {
            let handle = SegmentHandle::from(handle);
            let segment = Segment::open(&handle)?;
            // A producer that was killed never unlinks its segment.
            let path = handle.path().to_path_buf();
            exit_on_hangup(move || {
                std::fs::remove_file(path).ok();
            })?;
            let mut channel = ShmChannel::new(segment, wait, WaitTimeout::Infinite);
            announce_ready()?;
            tracing::debug!(%wait, "attached");
            shm::serve(&mut channel, None)?
        }
    };

    tracing::info!(served, "consumer finished");
    Ok(())
}
