//! pingpong - cross-process round-trip latency over pipes, TCP, UDP and
//! shared memory.
//!
//! Run with: `cargo run --release -p pingpong-bench --bin pingpong -- -n 100000`

use clap::{Parser, ValueEnum};
use pingpong_bench::{RunReport, Runner};
use pingpong_transport::shm::{ShmConfig, WaitStrategy};
use pingpong_transport::tcp::TcpConfig;
use pingpong_transport::udp::UdpConfig;
use pingpong_transport::{
    ConsumerCommand, Readiness, TransportConfig, TransportHandle, TransportKind,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pingpong")]
#[command(version)]
#[command(about = "Measures ping/pong round-trip latency between two processes", long_about = None)]
struct Cli {
    /// Transports to run, comma separated (default: all)
    #[arg(short, long = "transport", value_delimiter = ',')]
    transports: Vec<TransportKind>,

    /// Measured cycles per transport
    #[arg(short = 'n', long, default_value_t = 100_000)]
    cycles: u64,

    /// Unmeasured warm-up cycles per transport
    #[arg(long, default_value_t = 1_000)]
    warmup: u64,

    /// TCP_NODELAY setting(s) to run
    #[arg(long, value_enum, default_value_t = Nodelay::Both)]
    nodelay: Nodelay,

    /// Shared-memory poll strategy: spin, yield or sleep-us=N
    #[arg(long, default_value = "spin")]
    wait: WaitStrategy,

    /// Sleep this long after spawning instead of waiting for a readiness line
    #[arg(long, value_name = "MS")]
    settle_ms: Option<u64>,

    /// Path to the consumer executable (default: next to this binary)
    #[arg(long)]
    consumer: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Nodelay {
    On,
    Off,
    Both,
}

impl Nodelay {
    fn settings(self) -> &'static [bool] {
        match self {
            Self::On => &[true],
            Self::Off => &[false],
            Self::Both => &[true, false],
        }
    }
}

fn plan(cli: &Cli) -> Vec<(String, TransportConfig)> {
    let kinds = if cli.transports.is_empty() {
        TransportKind::ALL.to_vec()
    } else {
        cli.transports.clone()
    };

    let mut runs = Vec::new();
    for kind in kinds {
        match kind {
            TransportKind::Pipe => runs.push(("pipe".to_string(), TransportConfig::Pipe)),
            TransportKind::Tcp => {
                for &nodelay in cli.nodelay.settings() {
                    let label = if nodelay { "tcp (nodelay)" } else { "tcp (nagle)" };
                    let config = TcpConfig::default().nodelay(nodelay);
                    runs.push((label.to_string(), TransportConfig::Tcp(config)));
                }
            }
            TransportKind::Udp => {
                runs.push(("udp".to_string(), TransportConfig::Udp(UdpConfig::default())));
            }
            TransportKind::Shm => {
                let config = ShmConfig::default().wait(cli.wait);
                runs.push((format!("shm ({})", cli.wait), TransportConfig::Shm(config)));
            }
        }
    }
    runs
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut command = match &cli.consumer {
        Some(path) => ConsumerCommand::new(path),
        None => ConsumerCommand::sibling()?,
    };
    if let Some(ms) = cli.settle_ms {
        command = command.readiness(Readiness::Settle(Duration::from_millis(ms)));
    }

    let runner = Runner::new(cli.cycles).warmup(cli.warmup);
    let mut reports: Vec<RunReport> = Vec::new();

    for (label, config) in plan(&cli) {
        // Setup and teardown stay outside the runner's measured loop.
        let mut handle = TransportHandle::connect(&config, &command)?;
        let report = runner.run(label, &mut handle)?;
        drop(handle);
        reports.push(report);
    }

    println!(
        "{:<14} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "transport", "cycles", "mean", "p50", "p99", "p99.9", "min", "max"
    );
    for report in &reports {
        let s = &report.stats;
        println!(
            "{:<14} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
            report.label,
            s.count,
            format!("{:.2?}", s.mean),
            format!("{:.2?}", s.median),
            format!("{:.2?}", s.p99),
            format!("{:.2?}", s.p999),
            format!("{:.2?}", s.min),
            format!("{:.2?}", s.max),
        );
    }

    Ok(())
}
