use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use netgauge::config::{LogFormat, LoggingConfig};
use netgauge::model::Protocol;
use netgauge::progress::sinks::{ConsoleSink, JsonLinesSink};
use netgauge::{report, NetgaugeConfig, ProgressEmitter, TestEngine, TestTarget};

#[derive(Parser)]
#[command(
    name = "netgauge",
    about = "Network diagnostics: throughput, latency and route tracing",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (overrides NETGAUGE_CONFIG and /etc/netgauge)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit progress and results as JSON lines on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Host name or address of the remote end
    #[arg(long)]
    host: String,

    /// iperf3 server port (defaults to the configured port)
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send ICMP echo requests and report loss and round-trip times
    Ping {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of echo requests
        #[arg(long)]
        count: Option<u32>,
    },

    /// Trace the route to the host
    Traceroute {
        #[command(flatten)]
        target: TargetArgs,

        /// Maximum number of hops
        #[arg(long)]
        max_hops: Option<u32>,
    },

    /// Measure download then upload throughput against an iperf3 server
    SpeedTest {
        #[command(flatten)]
        target: TargetArgs,

        /// Seconds per direction
        #[arg(long)]
        duration: Option<u32>,

        /// Swap which phase uses reverse mode
        #[arg(long)]
        reverse: bool,

        /// Number of parallel streams
        #[arg(long)]
        streams: Option<u32>,

        /// Use UDP instead of TCP
        #[arg(long)]
        udp: bool,

        /// Target bitrate for UDP runs (iperf3 notation, e.g. 100M)
        #[arg(long)]
        bitrate: Option<String>,
    },

    /// Ping, speed test and traceroute in sequence
    Full {
        #[command(flatten)]
        target: TargetArgs,

        /// Seconds per speed-test direction
        #[arg(long)]
        duration: Option<u32>,

        /// Number of echo requests
        #[arg(long)]
        count: Option<u32>,

        /// Swap which speed-test phase uses reverse mode
        #[arg(long)]
        reverse: bool,

        /// Maximum number of traceroute hops
        #[arg(long)]
        max_hops: Option<u32>,
    },

    /// Check whether an iperf3 server answers
    Check {
        #[command(flatten)]
        target: TargetArgs,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn resolve_target(args: &TargetArgs, config: &NetgaugeConfig) -> Result<TestTarget> {
    let port = args.port.unwrap_or(config.defaults.port);
    TestTarget::new(args.host.as_str(), port).context("invalid target")
}

/// Print a result when progress is going to the console. In JSON mode the
/// `test_complete` line already carries it.
fn print_summary(json: bool, summary: impl FnOnce() -> String) {
    if !json {
        println!("\n{}", summary());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = NetgaugeConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    let emitter = if cli.json {
        ProgressEmitter::new(JsonLinesSink)
    } else {
        ProgressEmitter::new(ConsoleSink)
    };
    let engine = TestEngine::new(&config, emitter);

    let ctrl_c_engine = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_engine.cancel();
        }
    });

    match cli.command {
        Commands::Ping { target, count } => {
            let target = resolve_target(&target, &config)?;
            let count = count.unwrap_or(config.defaults.ping_count);
            tracing::info!(%target, count, "running ping test");
            let result = engine.run_ping_test(&target, count).await?;
            print_summary(cli.json, || report::format_ping(&result));
        }
        Commands::Traceroute { target, max_hops } => {
            let target = resolve_target(&target, &config)?;
            let max_hops = max_hops.unwrap_or(config.defaults.max_hops);
            tracing::info!(%target, max_hops, "running traceroute");
            let result = engine.run_traceroute_test(&target, max_hops).await?;
            print_summary(cli.json, || report::format_traceroute(&result));
        }
        Commands::SpeedTest {
            target,
            duration,
            reverse,
            streams,
            udp,
            bitrate,
        } => {
            let target = resolve_target(&target, &config)?;
            let duration = duration.unwrap_or(config.defaults.duration_secs);
            let mut options = engine.speed_options(duration, reverse);
            if let Some(streams) = streams {
                options.streams = streams.max(1);
            }
            if udp {
                options.protocol = Protocol::Udp;
            }
            if bitrate.is_some() {
                options.udp_bitrate = bitrate;
            }
            tracing::info!(%target, duration, reverse, streams = options.streams, "running speed test");
            let result = engine.run_speed_test_with(&target, &options).await?;
            print_summary(cli.json, || report::format_speed(&result));
        }
        Commands::Full {
            target,
            duration,
            count,
            reverse,
            max_hops,
        } => {
            let target = resolve_target(&target, &config)?;
            let duration = duration.unwrap_or(config.defaults.duration_secs);
            let count = count.unwrap_or(config.defaults.ping_count);
            let max_hops = max_hops.unwrap_or(config.defaults.max_hops);
            tracing::info!(%target, duration, count, reverse, max_hops, "running full test");
            let result = engine
                .run_full_test(&target, duration, count, reverse, max_hops)
                .await?;
            print_summary(cli.json, || report::format_full(&result));
        }
        Commands::Check { target } => {
            let target = resolve_target(&target, &config)?;
            let reachable = engine.check_connectivity(&target).await;
            if cli.json {
                println!("{}", serde_json::json!({ "target": target, "reachable": reachable }));
            } else {
                println!("{target}: {}", if reachable { "reachable" } else { "unreachable" });
            }
            if !reachable {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
