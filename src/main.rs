use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rtt_pingpong::config::{self, BenchmarkConfig, ChannelSpec, EchoConfig};
use rtt_pingpong::event::{ENABLED_EVENT_CODES_PROPERTY, EventLog, EventMask};
use rtt_pingpong::idle::IdleStrategyKind;
use rtt_pingpong::orchestrator;
use rtt_pingpong::pong::EchoResponder;
use rtt_pingpong::transport::{self, log_close_failure};

#[derive(Parser, Debug)]
#[command(name = "rtt-pingpong")]
#[command(about = "Round-trip latency benchmark: ping sends timestamps, pong echoes them")]
#[command(version = "1.0.0")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Diagnostic event codes to log: prod, all, or a comma-separated list of names
    #[arg(long, global = true, env = ENABLED_EVENT_CODES_PROPERTY)]
    event_log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send pings, measure round trips and print the latency distribution
    Ping {
        #[command(flatten)]
        channels: ChannelArgs,

        /// Measured messages
        #[arg(short = 'n', long, env = "RTT_MESSAGE_COUNT", default_value_t = config::DEFAULT_MESSAGE_COUNT)]
        messages: u64,

        /// Messages per warm-up iteration
        #[arg(long, env = "RTT_WARMUP_MESSAGE_COUNT", default_value_t = config::DEFAULT_WARMUP_MESSAGE_COUNT)]
        warmup_messages: u64,

        /// Warm-up iterations, all discarded from the report
        #[arg(long, env = "RTT_WARMUP_ITERATIONS", default_value_t = config::DEFAULT_WARMUP_ITERATIONS)]
        warmup_iterations: u64,

        /// Message length in bytes, at least 8
        #[arg(short, long, env = "RTT_MESSAGE_LENGTH", default_value_t = config::DEFAULT_MESSAGE_LENGTH)]
        length: usize,

        /// Wait before joining the receiver at the end of each phase (milliseconds)
        #[arg(long, env = "RTT_LINGER_MS", default_value_t = 0)]
        linger_ms: u64,

        /// Pause after every accepted send (microseconds)
        #[arg(long, env = "RTT_SEND_PAUSE_US", default_value_t = 1000)]
        send_pause_us: u64,

        /// Highest round trip the histogram tracks before clamping (milliseconds)
        #[arg(long, default_value_t = 500)]
        highest_trackable_ms: u64,

        /// Histogram precision
        #[arg(long, default_value_t = config::DEFAULT_SIGNIFICANT_DIGITS)]
        significant_digits: u8,

        /// Pin receiver threads to this CPU core
        #[arg(long, env = "RTT_RECEIVER_CORE")]
        receiver_core: Option<usize>,

        /// Run the echo responder inside this process
        #[arg(long, env = "RTT_EMBEDDED_DRIVER")]
        embedded_driver: bool,
    },
    /// Echo every ping back on the pong channel until Ctrl+C
    Pong {
        #[command(flatten)]
        channels: ChannelArgs,
    },
}

#[derive(Args, Debug)]
struct ChannelArgs {
    /// Channel pings travel on: udp://host:port or ipc
    #[arg(long, env = "RTT_PING_CHANNEL", default_value = config::DEFAULT_PING_CHANNEL)]
    ping_channel: String,

    #[arg(long, env = "RTT_PING_STREAM_ID", default_value_t = config::DEFAULT_PING_STREAM_ID)]
    ping_stream_id: i32,

    /// Channel pongs travel on: udp://host:port or ipc
    #[arg(long, env = "RTT_PONG_CHANNEL", default_value = config::DEFAULT_PONG_CHANNEL)]
    pong_channel: String,

    #[arg(long, env = "RTT_PONG_STREAM_ID", default_value_t = config::DEFAULT_PONG_STREAM_ID)]
    pong_stream_id: i32,

    /// Poll budget per subscription poll
    #[arg(long, env = "RTT_FRAGMENT_LIMIT", default_value_t = config::DEFAULT_FRAGMENT_LIMIT)]
    fragment_limit: usize,

    /// How threads wait when there is nothing to do
    #[arg(long, env = "RTT_IDLE", value_enum, default_value_t = IdleStrategyKind::BusySpin)]
    idle: IdleStrategyKind,
}

impl ChannelArgs {
    fn specs(&self) -> Result<(ChannelSpec, ChannelSpec)> {
        let ping = ChannelSpec::new(&self.ping_channel, self.ping_stream_id).context("invalid ping channel")?;
        let pong = ChannelSpec::new(&self.pong_channel, self.pong_stream_id).context("invalid pong channel")?;
        Ok((ping, pong))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let log = EventLog::new(EventMask::from_config(cli.event_log.as_deref()));

    match cli.command {
        Commands::Ping {
            channels,
            messages,
            warmup_messages,
            warmup_iterations,
            length,
            linger_ms,
            send_pause_us,
            highest_trackable_ms,
            significant_digits,
            receiver_core,
            embedded_driver,
        } => {
            let (ping, pong) = channels.specs()?;
            let config = BenchmarkConfig {
                ping,
                pong,
                message_length: length,
                fragment_limit: channels.fragment_limit,
                message_count: messages,
                warmup_message_count: warmup_messages,
                warmup_iterations,
                linger: Duration::from_millis(linger_ms),
                send_pause: Duration::from_micros(send_pause_us),
                idle: channels.idle,
                highest_trackable: Duration::from_millis(highest_trackable_ms),
                significant_digits,
                receiver_core,
                embedded_driver,
            };

            let outcome = tokio::task::spawn_blocking(move || {
                let mut out = std::io::stdout().lock();
                orchestrator::run_ping(config, log, &mut out)
            })
            .await
            .context("ping task panicked")?
            .context("ping run failed")?;

            info!(
                "Measured {} round trips (mean {:.3} us), {} warm-up samples discarded, {} offers rejected",
                outcome.histogram.count(),
                outcome.histogram.mean() / 1000.0,
                outcome.warmup_samples_discarded,
                outcome.send_rejections
            );
        }
        Commands::Pong { channels } => {
            let (ping, pong) = channels.specs()?;
            let config = EchoConfig {
                ping,
                pong,
                fragment_limit: channels.fragment_limit,
                idle: channels.idle,
            };
            run_pong(config, log).await?;
        }
    }

    Ok(())
}

async fn run_pong(config: EchoConfig, log: EventLog) -> Result<()> {
    info!("Subscribing Ping at {}", config.ping);
    info!("Publishing Pong at {}", config.pong);
    let (publication, subscription) = transport::connect_pong(&config, log).context("failed to open pong channels")?;

    let running = Arc::new(AtomicBool::new(true));
    let shutdown = running.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down echo responder");
                shutdown.store(false, Ordering::Relaxed);
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let echoed = tokio::task::spawn_blocking(move || {
        let mut responder = EchoResponder::new(publication, subscription, config.idle.build(), config.fragment_limit);
        let result = responder.run(&running);
        let (publication, subscription) = responder.close();
        log_close_failure("pong publication", publication);
        log_close_failure("ping subscription", subscription);
        result
    })
    .await
    .context("pong task panicked")?
    .context("echo responder failed")?;

    info!("Echoed {} fragments", echoed);
    Ok(())
}
