use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use hpdummy::pool::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use std::{net::SocketAddr, path::PathBuf};

/// Runtime configuration for the `hpdummy-server` binary.
///
/// Every flag can also be set through the environment variable named next to
/// it; a `.env` file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hpdummy-server",
    version,
    about = "Synthetic HTTP and gRPC endpoint for testing proxies and gateways"
)]
pub struct CliArgs {
    /// HTTP listen address.
    ///
    /// Environment variable: `HTTP_ADDR`
    #[arg(long, env = "HTTP_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub addr: String,

    /// gRPC listen address.
    ///
    /// Environment variable: `GRPC_ADDR`
    #[arg(long, env = "GRPC_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub grpc_addr: String,

    /// Size of each pooled streaming buffer in KiB (64 to 4096).
    ///
    /// Memory used by streaming responses is roughly this value times the
    /// number of concurrent streams.
    ///
    /// Environment variable: `BUFFER_SIZE_KB`
    #[arg(long, env = "BUFFER_SIZE_KB", default_value_t = 256)]
    pub buffer_size: usize,

    /// PID file written at startup and removed on exit. Empty disables it.
    ///
    /// Environment variable: `PIDFILE`
    #[arg(long, env = "PIDFILE", default_value_t = String::from("hpdummy.pid"))]
    pub pidfile: String,

    /// Suppress per-request log lines.
    ///
    /// Environment variable: `QUIET`
    #[arg(long, env = "QUIET", default_value_t = true, action = clap::ArgAction::Set)]
    pub quiet: bool,

    /// Time between entering drain mode and stopping the listeners, so idle
    /// keep-alive clients see `Connection: close`.
    ///
    /// Environment variable: `GRACE_PERIOD_MS`
    #[arg(long, env = "GRACE_PERIOD_MS", default_value_t = 1000)]
    pub grace_period_ms: u64,

    /// Upper bound on waiting for each server to stop before forcing it.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 60)]
    pub shutdown_timeout_secs: u64,

    /// Interval of the pool and stream statistics log. 0 disables it.
    ///
    /// Environment variable: `STATS_INTERVAL_SECS`
    #[arg(long, env = "STATS_INTERVAL_SECS", default_value_t = 10)]
    pub stats_interval_secs: u64,

    /// Maximum encoded and decoded gRPC message size.
    ///
    /// Environment variable: `GRPC_MAX_MESSAGE_BYTES`
    #[arg(long, env = "GRPC_MAX_MESSAGE_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub grpc_max_message_bytes: usize,

    /// Name reported as `_myhostname` and `server_hostname`. Defaults to the
    /// kernel hostname.
    ///
    /// Environment variable: `HOSTNAME`
    #[arg(long, env = "HOSTNAME")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    /// Buffer size in bytes.
    pub buffer_size: usize,
    pub pidfile: Option<PathBuf>,
    pub quiet: bool,
    pub grace_period: Duration,
    pub shutdown_timeout: Duration,
    pub stats_interval: Option<Duration>,
    pub grpc_max_message_bytes: usize,
    pub hostname: String,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let http_addr: SocketAddr = args
            .addr
            .parse()
            .with_context(|| format!("invalid HTTP_ADDR `{}`", args.addr))?;
        let grpc_addr: SocketAddr = args
            .grpc_addr
            .parse()
            .with_context(|| format!("invalid GRPC_ADDR `{}`", args.grpc_addr))?;

        if http_addr == grpc_addr && http_addr.port() != 0 {
            bail!("HTTP_ADDR and GRPC_ADDR must differ (both are {http_addr})");
        }

        let buffer_size = args
            .buffer_size
            .checked_mul(1024)
            .ok_or_else(|| anyhow::anyhow!("Overflow in buffer size computation"))?;
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&buffer_size) {
            bail!(
                "BUFFER_SIZE_KB must be between {} and {} (got {})",
                MIN_BUFFER_SIZE / 1024,
                MAX_BUFFER_SIZE / 1024,
                args.buffer_size
            );
        }

        if args.shutdown_timeout_secs == 0 {
            bail!("SHUTDOWN_TIMEOUT_SECS must be greater than 0");
        }

        if args.grpc_max_message_bytes == 0 {
            bail!("GRPC_MAX_MESSAGE_BYTES must be greater than 0");
        }

        let pidfile = (!args.pidfile.trim().is_empty()).then(|| PathBuf::from(args.pidfile));
        let stats_interval =
            (args.stats_interval_secs > 0).then(|| Duration::from_secs(args.stats_interval_secs));
        let hostname = args
            .hostname
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(kernel_hostname);

        Ok(Self {
            http_addr,
            grpc_addr,
            buffer_size,
            pidfile,
            quiet: args.quiet,
            grace_period: Duration::from_millis(args.grace_period_ms),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            stats_interval,
            grpc_max_message_bytes: args.grpc_max_message_bytes,
            hostname,
        })
    }
}

fn kernel_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| String::from("unknown"))
}
