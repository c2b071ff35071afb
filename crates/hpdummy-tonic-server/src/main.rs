#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use hpdummy::{Drain, DrainSupervisor};
use server::{
    config::{CliArgs, ServerConfig},
    grpc::{self, service::EchoService},
    http::{self, AppState},
    pidfile::PidFile,
    shutdown::shutdown_signal,
    stats,
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.quiet)?;

    let pool = hpdummy::pool::initialize(config.buffer_size)?.clone();
    let pidfile = config
        .pidfile
        .clone()
        .map(PidFile::create)
        .transpose()?;

    let http_listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.http_addr))?;
    let grpc_listener = TcpListener::bind(config.grpc_addr)
        .await
        .with_context(|| format!("failed to bind gRPC listener on {}", config.grpc_addr))?;

    let drain = Drain::global().clone();
    let supervisor =
        DrainSupervisor::new(drain.clone(), config.grace_period, config.shutdown_timeout);
    let hostname: Arc<str> = Arc::from(config.hostname.as_str());

    let state = AppState {
        pool: pool.clone(),
        drain: drain.clone(),
        hostname: Arc::clone(&hostname),
        local_addr: http_listener.local_addr().ok(),
    };
    let http_stop = supervisor.stop_token();
    let http_server = tokio::spawn(async move {
        http::serve(http_listener, http::router(state), http_stop)
            .await
            .context("HTTP server error")
    });

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    tokio::spawn(grpc::report_health(health_reporter, drain.clone()));
    let echo = grpc::build_echo_service(
        EchoService::new(Arc::clone(&hostname), drain.clone()),
        drain.clone(),
        config.grpc_max_message_bytes,
    );
    let grpc_server = tokio::spawn(grpc::serve(
        grpc_listener,
        echo,
        health_service,
        supervisor.stop_token(),
    ));

    let stats_stop = CancellationToken::new();
    let stats_task = config
        .stats_interval
        .map(|interval| stats::spawn(pool.clone(), drain.clone(), interval, stats_stop.clone()));

    log_startup_info(&config, pidfile.as_ref().map(PidFile::pid));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining...");

    let report = supervisor
        .shutdown(vec![("http", http_server), ("grpc", grpc_server)])
        .await;
    if !report.is_clean() {
        tracing::warn!(servers = ?report.servers, "Servers did not all stop gracefully");
    }

    stats_stop.cancel();
    if let Some(task) = stats_task {
        let _ = task.await;
    }

    providers.shutdown();
    if let Some(pidfile) = pidfile {
        pidfile.remove();
    }

    tracing::info!("bye bye!");
    Ok(())
}

fn log_startup_info(config: &ServerConfig, pid: Option<u32>) {
    if cfg!(debug_assertions) {
        tracing::debug!("Starting with full config: {:#?}", config);
    }
    tracing::info!("=== Server Started ===");
    tracing::info!(
        hostname = %config.hostname,
        pid = pid.unwrap_or_else(std::process::id),
        "Identity"
    );
    tracing::info!(
        http = %config.http_addr,
        grpc = %config.grpc_addr,
        buffer_kib = config.buffer_size / 1024,
        grace_ms = config.grace_period.as_millis() as u64,
        shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
        quiet = config.quiet,
        "Listening"
    );
    tracing::info!("{}", http::HELP);
    tracing::info!("  - echo.EchoService/Echo, StreamEcho -> Unary and bidirectional streaming");
}
