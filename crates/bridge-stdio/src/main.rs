//! mcp-bridge - stdio JSON-RPC to HTTP bridge.
//!
//! Reads newline-delimited JSON-RPC on stdin, forwards calls to a remote MCP
//! service and writes one response line per request on stdout. Logs go to
//! stderr.
//!
//! Exit codes: `0` graceful shutdown, `1` transport failure, `2` bad
//! configuration, `3` failed liveness probe.

mod logging;

use anyhow::{Context, Result};
use bridge_core::{
    Bridge, BridgeConfig, BridgeExit, CancellationToken, CoalesceMode, Defaults, RetryPolicy,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{error, info, warn};

const EXIT_OK: i32 = 0;
const EXIT_TRANSPORT: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_PROBE: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "mcp-bridge", version)]
#[command(about = "Bridge line-delimited JSON-RPC on stdio to a remote MCP service over HTTP")]
struct Args {
    /// Remote host
    #[arg(long, default_value = Defaults::REMOTE_HOST)]
    host: String,

    /// Remote port
    #[arg(short, long, default_value_t = Defaults::REMOTE_PORT)]
    port: u16,

    /// Use https for the remote service
    #[arg(long)]
    https: bool,

    /// API key sent with every remote call
    #[arg(long, env = "MCP_BRIDGE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Number of worker tasks
    #[arg(long, default_value_t = Defaults::WORKERS)]
    workers: usize,

    /// Bounded queue capacity in front of the workers
    #[arg(long, default_value_t = Defaults::QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Coalescing window for list requests in milliseconds (0 = disabled)
    #[arg(long, default_value_t = 0)]
    coalesce_window_ms: u64,

    /// Use a fixed coalescing window instead of restarting it on every arrival
    #[arg(long)]
    coalesce_fixed: bool,

    /// Attempts per remote call, including the first
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// End-to-end timeout per request in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Grace period for in-flight requests on shutdown in milliseconds
    #[arg(long, default_value_t = 5000)]
    shutdown_grace_ms: u64,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    debug_log: Option<PathBuf>,
}

impl Args {
    fn to_config(&self) -> BridgeConfig {
        let mode = if self.coalesce_fixed {
            CoalesceMode::Fixed
        } else {
            CoalesceMode::Debounce
        };

        BridgeConfig::new(self.api_key.clone().unwrap_or_default())
            .with_remote(self.host.clone(), self.port)
            .with_tls(self.https)
            .with_workers(self.workers)
            .with_queue_capacity(self.queue_capacity)
            .with_coalesce_window(Duration::from_millis(self.coalesce_window_ms))
            .with_coalesce_mode(mode)
            .with_retry(RetryPolicy::new().with_max_attempts(self.max_attempts))
            .with_request_timeout(self.request_timeout_ms.map(Duration::from_millis))
            .with_shutdown_grace(Duration::from_millis(self.shutdown_grace_ms))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log = match logging::init(&args.log_level, args.debug_log.as_deref()) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("mcp-bridge: {:#}", err);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let code = match run(args, log).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            EXIT_TRANSPORT
        }
    };

    // The stdin reader may still be parked on a blocking read; exit without
    // waiting for it.
    std::process::exit(code);
}

async fn run(args: Args, log: logging::LogHandle) -> Result<i32> {
    let config = args.to_config();
    if let Err(err) = config.validate() {
        error!("{}", err);
        return Ok(EXIT_CONFIG);
    }

    info!(
        "Starting mcp-bridge {} -> {}",
        env!("CARGO_PKG_VERSION"),
        config.remote.base_url()
    );

    let signal = CancellationToken::new();
    spawn_signal_listener(signal.clone());

    let mut bridge = Bridge::builder(config)
        .with_log_control(Arc::new(log))
        .with_shutdown_signal(signal)
        .build(tokio::io::stdout())
        .context("Failed to start bridge")?;

    if let Err(err) = bridge.connect().await {
        error!("Remote service is not usable: {}", err);
        return Ok(EXIT_PROBE);
    }

    let exit = bridge.run(BufReader::new(tokio::io::stdin())).await?;
    info!("Bridge exited: {:?}", exit);

    Ok(match exit {
        BridgeExit::EndOfInput | BridgeExit::ShutdownRequested => EXIT_OK,
        BridgeExit::TransportFailure => EXIT_TRANSPORT,
    })
}

fn spawn_signal_listener(signal: CancellationToken) {
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Termination signal received");
        signal.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = wait_for_ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!("Failed to install SIGTERM handler: {}", err);
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("mcp-bridge").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--api-key", "k"]);
        let config = args.to_config();

        assert_eq!(config.remote.base_url(), "http://127.0.0.1:8080");
        assert_eq!(config.processor.workers, 4);
        assert_eq!(config.processor.queue_capacity, 64);
        assert!(!config.coalesce.is_enabled());
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.processor.request_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_map_onto_config() {
        let args = parse(&[
            "--api-key",
            "k",
            "--host",
            "mcp.internal",
            "--port",
            "9443",
            "--https",
            "--workers",
            "8",
            "--queue-capacity",
            "2",
            "--coalesce-window-ms",
            "25",
            "--coalesce-fixed",
            "--max-attempts",
            "5",
            "--request-timeout-ms",
            "1500",
        ]);
        let config = args.to_config();

        assert_eq!(config.remote.mcp_url(), "https://mcp.internal:9443/api/mcp");
        assert_eq!(config.processor.workers, 8);
        assert_eq!(config.processor.queue_capacity, 2);
        assert_eq!(config.coalesce.window, Duration::from_millis(25));
        assert_eq!(config.coalesce.mode, CoalesceMode::Fixed);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(
            config.processor.request_timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_zero_workers_fails_validation() {
        let config = parse(&["--api-key", "k", "--workers", "0"]).to_config();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result = Args::try_parse_from(["mcp-bridge", "--port", "99999"]);
        assert!(result.is_err());
    }
}
