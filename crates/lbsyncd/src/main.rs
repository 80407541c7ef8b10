// # lbsyncd - lbsync Daemon
//
// This daemon is a THIN integration layer: it reads configuration from the
// environment, wires the HTTP node source and the HAProxy applier into the
// core engine, and runs it until SIGTERM/SIGINT. All reconcile logic lives in
// lbsync-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Discovery
// - `LBSYNC_DISCOVERY_URL`: Base URL of the discovery service (nodes are read from `/nodes`)
// - `LBSYNC_API_KEY`: API key sent as `X-API-Key` (required)
// - `LBSYNC_HTTP_TIMEOUT_SECS`: Request timeout in seconds (default 5)
//
// ### Proxy
// - `LBSYNC_CONFIG_PATH`: HAProxy configuration file to patch
// - `LBSYNC_BACKEND`: Backend section owned by lbsync (default `ws_nodes`)
// - `LBSYNC_HAPROXY_BIN`: HAProxy executable (default `haproxy`)
// - `LBSYNC_PID_FILE`: HAProxy pid file; empty to discover pids with `pidof`
// - `LBSYNC_DRY_RUN`: Validate only, never install or reload
//
// ### Engine
// - `LBSYNC_INTERVAL_SECS`: Seconds between reconcile cycles (default 60)
// - `LBSYNC_LOG_LEVEL`: trace, debug, info, warn or error (default info)
//
// ## Example
//
// ```bash
// export LBSYNC_DISCOVERY_URL=http://wsupdates.internal:3000
// export LBSYNC_API_KEY=your_key
// export LBSYNC_CONFIG_PATH=/usr/local/etc/haproxy/haproxy.cfg
//
// lbsyncd
// ```

use anyhow::{Context, Result};
use lbsync_core::{LbSyncConfig, ReconcileEngine};
use lbsync_discovery_http::HttpNodeSource;
use lbsync_haproxy::HaproxyApplier;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum LbSyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<LbSyncExitCode> for ExitCode {
    fn from(code: LbSyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    lbsync: LbSyncConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let api_key = env::var("LBSYNC_API_KEY").context(
            "LBSYNC_API_KEY is required. Set it via: export LBSYNC_API_KEY=your_key",
        )?;

        let mut lbsync = LbSyncConfig::new(api_key);

        if let Ok(url) = env::var("LBSYNC_DISCOVERY_URL") {
            lbsync.discovery.base_url = url;
        }
        lbsync.discovery.timeout_secs =
            parse_var("LBSYNC_HTTP_TIMEOUT_SECS", lbsync.discovery.timeout_secs)?;

        if let Ok(path) = env::var("LBSYNC_CONFIG_PATH") {
            lbsync.proxy.config_path = PathBuf::from(path);
        }
        if let Ok(backend) = env::var("LBSYNC_BACKEND") {
            lbsync.proxy.backend = backend;
        }
        if let Ok(binary) = env::var("LBSYNC_HAPROXY_BIN") {
            lbsync.proxy.binary = PathBuf::from(binary);
        }
        if let Ok(pid_file) = env::var("LBSYNC_PID_FILE") {
            lbsync.proxy.pid_file = if pid_file.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(pid_file))
            };
        }
        if let Ok(dry_run) = env::var("LBSYNC_DRY_RUN") {
            lbsync.proxy.dry_run = parse_bool("LBSYNC_DRY_RUN", &dry_run)?;
        }

        lbsync.engine.interval_secs = parse_var("LBSYNC_INTERVAL_SECS", lbsync.engine.interval_secs)?;

        Ok(Self {
            lbsync,
            log_level: env::var("LBSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Component-level checks live in `LbSyncConfig::validate()`; this adds
    /// the daemon's own range and environment checks.
    fn validate(&self) -> Result<()> {
        self.lbsync.validate()?;

        // Check for obvious placeholder keys (common mistake)
        let key_lower = self.lbsync.discovery.api_key.to_lowercase();
        if key_lower.contains("your_key") || key_lower.contains("replace_me") {
            anyhow::bail!(
                "LBSYNC_API_KEY appears to be a placeholder. \
                Use the key configured on the discovery service."
            );
        }

        let interval = self.lbsync.engine.interval_secs;
        if !(1..=86400).contains(&interval) {
            anyhow::bail!(
                "LBSYNC_INTERVAL_SECS must be between 1 and 86400 seconds. Got: {}",
                interval
            );
        }

        let timeout = self.lbsync.discovery.timeout_secs;
        if !(1..=60).contains(&timeout) {
            anyhow::bail!(
                "LBSYNC_HTTP_TIMEOUT_SECS must be between 1 and 60 seconds. Got: {}",
                timeout
            );
        }

        if timeout >= interval {
            eprintln!(
                "WARNING: LBSYNC_HTTP_TIMEOUT_SECS ({}) is not shorter than LBSYNC_INTERVAL_SECS ({}). \
                A slow discovery service will delay every cycle.",
                timeout, interval
            );
        }

        let config_path = &self.lbsync.proxy.config_path;
        if !config_path.is_file() {
            anyhow::bail!(
                "LBSYNC_CONFIG_PATH does not point to a file: {}",
                config_path.display()
            );
        }

        // Warn if using HTTP (not HTTPS)
        if self.lbsync.discovery.base_url.starts_with("http://") {
            eprintln!(
                "WARNING: LBSYNC_DISCOVERY_URL uses HTTP (not HTTPS). \
                The API key is sent in clear text."
            );
        }

        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "LBSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

/// Parse a numeric variable, falling back to `default` when unset
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, value, e)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => anyhow::bail!("{} must be true or false. Got: {}", name, value),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return LbSyncExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return LbSyncExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return LbSyncExitCode::ConfigError.into();
    }

    info!("Starting lbsyncd daemon");

    // The loop is strictly sequential, one worker is enough
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return LbSyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => LbSyncExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                LbSyncExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let lbsync = config.lbsync;

    let node_source = HttpNodeSource::new(&lbsync.discovery)
        .context("Failed to create discovery node source")?;
    info!("Discovery endpoint: {}", node_source.url());

    let applier = HaproxyApplier::new(&lbsync.proxy);
    if lbsync.proxy.dry_run {
        info!("Dry-run mode: configurations are validated but never installed");
    }

    let (engine, mut events) = ReconcileEngine::new(Box::new(node_source), Box::new(applier), lbsync)
        .context("Failed to create reconcile engine")?;

    // Engine events duplicate the engine's own logs; drain them at trace level
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::trace!("engine event: {:?}", event);
        }
    });

    let mut signal_name = "unknown";
    engine
        .run_until(async {
            match wait_for_shutdown().await {
                Ok(name) => signal_name = name,
                Err(e) => error!("Signal handling failed, shutting down: {:#}", e),
            }
        })
        .await?;

    info!("Received shutdown signal: {}", signal_name);
    info!("Shutting down daemon");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
