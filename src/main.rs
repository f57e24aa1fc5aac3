// src/main.rs

//! The main entry point for the palisade keeper.

use std::sync::Arc;

use anyhow::Result;
use palisade::config::Config;
use palisade::core::db::ControllerClient;
use palisade::core::exit::{self, EXIT_BAD_CONFIG, EXIT_OK};
use palisade::core::keeper::KeeperLoop;
use palisade::core::monitor::MonitorClient;
use palisade::core::{signals, supervisor};
use std::env;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

/// Enables extra logging and test-only code paths when set to "1".
const DEBUG_ENV: &str = "PALISADE_DEBUG";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("palisade version {VERSION}");
        return Ok(());
    }

    // The configuration path can be provided via --config; it defaults to
    // "palisade.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("palisade.toml")
        .to_string();

    // `--service node-active` is how the supervisor re-executes this binary
    // as the keeper loop child; operators run the supervisor mode.
    let service = args
        .iter()
        .position(|arg| arg == "--service")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    setup_logging(&config_path);

    match service {
        Some("node-active") => {
            let code = run_node_active(&config_path).await;
            std::process::exit(code);
        }
        Some(other) => {
            eprintln!("Unknown service '{other}'. Usage: palisade --service node-active --config /path/to/palisade.toml");
            std::process::exit(EXIT_BAD_CONFIG);
        }
        None => {
            let config = match Config::from_file(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
                    std::process::exit(EXIT_BAD_CONFIG);
                }
            };
            info!("Starting palisade {VERSION} in supervisor mode...");
            if let Err(e) = supervisor::run(config_path, config).await {
                error!("Supervisor runtime error: {e:#}");
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Initializes logging: `RUST_LOG` wins, then `PALISADE_DEBUG=1`, then the
/// configured log level (read leniently, since logging must come up even when
/// the config file is broken).
fn setup_logging(config_path: &str) {
    let configured = Config::from_file(config_path)
        .map(|config| config.log_level)
        .unwrap_or_else(|_| "info".to_string());
    let default_filter = if env::var(DEBUG_ENV).as_deref() == Ok("1") {
        "debug".to_string()
    } else {
        configured
    };
    let filter = env::var("RUST_LOG").unwrap_or(default_filter);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .compact()
        .with_ansi(true)
        .init();
}

/// The keeper loop child: load configuration, wire up the collaborators, and
/// reconcile until stopped. The exit code tells the supervisor what happened.
async fn run_node_active(config_path: &str) -> i32 {
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration from \"{config_path}\": {e:#}");
            return EXIT_BAD_CONFIG;
        }
    };

    let monitor_settings = match config.monitor_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Unusable monitor settings: {e}");
            return EXIT_BAD_CONFIG;
        }
    };

    let handle = signals::SignalHandle::new();
    signals::install(handle.clone());

    let db = Arc::new(ControllerClient::new(config.controller.socket.clone()));
    let monitor = Box::new(MonitorClient::new(monitor_settings));

    let mut keeper = KeeperLoop::new(
        config,
        config_path.to_string(),
        db,
        monitor,
        handle,
    );

    match keeper.run().await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!("Keeper loop error: {e}");
            exit::code_for(&e)
        }
    }
}
