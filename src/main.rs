//! ParadoxFX - command-driven media orchestrator
//!
//! Binary entry point: parse the CLI, load the INI configuration, install
//! the tracing subscriber, and hand control to the supervisor until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paradox_fx::{config, supervisor};

#[derive(Parser, Debug)]
#[command(name = "pfx", version, about = "ParadoxFX media orchestrator")]
struct Cli {
    /// Path to the INI configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Configuration file as a positional argument (legacy invocation)
    #[arg(value_name = "CONFIG")]
    config_positional: Option<PathBuf>,
}

fn init_tracing(config_level: Option<&str>) {
    // Priority: RUST_LOG > LOG_LEVEL (legacy) > config log_level > default
    let log_filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .ok()
        .or_else(|| config_level.map(|level| format!("paradox_fx={}", level)))
        .unwrap_or_else(|| "paradox_fx=info".to_string());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .or(cli.config_positional)
        .unwrap_or_else(|| PathBuf::from("pfx.ini"));

    let sections = match config::load_sections(&config_path) {
        Ok(sections) => sections,
        Err(e) => {
            init_tracing(None);
            error!("startup failed: {:#}", e);
            return ExitCode::from(1);
        }
    };
    init_tracing(config::peek_log_level(&sections).as_deref());

    info!(
        "starting ParadoxFX v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    let config = match config::from_sections(sections) {
        Ok(config) => config,
        Err(e) => {
            error!("startup failed: {:#}", e);
            return ExitCode::from(1);
        }
    };
    info!(
        "configuration loaded: {} zone(s), broker {}:{}",
        config.zones.len(),
        config.global.mqtt.host,
        config.global.mqtt.port
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    match supervisor::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("startup failed: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
