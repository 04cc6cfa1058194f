//! wxlogd - weather station serial logger
//!
//! Reads lines from the station's serial port, converts each into a
//! fixed-layout packet and writes it to the output queue until interrupted.

mod app;
mod ready;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use wxlog_config::AppConfig;
use wxlog_obs::ObsSettings;

#[derive(Parser, Debug)]
#[command(name = "wxlogd")]
#[command(about = "Weather station serial logger", long_about = None)]
struct Cli {
    /// Config file (default: $WXLOG_CONFIG, then ./wxlog.toml)
    config: Option<PathBuf>,

    /// Replay a captured device log instead of opening the serial port
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is not up yet, so configuration problems go to the console.
    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wxlogd: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = wxlog_obs::init(&config.module_name, &ObsSettings::from(&config.output_log)) {
        eprintln!("wxlogd: {e}");
        return ExitCode::FAILURE;
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = cancel_tx.send(true);
    });

    match app::run(config, cli.replay.as_deref(), cancel_rx).await {
        Ok(summary) => {
            info!(
                delivered = summary.delivered,
                last_sequence = summary.last_sequence,
                "wxlogd stopped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
