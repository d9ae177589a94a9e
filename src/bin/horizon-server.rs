//! Standalone inspection/control server.
//!
//! Serves the HTTP API and runs the metric tickers against an existing
//! horizon deployment in Redis. Supervisors are not run here: job types can
//! only be hydrated in the process that registered them, so configured
//! supervisor sections are ignored with a warning.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use horizon::{Config, Horizon};

#[derive(Debug, Parser)]
#[command(name = "horizon-server", version, about = "Job queue inspection server")]
struct Cli {
    /// Path to a TOML configuration file.
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // controlled by environment variable, e.g. RUST_LOG=horizon=debug
    env_logger::init();

    let cli = Cli::parse();
    let mut config = match cli.config {
        Some(path) => match Config::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{}", err);
                std::process::exit(1);
            }
        },
        None => {
            warn!("no config file specified, using default config");
            Config::default()
        }
    };

    if !config.supervisors.is_empty() {
        warn!(
            "ignoring {} configured supervisor(s); run supervisors in the process that registers the job types",
            config.supervisors.len()
        );
        config.supervisors.clear();
    }

    let runtime = match Horizon::new(config).await {
        Ok(runtime) => Arc::new(runtime),
        Err(err) => {
            eprintln!("failed to initialise horizon: {}", err);
            std::process::exit(1);
        }
    };

    let stopper = runtime.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
            let _ = stopper.stop();
        }
    });

    if let Err(err) = runtime.start().await {
        eprintln!("horizon exited with error: {}", err);
        std::process::exit(1);
    }
}
