//! ysf-gateway - DG-ID gateway between a repeater modem and the YSF, FCS
//! and IMRS networks.

mod app;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ysflink::config::{GatewayConfig, level_filter};
use ysflink::signals::{SignalState, Signals};

#[derive(Parser)]
#[command(name = "ysf-gateway", about = "YSF DG-ID gateway", disable_version_flag = true)]
struct Cli {
    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Configuration file.
    #[arg(default_value = "/etc/ysf-gateway.ini")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("ysf-gateway {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let config = match GatewayConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ysf-gateway: cannot read {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(level_filter(config.log_display_level))
            }),
        )
        .init();

    let signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            eprintln!("ysf-gateway: cannot install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = config;
    loop {
        match app::run(&config, &signals).await {
            Ok(SignalState::Restart) => {
                tracing::info!("ysf-gateway restarting on SIGHUP");
                signals.reset();

                match GatewayConfig::load(&cli.config) {
                    Ok(fresh) => config = fresh,
                    Err(e) => {
                        eprintln!("ysf-gateway: cannot re-read {}: {e}", cli.config.display());
                        return ExitCode::FAILURE;
                    }
                }
            }
            Ok(_) => {
                tracing::info!("ysf-gateway exiting");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("ysf-gateway: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
}
