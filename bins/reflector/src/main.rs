//! ysf-reflector - star forwarder for YSF repeaters and gateways.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use ysflink::blocklist::BlockList;
use ysflink::config::{ReflectorConfig, level_filter};
use ysflink::reflector::Reflector;
use ysflink::signals::{SignalState, Signals};
use ysflink::timer::Stopwatch;

#[derive(Parser)]
#[command(name = "ysf-reflector", about = "YSF reflector", disable_version_flag = true)]
struct Cli {
    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Configuration file.
    #[arg(default_value = "/etc/ysf-reflector.ini")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("ysf-reflector {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            eprintln!("ysf-reflector: cannot install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut subscriber_installed = false;
    loop {
        let config = match ReflectorConfig::load(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ysf-reflector: cannot read {}: {e}", cli.config.display());
                return ExitCode::FAILURE;
            }
        };

        if !subscriber_installed {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                        tracing_subscriber::EnvFilter::new(level_filter(config.log_display_level))
                    }),
                )
                .init();
            subscriber_installed = true;
        }

        match run(&config, &signals).await {
            Ok(SignalState::Restart) => {
                info!("ysf-reflector restarting on SIGHUP");
                signals.reset();
            }
            Ok(_) => {
                info!("ysf-reflector exiting");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("ysf-reflector: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
}

async fn run(config: &ReflectorConfig, signals: &Signals) -> ysflink::Result<SignalState> {
    let blocklist = BlockList::new(&config.block_file, config.block_time);

    let mut reflector = Reflector::new(
        config.port,
        config.id,
        &config.name,
        &config.description,
        blocklist,
    )
    .await?;

    info!("ysf-reflector {} is starting", env!("CARGO_PKG_VERSION"));

    let mut stopwatch = Stopwatch::new();
    loop {
        match signals.poll() {
            SignalState::None => {}
            state => return Ok(state),
        }

        let ms = stopwatch.elapsed_ms();
        stopwatch.start();

        reflector.clock(ms);

        if ms < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
