//! ysf-parrot - records a transmission and plays it straight back.
//!
//! The parrot answers polls and status queries like any reflector, but it
//! has exactly one peer at a time: whoever sent the last data frame. Two
//! seconds after the end of a transmission it replays the recording at one
//! frame every 100 ms, paced by elapsed-time arithmetic rather than
//! sleeps.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{debug, info};
use ysflink::frame::{Frame, magic, poll_packet};
use ysflink::parrot::ParrotStore;
use ysflink::signals::{SignalState, Signals};
use ysflink::timer::{Stopwatch, Timer};

/// Longest recordable transmission, seconds.
const RECORD_SECS: usize = 180;

/// Pause between the end of a transmission and the replay.
const TURNAROUND_SECS: u64 = 2;

/// Replay pacing.
const FRAME_INTERVAL_MS: u64 = 100;

const WATCHDOG_MS: u64 = 1500;

#[derive(Parser)]
#[command(name = "ysf-parrot", about = "YSF parrot", disable_version_flag = true)]
struct Cli {
    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// UDP port to listen on.
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("ysf-parrot {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let Some(port) = cli.port else {
        eprintln!("ysf-parrot: error: a port number is required");
        return ExitCode::FAILURE;
    };
    if port == 0 {
        eprintln!("ysf-parrot: error: invalid port number");
        return ExitCode::FAILURE;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            eprintln!("ysf-parrot: cannot install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(port, &signals).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ysf-parrot: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(port: u16, signals: &Signals) -> ysflink::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;

    info!("ysf-parrot {} is starting", env!("CARGO_PKG_VERSION"));

    let mut store = ParrotStore::new(RECORD_SECS);
    let mut peer: Option<SocketAddr> = None;

    let mut watchdog = Timer::from_millis(WATCHDOG_MS);
    let mut turnaround = Timer::from_secs(TURNAROUND_SECS);

    let mut playing = false;
    let mut playout_ms: u64 = 0;
    let mut count: u64 = 0;

    let mut stopwatch = Stopwatch::new();
    loop {
        if signals.poll() != SignalState::None {
            info!("ysf-parrot exiting");
            return Ok(());
        }

        let mut buf = [0u8; 200];
        while let Ok((len, from)) = socket.try_recv_from(&mut buf) {
            let data = &buf[..len];
            if len < 4 {
                continue;
            }

            if &data[0..4] == magic::POLL {
                let _ = socket.try_send_to(&poll_packet("PARROT"), from);
            } else if &data[0..4] == magic::STATUS {
                let status = format!("YSFS{:05}{:<16.16}{:<14.14}{:03}", 1, "Parrot", "Parrot", 0);
                let _ = socket.try_send_to(status.as_bytes(), from);
            } else if let Some(frame) = Frame::from_bytes(data) {
                store.write(&frame);
                watchdog.start();
                peer = Some(from);

                if frame.is_end() {
                    debug!("Received end of transmission");
                    turnaround.start();
                    watchdog.stop();
                    store.end();
                }
            }
            // Options, info and unlink packets fall through untouched.
        }

        if turnaround.has_expired() {
            if !playing {
                playing = true;
                playout_ms = 0;
                count = 0;
            }

            // One frame per 100 ms of elapsed replay time.
            let wanted = playout_ms / FRAME_INTERVAL_MS;
            while count < wanted {
                match (store.read(), peer) {
                    (Some(frame), Some(addr)) => {
                        let _ = socket.try_send_to(frame.as_bytes(), addr);
                        count += 1;
                    }
                    _ => {
                        store.clear();
                        peer = None;
                        turnaround.stop();
                        playing = false;
                        count = wanted;
                    }
                }
            }
        }

        let ms = stopwatch.elapsed_ms();
        stopwatch.start();

        watchdog.clock(ms);
        turnaround.clock(ms);
        if playing {
            playout_ms += ms;
        }

        if watchdog.has_expired() {
            debug!("Watchdog expired, treating the transmission as ended");
            turnaround.start();
            watchdog.stop();
            store.end();
        }

        if ms < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
