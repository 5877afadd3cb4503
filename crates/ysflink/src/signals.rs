//! Process signal handling for the cooperative loops.
//!
//! Signal watchers run as background tasks and record the last signal in a
//! process-scope flag; the loop reads the flag at the top of each
//! iteration. SIGINT and SIGTERM request an orderly shutdown, SIGHUP a
//! restart with a re-read configuration.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::signal::unix::{SignalKind, signal};

use crate::error::Result;

const NONE: u8 = 0;
const SHUTDOWN: u8 = 1;
const RESTART: u8 = 2;

/// What the loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    None,
    Shutdown,
    Restart,
}

/// Handle to the signal watchers.
#[derive(Clone)]
pub struct Signals {
    state: Arc<AtomicU8>,
}

impl Signals {
    /// Install watchers for SIGINT, SIGTERM and SIGHUP.
    pub fn install() -> Result<Self> {
        let state = Arc::new(AtomicU8::new(NONE));

        for (kind, value) in [
            (SignalKind::interrupt(), SHUTDOWN),
            (SignalKind::terminate(), SHUTDOWN),
            (SignalKind::hangup(), RESTART),
        ] {
            let mut stream = signal(kind)?;
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                loop {
                    if stream.recv().await.is_none() {
                        break;
                    }
                    state.store(value, Ordering::SeqCst);
                }
            });
        }

        Ok(Self { state })
    }

    /// The most recent signal, if any.
    pub fn poll(&self) -> SignalState {
        match self.state.load(Ordering::SeqCst) {
            SHUTDOWN => SignalState::Shutdown,
            RESTART => SignalState::Restart,
            _ => SignalState::None,
        }
    }

    /// Clear the flag before re-entering the loop after a restart.
    pub fn reset(&self) {
        self.state.store(NONE, Ordering::SeqCst);
    }
}
