//! Protocol and engine library for the YSF (C4FM) gateway suite.
//!
//! This crate holds everything the three executables share: the 155-byte
//! frame model, the link state machines toward YSF reflectors, FCS rooms
//! and the IMRS mesh, the DG-ID fan-out switch, the Wires-X and DTMF
//! command engines, the reflector's peer registry, and the ambient plumbing
//! (timers, configuration, blocklist, signals).
//!
//! # Design
//!
//! Every component is driven by an explicit millisecond tick (`clock(ms)`)
//! from a single cooperative loop; sockets are only touched with
//! non-blocking operations, and nothing here ever sleeps. That keeps the
//! protocol machinery deterministic under test: tests feed synthetic ticks
//! instead of waiting for wall-clock time.
//!
//! # Example
//!
//! ```ignore
//! use ysflink::net::{DgidNetwork, ysf::YsfLink};
//! use ysflink::switch::{DgidEntry, DgidSwitch};
//!
//! let mut switch = DgidSwitch::new(true);
//! let link = YsfLink::new("0.0.0.0", 42013, "FR Paris", Some(addr), "G4KLX", false).await?;
//! switch.install(1, DgidEntry {
//!     network: Box::new(link),
//!     statik: false,
//!     rf_hang_ms: 120_000,
//!     net_hang_ms: 120_000,
//!     modes: ysflink::fich::MODE_ALL,
//!     net_dgid: 0,
//! });
//! ```

pub mod blocklist;
pub mod checksum;
pub mod config;
pub mod dtmf;
pub mod error;
pub mod fich;
pub mod frame;
pub mod hosts;
pub mod net;
pub mod parrot;
pub mod payload;
pub mod reflector;
pub mod signals;
pub mod switch;
pub mod timer;
pub mod util;
pub mod wiresx;

// Re-export the types that every binary touches.
pub use error::{Error, Result};
pub use fich::Fich;
pub use frame::Frame;
pub use net::{DgidNetwork, LinkStatus};
pub use timer::{Stopwatch, Timer};
