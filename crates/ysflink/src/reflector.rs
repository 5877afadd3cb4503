//! The reflector: peer registry, fan-out forwarder and watchdog.
//!
//! Peers register by polling. Every `YSFD` frame from a registered peer is
//! forwarded verbatim to every other peer, unless the caller is on the
//! block list. Silent peers are evicted after a minute; a watchdog tracks
//! transmissions so the caller identity is logged once per over rather
//! than once per frame.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::blocklist::BlockList;
use crate::error::Result;
use crate::frame::{CALLSIGN_LENGTH, STATUS_LENGTH, magic};
use crate::net::{same_host, try_recv, try_send};
use crate::timer::Timer;
use crate::util::name_hash;

const PEER_TIMEOUT_SECS: u64 = 60;
const POLL_ALL_SECS: u64 = 5;
const DUMP_SECS: u64 = 120;
const WATCHDOG_MS: u64 = 1500;

const UNKNOWN_CALLSIGN: &[u8; CALLSIGN_LENGTH] = b"??????????";
const SPACES: &[u8; CALLSIGN_LENGTH] = b"          ";

/// A registered repeater or gateway.
struct Peer {
    callsign: String,
    addr: SocketAddr,
    timer: Timer,
}

/// The star forwarder.
pub struct Reflector {
    socket: UdpSocket,
    peers: Vec<Peer>,
    blocklist: BlockList,
    status: [u8; STATUS_LENGTH],
    id: u32,
    name: String,
    description: String,
    poll_timer: Timer,
    dump_timer: Timer,
    watchdog: Timer,
    tag: [u8; CALLSIGN_LENGTH],
    src: [u8; CALLSIGN_LENGTH],
    dst: [u8; CALLSIGN_LENGTH],
    blocked: bool,
}

impl Reflector {
    pub async fn new(
        port: u16,
        id: u32,
        name: &str,
        description: &str,
        blocklist: BlockList,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;

        let mut name = name.to_string();
        let mut description = description.to_string();
        while name.len() < 16 {
            name.push(' ');
        }
        name.truncate(16);
        while description.len() < 14 {
            description.push(' ');
        }
        description.truncate(14);

        let mut reflector = Self {
            socket,
            peers: Vec::new(),
            blocklist,
            status: [0u8; STATUS_LENGTH],
            id,
            name,
            description,
            poll_timer: Timer::from_secs(POLL_ALL_SECS),
            dump_timer: Timer::from_secs(DUMP_SECS),
            watchdog: Timer::from_millis(WATCHDOG_MS),
            tag: *SPACES,
            src: *SPACES,
            dst: *SPACES,
            blocked: false,
        };

        reflector.blocklist.start();
        reflector.update_status();
        reflector.poll_timer.start();
        reflector.dump_timer.start();

        Ok(reflector)
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    // The 42-byte YSFS status line: id, name, description, peer count.
    fn update_status(&mut self) {
        let hash = if self.id == 0 {
            name_hash(&self.name)
        } else {
            self.id
        };

        let count = self.peers.len().min(999);
        let text = format!(
            "YSFS{:05}{:16.16}{:14.14}{:03}",
            hash % 100_000,
            self.name,
            self.description,
            count
        );
        self.status.copy_from_slice(text.as_bytes());
    }

    fn find_peer(&self, addr: SocketAddr) -> Option<usize> {
        self.peers.iter().position(|p| same_host(p.addr, addr))
    }

    fn write_poll(&self, addr: SocketAddr) {
        let mut poll = [0u8; 14];
        poll[0..4].copy_from_slice(magic::POLL);
        poll[4..14].copy_from_slice(b"REFLECTOR ");
        try_send(&self.socket, &poll, addr);
    }

    fn process_poll(&mut self, data: &[u8], addr: SocketAddr) {
        let idx = match self.find_peer(addr) {
            Some(idx) => idx,
            None => {
                let callsign = if data.len() >= 14 {
                    String::from_utf8_lossy(&data[4..14]).to_string()
                } else {
                    String::from_utf8_lossy(SPACES).to_string()
                };

                info!("Adding {} ({})", callsign.trim_end(), addr);
                self.peers.push(Peer {
                    callsign,
                    addr,
                    timer: Timer::from_secs(PEER_TIMEOUT_SECS),
                });
                self.update_status();
                self.peers.len() - 1
            }
        };

        self.peers[idx].timer.start();
        self.write_poll(addr);
    }

    fn process_unlink(&mut self, addr: SocketAddr) {
        if let Some(idx) = self.find_peer(addr) {
            let peer = self.peers.remove(idx);
            info!("Removing {} ({}) unlinked", peer.callsign.trim_end(), peer.addr);
            self.update_status();
        }
    }

    fn process_data(&mut self, data: &[u8], addr: SocketAddr) {
        if self.find_peer(addr).is_none() {
            return;
        }

        if !self.watchdog.is_running() {
            // First frame of a transmission: capture the identities and
            // consult the block list.
            self.tag.copy_from_slice(&data[4..14]);
            self.src = extract_callsign(&data[14..24]);
            self.dst = extract_callsign(&data[24..34]);

            self.blocked = self.blocklist.check(&self.src);
            self.log_transmission();
        } else if self.tag == data[4..14] {
            // Later frames can reveal identities the header lacked.
            let mut changed = false;

            if &data[14..24] != SPACES && self.src == *UNKNOWN_CALLSIGN {
                self.src.copy_from_slice(&data[14..24]);
                changed = true;
            }

            if &data[24..34] != SPACES && self.dst == *UNKNOWN_CALLSIGN {
                self.dst.copy_from_slice(&data[24..34]);
                changed = true;
            }

            if changed {
                self.blocked = self.blocklist.check(&self.src);
                self.log_transmission();
            }
        }

        if self.blocked {
            return;
        }

        self.watchdog.start();

        for peer in &self.peers {
            if !same_host(peer.addr, addr) {
                try_send(&self.socket, data, peer.addr);
            }
        }

        if data[34] & 0x01 == 0x01 {
            debug!("Received end of transmission");
            self.watchdog.stop();
        }
    }

    fn log_transmission(&self) {
        let src = String::from_utf8_lossy(&self.src);
        let dst = String::from_utf8_lossy(&self.dst);
        let tag = String::from_utf8_lossy(&self.tag);

        if self.blocked {
            info!("Data from {src} at {tag} blocked");
        } else {
            info!("Received data from {src} to {dst} at {tag}");
        }
    }

    fn process_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        if data.len() < 4 {
            return;
        }

        match &data[0..4] {
            m if m == magic::POLL => self.process_poll(data, addr),
            m if m == magic::UNLINK => self.process_unlink(addr),
            m if m == magic::STATUS => {
                try_send(&self.socket, &self.status, addr);
            }
            m if m == magic::DATA && data.len() == 155 => self.process_data(data, addr),
            // Options and info packets are accepted and ignored.
            _ => {}
        }
    }

    /// One loop tick: drain the socket, then advance every timer.
    pub fn clock(&mut self, ms: u64) {
        let mut buf = [0u8; 200];
        while let Some((len, from)) = try_recv(&self.socket, &mut buf) {
            let data = buf[..len].to_vec();
            self.process_datagram(&data, from);
        }

        self.poll_timer.clock(ms);
        if self.poll_timer.has_expired() {
            for peer in &self.peers {
                self.write_poll(peer.addr);
            }
            self.poll_timer.start();
        }

        let mut evicted = false;
        for peer in &mut self.peers {
            peer.timer.clock(ms);
        }
        self.peers.retain(|peer| {
            if peer.timer.has_expired() {
                info!("Removing {} ({}) disappeared", peer.callsign.trim_end(), peer.addr);
                evicted = true;
                false
            } else {
                true
            }
        });
        if evicted {
            self.update_status();
        }

        self.watchdog.clock(ms);
        if self.watchdog.has_expired() {
            debug!("Network watchdog has expired");
            self.watchdog.stop();
        }

        self.dump_timer.clock(ms);
        if self.dump_timer.has_expired() {
            self.dump_peers();
            self.dump_timer.start();
        }

        self.blocklist.clock(ms);
    }

    fn dump_peers(&self) {
        if self.peers.is_empty() {
            info!("No repeaters/gateways linked");
            return;
        }

        info!("Currently linked repeaters/gateways:");
        for peer in &self.peers {
            info!(
                "    {}: {} {}/{}",
                peer.callsign.trim_end(),
                peer.addr,
                peer.timer.elapsed_ms() / 1000,
                peer.timer.timeout_ms() / 1000
            );
        }
    }
}

fn extract_callsign(field: &[u8]) -> [u8; CALLSIGN_LENGTH] {
    let mut out = [0u8; CALLSIGN_LENGTH];
    if field == SPACES {
        out.copy_from_slice(UNKNOWN_CALLSIGN);
    } else {
        out.copy_from_slice(field);
    }
    out
}
