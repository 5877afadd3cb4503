//! Link to an xreflector.net FCS room.
//!
//! FCS rooms speak a terser dialect than YSF servers: a 25-byte `PING`
//! carries the node callsign and room designator, the reply is an
//! unmagicked 7- or 10-byte pong, and data rides in bare 130-byte packets
//! holding the frame body, the sequence byte and the designator. A 100-byte
//! station info record is sent exactly once, at the moment a pong completes
//! the link.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::{DgidNetwork, LinkStatus, lookup, same_host, try_recv, try_send};
use crate::error::{Error, Result};
use crate::frame::{self, Frame};
use crate::timer::Timer;

/// Fixed UDP port of the xreflector.net family.
pub const FCS_PORT: u16 = 62500;

const PING_LENGTH: usize = 25;
const INFO_LENGTH: usize = 100;
const DATA_LENGTH: usize = 130;
const CLOSE_PACKET: &[u8; 11] = b"CLOSE      ";

const SEND_POLL_MS: u64 = 800;
const RECV_POLL_SECS: u64 = 60;
const RESET_SECS: u64 = 1;

const QUEUE_CAPACITY: usize = 1000;

/// Station identity baked into the PING and INFO packets.
#[derive(Debug, Clone)]
pub struct FcsIdentity {
    pub callsign: String,
    pub rx_frequency: u32,
    pub tx_frequency: u32,
    pub locator: String,
    pub id: u32,
}

/// One UDP association with an FCS room.
pub struct FcsLink {
    socket: UdpSocket,
    addr: Option<SocketAddr>,
    designator: String,
    print_name: String,
    identity: FcsIdentity,
    ping: [u8; PING_LENGTH],
    info: [u8; INFO_LENGTH],
    statik: bool,
    queue: VecDeque<[u8; DATA_LENGTH]>,
    seq: u8,
    send_poll: Timer,
    recv_poll: Timer,
    reset: Timer,
    state: LinkStatus,
}

impl FcsLink {
    /// Bind a local socket and derive the room address from the 8-character
    /// designator (`"FCS00201"` resolves `fcs002.xreflector.net`).
    ///
    /// A failed lookup leaves the link constructed but unopenable.
    pub async fn new(
        local_port: u16,
        designator: &str,
        identity: FcsIdentity,
        statik: bool,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).await?;

        let mut link = Self {
            socket,
            addr: None,
            designator: String::new(),
            print_name: String::new(),
            identity,
            ping: [0u8; PING_LENGTH],
            info: [0u8; INFO_LENGTH],
            statik,
            queue: VecDeque::new(),
            seq: 0,
            send_poll: Timer::from_millis(SEND_POLL_MS),
            recv_poll: Timer::from_secs(RECV_POLL_SECS),
            reset: Timer::from_secs(RESET_SECS),
            state: LinkStatus::NotOpen,
        };

        link.set_room(designator);
        Ok(link)
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The room designator currently configured.
    pub fn designator(&self) -> &str {
        &self.designator
    }

    /// The pretty room name (`"FCS002-01"` form).
    pub fn print_name(&self) -> &str {
        &self.print_name
    }

    /// Point the link at a different room. Any link state is dropped; the
    /// caller re-links afterwards.
    pub fn set_room(&mut self, designator: &str) {
        let mut designator = designator.to_string();
        while designator.len() < 8 {
            designator.push('0');
        }
        designator.truncate(8);

        self.print_name = format!("{}-{}", &designator[0..6], &designator[6..8]);
        self.ping = build_ping(&self.identity.callsign, &designator);
        self.info = build_info(&self.identity);

        let host = format!("{}.xreflector.net", &designator[0..6].to_lowercase());
        self.addr = match lookup(&host, FCS_PORT) {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!("{e}");
                None
            }
        };

        self.designator = designator;
        self.seq = 0;
        self.queue.clear();
        if self.state != LinkStatus::NotOpen {
            self.state = LinkStatus::NotLinked;
        }
        self.send_poll.stop();
        self.recv_poll.stop();
    }

    /// Override the resolved room address. Test hook and static-config
    /// escape hatch.
    pub fn set_addr(&mut self, addr: SocketAddr) {
        self.addr = Some(addr);
    }

    fn write_poll(&mut self) {
        if self.state != LinkStatus::Linking && self.state != LinkStatus::Linked {
            return;
        }
        if let Some(addr) = self.addr {
            try_send(&self.socket, &self.ping, addr);
        }
    }
}

impl DgidNetwork for FcsLink {
    fn open(&mut self) -> Result<()> {
        if self.addr.is_none() {
            warn!("unable to resolve the address of {}", self.designator);
            self.state = LinkStatus::NotOpen;
            return Err(Error::resolve(self.designator.clone()));
        }

        debug!("opening FCS network connection to {}", self.print_name);
        self.state = LinkStatus::NotLinked;
        Ok(())
    }

    fn link(&mut self) {
        match self.state {
            LinkStatus::NotLinked => {
                self.state = LinkStatus::Linking;
                self.send_poll.start();
                self.recv_poll.start();
                self.write_poll();
            }
            LinkStatus::Linking => self.write_poll(),
            _ => {}
        }
    }

    fn unlink(&mut self) {
        if self.state == LinkStatus::NotOpen {
            return;
        }

        if let Some(addr) = self.addr {
            try_send(&self.socket, CLOSE_PACKET, addr);
        }

        if self.state == LinkStatus::Linked || self.state == LinkStatus::Linking {
            self.send_poll.stop();
            self.recv_poll.stop();
            info!("Unlinked from {}", self.print_name);
            self.state = LinkStatus::NotLinked;
        }
    }

    fn write(&mut self, _dgid: u8, frame: &Frame) {
        if self.state != LinkStatus::Linked {
            return;
        }
        let Some(addr) = self.addr else { return };

        let bytes = frame.as_bytes();
        let mut buffer = [b' '; DATA_LENGTH];
        buffer[0..120].copy_from_slice(&bytes[35..155]);
        buffer[120] = bytes[34];
        buffer[121..129].copy_from_slice(self.designator.as_bytes());

        try_send(&self.socket, &buffer, addr);
    }

    fn read(&mut self, _dgid: u8) -> Option<Frame> {
        let data = self.queue.pop_front()?;

        self.reset.start();

        // Body and sequence come straight off the wire; the room's pretty
        // name stands in as the via callsign.
        let mut bytes = [b' '; frame::FRAME_LENGTH];
        bytes[0..4].copy_from_slice(frame::magic::DATA);
        bytes[4..13].copy_from_slice(self.print_name.as_bytes());
        bytes[34] = self.seq;
        bytes[35..155].copy_from_slice(&data[0..120]);

        self.seq = self.seq.wrapping_add(2);

        Frame::from_bytes(&bytes)
    }

    fn clock(&mut self, ms: u64) {
        if self.state == LinkStatus::NotOpen {
            return;
        }

        self.recv_poll.clock(ms);
        if self.recv_poll.has_expired() {
            if self.statik {
                self.state = LinkStatus::Linking;
            } else {
                self.state = LinkStatus::NotLinked;
                self.send_poll.stop();
            }

            warn!("Lost link to {}", self.print_name);
            self.recv_poll.stop();
        }

        self.send_poll.clock(ms);
        if self.send_poll.has_expired() {
            self.write_poll();
            self.send_poll.start();
        }

        self.reset.clock(ms);
        if self.reset.has_expired() {
            self.seq = 0;
            self.reset.stop();
        }

        let mut buf = [0u8; 200];
        while let Some((len, from)) = try_recv(&self.socket, &mut buf) {
            if self.state == LinkStatus::NotLinked {
                continue;
            }
            let Some(addr) = self.addr else { continue };
            if !same_host(from, addr) {
                continue;
            }

            if len == 7 || len == 10 {
                self.recv_poll.start();

                if self.state == LinkStatus::Linking {
                    info!("Linked to {}", self.print_name);
                    self.state = LinkStatus::Linked;
                    try_send(&self.socket, &self.info, addr);
                }
            } else if len == DATA_LENGTH {
                self.recv_poll.start();

                if self.queue.len() < QUEUE_CAPACITY {
                    let mut data = [0u8; DATA_LENGTH];
                    data.copy_from_slice(&buf[..DATA_LENGTH]);
                    self.queue.push_back(data);
                }
            }
        }
    }

    fn close(&mut self) {
        debug!("closing FCS network connection to {}", self.print_name);
        self.state = LinkStatus::NotOpen;
    }

    fn status(&self) -> LinkStatus {
        self.state
    }

    fn desc(&self, _dgid: u8) -> String {
        format!("FCS: {}", self.designator)
    }
}

fn build_ping(callsign: &str, designator: &str) -> [u8; PING_LENGTH] {
    let mut ping = [0u8; PING_LENGTH];
    ping[0..4].copy_from_slice(b"PING");
    ping[4..10].fill(b' ');
    for (o, b) in ping[4..10].iter_mut().zip(callsign.bytes()) {
        *o = b;
    }
    ping[10..18].copy_from_slice(&designator.as_bytes()[0..8]);
    ping
}

fn build_info(identity: &FcsIdentity) -> [u8; INFO_LENGTH] {
    let text = format!(
        "{:>9}{:>9}{:<6.6}{:<12.12}{:>7}",
        identity.rx_frequency, identity.tx_frequency, identity.locator, "MMDVM", identity.id
    );

    let mut info = [b' '; INFO_LENGTH];
    info[0..text.len()].copy_from_slice(text.as_bytes());
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> FcsIdentity {
        FcsIdentity {
            callsign: "G4KLX".into(),
            rx_frequency: 430_500_000,
            tx_frequency: 438_100_000,
            locator: "IO92VA".into(),
            id: 12345,
        }
    }

    async fn link_with_peer() -> (FcsLink, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut link = FcsLink::new(0, "FCS00201", identity(), false).await.unwrap();
        link.set_addr(peer_addr);
        link.open().unwrap();

        (link, peer)
    }

    fn loopback(link: &FcsLink) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], link.local_addr().unwrap().port()))
    }

    async fn recv_packet(peer: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 200];
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn test_ping_layout() {
        let ping = build_ping("G4KLX", "FCS00201");
        assert_eq!(&ping[0..4], b"PING");
        assert_eq!(&ping[4..10], b"G4KLX ");
        assert_eq!(&ping[10..18], b"FCS00201");
        assert!(ping[18..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_info_layout() {
        let info = build_info(&identity());
        assert_eq!(info.len(), 100);
        assert_eq!(&info[0..9], b"430500000");
        assert_eq!(&info[9..18], b"438100000");
        assert_eq!(&info[18..24], b"IO92VA");
        assert_eq!(&info[24..36], b"MMDVM       ");
        assert_eq!(&info[36..43], b"  12345");
        assert!(info[43..].iter().all(|&b| b == b' '));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_linking_sends_ping_then_info_on_pong() {
        let (mut link, peer) = link_with_peer().await;
        let local = loopback(&link);

        link.link();
        let pkt = recv_packet(&peer).await;
        assert_eq!(pkt.len(), PING_LENGTH);
        assert_eq!(&pkt[0..4], b"PING");

        // 800 ms later another ping goes out.
        link.clock(SEND_POLL_MS);
        let pkt = recv_packet(&peer).await;
        assert_eq!(&pkt[0..4], b"PING");

        // A 10-byte pong completes the link and triggers exactly one INFO.
        peer.send_to(&[0u8; 10], local).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.clock(1);
        assert_eq!(link.status(), LinkStatus::Linked);

        let pkt = recv_packet(&peer).await;
        assert_eq!(pkt.len(), INFO_LENGTH);

        // Further pongs do not resend the info.
        peer.send_to(&[0u8; 7], local).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.clock(1);

        link.unlink();
        let pkt = recv_packet(&peer).await;
        assert_eq!(&pkt[..], &CLOSE_PACKET[..]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_data_reconstruction_sequences_by_two() {
        let (mut link, peer) = link_with_peer().await;
        let local = loopback(&link);

        link.link();
        peer.send_to(&[0u8; 10], local).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.clock(1);

        for _ in 0..3 {
            peer.send_to(&[0x55u8; DATA_LENGTH], local).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.clock(1);

        let f0 = link.read(0).unwrap();
        let f1 = link.read(0).unwrap();
        let f2 = link.read(0).unwrap();
        assert_eq!(f0.seq(), 0);
        assert_eq!(f1.seq(), 2);
        assert_eq!(f2.seq(), 4);
        assert_eq!(&f0.tag()[0..9], b"FCS002-01");
        assert_eq!(&f0.as_bytes()[35..155], &[0x55u8; 120][..]);

        // A second of idle resets the counter.
        link.clock(RESET_SECS * 1000);
        peer.send_to(&[0x55u8; DATA_LENGTH], local).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.clock(1);
        assert_eq!(link.read(0).unwrap().seq(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_outbound_data_layout() {
        let (mut link, peer) = link_with_peer().await;
        let local = loopback(&link);

        link.link();
        peer.send_to(&[0u8; 10], local).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.clock(1);
        recv_packet(&peer).await; // ping
        recv_packet(&peer).await; // info

        let mut frame = Frame::new();
        frame.set_seq(0x42);
        link.write(0, &frame);

        let pkt = recv_packet(&peer).await;
        assert_eq!(pkt.len(), DATA_LENGTH);
        assert_eq!(&pkt[0..120], &frame.as_bytes()[35..155]);
        assert_eq!(pkt[120], 0x42);
        assert_eq!(&pkt[121..129], b"FCS00201");
    }
}
