//! Link to a YSF reflector or to the local repeater modem.
//!
//! The protocol is four tagged control packets plus the 155-byte data
//! frame: `YSFP` poll (14 bytes), `YSFU` unlink (14 bytes), `YSFO` options
//! (50 bytes) and `YSFD` data. Link state is maintained by polling every
//! 5 seconds and expecting any traffic back within 60.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::{DgidNetwork, FrameQueue, LinkStatus, try_recv, try_send};
use crate::error::{Error, Result};
use crate::frame::{self, Frame, OPTIONS_LENGTH, POLL_LENGTH};
use crate::timer::Timer;

const SEND_POLL_SECS: u64 = 5;
const RECV_POLL_SECS: u64 = 60;

/// One UDP association with a YSF server (or the modem).
pub struct YsfLink {
    socket: UdpSocket,
    addr: Option<SocketAddr>,
    name: String,
    statik: bool,
    callsign: String,
    options: Option<[u8; OPTIONS_LENGTH]>,
    queue: FrameQueue,
    send_poll: Timer,
    recv_poll: Timer,
    state: LinkStatus,
}

impl YsfLink {
    /// Bind a local socket and associate it with a remote server.
    ///
    /// `addr` is `None` when the remote address failed to resolve; the link
    /// constructs but `open()` will fail.
    pub async fn new(
        local_addr: &str,
        local_port: u16,
        name: &str,
        addr: Option<SocketAddr>,
        callsign: &str,
        statik: bool,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((local_addr, local_port)).await?;

        Ok(Self {
            socket,
            addr,
            name: name.to_string(),
            statik,
            callsign: callsign.to_string(),
            options: None,
            queue: FrameQueue::default(),
            send_poll: Timer::from_secs(SEND_POLL_SECS),
            recv_poll: Timer::from_secs(RECV_POLL_SECS),
            state: LinkStatus::NotOpen,
        })
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Configure a 36-byte option string sent on linking.
    pub fn set_options(&mut self, options: &str) {
        if options.is_empty() {
            self.options = None;
        } else {
            self.options = Some(frame::options_packet(&self.callsign, options));
        }
    }

    /// Retarget the link at a different server. Drops any link state; the
    /// caller polls afresh afterwards.
    pub fn set_destination(&mut self, name: &str, addr: SocketAddr) {
        self.name = name.to_string();
        self.addr = Some(addr);
        if self.state != LinkStatus::NotOpen {
            self.state = LinkStatus::NotLinked;
        }
        self.send_poll.stop();
        self.recv_poll.stop();
    }

    /// Forget the remote server entirely.
    pub fn clear_destination(&mut self) {
        self.addr = None;
        if self.state != LinkStatus::NotOpen {
            self.state = LinkStatus::NotLinked;
        }
        self.send_poll.stop();
        self.recv_poll.stop();
    }

    /// Whether a remote server is currently configured.
    pub fn has_destination(&self) -> bool {
        self.addr.is_some()
    }

    /// The name of the current destination.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a frame regardless of link state. Used for Wires-X command
    /// passthrough, which races the link handshake on purpose.
    pub fn write_direct(&self, frame: &Frame) {
        if let Some(addr) = self.addr {
            try_send(&self.socket, frame.as_bytes(), addr);
        }
    }

    fn write_poll(&mut self) {
        if self.state != LinkStatus::Linking && self.state != LinkStatus::Linked {
            return;
        }
        let Some(addr) = self.addr else { return };
        let poll: [u8; POLL_LENGTH] = frame::poll_packet(&self.callsign);
        try_send(&self.socket, &poll, addr);
    }

    fn write_options(&mut self) {
        if let (Some(addr), Some(options)) = (self.addr, self.options.as_ref()) {
            try_send(&self.socket, options, addr);
        }
    }

    fn process_datagram(&mut self, data: &[u8], from: SocketAddr) {
        let Some(addr) = self.addr else { return };
        if !super::same_host(from, addr) {
            return;
        }

        if data.len() >= 4 && &data[0..4] == frame::magic::POLL {
            self.recv_poll.start();

            if self.state == LinkStatus::Linking {
                info!("Linked to {}", self.name);
                self.state = LinkStatus::Linked;
                self.write_options();
            }
        } else if data.len() >= 4 && &data[0..4] == frame::magic::DATA {
            self.recv_poll.start();

            if let Some(frame) = Frame::from_bytes(data) {
                self.queue.push(frame);
            }
        }
        // Anything else, including stray YSFO/YSFI, is dropped.
    }
}

impl DgidNetwork for YsfLink {
    fn open(&mut self) -> Result<()> {
        if self.addr.is_none() {
            warn!("unable to resolve the address of the YSF network");
            self.state = LinkStatus::NotOpen;
            return Err(Error::resolve(self.name.clone()));
        }

        debug!("opening YSF network connection to {}", self.name);
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
            // Repeated calls while linking re-send the poll; the burst is
            // deliberate redundancy over UDP.
            LinkStatus::Linking => self.write_poll(),
            _ => {}
        }
    }

    fn unlink(&mut self) {
        if self.state == LinkStatus::NotOpen {
            return;
        }

        let Some(addr) = self.addr else { return };
        let unlink: [u8; POLL_LENGTH] = frame::unlink_packet(&self.callsign);
        try_send(&self.socket, &unlink, addr);

        if self.state == LinkStatus::Linked || self.state == LinkStatus::Linking {
            self.send_poll.stop();
            self.recv_poll.stop();
            info!("Unlinked from {}", self.name);
            self.state = LinkStatus::NotLinked;
        }
    }

    fn write(&mut self, _dgid: u8, frame: &Frame) {
        if self.state != LinkStatus::Linked {
            return;
        }
        if let Some(addr) = self.addr {
            try_send(&self.socket, frame.as_bytes(), addr);
        }
    }

    fn read(&mut self, _dgid: u8) -> Option<Frame> {
        self.queue.pop()
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

            warn!("Lost link to {}", self.name);
            self.recv_poll.stop();
        }

        self.send_poll.clock(ms);
        if self.send_poll.has_expired() {
            self.write_poll();
            self.send_poll.start();
        }

        let mut buf = [0u8; 200];
        while let Some((len, from)) = try_recv(&self.socket, &mut buf) {
            let data = buf[..len].to_vec();
            self.process_datagram(&data, from);
        }
    }

    fn close(&mut self) {
        debug!("closing YSF network connection to {}", self.name);
        self.state = LinkStatus::NotOpen;
    }

    fn status(&self) -> LinkStatus {
        self.state
    }

    fn desc(&self, _dgid: u8) -> String {
        format!("YSF: {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fich::{DataType, Fich, FrameInfo};

    async fn link_with_peer() -> (YsfLink, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut link = YsfLink::new("127.0.0.1", 0, "TEST", Some(peer_addr), "G4KLX", false)
            .await
            .unwrap();
        link.open().unwrap();

        (link, peer)
    }

    async fn recv_packet(peer: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 200];
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        buf[..len].to_vec()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_link_burst_sends_three_polls() {
        let (mut link, peer) = link_with_peer().await;

        link.link();
        link.link();
        link.link();
        assert_eq!(link.status(), LinkStatus::Linking);

        for _ in 0..3 {
            let pkt = recv_packet(&peer).await;
            assert_eq!(pkt.len(), POLL_LENGTH);
            assert_eq!(&pkt[0..4], b"YSFP");
            assert_eq!(&pkt[4..14], b"G4KLX     ");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_poll_reply_completes_linking() {
        let (mut link, peer) = link_with_peer().await;
        let local = link.local_addr().unwrap();

        link.link();
        recv_packet(&peer).await;

        peer.send_to(&frame::poll_packet("REFLECTOR"), local)
            .await
            .unwrap();
        // Let the datagram land before the poll.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        link.clock(1);
        assert_eq!(link.status(), LinkStatus::Linked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_data_only_accepted_from_bound_address() {
        let (mut link, peer) = link_with_peer().await;
        let local = link.local_addr().unwrap();

        link.link();
        peer.send_to(&frame::poll_packet("REFLECTOR"), local)
            .await
            .unwrap();

        let mut fr = Frame::new();
        fr.set_fich(&Fich::new(FrameInfo::Communications, DataType::Vd2));

        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stranger.send_to(fr.as_bytes(), local).await.unwrap();
        peer.send_to(fr.as_bytes(), local).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        link.clock(1);
        assert!(link.read(0).is_some());
        assert!(link.read(0).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recv_poll_timeout_drops_dynamic_link() {
        let (mut link, peer) = link_with_peer().await;
        let local = link.local_addr().unwrap();

        link.link();
        peer.send_to(&frame::poll_packet("REFLECTOR"), local)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.clock(1);
        assert_eq!(link.status(), LinkStatus::Linked);

        link.clock(RECV_POLL_SECS * 1000);
        assert_eq!(link.status(), LinkStatus::NotLinked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recv_poll_timeout_keeps_static_link_retrying() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut link = YsfLink::new("127.0.0.1", 0, "TEST", Some(peer_addr), "G4KLX", true)
            .await
            .unwrap();
        link.open().unwrap();
        link.link();

        link.clock(RECV_POLL_SECS * 1000);
        assert_eq!(link.status(), LinkStatus::Linking);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unresolved_address_fails_open() {
        let mut link = YsfLink::new("127.0.0.1", 0, "TEST", None, "G4KLX", false)
            .await
            .unwrap();
        assert!(link.open().is_err());
        assert_eq!(link.status(), LinkStatus::NotOpen);
    }
}
