//! The DG-ID fan-out switch.
//!
//! One table of up to 100 destination slots keyed by DG-ID. The first side
//! to break silence (RF or network) selects the current DG-ID; everything
//! else is dropped until an inactivity timer reverts the switch to idle.
//! Non-static slots are linked with a three-packet burst on selection and
//! unlinked the same way on revert.

use tracing::{info, warn};

use crate::fich::WIRESX_DGID;
use crate::frame::Frame;
use crate::net::{DgidNetwork, LinkStatus};
use crate::timer::Timer;

/// Number of addressable DG-ID slots.
pub const SLOT_COUNT: usize = 100;

/// One configured destination slot.
pub struct DgidEntry {
    pub network: Box<dyn DgidNetwork>,
    pub statik: bool,
    pub rf_hang_ms: u64,
    pub net_hang_ms: u64,
    /// Allowed-mode bits (see [`crate::fich`]).
    pub modes: u8,
    /// The DG-ID written into frames forwarded to this destination.
    pub net_dgid: u8,
}

/// The multiplexer over the slot table.
pub struct DgidSwitch {
    slots: Vec<Option<DgidEntry>>,
    current: Option<u8>,
    from_rf: bool,
    inactivity: Timer,
    bleep_timer: Timer,
    bleep_enabled: bool,
    state: LinkStatus,
    pips: u32,
}

impl DgidSwitch {
    pub fn new(bleep_enabled: bool) -> Self {
        Self {
            slots: (0..SLOT_COUNT).map(|_| None).collect(),
            current: None,
            from_rf: false,
            inactivity: Timer::unset(),
            bleep_timer: Timer::from_secs(1),
            bleep_enabled,
            state: LinkStatus::NotLinked,
            pips: 0,
        }
    }

    /// Open a slot's network and add it to the table. Static slots get
    /// their startup link burst here. A slot that fails to open is
    /// discarded.
    pub fn install(&mut self, dgid: u8, mut entry: DgidEntry) -> bool {
        if usize::from(dgid) >= SLOT_COUNT {
            return false;
        }

        if let Err(e) = entry.network.open() {
            warn!("unable to open connection for DG-ID {dgid}: {e}");
            return false;
        }

        if entry.statik {
            info!("Linking at startup");
            entry.network.link();
            entry.network.link();
            entry.network.link();
        }

        self.slots[usize::from(dgid)] = Some(entry);
        true
    }

    /// Whether a slot is configured for this DG-ID.
    pub fn has_slot(&self, dgid: u8) -> bool {
        usize::from(dgid) < SLOT_COUNT && self.slots[usize::from(dgid)].is_some()
    }

    /// The currently selected DG-ID, if any.
    pub fn current(&self) -> Option<u8> {
        self.current
    }

    /// Route one frame arriving from the repeater.
    pub fn process_rf(&mut self, frame: &mut Frame) {
        if let Some(mut fich) = frame.fich() {
            let mut dgid = fich.dgid;
            if dgid == WIRESX_DGID {
                dgid = 0;
            }

            if self.current.is_none() {
                // DG-IDs beyond the table (100..=126) route nowhere.
                let slot = self
                    .slots
                    .get_mut(usize::from(dgid))
                    .and_then(|s| s.as_mut());

                if let Some(entry) = slot {
                    if !entry.statik {
                        entry.network.link();
                        entry.network.link();
                        entry.network.link();
                    }

                    let desc = entry.network.desc(dgid);
                    info!("DG-ID set to {dgid} ({desc}) via RF");
                    self.current = Some(dgid);
                    self.state = LinkStatus::NotLinked;
                } else {
                    info!("DG-ID set to {dgid} (None) via RF");
                    self.state = LinkStatus::NotOpen;
                }

                self.from_rf = true;
            }

            if let Some(current) = self.current {
                if let Some(entry) = &mut self.slots[usize::from(current)] {
                    if entry.modes & fich.dt.mode_bit() != 0 {
                        // The Wires-X control channel keeps its magic DG-ID.
                        if fich.dgid != WIRESX_DGID {
                            fich.dgid = entry.net_dgid;
                            frame.set_fich(&fich);
                        }

                        entry.network.write(current, frame);
                    }

                    self.inactivity.set_timeout_ms(entry.rf_hang_ms);
                    self.inactivity.start();
                }
            }
        }

        if frame.is_end() && self.pips > 0 && self.from_rf {
            self.bleep_timer.start();
        }
    }

    /// Drain the network side of every slot. Frames from the selected slot
    /// (or the slot that just won selection) come back rewritten for RF;
    /// traffic on any other slot is discarded.
    pub fn poll_net(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();

        for dgid in 0..SLOT_COUNT as u8 {
            let accepted = self.current.is_none() || self.current == Some(dgid);

            let Some(entry) = &mut self.slots[usize::from(dgid)] else {
                continue;
            };

            let Some(mut frame) = entry.network.read(dgid) else {
                continue;
            };
            if !accepted {
                continue;
            }

            let Some(mut fich) = frame.fich() else {
                continue;
            };

            if fich.dgid != WIRESX_DGID {
                fich.dgid = dgid;
                frame.set_fich(&fich);
            }

            self.inactivity.set_timeout_ms(entry.net_hang_ms);
            self.inactivity.start();

            if self.current.is_none() {
                let desc = entry.network.desc(dgid);
                info!("DG-ID set to {dgid} ({desc}) via Network");
                self.current = Some(dgid);
                self.state = LinkStatus::Linked;
                self.from_rf = false;
            }

            out.push(frame);
        }

        out
    }

    /// Advance all slot networks and the switch timers by one tick.
    pub fn clock(&mut self, ms: u64) {
        for slot in self.slots.iter_mut().flatten() {
            slot.network.clock(ms);
        }

        self.inactivity.clock(ms);
        if self.inactivity.has_expired() {
            if let Some(current) = self.current {
                if let Some(entry) = &mut self.slots[usize::from(current)] {
                    if !entry.statik {
                        entry.network.unlink();
                        entry.network.unlink();
                        entry.network.unlink();
                    }
                }
            }

            info!("DG-ID set to None via timeout");

            self.state = LinkStatus::NotLinked;
            self.current = None;
            self.inactivity.stop();

            if self.from_rf {
                self.send_pips(2);
                self.from_rf = false;
            }
        }

        self.bleep_timer.clock(ms);
        if self.bleep_timer.has_expired() {
            let pips = self.pips;
            self.send_pips(pips);
            self.bleep_timer.stop();
            self.pips = 0;
        }

        self.update_pips();
    }

    // Decide how many pips the next end of transmission earns, from how the
    // network-side link state moved since the session began.
    fn update_pips(&mut self) {
        let entry = self
            .current
            .and_then(|c| self.slots[usize::from(c)].as_ref());

        match entry {
            Some(entry) => {
                let net_state = entry.network.status();

                if self.from_rf && self.state != LinkStatus::Linked {
                    if net_state == LinkStatus::Linked {
                        self.pips = 1;
                    } else if entry.statik {
                        self.pips = 3;
                    }
                } else if self.from_rf
                    && self.state == LinkStatus::Linked
                    && net_state != LinkStatus::Linked
                {
                    self.pips = 3;
                }

                self.state = net_state;
            }
            None => {
                if self.from_rf && self.state != LinkStatus::NotLinked {
                    self.pips = 2;
                }
                self.state = LinkStatus::NotLinked;
            }
        }
    }

    fn send_pips(&self, count: u32) {
        if count > 0 && self.bleep_enabled {
            info!("*** {count} bleep!");
        }
    }

    /// Unlink everything and close the table down.
    pub fn shutdown(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.network.unlink();
            slot.network.unlink();
            slot.network.unlink();
            slot.network.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fich::{DataType, Fich, FrameInfo, MODE_ALL, MODE_VOICE_FR};
    use crate::frame;
    use crate::net::ysf::YsfLink;
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;

    async fn server() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn ysf_entry(addr: SocketAddr, statik: bool, modes: u8) -> DgidEntry {
        let link = YsfLink::new("127.0.0.1", 0, "TEST", Some(addr), "G4KLX", statik)
            .await
            .unwrap();
        DgidEntry {
            network: Box::new(link),
            statik,
            rf_hang_ms: 5000,
            net_hang_ms: 5000,
            modes,
            net_dgid: 0,
        }
    }

    fn rf_frame(dgid: u8, dt: DataType) -> Frame {
        let mut frame = Frame::new();
        let mut fich = Fich::new(FrameInfo::Communications, dt);
        fich.dgid = dgid;
        frame.set_fich(&fich);
        frame
    }

    async fn recv_packet(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 200];
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        buf[..len].to_vec()
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rf_selection_links_and_forwards() {
        let (server1, addr1) = server().await;
        let (_server2, addr2) = server().await;

        let mut switch = DgidSwitch::new(false);
        assert!(switch.install(1, ysf_entry(addr1, false, MODE_ALL).await));
        assert!(switch.install(2, ysf_entry(addr2, false, MODE_ALL).await));

        // First RF frame selects DG-ID 1 and fires the three-packet burst.
        let mut frame = rf_frame(1, DataType::Vd2);
        switch.process_rf(&mut frame);
        assert_eq!(switch.current(), Some(1));

        let mut from = None;
        for _ in 0..3 {
            let mut buf = [0u8; 200];
            let (len, peer) = server1.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 14);
            assert_eq!(&buf[0..4], b"YSFP");
            from = Some(peer);
        }

        // Server answers the poll; the slot reaches LINKED.
        server1.send_to(&frame::poll_packet("SERVER"), from.unwrap())
            .await
            .unwrap();
        settle().await;
        switch.clock(1);

        // The next frame is forwarded with the DG-ID rewritten to 0.
        let mut frame = rf_frame(1, DataType::Vd2);
        switch.process_rf(&mut frame);

        let pkt = recv_packet(&server1).await;
        assert_eq!(pkt.len(), 155);
        let forwarded = Frame::from_bytes(&pkt).unwrap();
        assert_eq!(forwarded.fich().unwrap().dgid, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_net_side_locked_to_current_dgid() {
        let (server1, addr1) = server().await;
        let (server2, addr2) = server().await;

        let mut switch = DgidSwitch::new(false);
        switch.install(1, ysf_entry(addr1, false, MODE_ALL).await);
        switch.install(2, ysf_entry(addr2, false, MODE_ALL).await);

        let mut frame = rf_frame(1, DataType::Vd2);
        switch.process_rf(&mut frame);

        // Both servers answer the polls and then send data.
        let mut buf = [0u8; 200];
        let (_, link1) = server1.recv_from(&mut buf).await.unwrap();
        server1.send_to(&frame::poll_packet("SERVER"), link1).await.unwrap();

        let reply = rf_frame(0, DataType::Vd2);
        server1.send_to(reply.as_bytes(), link1).await.unwrap();
        settle().await;
        switch.clock(1);

        let out = switch.poll_net();
        assert_eq!(out.len(), 1);
        // Rewritten back to the selected DG-ID on the way to RF.
        assert_eq!(out[0].fich().unwrap().dgid, 1);

        // While DG-ID 1 holds the switch, an RF frame for DG-ID 2 neither
        // reselects nor links the other slot.
        let mut f = rf_frame(2, DataType::Vd2);
        switch.process_rf(&mut f);
        assert_eq!(switch.current(), Some(1));

        let mut buf = [0u8; 200];
        assert!(server2.try_recv_from(&mut buf).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_inactivity_reverts_and_unlinks() {
        let (server1, addr1) = server().await;

        let mut switch = DgidSwitch::new(false);
        switch.install(1, ysf_entry(addr1, false, MODE_ALL).await);

        let mut frame = rf_frame(1, DataType::Vd2);
        switch.process_rf(&mut frame);

        let mut link_addr = None;
        for _ in 0..3 {
            let mut buf = [0u8; 200];
            let (_, peer) = server1.recv_from(&mut buf).await.unwrap();
            link_addr = Some(peer);
        }
        server1.send_to(&frame::poll_packet("SERVER"), link_addr.unwrap())
            .await
            .unwrap();
        settle().await;
        switch.clock(1);

        // 5 s of silence expire the hang timer. The send-poll timer fires
        // in the same tick, so one more YSFP precedes the unlink burst.
        switch.clock(5000);
        assert_eq!(switch.current(), None);

        let mut unlinks = 0;
        for _ in 0..4 {
            let pkt = recv_packet(&server1).await;
            if &pkt[0..4] == b"YSFU" {
                unlinks += 1;
            }
        }
        assert_eq!(unlinks, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disallowed_mode_not_forwarded() {
        let (server1, addr1) = server().await;

        let mut switch = DgidSwitch::new(false);
        switch.install(1, ysf_entry(addr1, false, MODE_VOICE_FR).await);

        let mut frame = rf_frame(1, DataType::Vd2);
        switch.process_rf(&mut frame);
        // Selection still happened, and the hang timer is armed.
        assert_eq!(switch.current(), Some(1));

        for _ in 0..3 {
            recv_packet(&server1).await;
        }

        // Link it, then send a disallowed-mode frame: nothing must arrive.
        // (A VD2 frame against a VOICE_FR-only slot.)
        let mut buf = [0u8; 200];
        assert!(server1.try_recv_from(&mut buf).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_dgid_leaves_switch_unset() {
        let (_server1, addr1) = server().await;

        let mut switch = DgidSwitch::new(false);
        switch.install(1, ysf_entry(addr1, false, MODE_ALL).await);

        let mut frame = rf_frame(7, DataType::Vd2);
        switch.process_rf(&mut frame);
        assert_eq!(switch.current(), None);

        // A later frame for a configured DG-ID still wins the switch.
        let mut frame = rf_frame(1, DataType::Vd2);
        switch.process_rf(&mut frame);
        assert_eq!(switch.current(), Some(1));
    }
}
