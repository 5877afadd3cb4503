//! IMRS mesh framing: one socket shared by many DG-IDs.
//!
//! IMRS peers exchange compact packets rather than whole YSF frames: a
//! type byte (0x11 header, 0x22 data, 0x33 terminator), a little-endian
//! per-session sequence number, the raw 4-byte FICH and a body whose shape
//! depends on the data type. Each DG-ID owns a list of `(dgid, address)`
//! destinations; incoming datagrams are matched back to a DG-ID by source
//! address.
//!
//! Outbound fan-out is gated by a configuration switch and off by default;
//! the framing itself is always exercised so received traffic reconstructs
//! regardless.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::debug;

use super::{DgidNetwork, FrameQueue, LinkStatus, same_host};
use crate::error::Result;
use crate::fich::{DataType, Fich, FrameInfo};
use crate::frame::{CALLSIGN_LENGTH, Frame};
use crate::payload;

/// Fixed UDP port of the IMRS mesh.
pub const IMRS_PORT: u16 = 21110;

const TYPE_HEADER: u8 = 0x11;
const TYPE_DATA: u8 = 0x22;
const TYPE_TERMINATOR: u8 = 0x33;

/// One fan-out destination of an IMRS DG-ID.
#[derive(Debug, Clone)]
pub struct ImrsDest {
    pub dgid: u8,
    pub addr: SocketAddr,
}

struct ImrsDgid {
    dgid: u8,
    name: String,
    seq_no: u16,
    destinations: Vec<ImrsDest>,
    source: [u8; CALLSIGN_LENGTH],
    dest: [u8; CALLSIGN_LENGTH],
    queue: FrameQueue,
}

/// The shared IMRS socket and its DG-ID table.
pub struct ImrsNetwork {
    socket: UdpSocket,
    dgids: Vec<ImrsDgid>,
    tx_enabled: bool,
    state: LinkStatus,
}

impl ImrsNetwork {
    /// Bind the shared socket. `port` is [`IMRS_PORT`] in production.
    pub async fn new(port: u16, tx_enabled: bool) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;

        Ok(Self {
            socket,
            dgids: Vec::new(),
            tx_enabled,
            state: LinkStatus::NotOpen,
        })
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Register a DG-ID with its destination list.
    pub fn add_dgid(&mut self, dgid: u8, name: &str, destinations: Vec<ImrsDest>) {
        self.dgids.push(ImrsDgid {
            dgid,
            name: name.to_string(),
            seq_no: 0,
            destinations,
            source: [b' '; CALLSIGN_LENGTH],
            dest: [b' '; CALLSIGN_LENGTH],
            queue: FrameQueue::default(),
        });
    }

    fn index_of(&self, dgid: u8) -> Option<usize> {
        self.dgids.iter().position(|d| d.dgid == dgid)
    }

    fn index_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.dgids.iter().position(|d| {
            d.destinations.iter().any(|dest| same_host(dest.addr, addr))
        })
    }

    fn send_to_destinations(&self, idx: usize, fich: Fich, packet: &mut [u8]) {
        if !self.tx_enabled {
            return;
        }

        for dest in &self.dgids[idx].destinations {
            // Each destination sees its own DG-ID in the FICH.
            let mut fich = fich;
            fich.dgid = dest.dgid;
            packet[3..7].copy_from_slice(&fich.to_raw());

            super::try_send(&self.socket, packet, dest.addr);
        }
    }

    fn write_header_trailer(&mut self, idx: usize, fich: Fich, frame: &Frame) {
        let mut packet = [0u8; 47];

        if fich.fi == FrameInfo::Header {
            packet[0] = TYPE_HEADER;
            self.dgids[idx].seq_no = 0;
        } else {
            packet[0] = TYPE_TERMINATOR;
        }

        let seq_no = self.dgids[idx].seq_no;
        packet[1..3].copy_from_slice(&seq_no.to_le_bytes());
        packet[3..7].copy_from_slice(&fich.to_raw());
        packet[7..47].copy_from_slice(&payload::read_header(frame.payload()));

        self.send_to_destinations(idx, fich, &mut packet);

        self.dgids[idx].seq_no += 1;
    }

    fn write_data(&mut self, idx: usize, fich: Fich, frame: &Frame) {
        let mut packet = [0u8; 107];
        let pl = frame.payload();

        packet[0] = TYPE_DATA;
        packet[1..3].copy_from_slice(&self.dgids[idx].seq_no.to_le_bytes());
        packet[3..7].copy_from_slice(&fich.to_raw());

        let length = match fich.dt {
            DataType::Vd1 => {
                packet[7..27].copy_from_slice(&payload::read_vd1_dch(pl));
                for (k, off) in payload::VD1_VOICE_OFFSETS.iter().enumerate() {
                    packet[27 + k * 9..27 + k * 9 + 9].copy_from_slice(&pl[*off..*off + 9]);
                }
                72
            }
            DataType::DataFr => {
                packet[17..107].copy_from_slice(&pl[0..90]);
                107
            }
            DataType::Vd2 => {
                packet[7..17].copy_from_slice(&payload::read_vd2_dch(pl));
                for (k, off) in payload::VD2_VOICE_OFFSETS.iter().enumerate() {
                    packet[17 + k * 13..17 + k * 13 + 13].copy_from_slice(&pl[*off..*off + 13]);
                }
                82
            }
            DataType::VoiceFr => {
                if fich.fn_ == 0 && fich.ft == 1 {
                    packet[7..27].copy_from_slice(&payload::read_voice_fr_dch(pl));
                    packet[27..45].copy_from_slice(&pl[54..72]);
                    packet[45..63].copy_from_slice(&pl[72..90]);
                } else {
                    for (k, off) in payload::VOICE_FR_OFFSETS.iter().enumerate() {
                        packet[17 + k * 18..17 + k * 18 + 18].copy_from_slice(&pl[*off..*off + 18]);
                    }
                }
                107
            }
        };

        self.send_to_destinations(idx, fich, &mut packet[..length]);

        self.dgids[idx].seq_no += 1;
    }

    fn read_header_trailer(&mut self, idx: usize, fich: Fich, data: &[u8]) {
        if data.len() < 47 {
            return;
        }

        let mut frame = Frame::new();

        if fich.fi == FrameInfo::Header {
            self.dgids[idx].source.copy_from_slice(&data[17..27]);

            if fich.cm.is_group() {
                self.dgids[idx].dest = *b"ALL       ";
            } else {
                self.dgids[idx].dest.copy_from_slice(&data[7..17]);
            }

            frame.set_seq(0x00);
        } else {
            let seq_no = u16::from_le_bytes([data[1], data[2]]);
            frame.set_seq(0x01 | ((seq_no as u8 & 0x7F) << 1));
        }

        frame.set_tag(b"IMRS      ");
        frame.set_source(&self.dgids[idx].source);
        frame.set_dest(&self.dgids[idx].dest);
        frame.set_fich(&fich);
        payload::write_header(&data[7..47], frame.payload_mut());

        self.dgids[idx].queue.push(frame);
    }

    fn read_data(&mut self, idx: usize, fich: Fich, data: &[u8]) {
        let expected = match fich.dt {
            DataType::Vd1 => 72,
            DataType::Vd2 => 82,
            DataType::DataFr | DataType::VoiceFr => 107,
        };
        if data.len() < expected {
            return;
        }

        let mut frame = Frame::new();
        frame.set_tag(b"IMRS      ");
        frame.set_source(&self.dgids[idx].source);
        frame.set_dest(&self.dgids[idx].dest);

        let seq_no = u16::from_le_bytes([data[1], data[2]]);
        frame.set_seq((seq_no as u8 & 0x7F) << 1);
        frame.set_fich(&fich);

        let pl = frame.payload_mut();
        match fich.dt {
            DataType::Vd1 => {
                payload::write_vd1_dch(&data[7..27], pl);
                for (k, off) in payload::VD1_VOICE_OFFSETS.iter().enumerate() {
                    pl[*off..*off + 9].copy_from_slice(&data[27 + k * 9..27 + k * 9 + 9]);
                }
            }
            DataType::DataFr => {
                pl[0..90].copy_from_slice(&data[17..107]);
            }
            DataType::Vd2 => {
                payload::write_vd2_dch(&data[7..17], pl);
                for (k, off) in payload::VD2_VOICE_OFFSETS.iter().enumerate() {
                    pl[*off..*off + 13].copy_from_slice(&data[17 + k * 13..17 + k * 13 + 13]);
                }
            }
            DataType::VoiceFr => {
                if fich.fn_ == 0 && fich.ft == 1 {
                    payload::write_voice_fr_dch(&data[7..27], pl);
                    pl[45..54].fill(0x00);
                    pl[54..72].copy_from_slice(&data[27..45]);
                    pl[72..90].copy_from_slice(&data[45..63]);
                } else {
                    for (k, off) in payload::VOICE_FR_OFFSETS.iter().enumerate() {
                        pl[*off..*off + 18].copy_from_slice(&data[17 + k * 18..17 + k * 18 + 18]);
                    }
                }
            }
        }

        self.dgids[idx].queue.push(frame);
    }

    fn process_datagram(&mut self, data: &[u8], from: SocketAddr) {
        if data.len() < 7 {
            return;
        }

        let Some(idx) = self.index_by_addr(from) else {
            return;
        };

        let Some(fich) = Fich::from_raw(&data[3..7]) else {
            return;
        };

        match fich.fi {
            FrameInfo::Header | FrameInfo::Terminator => self.read_header_trailer(idx, fich, data),
            FrameInfo::Communications => self.read_data(idx, fich, data),
        }
    }
}

impl DgidNetwork for ImrsNetwork {
    fn open(&mut self) -> Result<()> {
        debug!("opening IMRS network connection");
        self.state = LinkStatus::NotLinked;
        Ok(())
    }

    // IMRS has no link/unlink handshake; membership is configuration.
    fn link(&mut self) {}

    fn unlink(&mut self) {}

    fn write(&mut self, dgid: u8, frame: &Frame) {
        let Some(idx) = self.index_of(dgid) else {
            return;
        };

        let Some(fich) = frame.fich() else { return };

        match fich.fi {
            FrameInfo::Header | FrameInfo::Terminator => self.write_header_trailer(idx, fich, frame),
            FrameInfo::Communications => self.write_data(idx, fich, frame),
        }
    }

    fn read(&mut self, dgid: u8) -> Option<Frame> {
        let idx = self.index_of(dgid)?;
        self.dgids[idx].queue.pop()
    }

    fn clock(&mut self, _ms: u64) {
        let mut buf = [0u8; 500];
        while let Some((len, from)) = super::try_recv(&self.socket, &mut buf) {
            let data = buf[..len].to_vec();
            self.process_datagram(&data, from);
        }
    }

    fn close(&mut self) {
        debug!("closing IMRS network connection");
        self.state = LinkStatus::NotOpen;
    }

    fn status(&self) -> LinkStatus {
        self.state
    }

    fn desc(&self, dgid: u8) -> String {
        match self.index_of(dgid) {
            Some(idx) => format!("IMRS: {}", self.dgids[idx].name),
            None => "IMRS: Unknown".to_string(),
        }
    }
}
