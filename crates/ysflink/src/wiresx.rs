//! The Wires-X in-band command engine.
//!
//! Commands arrive from the radio as full-rate data frames on the Wires-X
//! control channel. Each frame contributes up to 40 bytes to a command
//! buffer; the buffer is complete when the frame counter reaches the frame
//! total and the byte after the 0x03 end marker matches the additive
//! checksum of everything before it.
//!
//! Replies are built as flat byte records, then cut into a header frame, as
//! many communications frames as the record needs and a terminator, and
//! drained to the repeater at no more than one frame per 90 ms so the modem
//! is never overrun.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::checksum::wiresx_sum;
use crate::fich::{DataType, Fich, FrameInfo, FrameInfo::Communications, WIRESX_DGID};
use crate::frame::{CALLSIGN_LENGTH, Frame, pad_callsign};
use crate::hosts::{ReflectorEntry, ReflectorKind, ReflectorList};
use crate::payload;
use crate::timer::Timer;
use crate::util::name_hash;

const DX_REQ: [u8; 3] = [0x5D, 0x71, 0x5F];
const CONN_REQ: [u8; 3] = [0x5D, 0x23, 0x5F];
const DISC_REQ: [u8; 3] = [0x5D, 0x2A, 0x5F];
const ALL_REQ: [u8; 3] = [0x5D, 0x66, 0x5F];
const CAT_REQ: [u8; 3] = [0x5D, 0x67, 0x5F];

const DX_RESP: [u8; 4] = [0x5D, 0x51, 0x5F, 0x26];
const CONN_RESP: [u8; 4] = [0x5D, 0x41, 0x5F, 0x26];
const ALL_RESP: [u8; 4] = [0x5D, 0x46, 0x5F, 0x26];

const END_MARKER: u8 = 0x03;

const COMMAND_LENGTH: usize = 300;

/// Minimum spacing between reply frames toward the modem.
const TX_INTERVAL_MS: u64 = 90;

/// What the engine wants the gateway to do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WxStatus {
    None,
    /// Link the browse slot to the YSF reflector now set as current.
    ConnectYsf,
    /// Link the browse slot to the FCS room now set as current.
    ConnectFcs,
    /// Drop whatever the browse slot is linked to.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Dx,
    All,
    Search,
    Connect,
    Disconnect,
    Category,
}

/// The per-gateway Wires-X session.
pub struct WiresX {
    callsign: [u8; CALLSIGN_LENGTH],
    node: [u8; CALLSIGN_LENGTH],
    id: String,
    name: String,
    tx_frequency: u32,
    rx_frequency: u32,
    reflectors: Rc<RefCell<ReflectorList>>,
    reflector: Option<ReflectorEntry>,
    command: [u8; COMMAND_LENGTH],
    pending: Pending,
    timer: Timer,
    seq_no: u8,
    start: usize,
    search: String,
    category: Vec<ReflectorEntry>,
    busy: bool,
    busy_timer: Timer,
    csd1: [u8; 20],
    csd2: [u8; 20],
    csd3: [u8; 20],
    header: [u8; 34],
    tx_queue: VecDeque<Frame>,
    tx_elapsed: u64,
    passthrough: bool,
}

impl WiresX {
    pub fn new(callsign: &str, suffix: &str, reflectors: Rc<RefCell<ReflectorList>>) -> Self {
        let node_text = if suffix.is_empty() {
            callsign.to_string()
        } else {
            format!("{callsign}-{suffix}")
        };

        Self {
            callsign: pad_callsign(callsign),
            node: pad_callsign(&node_text),
            id: "00000".to_string(),
            name: " ".repeat(14),
            tx_frequency: 0,
            rx_frequency: 0,
            reflectors,
            reflector: None,
            command: [0u8; COMMAND_LENGTH],
            pending: Pending::None,
            timer: Timer::from_secs(1),
            seq_no: 0,
            start: 0,
            search: String::new(),
            category: Vec::new(),
            busy: false,
            busy_timer: Timer::from_secs(3),
            csd1: [b'*'; 20],
            csd2: [b' '; 20],
            csd3: [b' '; 20],
            header: *b"YSFD                    ALL       ",
            tx_queue: VecDeque::new(),
            tx_elapsed: 0,
            passthrough: false,
        }
    }

    /// Station identity: the display name yields the 5-digit node id.
    pub fn set_info(&mut self, name: &str, tx_frequency: u32, rx_frequency: u32) {
        let mut padded = name.to_string();
        while padded.len() < 14 {
            padded.push(' ');
        }
        padded.truncate(14);

        self.name = padded;
        self.tx_frequency = tx_frequency;
        self.rx_frequency = rx_frequency;
        self.id = format!("{:05}", name_hash(name) % 100_000);

        info!("The ID of this node is {}", self.id);

        self.csd1 = [b'*'; 20];
        self.csd1[10..20].copy_from_slice(&self.node);

        self.csd2 = [b' '; 20];
        self.csd2[0..10].copy_from_slice(&self.callsign);

        self.csd3 = [b' '; 20];
        self.csd3[0..5].copy_from_slice(self.id.as_bytes());
        self.csd3[15..20].copy_from_slice(self.id.as_bytes());

        self.header = *b"YSFD                    ALL       ";
        self.header[4..14].copy_from_slice(&self.callsign);
        self.header[14..24].copy_from_slice(&self.node);
    }

    /// Forward commands other than DISCONNECT to the linked room instead of
    /// answering them locally.
    pub fn set_passthrough(&mut self, passthrough: bool) {
        self.passthrough = passthrough;
    }

    /// The reflector selected by the last CONNECT, if any.
    pub fn reflector(&self) -> Option<&ReflectorEntry> {
        self.reflector.as_ref()
    }

    /// Adopt a reflector chosen outside the engine (DTMF, remote command,
    /// startup linking) and schedule the matching CONNECT reply.
    pub fn connect(&mut self, reflector: ReflectorEntry) {
        self.busy = true;
        self.busy_timer.start();

        self.reflector = Some(reflector);
        self.pending = Pending::Connect;
        self.timer.start();
    }

    /// Adopt a reflector without generating a reply.
    pub fn set_reflector(&mut self, reflector: Option<ReflectorEntry>) {
        self.reflector = reflector;
    }

    /// Drop the current reflector and schedule a DISCONNECT reply.
    pub fn disconnect(&mut self) {
        self.reflector = None;
        self.pending = Pending::Disconnect;
        self.timer.start();
    }

    /// A reply train is in flight; hold network traffic off the modem.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Feed one RF frame through the reassembler. Only full-rate data
    /// frames in mid-transmission contribute.
    pub fn process(&mut self, frame: &Frame) -> WxStatus {
        let Some(fich) = frame.fich() else {
            return WxStatus::None;
        };

        if fich.dt != DataType::DataFr || fich.fi != Communications || fich.fn_ == 0 {
            return WxStatus::None;
        }

        let fn_ = usize::from(fich.fn_);
        if fn_ == 1 {
            let data2 = payload::read_data_fr_2(frame.payload());
            self.command[0..20].copy_from_slice(&data2);
        } else {
            let offset = (fn_ - 2) * 40 + 20;
            if offset + 40 > COMMAND_LENGTH {
                return WxStatus::None;
            }
            let data1 = payload::read_data_fr_1(frame.payload());
            let data2 = payload::read_data_fr_2(frame.payload());
            self.command[offset..offset + 20].copy_from_slice(&data1);
            self.command[offset + 20..offset + 40].copy_from_slice(&data2);
        }

        if fich.fn_ != fich.ft {
            return WxStatus::None;
        }

        let cmd_len = (fn_ - 1) * 40 + 20;
        if !self.validate_command(cmd_len) {
            return WxStatus::None;
        }

        let mut source = [0u8; CALLSIGN_LENGTH];
        source.copy_from_slice(frame.source());
        self.dispatch(&source, cmd_len)
    }

    // Scan backwards for the end marker and check the trailing checksum.
    fn validate_command(&self, cmd_len: usize) -> bool {
        for i in (1..=cmd_len.min(COMMAND_LENGTH - 2)).rev() {
            if self.command[i] == END_MARKER {
                return wiresx_sum(&self.command[0..=i]) == self.command[i + 1];
            }
        }
        false
    }

    fn dispatch(&mut self, source: &[u8], cmd_len: usize) -> WxStatus {
        let code = &self.command[1..4];
        let source = String::from_utf8_lossy(source).to_string();

        if code == DX_REQ {
            if self.passthrough {
                return WxStatus::None;
            }
            debug!("Received DX from {source}");
            self.pending = Pending::Dx;
            self.timer.start();
            WxStatus::None
        } else if code == ALL_REQ {
            if self.passthrough {
                return WxStatus::None;
            }
            self.process_all(&source);
            WxStatus::None
        } else if code == CONN_REQ {
            if self.passthrough {
                return WxStatus::None;
            }
            self.process_connect(&source)
        } else if code == DISC_REQ {
            debug!("Received Disconnect from {source}");
            self.disconnect();
            WxStatus::Disconnect
        } else if code == CAT_REQ {
            if self.passthrough {
                return WxStatus::None;
            }
            self.process_category(&source);
            WxStatus::None
        } else {
            warn!(
                "Unknown Wires-X command {:02X?}",
                &self.command[0..cmd_len.min(20)]
            );
            WxStatus::None
        }
    }

    fn process_all(&mut self, source: &str) {
        let data = &self.command[5..];
        let start = parse_digits(&data[2..5]).unwrap_or(0);

        if data[0] == b'0' && data[1] == b'1' {
            debug!("Received ALL from {source}");
            self.start = start.saturating_sub(1);
            self.pending = Pending::All;
            self.timer.start();
        } else if data[0] == b'1' && data[1] == b'1' {
            debug!("Received SEARCH from {source}");
            self.start = start.saturating_sub(1);
            self.search = String::from_utf8_lossy(&data[5..21]).to_string();
            self.pending = Pending::Search;
            self.timer.start();
        }
    }

    fn process_connect(&mut self, source: &str) -> WxStatus {
        self.busy = true;
        self.busy_timer.start();

        let id = String::from_utf8_lossy(&self.command[5..10]).to_string();
        debug!("Received Connect to {id} from {source}");

        if let Some(found) = self.reflectors.borrow().find_by_id(&id) {
            self.reflector = Some(found.clone());
        }

        let Some(reflector) = &self.reflector else {
            return WxStatus::None;
        };

        self.pending = Pending::Connect;
        self.timer.start();

        match reflector.kind {
            ReflectorKind::Ysf => WxStatus::ConnectYsf,
            ReflectorKind::Fcs => WxStatus::ConnectFcs,
        }
    }

    fn process_category(&mut self, source: &str) {
        debug!("Received CATEGORY request from {source}");

        let data = &self.command[5..];
        let Some(count) = parse_digits(&data[5..7]) else {
            return;
        };
        if count == 0 || count > 20 {
            return;
        }

        self.category.clear();
        for j in 0..count {
            let off = 7 + j * 5;
            let id = String::from_utf8_lossy(&data[off..off + 5]).to_string();
            if let Some(found) = self.reflectors.borrow().find_by_id(&id) {
                self.category.push(found.clone());
            }
        }

        self.pending = Pending::Category;
        self.timer.start();
    }

    /// Tick the reply timer and TX pacing. At most one frame comes back per
    /// call, never more often than every 90 ms.
    pub fn clock(&mut self, ms: u64) -> Option<Frame> {
        self.timer.clock(ms);
        if self.timer.has_expired() {
            match self.pending {
                Pending::Dx => self.send_dx_reply(),
                Pending::All => self.send_all_reply(),
                Pending::Search => self.send_search_reply(),
                Pending::Connect => self.send_connect_reply(),
                Pending::Disconnect => self.send_disconnect_reply(),
                Pending::Category => self.send_category_reply(),
                Pending::None => {}
            }

            self.pending = Pending::None;
            self.timer.stop();
        }

        self.busy_timer.clock(ms);
        if self.busy_timer.has_expired() {
            self.busy = false;
            self.busy_timer.stop();
        }

        self.tx_elapsed += ms;
        if self.tx_elapsed >= TX_INTERVAL_MS && !self.tx_queue.is_empty() {
            self.tx_elapsed = 0;
            return self.tx_queue.pop_front();
        }

        None
    }

    /// Build the 20-byte DX_REQ command train forwarded to a bridge room on
    /// passthrough connects. The frames go straight to the room's network,
    /// not through the paced RF queue.
    pub fn connect_request_frames(&mut self) -> Vec<Frame> {
        let mut data = vec![b' '; 16];
        data[0] = self.seq_no;
        data[1..4].copy_from_slice(&DX_REQ);
        data[15] = END_MARKER;
        let crc = wiresx_sum(&data);
        data.push(crc);

        self.seq_no = self.seq_no.wrapping_add(1);
        self.build_frames(&data)
    }

    fn enqueue_reply(&mut self, data: &[u8]) {
        for frame in self.build_frames(data) {
            self.tx_queue.push_back(frame);
        }
        self.seq_no = self.seq_no.wrapping_add(1);
    }

    // Cut a flat reply record into header + communications + terminator
    // frames.
    fn build_frames(&self, data: &[u8]) -> Vec<Frame> {
        let mut length = data.len();

        let mut bt = 0u8;
        if length > 260 {
            bt = 1 + ((length - 260) / 259) as u8;
            length += usize::from(bt);
        }

        if length > 20 {
            let mut blocks = (length - 20) / 40;
            if length % 40 > 0 {
                blocks += 1;
            }
            length = blocks * 40 + 20;
        } else {
            length = 20;
        }

        // Slack beyond the rounded length: the last block's reads may run
        // past it and must see zero padding.
        let mut padded = vec![0u8; length + 40];
        let n = data.len().min(length);
        padded[0..n].copy_from_slice(&data[0..n]);

        let mut frames = Vec::new();
        let mut seq = 0u8;

        let mut fich = Fich::new(FrameInfo::Header, DataType::DataFr);
        fich.dgid = WIRESX_DGID;
        fich.bt = bt;
        fich.ft = calculate_ft(length, 0);

        let mut frame = self.base_frame();
        frame.set_fich(&fich);
        payload::write_data_fr_1(&self.csd1, frame.payload_mut());
        payload::write_data_fr_2(&self.csd2, frame.payload_mut());
        frame.set_seq(seq);
        seq = seq.wrapping_add(2);
        frames.push(frame);

        fich.fi = Communications;

        let mut fn_ = 0u8;
        let mut bn = 0u8;
        let mut ft = fich.ft;
        let mut offset = 0usize;

        while offset < length {
            let mut frame = self.base_frame();

            match fn_ {
                0 => {
                    ft = calculate_ft(length, offset);
                    payload::write_data_fr_1(&self.csd1, frame.payload_mut());
                    payload::write_data_fr_2(&self.csd2, frame.payload_mut());
                }
                1 => {
                    payload::write_data_fr_1(&self.csd3, frame.payload_mut());
                    if bn == 0 {
                        payload::write_data_fr_2(&padded[offset..offset + 20], frame.payload_mut());
                        offset += 20;
                    } else {
                        // Continuation blocks lead with a zero byte.
                        let mut temp = [0u8; 20];
                        temp[1..20].copy_from_slice(&padded[offset..offset + 19]);
                        payload::write_data_fr_2(&temp, frame.payload_mut());
                        offset += 19;
                    }
                }
                _ => {
                    payload::write_data_fr_1(&padded[offset..offset + 20], frame.payload_mut());
                    offset += 20;
                    payload::write_data_fr_2(&padded[offset..offset + 20], frame.payload_mut());
                    offset += 20;
                }
            }

            fich.ft = ft;
            fich.fn_ = fn_;
            fich.bt = bt;
            fich.bn = bn;
            frame.set_fich(&fich);
            frame.set_seq(seq);
            seq = seq.wrapping_add(2);
            frames.push(frame);

            fn_ += 1;
            if fn_ >= 8 {
                fn_ = 0;
                bn += 1;
            }
        }

        fich.fi = FrameInfo::Terminator;
        fich.fn_ = fn_;
        fich.bn = bn;

        let mut frame = self.base_frame();
        frame.set_fich(&fich);
        payload::write_data_fr_1(&self.csd1, frame.payload_mut());
        payload::write_data_fr_2(&self.csd2, frame.payload_mut());
        frame.set_seq(seq | 0x01);
        frames.push(frame);

        frames
    }

    fn base_frame(&self) -> Frame {
        let mut bytes = [0u8; crate::frame::FRAME_LENGTH];
        bytes[0..34].copy_from_slice(&self.header);
        bytes[35..40].copy_from_slice(&crate::frame::SYNC_BYTES);
        Frame::from_bytes(&bytes).expect("header template carries the data magic")
    }

    fn send_dx_reply(&mut self) {
        let mut data = vec![b' '; 128];
        data[0] = self.seq_no;
        data[1..5].copy_from_slice(&DX_RESP);
        data[5..10].copy_from_slice(self.id.as_bytes());
        data[10..20].copy_from_slice(&self.node);
        data[20..34].copy_from_slice(self.name.as_bytes());

        match &self.reflector {
            None => {
                data[34] = b'1';
                data[35] = b'2';
                data[57..60].copy_from_slice(b"000");
            }
            Some(reflector) => {
                data[34] = b'1';
                data[35] = b'5';
                data[36..41].copy_from_slice(reflector.id.as_bytes());
                data[41..57].copy_from_slice(reflector.name.as_bytes());
                data[57..60].copy_from_slice(reflector.count.as_bytes());
                data[70..84].copy_from_slice(reflector.desc.as_bytes());
            }
        }

        let freq = frequency_string(self.tx_frequency, self.rx_frequency);
        data[84..107].copy_from_slice(freq.as_bytes());

        data[127] = END_MARKER;
        let crc = wiresx_sum(&data);
        data.push(crc);

        debug!("DX reply of {} bytes", data.len());
        self.enqueue_reply(&data);
    }

    fn send_connect_reply(&mut self) {
        let Some(reflector) = self.reflector.clone() else {
            return;
        };

        let mut data = vec![b' '; 90];
        data[0] = self.seq_no;
        data[1..5].copy_from_slice(&CONN_RESP);
        data[5..10].copy_from_slice(self.id.as_bytes());
        data[10..20].copy_from_slice(&self.node);
        data[20..34].copy_from_slice(self.name.as_bytes());

        data[34] = b'1';
        data[35] = b'5';
        data[36..41].copy_from_slice(reflector.id.as_bytes());
        data[41..57].copy_from_slice(reflector.name.as_bytes());
        data[57..60].copy_from_slice(reflector.count.as_bytes());
        data[70..84].copy_from_slice(reflector.desc.as_bytes());

        data[84..89].copy_from_slice(b"00000");

        data[89] = END_MARKER;
        let crc = wiresx_sum(&data);
        data.push(crc);

        debug!("CONNECT reply of {} bytes", data.len());
        self.enqueue_reply(&data);
    }

    fn send_disconnect_reply(&mut self) {
        let mut data = vec![b' '; 90];
        data[0] = self.seq_no;
        data[1..5].copy_from_slice(&CONN_RESP);
        data[5..10].copy_from_slice(self.id.as_bytes());
        data[10..20].copy_from_slice(&self.node);
        data[20..34].copy_from_slice(self.name.as_bytes());

        data[34] = b'1';
        data[35] = b'2';
        data[57..60].copy_from_slice(b"000");

        data[89] = END_MARKER;
        let crc = wiresx_sum(&data);
        data.push(crc);

        debug!("DISCONNECT reply of {} bytes", data.len());
        self.enqueue_reply(&data);
    }

    fn send_all_reply(&mut self) {
        if self.start == 0 {
            self.reflectors.borrow_mut().reload();
        }

        let reflectors = self.reflectors.borrow();
        let current = reflectors.current();

        let total = current.len().min(999);
        let n = current.len().saturating_sub(self.start).min(20);

        let mut data = vec![0u8; 29];
        data[0] = self.seq_no;
        data[1..5].copy_from_slice(&ALL_RESP);
        data[5] = b'2';
        data[6] = b'1';
        data[7..12].copy_from_slice(self.id.as_bytes());
        data[12..22].copy_from_slice(&self.node);
        data[22..28].copy_from_slice(format!("{n:03}{total:03}").as_bytes());
        data[28] = 0x0D;

        for reflector in current.iter().skip(self.start).take(n) {
            data.extend_from_slice(&directory_row(b'5', reflector));
        }
        drop(reflectors);

        finish_page(&mut data);

        debug!("ALL reply of {} bytes", data.len());
        self.enqueue_reply(&data);
    }

    fn send_search_reply(&mut self) {
        let results = if self.search.is_empty() {
            Vec::new()
        } else {
            self.reflectors.borrow().search(&self.search)
        };

        if results.is_empty() {
            self.send_search_not_found_reply();
            return;
        }

        let total = results.len().min(999);
        let n = results.len().saturating_sub(self.start).min(20);

        let mut data = vec![0u8; 29];
        data[0] = self.seq_no;
        data[1..5].copy_from_slice(&ALL_RESP);
        data[5] = b'0';
        data[6] = b'2';
        data[7..12].copy_from_slice(self.id.as_bytes());
        data[12..22].copy_from_slice(&self.node);
        data[22] = b'1';
        data[23..28].copy_from_slice(format!("{n:02}{total:03}").as_bytes());
        data[28] = 0x0D;

        for reflector in results.iter().skip(self.start).take(n) {
            data.extend_from_slice(&directory_row(b'1', reflector));
        }

        finish_page(&mut data);

        debug!("SEARCH reply of {} bytes", data.len());
        self.enqueue_reply(&data);
    }

    fn send_search_not_found_reply(&mut self) {
        let mut data = vec![0u8; 31];
        data[0] = self.seq_no;
        data[1..5].copy_from_slice(&ALL_RESP);
        data[5] = b'0';
        data[6] = b'1';
        data[7..12].copy_from_slice(self.id.as_bytes());
        data[12..22].copy_from_slice(&self.node);
        data[22] = b'1';
        data[23..28].copy_from_slice(b"00000");
        data[28] = 0x0D;
        data[29] = END_MARKER;
        data[30] = wiresx_sum(&data[0..30]);

        debug!("SEARCH not-found reply");
        self.enqueue_reply(&data);
    }

    fn send_category_reply(&mut self) {
        let n = self.category.len().min(20);

        let mut data = vec![0u8; 29];
        data[0] = self.seq_no;
        data[1..5].copy_from_slice(&ALL_RESP);
        data[5] = b'2';
        data[6] = b'1';
        data[7..12].copy_from_slice(self.id.as_bytes());
        data[12..22].copy_from_slice(&self.node);
        data[22..28].copy_from_slice(format!("{n:03}{n:03}").as_bytes());
        data[28] = 0x0D;

        for reflector in self.category.iter().take(n) {
            data.extend_from_slice(&directory_row(b'5', reflector));
        }

        finish_page(&mut data);

        debug!("CATEGORY reply of {} bytes", data.len());
        self.enqueue_reply(&data);
    }
}

// Directory pages are padded with spaces out to a fixed offset before the
// end marker so every page decodes to the same record size.
fn finish_page(data: &mut Vec<u8>) {
    while data.len() < 1029 {
        data.push(b' ');
    }

    data.push(END_MARKER);
    let crc = wiresx_sum(data);
    data.push(crc);
}

fn directory_row(kind: u8, reflector: &ReflectorEntry) -> [u8; 50] {
    let mut row = [b' '; 50];
    row[0] = kind;
    row[1..6].copy_from_slice(reflector.id.as_bytes());
    row[6..22].copy_from_slice(reflector.name.as_bytes());
    row[22..25].copy_from_slice(reflector.count.as_bytes());
    row[35..49].copy_from_slice(reflector.desc.as_bytes());
    row[49] = 0x0D;
    row
}

fn calculate_ft(length: usize, offset: usize) -> u8 {
    match length - offset {
        l if l > 220 => 7,
        l if l > 180 => 6,
        l if l > 140 => 5,
        l if l > 100 => 4,
        l if l > 60 => 3,
        l if l > 20 => 2,
        _ => 1,
    }
}

fn parse_digits(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

fn frequency_string(tx: u32, rx: u32) -> String {
    let (offset, sign) = if tx >= rx {
        (tx - rx, '-')
    } else {
        (rx - tx, '+')
    };

    let freq_hz = tx % 1_000_000;
    let freq_khz = (freq_hz + 500) / 1000;

    format!(
        "{:05}.{:03}000{}{:03}.{:06}",
        tx / 1_000_000,
        freq_khz,
        sign,
        offset / 1_000_000,
        offset % 1_000_000
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::ReflectorList;
    use std::io::Write;

    const HOSTS: &str = r#"{
        "reflectors": [
            {
                "designator": "23201",
                "country": "FR",
                "name": "Paris",
                "use_xx_prefix": false,
                "description": "Ile de France",
                "port": 42000,
                "ipv4": "127.0.0.1",
                "ipv6": null
            }
        ]
    }"#;

    fn engine() -> (WiresX, tempfile::NamedTempFile) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(HOSTS.as_bytes()).unwrap();

        let mut list = ReflectorList::new(f.path(), 0, false);
        list.add_fcs_room("FCS00201", "Europe");
        list.load().unwrap();
        list.reload();

        let mut wx = WiresX::new("G4KLX", "ND", Rc::new(RefCell::new(list)));
        wx.set_info("Test Node", 438_100_000, 430_500_000);
        (wx, f)
    }

    /// Encode a command buffer into the frame train a radio would send.
    fn command_frames(wx: &WiresX, payload_bytes: &[u8]) -> Vec<Frame> {
        // Reuse the reply builder: the framing is symmetric.
        wx.build_frames(payload_bytes)
    }

    fn command_with_crc(code: [u8; 3], args: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8];
        data.extend_from_slice(&code);
        data.push(b' ');
        data.extend_from_slice(args);
        data.push(END_MARKER);
        let crc = wiresx_sum(&data);
        data.push(crc);
        data
    }

    fn drive(wx: &mut WiresX, frames: &[Frame]) -> WxStatus {
        let mut status = WxStatus::None;
        for frame in frames {
            let s = wx.process(frame);
            if s != WxStatus::None {
                status = s;
            }
        }
        status
    }

    fn drain_replies(wx: &mut WiresX) -> Vec<Frame> {
        // Fire the 1 s reply timer, then pull the TX queue dry at the
        // pacing interval.
        let mut frames = Vec::new();
        for _ in 0..64 {
            if let Some(frame) = wx.clock(1000) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Reassemble a reply train back into the flat record.
    fn reassemble(frames: &[Frame]) -> Vec<u8> {
        let mut buffer = vec![0u8; 2048];
        let mut max = 0usize;

        for frame in frames {
            let fich = frame.fich().unwrap();
            if fich.fi != Communications {
                continue;
            }

            let fn_ = usize::from(fich.fn_) + usize::from(fich.bn) * 8;
            if fn_ == 0 {
                continue;
            }

            if fn_ == 1 {
                let d2 = payload::read_data_fr_2(frame.payload());
                buffer[0..20].copy_from_slice(&d2);
                max = max.max(20);
            } else {
                let off = (fn_ - 2) * 40 + 20;
                let d1 = payload::read_data_fr_1(frame.payload());
                let d2 = payload::read_data_fr_2(frame.payload());
                buffer[off..off + 20].copy_from_slice(&d1);
                buffer[off + 20..off + 40].copy_from_slice(&d2);
                max = max.max(off + 40);
            }
        }

        buffer.truncate(max);
        buffer
    }

    #[test]
    fn test_dx_reply_round_trip() {
        let (mut wx, _f) = engine();

        let cmd = command_with_crc(DX_REQ, &[]);
        let frames = command_frames(&wx, &cmd);
        let status = drive(&mut wx, &frames);
        assert_eq!(status, WxStatus::None);

        let replies = drain_replies(&mut wx);
        // Header + at least three data frames + terminator.
        assert!(replies.len() >= 5);

        let first = replies.first().unwrap();
        assert_eq!(first.fich().unwrap().fi, FrameInfo::Header);
        assert_eq!(first.tag(), b"G4KLX     ");

        let last = replies.last().unwrap();
        assert_eq!(last.fich().unwrap().fi, FrameInfo::Terminator);
        assert!(last.is_end());

        // Sequence bytes step by two.
        for (i, frame) in replies.iter().enumerate() {
            assert_eq!(frame.seq() & 0xFE, (i as u8) * 2);
        }

        let record = reassemble(&replies);
        assert_eq!(&record[1..5], &DX_RESP);
        // Disconnected layout.
        assert_eq!(&record[34..36], b"12");
        assert_eq!(&record[57..60], b"000");
        // The end marker and checksum survive the round trip.
        assert_eq!(record[127], END_MARKER);
        assert_eq!(record[128], wiresx_sum(&record[0..128]));
    }

    #[test]
    fn test_connect_selects_reflector_and_replies() {
        let (mut wx, _f) = engine();

        let cmd = command_with_crc(CONN_REQ, b"23201");
        let frames = command_frames(&wx, &cmd);
        let status = drive(&mut wx, &frames);
        assert_eq!(status, WxStatus::ConnectYsf);
        assert_eq!(wx.reflector().unwrap().id, "23201");
        assert!(wx.is_busy());

        let replies = drain_replies(&mut wx);
        let record = reassemble(&replies);
        assert_eq!(&record[1..5], &CONN_RESP);
        assert_eq!(&record[34..36], b"15");
        assert_eq!(&record[36..41], b"23201");
        assert_eq!(&record[84..89], b"00000");
    }

    #[test]
    fn test_connect_to_fcs_room() {
        let (mut wx, _f) = engine();

        let cmd = command_with_crc(CONN_REQ, b"00010");
        let frames = command_frames(&wx, &cmd);
        assert_eq!(drive(&mut wx, &frames), WxStatus::ConnectFcs);
    }

    #[test]
    fn test_disconnect_clears_reflector() {
        let (mut wx, _f) = engine();
        let entry = wx.reflectors.borrow().find_by_id("23201").unwrap().clone();
        wx.set_reflector(Some(entry));

        let cmd = command_with_crc(DISC_REQ, &[]);
        let frames = command_frames(&wx, &cmd);
        assert_eq!(drive(&mut wx, &frames), WxStatus::Disconnect);
        assert!(wx.reflector().is_none());

        let replies = drain_replies(&mut wx);
        let record = reassemble(&replies);
        assert_eq!(&record[34..36], b"12");
    }

    #[test]
    fn test_all_reply_contains_directory_rows() {
        let (mut wx, _f) = engine();
        // Restage so the page-zero reload has something to swap in.
        wx.reflectors.borrow_mut().load().unwrap();

        let cmd = command_with_crc(ALL_REQ, b"01001");
        let frames = command_frames(&wx, &cmd);
        drive(&mut wx, &frames);

        let replies = drain_replies(&mut wx);
        let record = reassemble(&replies);
        assert_eq!(&record[1..5], &ALL_RESP);
        assert_eq!(&record[5..7], b"21");
        // Two entries: the hosts file reflector and the FCS room.
        assert_eq!(&record[22..28], b"002002");
        assert_eq!(record[29], b'5');
        assert_eq!(&record[30..35], b"00010");
    }

    #[test]
    fn test_search_not_found_short_form() {
        let (mut wx, _f) = engine();

        let mut args = Vec::new();
        args.extend_from_slice(b"11001");
        args.extend_from_slice(b"ZZZZZZZZ        ");
        let cmd = command_with_crc(ALL_REQ, &args);
        let frames = command_frames(&wx, &cmd);
        drive(&mut wx, &frames);

        let replies = drain_replies(&mut wx);
        let record = reassemble(&replies);
        assert_eq!(&record[5..7], b"01");
        assert_eq!(&record[23..28], b"00000");
    }

    #[test]
    fn test_bad_crc_is_ignored() {
        let (mut wx, _f) = engine();

        let mut cmd = command_with_crc(DX_REQ, &[]);
        let len = cmd.len();
        cmd[len - 1] ^= 0xFF;

        let frames = command_frames(&wx, &cmd);
        assert_eq!(drive(&mut wx, &frames), WxStatus::None);
        assert!(drain_replies(&mut wx).is_empty());
    }

    #[test]
    fn test_passthrough_forwards_everything_but_disconnect() {
        let (mut wx, _f) = engine();
        wx.set_passthrough(true);

        let cmd = command_with_crc(CONN_REQ, b"23201");
        let frames = command_frames(&wx, &cmd);
        assert_eq!(drive(&mut wx, &frames), WxStatus::None);

        let cmd = command_with_crc(DISC_REQ, &[]);
        let frames = command_frames(&wx, &cmd);
        assert_eq!(drive(&mut wx, &frames), WxStatus::Disconnect);
    }

    #[test]
    fn test_frequency_string_layout() {
        assert_eq!(
            frequency_string(438_100_000, 430_500_000),
            "00438.100000-007.600000"
        );
        assert_eq!(frequency_string(430_500_000, 438_100_000).chars().nth(12), Some('+'));
        assert_eq!(frequency_string(438_100_000, 430_500_000).len(), 23);
    }

    #[test]
    fn test_reply_pacing_is_at_least_90ms() {
        let (mut wx, _f) = engine();

        let cmd = command_with_crc(DX_REQ, &[]);
        let frames = command_frames(&wx, &cmd);
        drive(&mut wx, &frames);

        // Fire the reply timer.
        assert!(wx.clock(1000).is_none() || true);

        // 10 ms ticks: a frame at most every ninth tick.
        let mut got = 0;
        let mut since_last = 1000u64;
        for _ in 0..200 {
            match wx.clock(10) {
                Some(_) => {
                    assert!(since_last >= TX_INTERVAL_MS);
                    since_last = 0;
                    got += 1;
                }
                None => since_last += 10,
            }
        }
        assert!(got >= 5);
    }
}
