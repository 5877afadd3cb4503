//! DTMF command decoding from V/D mode 2 voice.
//!
//! A DTMF tone leaves a recognisable imprint on the 13-byte AMBE slices: a
//! masked signature identifies a tone slice, and eleven 2-bit symbols
//! within it select the digit. Matched slices are overwritten with a
//! silence pattern so the tone never reaches the far end. Three matching
//! slices in a row register one keypress; about two seconds of non-tone
//! slices (or the end of the transmission) completes the accumulated
//! string, which then validates into a connect or disconnect command.

use crate::payload::VD2_VOICE_OFFSETS;

const MASK: [u8; 13] = [
    0xCC, 0xCC, 0xDD, 0xDD, 0xEE, 0xEE, 0xFF, 0xFF, 0xEE, 0xEE, 0xDD, 0x99, 0x98,
];
const SIG: [u8; 13] = [
    0x08, 0x80, 0xC9, 0x10, 0x26, 0xA0, 0xE3, 0x31, 0xE2, 0xE6, 0xD5, 0x08, 0x88,
];

const SYM_MASK: [u8; 11] = [
    0x33, 0x33, 0x22, 0x22, 0x11, 0x11, 0x11, 0x11, 0x22, 0x66, 0x66,
];

// Per-character symbol patterns, after masking with SYM_MASK.
const SYMBOLS: [(char, [u8; 11]); 16] = [
    ('0', [0x33, 0x11, 0x22, 0x02, 0x00, 0x00, 0x01, 0x11, 0x00, 0x04, 0x62]),
    ('1', [0x33, 0x10, 0x20, 0x20, 0x00, 0x01, 0x01, 0x10, 0x00, 0x04, 0x62]),
    ('2', [0x22, 0x23, 0x02, 0x02, 0x00, 0x10, 0x01, 0x01, 0x00, 0x04, 0x62]),
    ('3', [0x22, 0x22, 0x00, 0x20, 0x00, 0x11, 0x01, 0x00, 0x00, 0x04, 0x62]),
    ('4', [0x11, 0x11, 0x22, 0x02, 0x01, 0x00, 0x00, 0x11, 0x00, 0x06, 0x44]),
    ('5', [0x11, 0x10, 0x20, 0x20, 0x01, 0x01, 0x00, 0x10, 0x00, 0x06, 0x44]),
    ('6', [0x00, 0x23, 0x02, 0x02, 0x01, 0x10, 0x00, 0x01, 0x00, 0x06, 0x44]),
    ('7', [0x00, 0x22, 0x00, 0x20, 0x01, 0x11, 0x00, 0x00, 0x00, 0x06, 0x44]),
    ('8', [0x33, 0x11, 0x22, 0x02, 0x10, 0x00, 0x11, 0x11, 0x22, 0x60, 0x22]),
    ('9', [0x33, 0x10, 0x20, 0x20, 0x10, 0x01, 0x11, 0x10, 0x22, 0x60, 0x22]),
    ('A', [0x22, 0x23, 0x02, 0x02, 0x10, 0x10, 0x11, 0x01, 0x22, 0x60, 0x22]),
    ('B', [0x22, 0x22, 0x00, 0x20, 0x10, 0x11, 0x11, 0x00, 0x22, 0x60, 0x22]),
    ('C', [0x11, 0x11, 0x22, 0x02, 0x11, 0x00, 0x10, 0x11, 0x22, 0x62, 0x04]),
    ('D', [0x11, 0x10, 0x20, 0x20, 0x11, 0x01, 0x10, 0x10, 0x22, 0x62, 0x04]),
    ('*', [0x00, 0x23, 0x02, 0x02, 0x11, 0x10, 0x10, 0x01, 0x22, 0x62, 0x04]),
    ('#', [0x00, 0x22, 0x00, 0x20, 0x11, 0x11, 0x10, 0x00, 0x22, 0x62, 0x04]),
];

const SILENCE: [u8; 13] = [
    0x7B, 0xB2, 0x8E, 0x43, 0x36, 0xE4, 0xA2, 0x39, 0x78, 0x49, 0x33, 0x68, 0x33,
];

// Which slice byte each of the eleven symbols is taken from.
const SYM_BYTES: [usize; 11] = [0, 1, 2, 3, 4, 5, 8, 9, 10, 11, 12];

const PRESS_THRESHOLD: u32 = 3;
const RELEASE_THRESHOLD: u32 = 100;

/// What a completed DTMF string asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfCommand {
    None,
    /// `#` plus five digits.
    ConnectYsf,
    /// `A` plus two or three digits.
    ConnectFcs,
    /// A lone `#`, or `#99999`.
    Disconnect,
}

/// The keypress decoder and accumulator.
pub struct Dtmf {
    data: String,
    command: String,
    pressed: bool,
    press_count: u32,
    release_count: u32,
    last_char: char,
}

impl Dtmf {
    pub fn new() -> Self {
        Self {
            data: String::new(),
            command: String::new(),
            pressed: false,
            press_count: 0,
            release_count: 0,
            last_char: ' ',
        }
    }

    /// Run the decoder over one V/D mode 2 payload, silencing any tone
    /// slices in place. `end` marks the end-of-transmission frame.
    pub fn decode_vd2(&mut self, payload: &mut [u8], end: bool) -> DtmfCommand {
        for offset in VD2_VOICE_OFFSETS {
            let command = self.decode_slice(&mut payload[offset..offset + 13], end);
            if command != DtmfCommand::None {
                return command;
            }
        }

        DtmfCommand::None
    }

    fn decode_slice(&mut self, ambe: &mut [u8], end: bool) -> DtmfCommand {
        let is_tone = !end
            && ambe
                .iter()
                .zip(MASK.iter().zip(SIG.iter()))
                .all(|(&b, (&m, &s))| b & m == s);

        if is_tone {
            let mut symbols = [0u8; 11];
            for (i, &byte) in SYM_BYTES.iter().enumerate() {
                symbols[i] = ambe[byte] & SYM_MASK[i];
            }

            let c = SYMBOLS
                .iter()
                .find(|(_, pattern)| *pattern == symbols)
                .map(|(c, _)| *c)
                .unwrap_or(' ');

            if c != ' ' {
                ambe.copy_from_slice(&SILENCE);
            }

            if c == self.last_char {
                self.press_count += 1;
            } else {
                self.last_char = c;
                self.press_count = 0;
            }

            if c != ' ' && !self.pressed && self.press_count >= PRESS_THRESHOLD {
                self.data.push(c);
                self.release_count = 0;
                self.pressed = true;
            }
        } else {
            if (end || self.release_count >= RELEASE_THRESHOLD) && !self.data.is_empty() {
                self.command = std::mem::take(&mut self.data);
                self.release_count = 0;
            }

            self.pressed = false;
            self.release_count += 1;
            self.press_count = 0;
            self.last_char = ' ';
        }

        self.validate()
    }

    fn validate(&self) -> DtmfCommand {
        if self.command.is_empty() {
            return DtmfCommand::None;
        }

        let mut chars = self.command.chars();
        let Some(first) = chars.next() else {
            return DtmfCommand::None;
        };
        let rest: String = chars.collect();
        let digits = rest.chars().all(|c| c.is_ascii_digit());

        match (first, rest.len()) {
            ('#', 0) => DtmfCommand::Disconnect,
            ('A', 2 | 3) if digits => DtmfCommand::ConnectFcs,
            ('#', 5) if digits => {
                if self.command == "#99999" {
                    DtmfCommand::Disconnect
                } else {
                    DtmfCommand::ConnectYsf
                }
            }
            _ => DtmfCommand::None,
        }
    }

    /// Take the digits of the completed command (prefix stripped) and reset
    /// the decoder.
    pub fn take_reflector(&mut self) -> String {
        let command = std::mem::take(&mut self.command);
        self.reset();

        if command.is_empty() {
            String::new()
        } else {
            command[1..].to_string()
        }
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.command.clear();
        self.pressed = false;
        self.press_count = 0;
        self.release_count = 0;
        self.last_char = ' ';
    }
}

impl Default for Dtmf {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand DTMF digits into an FCS room designator: two digits select room
/// `N` of reflector `M`, three digits a room of reflector 00x, five digits
/// spell the reflector and room out in full.
pub fn fcs_room_from_digits(digits: &str) -> Option<String> {
    match digits.len() {
        2 => {
            let bytes = digits.as_bytes();
            Some(format!(
                "FCS00{}0{}",
                bytes[0] as char, bytes[1] as char
            ))
        }
        3 => Some(format!("FCS00{digits}")),
        5 => Some(format!("FCS{digits}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a tone slice for a character by oring its symbol bits into the
    /// signature.
    fn tone_slice(c: char) -> [u8; 13] {
        let pattern = SYMBOLS.iter().find(|(ch, _)| *ch == c).unwrap().1;

        let mut slice = SIG;
        for (i, &byte) in SYM_BYTES.iter().enumerate() {
            slice[byte] |= pattern[i];
        }
        slice
    }

    fn press(dtmf: &mut Dtmf, c: char) {
        // Four identical tone slices pass the three-press debounce.
        for _ in 0..4 {
            let mut slice = tone_slice(c);
            dtmf.decode_slice(&mut slice, false);
        }
        // A gap between presses.
        let mut silent = [0u8; 13];
        dtmf.decode_slice(&mut silent, false);
    }

    fn finish(dtmf: &mut Dtmf) -> DtmfCommand {
        let mut silent = [0u8; 13];
        dtmf.decode_slice(&mut silent, true)
    }

    #[test]
    fn test_tone_slice_is_detected_and_silenced() {
        let mut dtmf = Dtmf::new();
        let mut slice = tone_slice('5');
        dtmf.decode_slice(&mut slice, false);
        assert_eq!(slice, SILENCE);
    }

    #[test]
    fn test_hash_and_digits_connects_ysf() {
        let mut dtmf = Dtmf::new();
        for c in "#12345".chars() {
            press(&mut dtmf, c);
        }
        assert_eq!(finish(&mut dtmf), DtmfCommand::ConnectYsf);
        assert_eq!(dtmf.take_reflector(), "12345");
    }

    #[test]
    fn test_lone_hash_disconnects() {
        let mut dtmf = Dtmf::new();
        press(&mut dtmf, '#');
        assert_eq!(finish(&mut dtmf), DtmfCommand::Disconnect);
    }

    #[test]
    fn test_magic_99999_disconnects() {
        let mut dtmf = Dtmf::new();
        for c in "#99999".chars() {
            press(&mut dtmf, c);
        }
        assert_eq!(finish(&mut dtmf), DtmfCommand::Disconnect);
    }

    #[test]
    fn test_a_and_digits_connects_fcs() {
        let mut dtmf = Dtmf::new();
        for c in "A123".chars() {
            press(&mut dtmf, c);
        }
        assert_eq!(finish(&mut dtmf), DtmfCommand::ConnectFcs);
        assert_eq!(dtmf.take_reflector(), "123");
    }

    #[test]
    fn test_garbage_sequence_yields_none() {
        let mut dtmf = Dtmf::new();
        for c in "B42".chars() {
            press(&mut dtmf, c);
        }
        assert_eq!(finish(&mut dtmf), DtmfCommand::None);
    }

    #[test]
    fn test_short_blip_is_debounced() {
        let mut dtmf = Dtmf::new();
        // Two slices only: below the press threshold.
        for _ in 0..2 {
            let mut slice = tone_slice('7');
            dtmf.decode_slice(&mut slice, false);
        }
        assert_eq!(finish(&mut dtmf), DtmfCommand::None);
    }

    #[test]
    fn test_release_timeout_completes_command() {
        let mut dtmf = Dtmf::new();
        press(&mut dtmf, '#');

        let mut status = DtmfCommand::None;
        for _ in 0..(RELEASE_THRESHOLD + 2) {
            let mut silent = [0u8; 13];
            status = dtmf.decode_slice(&mut silent, false);
            if status != DtmfCommand::None {
                break;
            }
        }
        assert_eq!(status, DtmfCommand::Disconnect);
    }

    #[test]
    fn test_fcs_room_expansion() {
        assert_eq!(fcs_room_from_digits("12").as_deref(), Some("FCS00102"));
        assert_eq!(fcs_room_from_digits("201").as_deref(), Some("FCS00201"));
        assert_eq!(fcs_room_from_digits("00305").as_deref(), Some("FCS00305"));
        assert_eq!(fcs_room_from_digits("1234"), None);
    }
}
