//! The Frame Information Channel header.
//!
//! The FICH describes what the rest of the frame contains: frame position
//! (header / communications / terminator), data type, call mode, the block
//! and frame counters used for multi-frame paging, and the 7-bit DG-ID.
//! On the wire the eight fields are packed into 3 bytes:
//!
//! ```text
//! FI(2) DT(2) CM(2) BN(2) | BT(2) FN(3) FT(3) | DGID(7) pad(1)
//! ```
//!
//! The IMRS framing carries the same fields in a 4-byte raw form: the three
//! packed bytes followed by a zero pad byte.

/// Frame position within a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInfo {
    /// Start of a transmission.
    Header = 0,
    /// In-progress voice/data frame.
    Communications = 1,
    /// End of a transmission.
    Terminator = 2,
}

impl FrameInfo {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Header),
            1 => Some(Self::Communications),
            2 => Some(Self::Terminator),
            _ => None,
        }
    }
}

/// Data type of the frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// V/D mode 1: voice + slow data.
    Vd1 = 0,
    /// Full-rate data.
    DataFr = 1,
    /// V/D mode 2: voice + slow data, narrow voice.
    Vd2 = 2,
    /// Full-rate voice.
    VoiceFr = 3,
}

impl DataType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Vd1,
            1 => Self::DataFr,
            2 => Self::Vd2,
            _ => Self::VoiceFr,
        }
    }

    /// The configuration-facing mode bit for this data type.
    pub fn mode_bit(self) -> u8 {
        match self {
            Self::Vd1 => MODE_VD1,
            Self::Vd2 => MODE_VD2,
            Self::VoiceFr => MODE_VOICE_FR,
            Self::DataFr => MODE_DATA_FR,
        }
    }
}

/// Call mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Group1 = 0,
    Group2 = 1,
    Individual = 3,
}

impl CallMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Group1,
            1 => Self::Group2,
            _ => Self::Individual,
        }
    }

    /// Whether this is a group call of either flavour.
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group1 | Self::Group2)
    }
}

/// Allowed-mode bits as used in destination configuration.
pub const MODE_VD1: u8 = 0x01;
pub const MODE_VD2: u8 = 0x02;
pub const MODE_VOICE_FR: u8 = 0x04;
pub const MODE_DATA_FR: u8 = 0x08;
pub const MODE_ALL: u8 = MODE_VD1 | MODE_VD2 | MODE_VOICE_FR | MODE_DATA_FR;

/// The DG-ID reserved for Wires-X signalling.
pub const WIRESX_DGID: u8 = 127;

/// Decoded Frame Information Channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fich {
    pub fi: FrameInfo,
    pub dt: DataType,
    pub cm: CallMode,
    /// Block number.
    pub bn: u8,
    /// Block total.
    pub bt: u8,
    /// Frame number within the block.
    pub fn_: u8,
    /// Frame total.
    pub ft: u8,
    /// 7-bit Digital Group ID.
    pub dgid: u8,
}

impl Fich {
    /// A FICH with the given position and data type, everything else zero
    /// (group call, no paging, DG-ID 0).
    pub fn new(fi: FrameInfo, dt: DataType) -> Self {
        Self {
            fi,
            dt,
            cm: CallMode::Group1,
            bn: 0,
            bt: 0,
            fn_: 0,
            ft: 0,
            dgid: 0,
        }
    }

    /// Decode from the 3 packed bytes at frame offset 40. Returns `None`
    /// for the reserved FI value.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        debug_assert!(bytes.len() >= 3);

        let fi = FrameInfo::from_bits(bytes[0] >> 6)?;
        Some(Self {
            fi,
            dt: DataType::from_bits(bytes[0] >> 4),
            cm: CallMode::from_bits(bytes[0] >> 2),
            bn: bytes[0] & 0x03,
            bt: bytes[1] >> 6,
            fn_: (bytes[1] >> 3) & 0x07,
            ft: bytes[1] & 0x07,
            dgid: bytes[2] >> 1,
        })
    }

    /// Encode to the 3 packed bytes.
    pub fn encode(&self) -> [u8; 3] {
        [
            ((self.fi as u8) << 6) | ((self.dt as u8) << 4) | ((self.cm as u8) << 2) | (self.bn & 0x03),
            ((self.bt & 0x03) << 6) | ((self.fn_ & 0x07) << 3) | (self.ft & 0x07),
            (self.dgid & 0x7F) << 1,
        ]
    }

    /// Decode from the 4-byte raw form used by the IMRS framing.
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        Self::decode(&raw[0..3])
    }

    /// Encode to the 4-byte raw form used by the IMRS framing.
    pub fn to_raw(&self) -> [u8; 4] {
        let packed = self.encode();
        [packed[0], packed[1], packed[2], 0x00]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let fich = Fich {
            fi: FrameInfo::Communications,
            dt: DataType::DataFr,
            cm: CallMode::Individual,
            bn: 2,
            bt: 1,
            fn_: 5,
            ft: 7,
            dgid: 127,
        };

        let decoded = Fich::decode(&fich.encode()).unwrap();
        assert_eq!(decoded, fich);
    }

    #[test]
    fn test_raw_round_trip() {
        let mut fich = Fich::new(FrameInfo::Terminator, DataType::VoiceFr);
        fich.dgid = 64;
        fich.fn_ = 7;

        let raw = fich.to_raw();
        assert_eq!(raw[3], 0x00);
        assert_eq!(Fich::from_raw(&raw).unwrap(), fich);
    }

    #[test]
    fn test_reserved_fi_rejected() {
        // FI bits 0b11 are reserved.
        assert!(Fich::decode(&[0xC0, 0x00, 0x00]).is_none());
    }

    #[test]
    fn test_mode_bits() {
        assert_eq!(DataType::Vd1.mode_bit(), MODE_VD1);
        assert_eq!(DataType::Vd2.mode_bit(), MODE_VD2);
        assert_eq!(DataType::VoiceFr.mode_bit(), MODE_VOICE_FR);
        assert_eq!(DataType::DataFr.mode_bit(), MODE_DATA_FR);
        assert_eq!(
            MODE_ALL,
            MODE_VD1 | MODE_VD2 | MODE_VOICE_FR | MODE_DATA_FR
        );
    }

    #[test]
    fn test_group_call_modes() {
        assert!(CallMode::Group1.is_group());
        assert!(CallMode::Group2.is_group());
        assert!(!CallMode::Individual.is_group());
    }
}
