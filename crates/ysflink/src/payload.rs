//! Data-channel access into the FICH-typed payload.
//!
//! The payload area (frame bytes 43..155) is sliced differently for every
//! data type. The FEC and whitening applied by the radio codec live outside
//! this crate; here the data channels occupy fixed sub-slices:
//!
//! - `DATA_FR`: Data1 at 0..20, Data2 at 20..40, the full block at 0..90.
//! - `V/D mode 2`: five 18-byte subframes of 5 carrier + 13 voice bytes;
//!   the 10-byte DCH is the first 2 bytes of each carrier.
//! - `V/D mode 1`: five 18-byte subframes of 9 carrier + 9 voice bytes;
//!   the 20-byte DCH is the first 4 bytes of each carrier.
//! - `VOICE_FR`: 18-byte audio slices at 0, 18, 36, 54, 72; the header
//!   fragment carries a 20-byte DCH at 0..20 with audio only at 54 and 72.
//!
//! Header and terminator frames carry the 40-byte CSD block (destination
//! callsign, then source callsign, then station data) at 0..40.

/// Voice slice offsets for V/D mode 2 (13 bytes each).
pub const VD2_VOICE_OFFSETS: [usize; 5] = [5, 23, 41, 59, 77];

/// Voice slice offsets for V/D mode 1 (9 bytes each).
pub const VD1_VOICE_OFFSETS: [usize; 5] = [9, 27, 45, 63, 81];

/// Audio slice offsets for full-rate voice (18 bytes each).
pub const VOICE_FR_OFFSETS: [usize; 5] = [0, 18, 36, 54, 72];

/// Read the Data1 channel of a full-rate data frame.
pub fn read_data_fr_1(payload: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&payload[0..20]);
    out
}

/// Read the Data2 channel of a full-rate data frame.
pub fn read_data_fr_2(payload: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&payload[20..40]);
    out
}

/// Write the Data1 channel of a full-rate data frame.
pub fn write_data_fr_1(data: &[u8], payload: &mut [u8]) {
    payload[0..20].copy_from_slice(&data[0..20]);
}

/// Write the Data2 channel of a full-rate data frame.
pub fn write_data_fr_2(data: &[u8], payload: &mut [u8]) {
    payload[20..40].copy_from_slice(&data[0..20]);
}

/// Read the 40-byte CSD block of a header or terminator frame.
pub fn read_header(payload: &[u8]) -> [u8; 40] {
    let mut out = [0u8; 40];
    out.copy_from_slice(&payload[0..40]);
    out
}

/// Write the 40-byte CSD block of a header or terminator frame.
pub fn write_header(data: &[u8], payload: &mut [u8]) {
    payload[0..40].copy_from_slice(&data[0..40]);
}

/// Read the 10-byte DCH of a V/D mode 2 frame.
pub fn read_vd2_dch(payload: &[u8]) -> [u8; 10] {
    let mut out = [0u8; 10];
    for k in 0..5 {
        out[k * 2..k * 2 + 2].copy_from_slice(&payload[k * 18..k * 18 + 2]);
    }
    out
}

/// Write the 10-byte DCH of a V/D mode 2 frame.
pub fn write_vd2_dch(dch: &[u8], payload: &mut [u8]) {
    for k in 0..5 {
        payload[k * 18..k * 18 + 2].copy_from_slice(&dch[k * 2..k * 2 + 2]);
    }
}

/// Read the 20-byte DCH of a V/D mode 1 frame.
pub fn read_vd1_dch(payload: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    for k in 0..5 {
        out[k * 4..k * 4 + 4].copy_from_slice(&payload[k * 18..k * 18 + 4]);
    }
    out
}

/// Write the 20-byte DCH of a V/D mode 1 frame.
pub fn write_vd1_dch(dch: &[u8], payload: &mut [u8]) {
    for k in 0..5 {
        payload[k * 18..k * 18 + 4].copy_from_slice(&dch[k * 4..k * 4 + 4]);
    }
}

/// Read the 20-byte DCH of a full-rate voice header fragment.
pub fn read_voice_fr_dch(payload: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&payload[0..20]);
    out
}

/// Write the 20-byte DCH of a full-rate voice header fragment.
pub fn write_voice_fr_dch(dch: &[u8], payload: &mut [u8]) {
    payload[0..20].copy_from_slice(&dch[0..20]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FRAME_LENGTH, PAYLOAD_OFFSET};

    const PAYLOAD_LENGTH: usize = FRAME_LENGTH - PAYLOAD_OFFSET;

    #[test]
    fn test_data_fr_channels() {
        let mut payload = [0u8; PAYLOAD_LENGTH];
        let d1 = [0xAA; 20];
        let d2 = [0x55; 20];

        write_data_fr_1(&d1, &mut payload);
        write_data_fr_2(&d2, &mut payload);

        assert_eq!(read_data_fr_1(&payload), d1);
        assert_eq!(read_data_fr_2(&payload), d2);
        assert!(payload[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_vd2_dch_round_trip() {
        let mut payload = [0u8; PAYLOAD_LENGTH];
        let dch: [u8; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        write_vd2_dch(&dch, &mut payload);
        assert_eq!(read_vd2_dch(&payload), dch);

        // The voice slices are untouched.
        for off in VD2_VOICE_OFFSETS {
            assert!(payload[off..off + 13].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_vd1_dch_round_trip() {
        let mut payload = [0u8; PAYLOAD_LENGTH];
        let dch: [u8; 20] = std::array::from_fn(|i| i as u8);

        write_vd1_dch(&dch, &mut payload);
        assert_eq!(read_vd1_dch(&payload), dch);
    }

    #[test]
    fn test_slice_offsets_stay_in_bounds() {
        for off in VD2_VOICE_OFFSETS {
            assert!(off + 13 <= 90);
        }
        for off in VD1_VOICE_OFFSETS {
            assert!(off + 9 <= 90);
        }
        for off in VOICE_FR_OFFSETS {
            assert!(off + 18 <= 90);
        }
    }
}
