//! Record-then-replay frame store for the parrot.

use crate::frame::{FRAME_LENGTH, Frame};

/// Bounded linear store of recorded frames.
///
/// Capacity is sized from the maximum transmission length; writes stop
/// (dropping frames) when less than a safety margin remains, so a runaway
/// transmission cannot grow the buffer.
pub struct ParrotStore {
    data: Vec<u8>,
    capacity: usize,
    used: usize,
    ptr: usize,
}

const MARGIN: usize = 1000;

impl ParrotStore {
    /// `timeout_secs` is the longest transmission worth recording.
    pub fn new(timeout_secs: usize) -> Self {
        let capacity = timeout_secs * 1550 + 1000;
        Self {
            data: vec![0u8; capacity],
            capacity,
            used: 0,
            ptr: 0,
        }
    }

    /// Append one frame. Returns false when the store is (nearly) full.
    pub fn write(&mut self, frame: &Frame) -> bool {
        if self.capacity - self.used < MARGIN {
            return false;
        }

        self.data[self.used..self.used + FRAME_LENGTH].copy_from_slice(frame.as_bytes());
        self.used += FRAME_LENGTH;
        true
    }

    /// Rewind the read pointer to the start of the recording.
    pub fn end(&mut self) {
        self.ptr = 0;
    }

    /// Drop the recording entirely.
    pub fn clear(&mut self) {
        self.used = 0;
        self.ptr = 0;
    }

    /// Read the next recorded frame. The store self-clears once the last
    /// frame has been handed out.
    pub fn read(&mut self) -> Option<Frame> {
        if self.used == 0 {
            return None;
        }

        let frame = Frame::from_bytes(&self.data[self.ptr..self.ptr + FRAME_LENGTH]);
        self.ptr += FRAME_LENGTH;

        if self.ptr >= self.used {
            self.used = 0;
        }

        frame
    }
}
