//! Caller blocklist with checksum-gated hot reload.
//!
//! The file holds one callsign pattern per line. A timer re-reads it on a
//! minute-granularity period, but the list is only rebuilt when the
//! Fletcher-16 checksum of the file bytes actually changed.

use std::path::PathBuf;

use tracing::info;

use crate::checksum::fletcher16;
use crate::frame::CALLSIGN_LENGTH;
use crate::timer::Timer;

/// The deny list over caller callsigns.
pub struct BlockList {
    file: PathBuf,
    patterns: Vec<String>,
    timer: Timer,
    checksum: u16,
}

impl BlockList {
    /// `reload_time` is in minutes.
    pub fn new(file: impl Into<PathBuf>, reload_time: u64) -> Self {
        Self {
            file: file.into(),
            patterns: Vec::new(),
            timer: Timer::from_secs(reload_time * 60),
            checksum: 0,
        }
    }

    /// Load the file and start the reload timer.
    pub fn start(&mut self) {
        self.load();
        self.timer.start();
    }

    /// Whether any loaded pattern is a case-insensitive substring of the
    /// callsign, padded to the 10-byte field.
    pub fn check(&self, callsign: &[u8]) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        let mut call = String::from_utf8_lossy(callsign).to_uppercase();
        while call.len() < CALLSIGN_LENGTH {
            call.push(' ');
        }

        self.patterns.iter().any(|p| call.contains(p.as_str()))
    }

    /// Tick the reload timer.
    pub fn clock(&mut self, ms: u64) {
        self.timer.clock(ms);

        if self.timer.has_expired() {
            self.load();
            self.timer.start();
        }
    }

    fn load(&mut self) -> bool {
        let Ok(bytes) = std::fs::read(&self.file) else {
            if !self.patterns.is_empty() {
                self.patterns.clear();
                info!("Block list file removed, cleared the list");
            }
            return false;
        };

        let checksum = fletcher16(&bytes);
        if checksum == self.checksum {
            return false;
        }
        self.checksum = checksum;

        self.patterns = String::from_utf8_lossy(&bytes)
            .lines()
            .map(|line| line.trim_end_matches(['\r', '\n']).trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.to_uppercase())
            .collect();

        info!("Loaded {} callsigns into the block list", self.patterns.len());

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn list_from(content: &str) -> (BlockList, tempfile::NamedTempFile) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();

        let mut list = BlockList::new(f.path(), 1);
        list.start();
        (list, f)
    }

    #[test]
    fn test_substring_match_case_insensitive() {
        let (list, _f) = list_from("badcall\n# comment\nN0CALL\n");

        assert!(list.check(b"BADCALL123"));
        assert!(list.check(b"N0CALL    "));
        assert!(list.check(b"xxN0CALLxx"));
        assert!(!list.check(b"G4KLX     "));
    }

    #[test]
    fn test_short_callsign_padded_before_match() {
        let (list, _f) = list_from("L  \n");
        // Pattern has trailing spaces trimmed; "L" matches anywhere.
        assert!(list.check(b"L"));
    }

    #[test]
    fn test_empty_list_blocks_nothing() {
        let (list, _f) = list_from("");
        assert!(!list.check(b"ANY1      "));
    }

    #[test]
    fn test_reload_only_on_changed_checksum() {
        let (mut list, f) = list_from("FIRST\n");
        assert!(list.check(b"FIRST     "));

        // Unchanged file: the reload tick is a no-op.
        list.clock(60_000);
        assert!(list.check(b"FIRST     "));

        // Rewrite and tick again: the new pattern takes over.
        std::fs::write(f.path(), "SECOND\n").unwrap();
        list.clock(60_000);
        assert!(list.check(b"SECOND    "));
        assert!(!list.check(b"FIRST     "));
    }
}
