//! The reflector directory: hosts file, FCS rooms and synthetic entries.
//!
//! The hosts file is JSON with a top-level `reflectors` array. Loading
//! stages a fresh list; `reload()` swaps the staged list in, so a directory
//! page that is being browsed stays stable until the next page-zero
//! request. FCS rooms come from a separate semicolon-separated text file
//! and are assigned ids from 00010 upward.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::net::lookup;
use crate::timer::Timer;

/// Which protocol family a directory entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectorKind {
    Ysf,
    Fcs,
}

/// One destination in the directory.
#[derive(Debug, Clone)]
pub struct ReflectorEntry {
    /// Five-digit id.
    pub id: String,
    /// Display name, padded to 16 characters.
    pub name: String,
    /// Description, padded to 14 characters.
    pub desc: String,
    /// Three-digit connected count.
    pub count: String,
    pub addr: Option<SocketAddr>,
    pub kind: ReflectorKind,
    /// Whether Wires-X commands pass through to this destination.
    pub wires_x: bool,
}

impl ReflectorEntry {
    fn new(id: &str, name: &str, desc: &str, kind: ReflectorKind) -> Self {
        let mut name = name.to_string();
        let mut desc = desc.to_string();
        pad(&mut name, 16);
        pad(&mut desc, 14);

        Self {
            id: id.to_string(),
            name,
            desc,
            count: "000".to_string(),
            addr: None,
            kind,
            wires_x: false,
        }
    }
}

fn pad(s: &mut String, len: usize) {
    while s.len() < len {
        s.push(' ');
    }
    s.truncate(len);
}

#[derive(Deserialize)]
struct HostsFile {
    reflectors: Vec<HostEntry>,
}

#[derive(Deserialize)]
struct HostEntry {
    designator: String,
    country: String,
    name: String,
    use_xx_prefix: bool,
    description: String,
    port: u16,
    ipv4: Option<String>,
    ipv6: Option<String>,
}

/// A bridge destination advertised in the directory alongside the file
/// contents.
#[derive(Debug, Clone)]
struct Synthetic {
    id: &'static str,
    name: &'static str,
    desc: &'static str,
    wires_x: bool,
    address: String,
    port: u16,
}

/// The reflector directory with staged reloads.
pub struct ReflectorList {
    hosts_file: PathBuf,
    synthetics: Vec<Synthetic>,
    fcs_rooms: Vec<(String, String)>,
    staged: Vec<ReflectorEntry>,
    current: Vec<ReflectorEntry>,
    make_upper: bool,
    timer: Timer,
}

impl ReflectorList {
    /// `reload_time` is in minutes; zero disables periodic reloads.
    pub fn new(hosts_file: impl Into<PathBuf>, reload_time: u64, make_upper: bool) -> Self {
        let mut timer = Timer::from_secs(reload_time * 60);
        if reload_time > 0 {
            timer.start();
        }

        Self {
            hosts_file: hosts_file.into(),
            synthetics: Vec::new(),
            fcs_rooms: Vec::new(),
            staged: Vec::new(),
            current: Vec::new(),
            make_upper,
            timer,
        }
    }

    /// Advertise the parrot as directory entry 00001.
    pub fn set_parrot(&mut self, address: &str, port: u16) {
        self.synthetics.push(Synthetic {
            id: "00001",
            name: "ZZ Parrot       ",
            desc: "Parrot        ",
            wires_x: false,
            address: address.to_string(),
            port,
        });
    }

    /// Advertise a YSF2DMR bridge as directory entry 00002.
    pub fn set_ysf2dmr(&mut self, address: &str, port: u16) {
        self.synthetics.push(Synthetic {
            id: "00002",
            name: "YSF2DMR         ",
            desc: "Link YSF2DMR  ",
            wires_x: true,
            address: address.to_string(),
            port,
        });
    }

    /// Advertise a YSF2NXDN bridge as directory entry 00003.
    pub fn set_ysf2nxdn(&mut self, address: &str, port: u16) {
        self.synthetics.push(Synthetic {
            id: "00003",
            name: "YSF2NXDN        ",
            desc: "Link YSF2NXDN ",
            wires_x: true,
            address: address.to_string(),
            port,
        });
    }

    /// Advertise a YSF2P25 bridge as directory entry 00004.
    pub fn set_ysf2p25(&mut self, address: &str, port: u16) {
        self.synthetics.push(Synthetic {
            id: "00004",
            name: "YSF2P25         ",
            desc: "Link YSF2P25  ",
            wires_x: true,
            address: address.to_string(),
            port,
        });
    }

    /// Add an FCS room from the rooms file.
    pub fn add_fcs_room(&mut self, name: &str, desc: &str) {
        self.fcs_rooms.push((name.to_string(), desc.to_string()));
    }

    /// Read the hosts file and stage a fresh directory.
    pub fn load(&mut self) -> Result<()> {
        self.staged.clear();

        let text = std::fs::read_to_string(&self.hosts_file)
            .map_err(|e| Error::Hosts(format!("{}: {e}", self.hosts_file.display())))?;
        let hosts: HostsFile = serde_json::from_str(&text)
            .map_err(|e| Error::Hosts(format!("{}: {e}", self.hosts_file.display())))?;

        for host in &hosts.reflectors {
            let full_name = if host.use_xx_prefix {
                format!("XX {}", host.name)
            } else {
                format!("{} {}", host.country, host.name)
            };

            let addr = [&host.ipv4, &host.ipv6]
                .into_iter()
                .flatten()
                .find_map(|ip| match lookup(ip, host.port) {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        warn!("{e}");
                        None
                    }
                });

            let Some(addr) = addr else {
                continue;
            };

            let mut entry = ReflectorEntry::new(
                &host.designator,
                &full_name,
                &host.description,
                ReflectorKind::Ysf,
            );
            entry.addr = Some(addr);
            entry.wires_x = host.name.starts_with("XLX");
            self.staged.push(entry);
        }

        info!("Loaded {} YSF reflectors", self.staged.len());

        let synthetics = self.synthetics.clone();
        for synth in &synthetics {
            match lookup(&synth.address, synth.port) {
                Ok(addr) => {
                    let mut entry =
                        ReflectorEntry::new(synth.id, synth.name, synth.desc, ReflectorKind::Ysf);
                    entry.addr = Some(addr);
                    entry.wires_x = synth.wires_x;
                    self.staged.push(entry);
                    debug!("Loaded {}", synth.name.trim_end());
                }
                Err(e) => warn!("{e}"),
            }
        }

        let mut next_id = 9u32;
        let rooms = self.fcs_rooms.clone();
        for (name, desc) in &rooms {
            loop {
                next_id += 1;
                let text = format!("{next_id:05}");
                if !self.staged.iter().any(|r| r.id == text) {
                    break;
                }
            }

            let id = format!("{next_id:05}");
            self.staged
                .push(ReflectorEntry::new(&id, name, desc, ReflectorKind::Fcs));
        }

        if self.staged.is_empty() {
            return Err(Error::Hosts("no usable reflectors".to_string()));
        }

        if self.make_upper {
            for entry in &mut self.staged {
                entry.name = entry.name.to_uppercase();
                entry.desc = entry.desc.to_uppercase();
            }
        }

        self.staged
            .sort_by(|a, b| a.name.to_uppercase().cmp(&b.name.to_uppercase()));

        Ok(())
    }

    /// Swap the staged directory in. Returns false when nothing was staged.
    pub fn reload(&mut self) -> bool {
        if self.staged.is_empty() {
            return false;
        }

        self.current = std::mem::take(&mut self.staged);
        true
    }

    /// The active directory.
    pub fn current(&self) -> &[ReflectorEntry] {
        &self.current
    }

    /// Find by five-digit id.
    pub fn find_by_id(&self, id: &str) -> Option<&ReflectorEntry> {
        let found = self.current.iter().find(|r| r.id == id);
        if found.is_none() {
            debug!("no reflector with an id of {id}");
        }
        found
    }

    /// Find by display name (padded, case-folded when configured).
    pub fn find_by_name(&self, name: &str) -> Option<&ReflectorEntry> {
        let mut full = name.to_string();
        if self.make_upper {
            full = full.to_uppercase();
        }
        pad(&mut full, 16);

        let found = self.current.iter().find(|r| r.name == full);
        if found.is_none() {
            debug!("no reflector with a name of {name}");
        }
        found
    }

    /// Case-insensitive substring search over display names, sorted.
    pub fn search(&self, needle: &str) -> Vec<ReflectorEntry> {
        let needle = needle.trim_end().to_uppercase();

        let mut results: Vec<ReflectorEntry> = self
            .current
            .iter()
            .filter(|r| r.name.trim_end().to_uppercase().contains(&needle))
            .cloned()
            .collect();

        results.sort_by(|a, b| a.name.to_uppercase().cmp(&b.name.to_uppercase()));
        results
    }

    /// Tick the reload timer; re-stage the file when it fires.
    pub fn clock(&mut self, ms: u64) {
        self.timer.clock(ms);

        if self.timer.has_expired() {
            if let Err(e) = self.load() {
                warn!("{e}");
            }
            self.timer.start();
        }
    }
}

/// Parse an FCS rooms file: `name;description` per line, `#` comments and
/// blank lines ignored.
pub fn read_fcs_rooms(path: &Path) -> Vec<(String, String)> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    text.lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .filter_map(|line| {
            let (name, desc) = line.split_once(';')?;
            Some((name.trim().to_string(), desc.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
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
            },
            {
                "designator": "41234",
                "country": "DE",
                "name": "XLX123",
                "use_xx_prefix": true,
                "description": "Multimode",
                "port": 42000,
                "ipv4": "127.0.0.2",
                "ipv6": null
            },
            {
                "designator": "99999",
                "country": "GB",
                "name": "Dead",
                "use_xx_prefix": false,
                "description": "No address",
                "port": 42000,
                "ipv4": null,
                "ipv6": null
            }
        ]
    }"#;

    fn hosts_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_and_find() {
        let f = hosts_file(HOSTS);
        let mut list = ReflectorList::new(f.path(), 0, false);
        list.load().unwrap();
        assert!(list.reload());

        // Addressless entries are skipped.
        assert_eq!(list.current().len(), 2);

        let paris = list.find_by_id("23201").unwrap();
        assert_eq!(paris.name, "FR Paris        ");
        assert_eq!(paris.desc, "Ile de France ");
        assert!(!paris.wires_x);
        assert_eq!(paris.kind, ReflectorKind::Ysf);

        // XLX names get the passthrough flag.
        let xlx = list.find_by_id("41234").unwrap();
        assert_eq!(xlx.name, "XX XLX123       ");
        assert!(xlx.wires_x);

        assert!(list.find_by_name("FR Paris").is_some());
        assert!(list.find_by_id("00000").is_none());
    }

    #[test]
    fn test_parse_error_aborts_load() {
        let f = hosts_file("{ not json");
        let mut list = ReflectorList::new(f.path(), 0, false);
        assert!(list.load().is_err());
        assert!(!list.reload());
    }

    #[test]
    fn test_fcs_rooms_get_free_ids() {
        let f = hosts_file(HOSTS);
        let mut list = ReflectorList::new(f.path(), 0, false);
        list.add_fcs_room("FCS00201", "Europe");
        list.add_fcs_room("FCS00305", "America");
        list.load().unwrap();
        list.reload();

        let room = list.find_by_id("00010").unwrap();
        assert_eq!(room.kind, ReflectorKind::Fcs);
        assert_eq!(room.name, "FCS00201        ");

        let room = list.find_by_id("00011").unwrap();
        assert_eq!(room.name, "FCS00305        ");
    }

    #[test]
    fn test_search_matches_substring_case_insensitive() {
        let f = hosts_file(HOSTS);
        let mut list = ReflectorList::new(f.path(), 0, false);
        list.load().unwrap();
        list.reload();

        let hits = list.search("paris");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "23201");

        assert!(list.search("nowhere").is_empty());
    }

    #[test]
    fn test_reload_swaps_staged_in() {
        let f = hosts_file(HOSTS);
        let mut list = ReflectorList::new(f.path(), 0, false);
        list.load().unwrap();
        list.reload();
        assert_eq!(list.current().len(), 2);

        // Nothing staged: reload is a no-op.
        assert!(!list.reload());
        assert_eq!(list.current().len(), 2);
    }

    #[test]
    fn test_read_fcs_rooms() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "FCS00201;Europe").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "FCS00305;America").unwrap();

        let rooms = read_fcs_rooms(f.path());
        assert_eq!(
            rooms,
            vec![
                ("FCS00201".to_string(), "Europe".to_string()),
                ("FCS00305".to_string(), "America".to_string()),
            ]
        );
    }
}
