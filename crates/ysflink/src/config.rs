//! INI-style configuration files.
//!
//! The format is the classic MMDVM dialect: `[Section]` headers, `Key=Value`
//! lines, `#` comments. Values may be double-quoted; unquoted values have a
//! trailing `#` comment and whitespace stripped. Every key is optional with
//! a compiled-in default, so an empty file is a valid (if useless)
//! configuration.

use std::path::Path;

use winnow::ModalResult;
use winnow::ascii::space0;
use winnow::combinator::delimited;
use winnow::prelude::*;
use winnow::token::{rest, take_till};

use crate::error::{Error, Result};

/// A parsed document: ordered sections with ordered key/value entries.
/// Sections repeat (`[DGId=N]` appears once per slot).
struct Ini {
    sections: Vec<(String, Vec<(String, String)>)>,
}

fn section_header(input: &mut &str) -> ModalResult<String> {
    delimited('[', take_till(1.., ']'), ']')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

fn key_value(input: &mut &str) -> ModalResult<(String, String)> {
    let key = take_till(1.., |c| c == '=' || c == ' ' || c == '\t').parse_next(input)?;
    let _ = (space0, '=', space0).parse_next(input)?;
    let value = rest.parse_next(input)?;
    Ok((key.to_string(), clean_value(value)))
}

// Strip quotes, or cut at a trailing comment and trim.
fn clean_value(value: &str) -> String {
    let value = value.trim_end_matches(['\r', '\n']);

    if value.len() > 1 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].to_string();
    }

    let value = match value.find('#') {
        Some(pos) => &value[..pos],
        None => value,
    };
    value.trim_end_matches([' ', '\t']).to_string()
}

impl Ini {
    fn parse(text: &str) -> Self {
        let mut sections: Vec<(String, Vec<(String, String)>)> = Vec::new();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                let mut input = line;
                if let Ok(name) = section_header(&mut input) {
                    sections.push((name, Vec::new()));
                }
                continue;
            }

            let mut input = line;
            if let Ok(kv) = key_value(&mut input) {
                if let Some((_, entries)) = sections.last_mut() {
                    entries.push(kv);
                }
            }
        }

        Self { sections }
    }

    fn section(&self, name: &str) -> Option<&[(String, String)]> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entries)| entries.as_slice())
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }

    fn get_parsed<T: std::str::FromStr>(&self, section: &str, key: &str, default: T) -> Result<T> {
        match self.get(section, key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| Error::ConfigValue {
                key: format!("[{section}] {key}"),
                value: value.to_string(),
            }),
        }
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get(section, key) {
            None => default,
            Some(value) => value.trim() == "1",
        }
    }
}

/// `[General]` for the gateway.
#[derive(Debug, Clone)]
pub struct General {
    pub callsign: String,
    pub suffix: String,
    pub id: u32,
    pub rpt_address: String,
    pub rpt_port: u16,
    pub my_address: String,
    pub my_port: u16,
    /// Fallback hang times, seconds.
    pub rf_hang_time: u64,
    pub net_hang_time: u64,
    pub bleep: bool,
    pub debug: bool,
    pub daemon: bool,
}

/// `[Info]` station data.
#[derive(Debug, Clone)]
pub struct Info {
    pub rx_frequency: u32,
    pub tx_frequency: u32,
    pub latitude: f32,
    pub longitude: f32,
    pub name: String,
    pub description: String,
}

/// `[YSF Network]`: hosts file, browse-link behaviour and Wires-X options.
#[derive(Debug, Clone)]
pub struct YsfNetwork {
    pub hosts: String,
    pub reload_time: u64,
    pub rf_hang_time: u64,
    pub net_hang_time: u64,
    /// Local port of the browse link.
    pub port: u16,
    pub startup: String,
    pub options: String,
    /// Minutes; zero disables the timer.
    pub inactivity_timeout: u64,
    pub revert: bool,
    pub wiresx_make_upper: bool,
    pub wiresx_passthrough: bool,
    pub fcs_rooms: String,
    /// Bridge destinations advertised in the directory; a zero port
    /// disables the entry.
    pub parrot_address: String,
    pub parrot_port: u16,
    pub ysf2dmr_address: String,
    pub ysf2dmr_port: u16,
    pub ysf2nxdn_address: String,
    pub ysf2nxdn_port: u16,
    pub ysf2p25_address: String,
    pub ysf2p25_port: u16,
}

/// `[FCS Network]`.
#[derive(Debug, Clone)]
pub struct FcsNetwork {
    pub rf_hang_time: u64,
    pub net_hang_time: u64,
    /// Local port of the FCS browse link.
    pub port: u16,
}

/// `[IMRS Network]`.
#[derive(Debug, Clone)]
pub struct ImrsNetwork {
    pub rf_hang_time: u64,
    pub net_hang_time: u64,
    /// Whether outbound fan-out actually transmits.
    pub tx_enable: bool,
}

/// `[Remote Commands]`.
#[derive(Debug, Clone)]
pub struct RemoteCommands {
    pub enabled: bool,
    pub port: u16,
}

/// One `[DGId=N]` slot.
#[derive(Debug, Clone)]
pub struct DgidConfig {
    pub dgid: u8,
    pub kind: String,
    pub statik: bool,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub local: u16,
    pub net_dgid: u8,
    pub destinations: Vec<(u8, String)>,
    /// Seconds.
    pub rf_hang_time: u64,
    pub net_hang_time: u64,
}

/// Full gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub general: General,
    pub info: Info,
    pub log_display_level: u32,
    pub ysf_network: YsfNetwork,
    pub fcs_network: FcsNetwork,
    pub imrs_network: ImrsNetwork,
    pub remote: RemoteCommands,
    pub dgids: Vec<DgidConfig>,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self> {
        let ini = Ini::parse(text);

        let general = General {
            callsign: ini.get_string("General", "Callsign", "").to_uppercase(),
            suffix: ini.get_string("General", "Suffix", "").to_uppercase(),
            id: ini.get_parsed("General", "Id", 0u32)?,
            rpt_address: ini.get_string("General", "RptAddress", "127.0.0.1"),
            rpt_port: ini.get_parsed("General", "RptPort", 0u16)?,
            my_address: ini.get_string("General", "LocalAddress", "127.0.0.1"),
            my_port: ini.get_parsed("General", "LocalPort", 0u16)?,
            rf_hang_time: ini.get_parsed("General", "RFHangTime", 60u64)?,
            net_hang_time: ini.get_parsed("General", "NetHangTime", 60u64)?,
            bleep: ini.get_bool("General", "Bleep", true),
            debug: ini.get_bool("General", "Debug", false),
            daemon: ini.get_bool("General", "Daemon", false),
        };

        let info = Info {
            rx_frequency: ini.get_parsed("Info", "RXFrequency", 0u32)?,
            tx_frequency: ini.get_parsed("Info", "TXFrequency", 0u32)?,
            latitude: ini.get_parsed("Info", "Latitude", 0.0f32)?,
            longitude: ini.get_parsed("Info", "Longitude", 0.0f32)?,
            name: ini.get_string("Info", "Name", ""),
            description: ini.get_string("Info", "Description", ""),
        };

        let ysf_network = YsfNetwork {
            hosts: ini.get_string("YSF Network", "Hosts", "YSFHosts.json"),
            reload_time: ini.get_parsed("YSF Network", "ReloadTime", 0u64)?,
            rf_hang_time: ini.get_parsed("YSF Network", "RFHangTime", general.rf_hang_time)?,
            net_hang_time: ini.get_parsed("YSF Network", "NetHangTime", general.net_hang_time)?,
            port: ini.get_parsed("YSF Network", "Port", 0u16)?,
            startup: ini.get_string("YSF Network", "Startup", ""),
            options: ini.get_string("YSF Network", "Options", ""),
            inactivity_timeout: ini.get_parsed("YSF Network", "InactivityTimeout", 0u64)?,
            revert: ini.get_bool("YSF Network", "Revert", false),
            wiresx_make_upper: ini.get_bool("YSF Network", "WiresXMakeUpper", true),
            wiresx_passthrough: ini.get_bool("YSF Network", "WiresXCommandPassthrough", false),
            fcs_rooms: ini.get_string("YSF Network", "FCSRooms", ""),
            parrot_address: ini.get_string("YSF Network", "ParrotAddress", "127.0.0.1"),
            parrot_port: ini.get_parsed("YSF Network", "ParrotPort", 0u16)?,
            ysf2dmr_address: ini.get_string("YSF Network", "YSF2DMRAddress", "127.0.0.1"),
            ysf2dmr_port: ini.get_parsed("YSF Network", "YSF2DMRPort", 0u16)?,
            ysf2nxdn_address: ini.get_string("YSF Network", "YSF2NXDNAddress", "127.0.0.1"),
            ysf2nxdn_port: ini.get_parsed("YSF Network", "YSF2NXDNPort", 0u16)?,
            ysf2p25_address: ini.get_string("YSF Network", "YSF2P25Address", "127.0.0.1"),
            ysf2p25_port: ini.get_parsed("YSF Network", "YSF2P25Port", 0u16)?,
        };

        let fcs_network = FcsNetwork {
            rf_hang_time: ini.get_parsed("FCS Network", "RFHangTime", general.rf_hang_time)?,
            net_hang_time: ini.get_parsed("FCS Network", "NetHangTime", general.net_hang_time)?,
            port: ini.get_parsed("FCS Network", "Port", 0u16)?,
        };

        let imrs_network = ImrsNetwork {
            rf_hang_time: ini.get_parsed("IMRS Network", "RFHangTime", 240u64)?,
            net_hang_time: ini.get_parsed("IMRS Network", "NetHangTime", 240u64)?,
            tx_enable: ini.get_bool("IMRS Network", "TxEnable", false),
        };

        let remote = RemoteCommands {
            enabled: ini.get_bool("Remote Commands", "Enable", false),
            port: ini.get_parsed("Remote Commands", "Port", 6073u16)?,
        };

        let mut dgids = Vec::new();
        for (name, entries) in &ini.sections {
            let Some(number) = name.strip_prefix("DGId=") else {
                continue;
            };
            let dgid: u8 = number.trim().parse().map_err(|_| Error::ConfigValue {
                key: "[DGId=N]".to_string(),
                value: number.to_string(),
            })?;

            dgids.push(parse_dgid(
                dgid,
                entries,
                &general,
                &ysf_network,
                &fcs_network,
                &imrs_network,
            )?);
        }

        Ok(Self {
            general,
            info,
            log_display_level: ini.get_parsed("Log", "DisplayLevel", 2u32)?,
            ysf_network,
            fcs_network,
            imrs_network,
            remote,
            dgids,
        })
    }
}

fn parse_dgid(
    dgid: u8,
    entries: &[(String, String)],
    general: &General,
    ysf: &YsfNetwork,
    fcs: &FcsNetwork,
    imrs: &ImrsNetwork,
) -> Result<DgidConfig> {
    let mut config = DgidConfig {
        dgid,
        kind: String::new(),
        statik: false,
        name: String::new(),
        address: String::new(),
        port: 0,
        local: 0,
        net_dgid: 0,
        destinations: Vec::new(),
        rf_hang_time: general.rf_hang_time,
        net_hang_time: general.net_hang_time,
    };

    let parse_u64 = |key: &str, value: &str| -> Result<u64> {
        value.parse().map_err(|_| Error::ConfigValue {
            key: format!("[DGId={dgid}] {key}"),
            value: value.to_string(),
        })
    };

    for (key, value) in entries {
        match key.as_str() {
            "Type" => {
                config.kind = value.clone();
                config.statik = false;
                // Type selects the per-family default hang times.
                let (rf, net) = match value.as_str() {
                    "YSF" => (ysf.rf_hang_time, ysf.net_hang_time),
                    "FCS" => (fcs.rf_hang_time, fcs.net_hang_time),
                    "IMRS" => (imrs.rf_hang_time, imrs.net_hang_time),
                    _ => (general.rf_hang_time, general.net_hang_time),
                };
                config.rf_hang_time = rf;
                config.net_hang_time = net;
            }
            "RFHangTime" => config.rf_hang_time = parse_u64(key, value)?,
            "NetHangTime" => config.net_hang_time = parse_u64(key, value)?,
            "Static" => config.statik = value.trim() == "1",
            "Name" => config.name = value.clone(),
            "Address" => config.address = value.clone(),
            "Port" => config.port = parse_u64(key, value)? as u16,
            "Local" => config.local = parse_u64(key, value)? as u16,
            "DGId" => config.net_dgid = parse_u64(key, value)? as u8,
            "Destination" => {
                if let Some((id, address)) = value.split_once(',') {
                    let id = parse_u64(key, id.trim())? as u8;
                    config.destinations.push((id, address.trim().to_string()));
                }
            }
            _ => {}
        }
    }

    Ok(config)
}

/// Full reflector configuration.
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    pub daemon: bool,
    pub id: u32,
    pub name: String,
    pub description: String,
    pub log_display_level: u32,
    pub port: u16,
    pub debug: bool,
    pub block_file: String,
    /// Minutes.
    pub block_time: u64,
}

impl ReflectorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self> {
        let ini = Ini::parse(text);

        Ok(Self {
            daemon: ini.get_bool("General", "Daemon", false),
            id: ini.get_parsed("Info", "Id", 0u32)?,
            name: ini.get_string("Info", "Name", ""),
            description: ini.get_string("Info", "Description", ""),
            log_display_level: ini.get_parsed("Log", "DisplayLevel", 2u32)?,
            port: ini.get_parsed("Network", "Port", 42000u16)?,
            debug: ini.get_bool("Network", "Debug", false),
            block_file: ini.get_string("Block List", "File", ""),
            block_time: ini.get_parsed("Block List", "Time", 5u64)?,
        })
    }
}

/// Map the numeric `DisplayLevel` onto a tracing filter directive.
pub fn level_filter(display_level: u32) -> &'static str {
    match display_level {
        0 | 1 => "debug",
        2 => "info",
        3 => "warn",
        _ => "error",
    }
}
