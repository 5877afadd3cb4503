//! Gateway assembly and main loop.
//!
//! The switch owns one slot per configured `[DGId=N]` section. Slot 0, when
//! not explicitly configured, is the browse slot: a retargetable YSF link
//! and an FCS link that Wires-X, DTMF and remote commands point at whatever
//! room the operator picks.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{info, warn};

use ysflink::config::{DgidConfig, GatewayConfig};
use ysflink::dtmf::{Dtmf, DtmfCommand, fcs_room_from_digits};
use ysflink::error::Result;
use ysflink::fich::{DataType, MODE_ALL, MODE_VD1, MODE_VD2, MODE_VOICE_FR};
use ysflink::frame::Frame;
use ysflink::hosts::{ReflectorEntry, ReflectorList, read_fcs_rooms};
use ysflink::net::fcs::{FcsIdentity, FcsLink};
use ysflink::net::imrs::{IMRS_PORT, ImrsDest, ImrsNetwork};
use ysflink::net::ysf::YsfLink;
use ysflink::net::{DgidNetwork, LinkStatus, SharedNetwork, lookup};
use ysflink::signals::{SignalState, Signals};
use ysflink::switch::{DgidEntry, DgidSwitch};
use ysflink::timer::{Stopwatch, Timer};
use ysflink::util::locator;
use ysflink::wiresx::{WiresX, WxStatus};

/// Which side of the browse slot is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    None,
    Ysf,
    Fcs,
}

/// The operator-steerable destination behind routing DG-ID 0.
struct BrowseLink {
    ysf: YsfLink,
    fcs: FcsLink,
    active: Active,
}

impl BrowseLink {
    fn connect_ysf(&mut self, name: &str, addr: SocketAddr) {
        match self.active {
            Active::Ysf => {
                self.ysf.unlink();
                self.ysf.unlink();
                self.ysf.unlink();
            }
            Active::Fcs => {
                self.fcs.unlink();
                self.fcs.unlink();
                self.fcs.unlink();
            }
            Active::None => {}
        }

        self.ysf.set_destination(name, addr);
        if self.ysf.open().is_ok() {
            self.ysf.link();
            self.ysf.link();
            self.ysf.link();
            self.active = Active::Ysf;
        }
    }

    fn connect_fcs(&mut self, designator: &str) -> bool {
        match self.active {
            Active::Ysf => {
                self.ysf.unlink();
                self.ysf.unlink();
                self.ysf.unlink();
                self.ysf.clear_destination();
            }
            Active::Fcs => {
                self.fcs.unlink();
                self.fcs.unlink();
                self.fcs.unlink();
            }
            Active::None => {}
        }
        self.active = Active::None;

        self.fcs.set_room(designator);
        if self.fcs.open().is_err() {
            return false;
        }

        self.fcs.link();
        self.fcs.link();
        self.fcs.link();
        self.active = Active::Fcs;
        true
    }

    fn disconnect(&mut self) {
        match self.active {
            Active::Ysf => {
                self.ysf.unlink();
                self.ysf.unlink();
                self.ysf.unlink();
                self.ysf.clear_destination();
            }
            Active::Fcs => {
                self.fcs.unlink();
                self.fcs.unlink();
                self.fcs.unlink();
            }
            Active::None => {}
        }
        self.active = Active::None;
    }

    fn is_linked(&self) -> bool {
        self.active != Active::None
    }
}

impl DgidNetwork for BrowseLink {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn link(&mut self) {
        match self.active {
            Active::Ysf => self.ysf.link(),
            Active::Fcs => self.fcs.link(),
            Active::None => {}
        }
    }

    fn unlink(&mut self) {
        match self.active {
            Active::Ysf => self.ysf.unlink(),
            Active::Fcs => self.fcs.unlink(),
            Active::None => {}
        }
    }

    fn write(&mut self, dgid: u8, frame: &Frame) {
        match self.active {
            Active::Ysf => self.ysf.write(dgid, frame),
            Active::Fcs => self.fcs.write(dgid, frame),
            Active::None => {}
        }
    }

    fn read(&mut self, dgid: u8) -> Option<Frame> {
        match self.active {
            Active::Ysf => self.ysf.read(dgid),
            Active::Fcs => self.fcs.read(dgid),
            Active::None => None,
        }
    }

    fn clock(&mut self, ms: u64) {
        self.ysf.clock(ms);
        self.fcs.clock(ms);
    }

    fn close(&mut self) {
        self.ysf.close();
        self.fcs.close();
    }

    fn status(&self) -> LinkStatus {
        match self.active {
            Active::Ysf => self.ysf.status(),
            Active::Fcs => self.fcs.status(),
            Active::None => LinkStatus::NotLinked,
        }
    }

    fn desc(&self, dgid: u8) -> String {
        match self.active {
            Active::Ysf => self.ysf.desc(dgid),
            Active::Fcs => self.fcs.desc(dgid),
            Active::None => "None".to_string(),
        }
    }
}

struct Gateway {
    rpt: YsfLink,
    switch: DgidSwitch,
    wiresx: WiresX,
    dtmf: Dtmf,
    reflectors: Rc<RefCell<ReflectorList>>,
    browse: Option<SharedNetwork<BrowseLink>>,
    browse_is_wiresx: bool,
    passthrough: bool,
    current: String,
    startup: String,
    revert: bool,
    inactivity: Timer,
    remote: Option<UdpSocket>,
}

/// Run the gateway until a signal asks for shutdown or restart.
pub async fn run(config: &GatewayConfig, signals: &Signals) -> Result<SignalState> {
    let mut gateway = build(config).await?;

    info!(
        "ysf-gateway {} is starting",
        env!("CARGO_PKG_VERSION")
    );

    gateway.startup_linking();

    let mut stopwatch = Stopwatch::new();
    let outcome = loop {
        match signals.poll() {
            SignalState::None => {}
            state => break state,
        }

        while let Some(frame) = gateway.rpt.read(0) {
            gateway.process_rf(frame);
        }

        let busy = gateway.wiresx.is_busy();
        for frame in gateway.switch.poll_net() {
            if !busy {
                gateway.rpt.write(0, &frame);
            }
        }

        gateway.process_remote();

        let ms = stopwatch.elapsed_ms();
        stopwatch.start();

        gateway.rpt.clock(ms);
        gateway.switch.clock(ms);
        gateway.reflectors.borrow_mut().clock(ms);

        if let Some(frame) = gateway.wiresx.clock(ms) {
            gateway.rpt.write(0, &frame);
        }

        gateway.clock_inactivity(ms);

        if ms < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    gateway.shutdown();

    Ok(outcome)
}

async fn build(config: &GatewayConfig) -> Result<Gateway> {
    let callsign = &config.general.callsign;

    let rpt_addr = lookup(&config.general.rpt_address, config.general.rpt_port)?;
    let mut rpt = YsfLink::new(
        &config.general.my_address,
        config.general.my_port,
        "MMDVM",
        Some(rpt_addr),
        callsign,
        true,
    )
    .await?;
    rpt.open()?;
    rpt.link();

    let mut reflectors = ReflectorList::new(
        &config.ysf_network.hosts,
        config.ysf_network.reload_time,
        config.ysf_network.wiresx_make_upper,
    );

    if config.ysf_network.parrot_port > 0 {
        reflectors.set_parrot(
            &config.ysf_network.parrot_address,
            config.ysf_network.parrot_port,
        );
    }
    if config.ysf_network.ysf2dmr_port > 0 {
        reflectors.set_ysf2dmr(
            &config.ysf_network.ysf2dmr_address,
            config.ysf_network.ysf2dmr_port,
        );
    }
    if config.ysf_network.ysf2nxdn_port > 0 {
        reflectors.set_ysf2nxdn(
            &config.ysf_network.ysf2nxdn_address,
            config.ysf_network.ysf2nxdn_port,
        );
    }
    if config.ysf_network.ysf2p25_port > 0 {
        reflectors.set_ysf2p25(
            &config.ysf_network.ysf2p25_address,
            config.ysf_network.ysf2p25_port,
        );
    }

    if !config.ysf_network.fcs_rooms.is_empty() {
        for (name, desc) in read_fcs_rooms(std::path::Path::new(&config.ysf_network.fcs_rooms)) {
            reflectors.add_fcs_room(&name, &desc);
        }
    }

    if let Err(e) = reflectors.load() {
        warn!("{e}");
    }
    reflectors.reload();
    let reflectors = Rc::new(RefCell::new(reflectors));

    let mut wiresx = WiresX::new(callsign, &config.general.suffix, Rc::clone(&reflectors));
    wiresx.set_info(
        &config.info.name,
        config.info.tx_frequency,
        config.info.rx_frequency,
    );

    let identity = FcsIdentity {
        callsign: callsign.clone(),
        rx_frequency: config.info.rx_frequency,
        tx_frequency: config.info.tx_frequency,
        locator: locator(config.info.latitude, config.info.longitude),
        id: config.general.id,
    };

    let mut switch = DgidSwitch::new(config.general.bleep);

    let mut imrs: Option<SharedNetwork<ImrsNetwork>> = None;
    for slot in &config.dgids {
        if slot.kind == "IMRS" && imrs.is_none() {
            match ImrsNetwork::new(IMRS_PORT, config.imrs_network.tx_enable).await {
                Ok(network) => imrs = Some(SharedNetwork::new(network)),
                Err(e) => warn!("unable to open the IMRS connection: {e}"),
            }
        }
    }

    for slot in &config.dgids {
        if let Some(entry) = build_slot(config, slot, &identity, &reflectors, imrs.as_ref()).await {
            if switch.install(slot.dgid, entry) {
                info!(
                    "Added {}:{} to DG-ID {}{}",
                    slot.kind,
                    slot.name,
                    slot.dgid,
                    if slot.statik { " (Static)" } else { "" }
                );
            }
        }
    }

    // Slot 0 is the browse slot unless the configuration claimed it.
    let browse = if switch.has_slot(0) {
        None
    } else {
        let mut ysf =
            YsfLink::new("0.0.0.0", config.ysf_network.port, "", None, callsign, false).await?;
        if !config.ysf_network.options.is_empty() {
            ysf.set_options(&config.ysf_network.options);
        }
        let fcs = FcsLink::new(config.fcs_network.port, "FCS00000", identity.clone(), false).await?;

        let browse = SharedNetwork::new(BrowseLink {
            ysf,
            fcs,
            active: Active::None,
        });

        switch.install(
            0,
            DgidEntry {
                network: Box::new(browse.clone()),
                statik: false,
                rf_hang_ms: config.ysf_network.rf_hang_time * 1000,
                net_hang_ms: config.ysf_network.net_hang_time * 1000,
                modes: MODE_ALL,
                net_dgid: 0,
            },
        );

        Some(browse)
    };

    let remote = if config.remote.enabled {
        match UdpSocket::bind(("0.0.0.0", config.remote.port)).await {
            Ok(socket) => Some(socket),
            Err(e) => {
                warn!("unable to open the remote command port: {e}");
                None
            }
        }
    } else {
        None
    };

    let mut inactivity = Timer::from_secs(config.ysf_network.inactivity_timeout * 60);
    if config.ysf_network.inactivity_timeout > 0 {
        inactivity.start();
    }

    Ok(Gateway {
        rpt,
        switch,
        wiresx,
        dtmf: Dtmf::new(),
        reflectors,
        browse,
        browse_is_wiresx: false,
        passthrough: config.ysf_network.wiresx_passthrough,
        current: String::new(),
        startup: config.ysf_network.startup.clone(),
        revert: config.ysf_network.revert,
        inactivity,
        remote,
    })
}

async fn build_slot(
    config: &GatewayConfig,
    slot: &DgidConfig,
    identity: &FcsIdentity,
    reflectors: &Rc<RefCell<ReflectorList>>,
    imrs: Option<&SharedNetwork<ImrsNetwork>>,
) -> Option<DgidEntry> {
    let callsign = &config.general.callsign;
    let rf_hang_ms = slot.rf_hang_time * 1000;
    let net_hang_ms = slot.net_hang_time * 1000;

    let entry = |network: Box<dyn DgidNetwork>, modes: u8| DgidEntry {
        network,
        statik: slot.statik,
        rf_hang_ms,
        net_hang_ms,
        modes,
        net_dgid: slot.net_dgid,
    };

    match slot.kind.as_str() {
        "YSF" => {
            let addr = reflectors
                .borrow()
                .find_by_name(&slot.name)
                .and_then(|r| r.addr);
            if addr.is_none() {
                warn!("Unknown YSF reflector: {}", slot.name);
                return None;
            }

            let link = YsfLink::new("0.0.0.0", slot.local, &slot.name, addr, callsign, slot.statik)
                .await
                .map_err(|e| warn!("{e}"))
                .ok()?;
            Some(entry(Box::new(link), MODE_ALL))
        }
        "FCS" => {
            let link = FcsLink::new(slot.local, &slot.name, identity.clone(), slot.statik)
                .await
                .map_err(|e| warn!("{e}"))
                .ok()?;
            Some(entry(Box::new(link), MODE_ALL))
        }
        "IMRS" => {
            let imrs = imrs?;

            let mut destinations = Vec::new();
            for (dgid, address) in &slot.destinations {
                match lookup(address, IMRS_PORT) {
                    Ok(addr) => destinations.push(ImrsDest { dgid: *dgid, addr }),
                    Err(e) => warn!("{e}"),
                }
            }

            imrs.borrow_mut().add_dgid(slot.dgid, &slot.name, destinations);

            let mut entry = entry(Box::new(imrs.clone()), MODE_ALL);
            entry.statik = true;
            Some(entry)
        }
        kind @ ("Gateway" | "Parrot" | "YSF2DMR" | "YSF2NXDN" | "YSF2P25") => {
            let addr = match lookup(&slot.address, slot.port) {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!("Unable to resolve the address for {kind}: {e}");
                    return None;
                }
            };

            let modes = match kind {
                "YSF2DMR" | "YSF2NXDN" => MODE_VD1 | MODE_VD2,
                "YSF2P25" => MODE_VOICE_FR,
                _ => MODE_ALL,
            };

            let link = YsfLink::new("0.0.0.0", slot.local, kind, addr, callsign, slot.statik)
                .await
                .map_err(|e| warn!("{e}"))
                .ok()?;
            Some(entry(Box::new(link), modes))
        }
        other => {
            warn!("Unknown DG-ID type {other} for DG-ID {}", slot.dgid);
            None
        }
    }
}

impl Gateway {
    fn process_rf(&mut self, mut frame: Frame) {
        let mut exclude = false;

        if let Some(fich) = frame.fich() {
            if fich.dt == DataType::Vd2 {
                let end = frame.is_end();
                let command = self.dtmf.decode_vd2(frame.payload_mut(), end);
                self.handle_dtmf(command);
            }

            self.wiresx
                .set_passthrough(self.passthrough && self.browse_is_wiresx);
            let status = self.wiresx.process(&frame);
            self.handle_wx(status);

            // Wires-X data headed for a passthrough-capable room goes over
            // the network; for any other room the command was consumed
            // locally and must not leak out.
            exclude = fich.dt == DataType::DataFr
                && self.browse_is_wiresx
                && !self.passthrough;
        }

        if !exclude {
            self.switch.process_rf(&mut frame);
        }

        if frame.is_end() {
            self.dtmf.reset();
        }
    }

    fn handle_dtmf(&mut self, command: DtmfCommand) {
        match command {
            DtmfCommand::None => {}
            DtmfCommand::ConnectYsf => {
                let id = self.dtmf.take_reflector();
                let entry = self.reflectors.borrow().find_by_id(&id).cloned();
                if let Some(entry) = entry {
                    info!("Connect via DTMF to {} - \"{}\"", entry.id, entry.name.trim_end());
                    self.wiresx.connect(entry.clone());
                    self.connect_ysf(&entry);
                }
            }
            DtmfCommand::ConnectFcs => {
                let digits = self.dtmf.take_reflector();
                match fcs_room_from_digits(&digits) {
                    Some(room) => {
                        info!("Connect via DTMF to {room}");
                        self.connect_fcs(&room);
                    }
                    None => warn!("Nonsense from the DTMF decoder - \"{digits}\""),
                }
            }
            DtmfCommand::Disconnect => {
                let _ = self.dtmf.take_reflector();
                info!("Disconnect via DTMF");
                self.wiresx.disconnect();
                self.disconnect();
            }
        }
    }

    fn handle_wx(&mut self, status: WxStatus) {
        match status {
            WxStatus::None => {}
            WxStatus::ConnectYsf => {
                let Some(entry) = self.wiresx.reflector().cloned() else {
                    return;
                };
                info!("Connect to {} - \"{}\" requested", entry.id, entry.name.trim_end());
                self.connect_ysf(&entry);

                if entry.wires_x && self.passthrough {
                    info!("Forwarding Wires-X connect to \"{}\"", entry.name.trim_end());
                    let frames = self.wiresx.connect_request_frames();
                    if let Some(browse) = &self.browse {
                        let browse = browse.borrow();
                        for frame in &frames {
                            browse.ysf.write_direct(frame);
                        }
                    }
                }
            }
            WxStatus::ConnectFcs => {
                let Some(entry) = self.wiresx.reflector().cloned() else {
                    return;
                };

                let mut room = entry.name.trim_end().to_string();
                while room.len() < 8 {
                    room.push('0');
                }
                room.truncate(8);

                info!("Connect to {} - \"{room}\" requested", entry.id);
                self.connect_fcs(&room);
            }
            WxStatus::Disconnect => {
                info!("Disconnect requested");
                self.disconnect();
            }
        }
    }

    fn connect_ysf(&mut self, entry: &ReflectorEntry) {
        let Some(addr) = entry.addr else {
            warn!("reflector {} has no usable address", entry.id);
            return;
        };

        let Some(browse) = &self.browse else {
            warn!("no browse slot available, DG-ID 0 is statically configured");
            return;
        };

        browse.borrow_mut().connect_ysf(entry.name.trim_end(), addr);

        self.current = entry.id.clone();
        self.browse_is_wiresx = entry.wires_x;
        self.inactivity.start();
    }

    fn connect_fcs(&mut self, room: &str) {
        let Some(browse) = &self.browse else {
            warn!("no browse slot available, DG-ID 0 is statically configured");
            return;
        };

        if browse.borrow_mut().connect_fcs(room) {
            self.current = room.to_string();
            self.browse_is_wiresx = false;
            self.inactivity.start();
        } else {
            warn!("Unknown reflector - {room}");
        }
    }

    fn disconnect(&mut self) {
        if let Some(browse) = &self.browse {
            browse.borrow_mut().disconnect();
        }
        self.current.clear();
        self.browse_is_wiresx = false;
        self.inactivity.start();
    }

    fn startup_linking(&mut self) {
        if self.startup.is_empty() {
            return;
        }

        if self.startup.starts_with("FCS") {
            let room = self.startup.clone();
            info!("Automatic connection to {room}");
            self.connect_fcs(&room);
        } else {
            let entry = self.reflectors.borrow().find_by_name(&self.startup).cloned();
            match entry {
                Some(entry) => {
                    info!("Automatic connection to {} - \"{}\"", entry.id, entry.name.trim_end());
                    self.wiresx.set_reflector(Some(entry.clone()));
                    self.connect_ysf(&entry);
                }
                None => warn!("Unknown startup reflector - {}", self.startup),
            }
        }
    }

    fn clock_inactivity(&mut self, ms: u64) {
        self.inactivity.clock(ms);
        if !self.inactivity.has_expired() {
            return;
        }

        if self.revert {
            if self.current != self.startup {
                info!("Reverting to the startup reflector due to inactivity");
                self.wiresx.set_reflector(None);
                self.disconnect();
                self.startup_linking();
            }
        } else if self.browse.as_ref().is_some_and(|b| b.borrow().is_linked()) {
            info!("Disconnecting due to inactivity");
            self.wiresx.disconnect();
            self.disconnect();
        }

        self.inactivity.start();
    }

    fn process_remote(&mut self) {
        let Some(socket) = &self.remote else { return };

        let mut buf = [0u8; 200];
        let (len, from) = match socket.try_recv_from(&mut buf) {
            Ok(v) => v,
            Err(_) => return,
        };

        let text = String::from_utf8_lossy(&buf[..len]).trim().to_string();
        let (command, argument) = match text.split_once(char::is_whitespace) {
            Some((c, a)) => (c.to_string(), a.trim().to_string()),
            None => (text.clone(), String::new()),
        };

        match command.as_str() {
            "LinkYSF" if !argument.is_empty() => {
                let entry = {
                    let reflectors = self.reflectors.borrow();
                    reflectors
                        .find_by_id(&argument)
                        .or_else(|| reflectors.find_by_name(&argument))
                        .cloned()
                };
                match entry {
                    Some(entry) => {
                        info!("Connect by remote command to {} - \"{}\"", entry.id, entry.name.trim_end());
                        self.wiresx.connect(entry.clone());
                        self.connect_ysf(&entry);
                    }
                    None => warn!("Invalid YSF reflector id/name - \"{argument}\""),
                }
            }
            "LinkFCS" if !argument.is_empty() => {
                let room = match argument.len() {
                    3 => Some(format!("FCS00{argument}")),
                    5 => Some(format!("FCS{argument}")),
                    _ => None,
                };
                match room {
                    Some(room) => {
                        info!("Connect by remote command to {room}");
                        self.wiresx.set_reflector(None);
                        self.connect_fcs(&room);
                    }
                    None => warn!("Invalid FCS reflector id - \"{argument}\""),
                }
            }
            "UnLink" => {
                info!("Disconnect by remote command");
                self.wiresx.disconnect();
                self.disconnect();
            }
            "status" => {
                let reply = match &self.browse {
                    None => "ysf:n/a",
                    Some(browse) if browse.borrow().is_linked() => "ysf:conn",
                    Some(_) => "ysf:disc",
                };
                let _ = socket.try_send_to(reply.as_bytes(), from);
            }
            "host" => {
                let reply = format!("ysf:\"{}\"", self.current);
                let _ = socket.try_send_to(reply.as_bytes(), from);
            }
            _ => warn!("Unknown remote command: {text}"),
        }
    }

    fn shutdown(&mut self) {
        self.switch.shutdown();
        self.rpt.unlink();
        self.rpt.close();
    }
}
