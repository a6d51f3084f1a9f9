//! The forwarding engine
//!
//! Per-port ingress handling: VLAN admission, source MAC learning,
//! destination classification (unicast / broadcast / multicast /
//! IGMP) and the flood or selective-forward decision. The switch owns
//! its ports, the VLAN registry, the MAC table and the multicast
//! table; ports are addressed by stable string IDs and hold only
//! their egress sink, so all dispatch goes through the port table
//! here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, trace};

use crate::frame::FrameView;
use crate::igmp;
use crate::mac_table::MacTable;
use crate::multicast::MulticastTable;
use crate::port::{EgressFrame, Port, PortState};
use crate::vlan::{self, Vlan, VlanRegistry};
use crate::{Error, Result};

/// Switch lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

#[derive(Debug, Default)]
struct Counters {
    vlan_inactive: AtomicU64,
    port_down: AtomicU64,
    vlan_admission: AtomicU64,
    egress_errors: AtomicU64,
}

/// Snapshot of the switch drop/error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchStats {
    /// Frames dropped on inactive VLANs
    pub vlan_inactive_drops: u64,
    /// Frames dropped on down ports
    pub port_down_drops: u64,
    /// Frames whose tag failed ingress admission
    pub vlan_admission_drops: u64,
    /// Egress sink failures (delivery to other ports continues)
    pub egress_errors: u64,
}

/// A virtual Ethernet switch
pub struct Switch {
    id: String,
    name: String,
    state: RwLock<SwitchState>,
    ports: RwLock<HashMap<String, Port>>,
    mac_table: MacTable,
    vlans: VlanRegistry,
    multicast: MulticastTable,
    counters: Counters,
}

impl Switch {
    /// Create a switch with default tables and VLAN 1 registered
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        Self::with_tables(id, name, MacTable::default(), MulticastTable::default())
    }

    /// Create a switch with explicit MAC and multicast tables
    pub fn with_tables(
        id: impl Into<String>,
        name: impl Into<String>,
        mac_table: MacTable,
        multicast: MulticastTable,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidState("switch ID cannot be empty".to_string()));
        }

        let vlans = VlanRegistry::new();
        vlans.add(Vlan::new(1, "default")?)?;

        Ok(Self {
            id,
            name: name.into(),
            state: RwLock::new(SwitchState::Stopped),
            ports: RwLock::new(HashMap::new()),
            mac_table,
            vlans,
            multicast,
            counters: Counters::default(),
        })
    }

    /// The switch identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The switch name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> SwitchState {
        *self.state.read().unwrap()
    }

    /// True while the switch forwards frames
    pub fn is_running(&self) -> bool {
        self.state() == SwitchState::Running
    }

    /// Start forwarding; the switch must be stopped
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if *state != SwitchState::Stopped {
            return Err(Error::InvalidState(format!(
                "cannot start from {:?}",
                *state
            )));
        }
        *state = SwitchState::Starting;
        debug!(switch = %self.id, "starting");
        *state = SwitchState::Running;
        Ok(())
    }

    /// Stop forwarding and close every port
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if *state != SwitchState::Running {
            return Err(Error::InvalidState(format!(
                "cannot stop from {:?}",
                *state
            )));
        }
        *state = SwitchState::Stopping;

        for port in self.ports.write().unwrap().values_mut() {
            port.close();
        }

        *state = SwitchState::Stopped;
        debug!(switch = %self.id, "stopped");
        Ok(())
    }

    /// Add a port; IDs must be unique
    pub fn add_port(&self, port: Port) -> Result<()> {
        let mut ports = self.ports.write().unwrap();
        if ports.contains_key(&port.id) {
            return Err(Error::PortExists(port.id));
        }
        ports.insert(port.id.clone(), port);
        Ok(())
    }

    /// Remove a port, closing it and forgetting its learned MACs
    pub fn remove_port(&self, port_id: &str) -> Result<()> {
        let mut ports = self.ports.write().unwrap();
        let mut port = ports
            .remove(port_id)
            .ok_or_else(|| Error::PortNotFound(port_id.to_string()))?;
        port.close();
        drop(ports);

        self.mac_table.forget_port(port_id);
        Ok(())
    }

    /// Change a port's administrative state
    pub fn set_port_state(&self, port_id: &str, state: PortState) -> Result<()> {
        let mut ports = self.ports.write().unwrap();
        let port = ports
            .get_mut(port_id)
            .ok_or_else(|| Error::PortNotFound(port_id.to_string()))?;
        port.state = state;
        Ok(())
    }

    /// Install a port's egress sink
    pub fn set_port_sink(&self, port_id: &str, sink: crate::port::EgressSink) -> Result<()> {
        let mut ports = self.ports.write().unwrap();
        let port = ports
            .get_mut(port_id)
            .ok_or_else(|| Error::PortNotFound(port_id.to_string()))?;
        port.set_sink(sink);
        Ok(())
    }

    /// IDs of all ports
    pub fn port_ids(&self) -> Vec<String> {
        self.ports.read().unwrap().keys().cloned().collect()
    }

    /// Whether a port exists
    pub fn has_port(&self, port_id: &str) -> bool {
        self.ports.read().unwrap().contains_key(port_id)
    }

    /// The VLAN registry
    pub fn vlans(&self) -> &VlanRegistry {
        &self.vlans
    }

    /// The MAC learning table
    pub fn mac_table(&self) -> &MacTable {
        &self.mac_table
    }

    /// The multicast membership table
    pub fn multicast(&self) -> &MulticastTable {
        &self.multicast
    }

    /// Snapshot of drop/error counters
    pub fn stats(&self) -> SwitchStats {
        SwitchStats {
            vlan_inactive_drops: self.counters.vlan_inactive.load(Ordering::Relaxed),
            port_down_drops: self.counters.port_down.load(Ordering::Relaxed),
            vlan_admission_drops: self.counters.vlan_admission.load(Ordering::Relaxed),
            egress_errors: self.counters.egress_errors.load(Ordering::Relaxed),
        }
    }

    /// Ingress handler: process a frame arriving on `port_id`
    ///
    /// The switch does not mutate the frame; egress sinks receive the
    /// ingress bytes together with the effective VLAN. Failures on
    /// one egress port never abort delivery to others; the last error
    /// surfaces only when no egress succeeded.
    pub fn handle_frame(&self, port_id: &str, frame: &[u8]) -> Result<()> {
        if !self.is_running() {
            return Err(Error::SwitchNotRunning);
        }

        let ports = self.ports.read().unwrap();
        let in_port = ports
            .get(port_id)
            .ok_or_else(|| Error::PortNotFound(port_id.to_string()))?;
        if in_port.state != PortState::Up {
            self.counters.port_down.fetch_add(1, Ordering::Relaxed);
            return Err(Error::PortDown(port_id.to_string()));
        }

        // Runts are dropped without an error
        let Some(view) = FrameView::parse(frame) else {
            return Ok(());
        };

        let Some(vlan) = vlan::ingress_vlan(in_port, view.vlan_tag) else {
            self.counters.vlan_admission.fetch_add(1, Ordering::Relaxed);
            trace!(port_id, tag = ?view.vlan_tag, "frame failed VLAN admission");
            return Ok(());
        };

        if !self.vlans.is_active(vlan) {
            self.counters.vlan_inactive.fetch_add(1, Ordering::Relaxed);
            return Err(Error::VlanInactive(vlan));
        }

        self.mac_table.learn(vlan, view.src, port_id);

        if view.dst.is_broadcast() {
            let (sent, last_err) = self.flood(&ports, port_id, vlan, frame, &[]);
            return Self::conclude(sent, last_err);
        }

        if view.dst.is_multicast() {
            if igmp::is_igmp(view.ethertype, view.payload) {
                if let Some(message) = igmp::parse_igmp(view.payload) {
                    self.multicast.handle_igmp(port_id, vlan, &message);
                }
            }

            // Selective delivery to snooped members, then a
            // conservative flood to the remaining admitted ports
            let members = self.multicast.member_ports(vlan, view.dst, port_id);
            let mut sent = 0;
            let mut last_err = None;
            for member in &members {
                let Some(port) = ports.get(member) else {
                    continue;
                };
                match Self::egress(port, vlan, frame) {
                    Ok(true) => sent += 1,
                    Ok(false) => {}
                    Err(e) => {
                        self.counters.egress_errors.fetch_add(1, Ordering::Relaxed);
                        last_err = Some(e);
                    }
                }
            }

            let (flood_sent, flood_err) = self.flood(&ports, port_id, vlan, frame, &members);
            return Self::conclude(sent + flood_sent, flood_err.or(last_err));
        }

        // Unicast: forward along the learned path, flooding on a miss
        match self.mac_table.lookup(vlan, view.dst) {
            Some(dest_id) if dest_id == port_id => {
                // Destination lives on the ingress segment
                Ok(())
            }
            Some(dest_id) => {
                if let Some(port) = ports.get(&dest_id) {
                    match Self::egress(port, vlan, frame) {
                        Ok(true) => return Ok(()),
                        Ok(false) => {} // stale path, fall through to flood
                        Err(e) => {
                            self.counters.egress_errors.fetch_add(1, Ordering::Relaxed);
                            return Err(e);
                        }
                    }
                }
                let (sent, last_err) = self.flood(&ports, port_id, vlan, frame, &[]);
                Self::conclude(sent, last_err)
            }
            None => {
                let (sent, last_err) = self.flood(&ports, port_id, vlan, frame, &[]);
                Self::conclude(sent, last_err)
            }
        }
    }

    /// Deliver on one port if it is up and egress policy admits the
    /// VLAN; `Ok(false)` means the port was skipped
    fn egress(port: &Port, vlan: u16, frame: &[u8]) -> Result<bool> {
        if port.state != PortState::Up {
            return Ok(false);
        }
        let Some(tagged) = vlan::egress_admits(port, vlan) else {
            return Ok(false);
        };
        port.send(&EgressFrame { frame, vlan, tagged }).map(|_| true)
    }

    /// Flood to every admitted up port except the ingress port and
    /// `exclude`; returns how many deliveries succeeded and the last
    /// egress error
    fn flood(
        &self,
        ports: &HashMap<String, Port>,
        in_port_id: &str,
        vlan: u16,
        frame: &[u8],
        exclude: &[String],
    ) -> (usize, Option<Error>) {
        let mut sent = 0;
        let mut last_err = None;

        for (id, port) in ports.iter() {
            if id == in_port_id || exclude.contains(id) {
                continue;
            }
            match Self::egress(port, vlan, frame) {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    self.counters.egress_errors.fetch_add(1, Ordering::Relaxed);
                    last_err = Some(e);
                }
            }
        }

        (sent, last_err)
    }

    fn conclude(sent: usize, last_err: Option<Error>) -> Result<()> {
        match last_err {
            Some(err) if sent == 0 => Err(err),
            _ => Ok(()),
        }
    }
}
