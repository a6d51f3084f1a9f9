//! Switch ports
//!
//! A port is a logical attachment point: a local TUN/TAP sink or a
//! tunnel to a remote peer. The port owns only its egress sink; all
//! dispatch runs through the switch's port table, so ports never hold
//! references back to the switch.

use std::collections::HashSet;
use std::fmt;

use crate::vlan::VlanMode;
use crate::{Error, Result};

/// Default port MTU
pub const DEFAULT_MTU: usize = 1500;

/// Administrative / link state of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortState {
    #[default]
    Down,
    Up,
    Error,
}

/// A frame leaving the switch through a port
///
/// The switch never rewrites frame bytes; the sink receives the frame
/// as observed at ingress together with the effective VLAN and the
/// tagging decision from egress policy.
#[derive(Debug, Clone, Copy)]
pub struct EgressFrame<'a> {
    /// The frame bytes as seen at ingress
    pub frame: &'a [u8],
    /// Effective VLAN the frame travels on
    pub vlan: u16,
    /// Whether egress policy says to emit the frame tagged
    pub tagged: bool,
}

/// Egress delivery callback: hand the frame to the underlay (TUN/TAP
/// writer, tunnel transport, test channel)
pub type EgressSink = Box<dyn Fn(&EgressFrame<'_>) -> Result<()> + Send + Sync>;

/// A switch port
pub struct Port {
    /// Stable identifier, unique within the switch
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Administrative state
    pub state: PortState,
    /// Maximum frame size
    pub mtu: usize,
    /// VLAN mode
    pub vlan_mode: VlanMode,
    /// VLAN for access mode (and the untagged VLAN in hybrid mode)
    pub access_vlan: u16,
    /// VLANs carried in trunk/hybrid mode; empty means all
    pub allowed_vlans: HashSet<u16>,
    /// VLAN assumed for untagged ingress in trunk/hybrid mode
    pub native_vlan: u16,
    sink: Option<EgressSink>,
}

impl Port {
    /// Create a port with defaults: down, access mode on VLAN 1
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: PortState::Down,
            mtu: DEFAULT_MTU,
            vlan_mode: VlanMode::Access,
            access_vlan: 1,
            allowed_vlans: HashSet::new(),
            native_vlan: 1,
            sink: None,
        }
    }

    /// Whether a VLAN passes the allowed set (empty set = wildcard)
    pub fn allows_vlan(&self, vlan: u16) -> bool {
        self.allowed_vlans.is_empty() || self.allowed_vlans.contains(&vlan)
    }

    /// Install the egress sink
    pub fn set_sink(&mut self, sink: EgressSink) {
        self.sink = Some(sink);
    }

    /// Whether an egress sink is installed
    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Hand a frame to the egress sink
    ///
    /// Fails when the port is not up or no sink is installed.
    pub fn send(&self, frame: &EgressFrame<'_>) -> Result<()> {
        if self.state != PortState::Up {
            return Err(Error::PortDown(self.id.clone()));
        }
        match &self.sink {
            Some(sink) => sink(frame),
            None => Err(Error::Egress {
                port: self.id.clone(),
                reason: "no egress sink installed".to_string(),
            }),
        }
    }

    /// Take the port down and release its sink
    ///
    /// The sink is the last thing released when a port goes away.
    pub fn close(&mut self) {
        self.state = PortState::Down;
        self.sink = None;
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("mtu", &self.mtu)
            .field("vlan_mode", &self.vlan_mode)
            .field("access_vlan", &self.access_vlan)
            .field("allowed_vlans", &self.allowed_vlans)
            .field("native_vlan", &self.native_vlan)
            .field("has_sink", &self.has_sink())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_new_port_defaults() {
        let port = Port::new("p1", "uplink");
        assert_eq!(port.state, PortState::Down);
        assert_eq!(port.mtu, DEFAULT_MTU);
        assert_eq!(port.vlan_mode, VlanMode::Access);
        assert_eq!(port.access_vlan, 1);
        assert_eq!(port.native_vlan, 1);
        assert!(!port.has_sink());
    }

    #[test]
    fn test_send_requires_up_state_and_sink() {
        let mut port = Port::new("p1", "p1");
        let frame = EgressFrame {
            frame: &[0u8; 14],
            vlan: 1,
            tagged: false,
        };

        assert!(matches!(port.send(&frame), Err(Error::PortDown(_))));

        port.state = PortState::Up;
        assert!(matches!(port.send(&frame), Err(Error::Egress { .. })));

        let delivered = Arc::new(Mutex::new(0));
        let count = Arc::clone(&delivered);
        port.set_sink(Box::new(move |_| {
            *count.lock().unwrap() += 1;
            Ok(())
        }));
        port.send(&frame).unwrap();
        assert_eq!(*delivered.lock().unwrap(), 1);
    }

    #[test]
    fn test_close_releases_sink() {
        let mut port = Port::new("p1", "p1");
        port.state = PortState::Up;
        port.set_sink(Box::new(|_| Ok(())));

        port.close();
        assert_eq!(port.state, PortState::Down);
        assert!(!port.has_sink());
    }

    #[test]
    fn test_allows_vlan_wildcard() {
        let mut port = Port::new("p1", "p1");
        assert!(port.allows_vlan(123));

        port.allowed_vlans.insert(10);
        assert!(port.allows_vlan(10));
        assert!(!port.allows_vlan(123));
    }
}
