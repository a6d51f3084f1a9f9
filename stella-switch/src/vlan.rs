//! VLAN registry and admission policy
//!
//! VLAN IDs run 1..=4094. A VLAN is "active" iff it is registered and
//! enabled; frames on inactive VLANs are dropped at ingress. Ports
//! carry traffic in access, trunk or hybrid mode; the admission
//! functions here decide which VLAN an ingress frame belongs to and
//! whether (and how) a frame may leave a given port.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::port::Port;
use crate::{Error, Result};

/// Highest assignable VLAN ID
pub const MAX_VLAN_ID: u16 = 4094;

/// Port VLAN modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VlanMode {
    /// The port belongs to exactly one VLAN; frames travel untagged
    #[default]
    Access,
    /// The port carries several VLANs; frames travel tagged except on
    /// the native VLAN
    Trunk,
    /// Trunk behavior plus an access VLAN that travels untagged
    Hybrid,
}

/// A VLAN definition
#[derive(Debug, Clone)]
pub struct Vlan {
    /// VLAN ID (1..=4094)
    pub id: u16,
    /// Human-readable name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Disabled VLANs drop all their traffic
    pub enabled: bool,
}

impl Vlan {
    /// Create an enabled VLAN; IDs outside 1..=4094 are rejected
    pub fn new(id: u16, name: impl Into<String>) -> Result<Self> {
        if id == 0 || id > MAX_VLAN_ID {
            return Err(Error::InvalidVlanId(id));
        }
        Ok(Self {
            id,
            name: name.into(),
            description: String::new(),
            enabled: true,
        })
    }
}

/// Registry of configured VLANs
#[derive(Debug, Default)]
pub struct VlanRegistry {
    vlans: RwLock<HashMap<u16, Vlan>>,
}

impl VlanRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a VLAN; duplicate IDs fail with [`Error::VlanExists`]
    pub fn add(&self, vlan: Vlan) -> Result<()> {
        let mut vlans = self.vlans.write().unwrap();
        if vlans.contains_key(&vlan.id) {
            return Err(Error::VlanExists(vlan.id));
        }
        vlans.insert(vlan.id, vlan);
        Ok(())
    }

    /// Remove a VLAN
    pub fn remove(&self, id: u16) -> Result<()> {
        self.vlans
            .write()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::VlanNotFound(id))
    }

    /// Fetch a VLAN definition by ID
    pub fn get(&self, id: u16) -> Option<Vlan> {
        self.vlans.read().unwrap().get(&id).cloned()
    }

    /// Enable or disable a VLAN
    pub fn set_enabled(&self, id: u16, enabled: bool) -> Result<()> {
        let mut vlans = self.vlans.write().unwrap();
        let vlan = vlans.get_mut(&id).ok_or(Error::VlanNotFound(id))?;
        vlan.enabled = enabled;
        Ok(())
    }

    /// A VLAN is active iff it exists and is enabled
    pub fn is_active(&self, id: u16) -> bool {
        self.vlans
            .read()
            .unwrap()
            .get(&id)
            .is_some_and(|v| v.enabled)
    }

    /// Snapshot of all VLAN definitions
    pub fn all(&self) -> Vec<Vlan> {
        self.vlans.read().unwrap().values().cloned().collect()
    }

    /// Number of registered VLANs
    pub fn len(&self) -> usize {
        self.vlans.read().unwrap().len()
    }

    /// True when no VLANs are registered
    pub fn is_empty(&self) -> bool {
        self.vlans.read().unwrap().is_empty()
    }
}

/// Decide which VLAN an ingress frame belongs to on `port`
///
/// `tag` is the frame's 802.1Q tag, when present. `None` means the
/// frame is not admitted and must be dropped.
pub fn ingress_vlan(port: &Port, tag: Option<u16>) -> Option<u16> {
    match port.vlan_mode {
        VlanMode::Access => match tag {
            // Untagged frames are forced onto the access VLAN
            None => Some(port.access_vlan),
            Some(t) if t == port.access_vlan => Some(t),
            Some(_) => None,
        },
        VlanMode::Trunk => match tag {
            None => Some(port.native_vlan),
            Some(t) if port.allows_vlan(t) => Some(t),
            Some(_) => None,
        },
        VlanMode::Hybrid => match tag {
            None => Some(port.native_vlan),
            Some(t) if port.allows_vlan(t) || t == port.access_vlan => Some(t),
            Some(_) => None,
        },
    }
}

/// Decide whether a frame on `vlan` may leave through `port`
///
/// Returns `None` when egress is denied, otherwise whether the frame
/// is emitted tagged.
pub fn egress_admits(port: &Port, vlan: u16) -> Option<bool> {
    match port.vlan_mode {
        VlanMode::Access => (port.access_vlan == vlan).then_some(false),
        VlanMode::Trunk => port
            .allows_vlan(vlan)
            .then_some(vlan != port.native_vlan),
        VlanMode::Hybrid => (port.allows_vlan(vlan) || vlan == port.access_vlan)
            .then_some(vlan != port.native_vlan && vlan != port.access_vlan),
    }
}
