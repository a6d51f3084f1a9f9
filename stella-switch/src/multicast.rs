//! Multicast group membership
//!
//! Tracks which ports joined which multicast group, keyed by
//! `(vlan, group MAC, adi)` where `adi` is an additional 32-bit
//! discriminator. Members age out after a quiet period; groups vanish
//! with their last member.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use stella_protocol::Mac;
use tracing::{debug, trace};

use crate::igmp::{
    self, IgmpMessage, IGMP_LEAVE_GROUP, IGMP_MEMBERSHIP_QUERY, IGMP_MEMBERSHIP_REPORT_V1,
    IGMP_MEMBERSHIP_REPORT_V2, IGMP_MEMBERSHIP_REPORT_V3,
};

/// Default member aging time
pub const DEFAULT_MEMBER_AGING: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey {
    vlan: u16,
    mac: Mac,
    adi: u32,
}

#[derive(Debug, Clone)]
struct Member {
    port_id: String,
    last_seen: Instant,
}

#[derive(Debug, Default)]
struct GroupStatus {
    members: Vec<Member>,
}

/// Per-switch multicast membership table
#[derive(Debug)]
pub struct MulticastTable {
    groups: RwLock<HashMap<GroupKey, GroupStatus>>,
    aging_time: Duration,
}

impl Default for MulticastTable {
    fn default() -> Self {
        Self::new(DEFAULT_MEMBER_AGING)
    }
}

impl MulticastTable {
    /// Create a table with the given member aging time
    pub fn new(aging_time: Duration) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            aging_time: if aging_time.is_zero() {
                DEFAULT_MEMBER_AGING
            } else {
                aging_time
            },
        }
    }

    /// Add a port to a group, or refresh its membership
    pub fn add_member(&self, vlan: u16, mac: Mac, adi: u32, port_id: &str) {
        let key = GroupKey { vlan, mac, adi };
        let mut groups = self.groups.write().unwrap();
        let status = groups.entry(key).or_default();

        match status.members.iter_mut().find(|m| m.port_id == port_id) {
            Some(member) => member.last_seen = Instant::now(),
            None => {
                trace!(vlan, group = %mac, port_id, "multicast join");
                status.members.push(Member {
                    port_id: port_id.to_string(),
                    last_seen: Instant::now(),
                });
            }
        }
    }

    /// Remove a port from a group; the group goes away with its last
    /// member
    pub fn remove_member(&self, vlan: u16, mac: Mac, adi: u32, port_id: &str) {
        let key = GroupKey { vlan, mac, adi };
        let mut groups = self.groups.write().unwrap();
        if let Some(status) = groups.get_mut(&key) {
            status.members.retain(|m| m.port_id != port_id);
            if status.members.is_empty() {
                groups.remove(&key);
            }
        }
    }

    /// Ports subscribed to a group on a VLAN (any adi), excluding the
    /// ingress port
    pub fn member_ports(&self, vlan: u16, mac: Mac, exclude_port: &str) -> Vec<String> {
        let groups = self.groups.read().unwrap();
        let mut ports = Vec::new();
        for (key, status) in groups.iter() {
            if key.vlan != vlan || key.mac != mac {
                continue;
            }
            for member in &status.members {
                if member.port_id != exclude_port && !ports.contains(&member.port_id) {
                    ports.push(member.port_id.clone());
                }
            }
        }
        ports
    }

    /// Whether a port is subscribed to a group on a VLAN
    pub fn is_member(&self, vlan: u16, mac: Mac, port_id: &str) -> bool {
        let groups = self.groups.read().unwrap();
        groups.iter().any(|(key, status)| {
            key.vlan == vlan
                && key.mac == mac
                && status.members.iter().any(|m| m.port_id == port_id)
        })
    }

    /// Apply a snooped IGMP message from `port_id` on `vlan`
    ///
    /// Reports join the group mapped from the IPv4 address; leaves
    /// remove the port; queries change nothing (they are forwarded
    /// like any other multicast frame).
    pub fn handle_igmp(&self, port_id: &str, vlan: u16, message: &IgmpMessage) {
        let group_mac = igmp::ipv4_to_multicast_mac(message.group);
        match message.msg_type {
            IGMP_MEMBERSHIP_REPORT_V1 | IGMP_MEMBERSHIP_REPORT_V2 | IGMP_MEMBERSHIP_REPORT_V3 => {
                self.add_member(vlan, group_mac, 0, port_id);
            }
            IGMP_LEAVE_GROUP => {
                debug!(vlan, group = %group_mac, port_id, "multicast leave");
                self.remove_member(vlan, group_mac, 0, port_id);
            }
            IGMP_MEMBERSHIP_QUERY => {}
            other => trace!(igmp_type = other, "ignoring unknown IGMP type"),
        }
    }

    /// Drop members idle past the aging time and groups left empty;
    /// returns how many members were removed
    pub fn age(&self) -> usize {
        let mut groups = self.groups.write().unwrap();
        let now = Instant::now();
        let aging = self.aging_time;
        let mut removed = 0;

        groups.retain(|_, status| {
            let before = status.members.len();
            status
                .members
                .retain(|m| now.duration_since(m.last_seen) <= aging);
            removed += before - status.members.len();
            !status.members.is_empty()
        });

        removed
    }

    /// Number of tracked groups
    pub fn group_count(&self) -> usize {
        self.groups.read().unwrap().len()
    }
}
