//! Stella virtual Ethernet switch
//!
//! The forwarding core: switch ports with VLAN policy
//! (access/trunk/hybrid), a bounded MAC learning table with aging,
//! IGMP snooping with member aging, and the flood /
//! selective-forward decision. Frames enter through
//! [`Switch::handle_frame`] and leave through per-port egress sinks.

mod error;
mod frame;
mod igmp;
mod mac_table;
mod multicast;
mod port;
mod switch;
mod vlan;

pub mod vxlan;

pub use error::{Error, Result};
pub use frame::{FrameView, ETHERTYPE_IPV4, ETHERTYPE_VLAN, MIN_FRAME_LENGTH};
pub use igmp::{
    checksum as igmp_checksum, ipv4_to_multicast_mac, is_igmp, multicast_mac_to_ipv4, parse_igmp,
    IgmpMessage, IGMP_LEAVE_GROUP, IGMP_MEMBERSHIP_QUERY, IGMP_MEMBERSHIP_REPORT_V1,
    IGMP_MEMBERSHIP_REPORT_V2, IGMP_MEMBERSHIP_REPORT_V3,
};
pub use mac_table::{MacTable, DEFAULT_AGING_TIMEOUT, DEFAULT_MAX_SIZE};
pub use multicast::{MulticastTable, DEFAULT_MEMBER_AGING};
pub use port::{EgressFrame, EgressSink, Port, PortState, DEFAULT_MTU};
pub use switch::{Switch, SwitchState, SwitchStats};
pub use vlan::{egress_admits, ingress_vlan, Vlan, VlanMode, VlanRegistry, MAX_VLAN_ID};
