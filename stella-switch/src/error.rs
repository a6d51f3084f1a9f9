//! Error types for the switch

use thiserror::Error;

/// Result type alias for switch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during switch operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("switch is not running")]
    SwitchNotRunning,

    #[error("invalid switch state: {0}")]
    InvalidState(String),

    #[error("port {0} is down")]
    PortDown(String),

    #[error("port {0} already exists")]
    PortExists(String),

    #[error("port {0} not found")]
    PortNotFound(String),

    #[error("VLAN {0} already exists")]
    VlanExists(u16),

    #[error("VLAN {0} not found")]
    VlanNotFound(u16),

    #[error("VLAN {0} is not active")]
    VlanInactive(u16),

    #[error("invalid VLAN ID {0}, must be between 1 and 4094")]
    InvalidVlanId(u16),

    #[error("invalid VXLAN packet: {0}")]
    InvalidVxlan(String),

    #[error("VNI {0} exceeds the maximum VLAN ID")]
    VniOutOfRange(u32),

    #[error("egress failed on port {port}: {reason}")]
    Egress { port: String, reason: String },
}
