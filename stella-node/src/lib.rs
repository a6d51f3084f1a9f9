//! Stella node
//!
//! Assembles identity, reliable transport, switch and discovery into
//! a running node, and owns the periodic maintenance tasks, the JSON
//! configuration and the event reporting surface.

mod config;
mod error;
mod event;
mod node;

pub use config::{LogLevel, NodeConfig, DEFAULT_BIND_ADDR};
pub use error::{Error, Result};
pub use event::{EventHandler, LoggingEventHandler, NodeEvent, NodeStats};
pub use node::{Node, NodeState};
