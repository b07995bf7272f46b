//! Platform definitions.
//!
//! This module describes the router's CLI dialect: prompt terminators,
//! privilege levels, escalation commands, save confirmations, error
//! markers and per-command timeouts.

mod definition;
mod privilege_level;
mod timeouts;
pub mod vendors;

pub use definition::DeviceProfile;
pub use privilege_level::{PrivilegeLevel, PrivilegeMode};
pub use timeouts::CommandTimeouts;
