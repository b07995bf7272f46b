//! SSH transport layer wrapping russh.
//!
//! This module provides the low-level SSH connection management:
//! dialing, host key verification, authentication, and opening a PTY
//! shell whose byte stream is handed to the channel layer.

pub mod config;
mod ssh;

pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use ssh::SshTransport;
