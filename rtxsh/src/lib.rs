//! # rtxsh
//!
//! Async SSH CLI session engine for Yamaha RTX routers.
//!
//! RTX routers expose configuration only through an interactive,
//! prompt-driven shell. rtxsh drives that shell for automation code: it
//! detects prompts in an unframed byte stream, enters and leaves
//! administrator mode (answering the save confirmation on the way out),
//! runs commands with per-command timeouts and caller cancellation, and
//! shares a small number of sessions between concurrent callers.
//!
//! ## Features
//!
//! - Async SSH connections via russh, with fixed-key, known_hosts and
//!   accept-new host key policies
//! - Efficient pattern buffer matching with ANSI stripping
//! - Administrator elevation, password changes and host key generation
//! - Bounded session pool with idle sweep and statistics
//! - Exponential and linear backoff for transport retries and for
//!   polling eventual consistency
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtxsh::{ClientBuilder, Context};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rtxsh::Error> {
//!     let client = ClientBuilder::new("192.168.100.1")
//!         .username("admin")
//!         .password("login-secret")
//!         .administrator_password("admin-secret")
//!         .build()?;
//!
//!     let ctx = Context::with_timeout(std::time::Duration::from_secs(30));
//!     client.run(&ctx, "ip host router.local 192.168.100.1").await?;
//!     let hosts = client.run(&ctx, "show config").await?;
//!     println!("{}", hosts.cleaned());
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod client;
pub mod context;
pub mod driver;
pub mod error;
pub mod output;
pub mod platform;
pub mod pool;
pub mod redact;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use client::RtxClient;
pub use context::Context;
pub use driver::{ClientBuilder, CommandResult, Elevation, Executor, PooledExecutor, Session, SimpleExecutor};
pub use error::{Error, Result};
pub use platform::{DeviceProfile, PrivilegeMode};
pub use pool::{Pool, PoolConfig, PoolStats};
pub use retry::{ExponentialBackoff, LinearBackoff, NoRetry, RetryStrategy};
pub use transport::{AuthMethod, HostKeyVerification, SshConfig};
