//! High-level driver for device interaction.
//!
//! The driver layer provides the [`Session`] state machine, administrator
//! mode handling, interactive prompt sequences and the [`Executor`]s that
//! feature code runs commands through.

mod builder;
mod executor;
mod interactive;
mod privilege;
mod response;
mod session;

pub use builder::ClientBuilder;
pub use executor::{Elevation, PooledExecutor, SimpleExecutor};
pub use interactive::{Expect, Input, InteractiveEvent, InteractiveResult, InteractiveStep};
pub use response::{CommandResult, concat_raw};
pub use session::{Session, SessionState};

use std::future::Future;

use secrecy::SecretString;

use crate::context::Context;
use crate::error::Result;

/// Runs commands against the router.
///
/// This is the surface feature code depends on. Implementations decide
/// how sessions are obtained; all of them elevate to administrator mode
/// as needed, retry transport failures, and report device-side failures
/// as [`crate::Error::Device`].
pub trait Executor: Send + Sync {
    /// Run one command and return its raw output, echo and prompt included.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use rtxsh::{Context, Executor};
    ///
    /// # async fn example(executor: &impl Executor) -> Result<(), rtxsh::Error> {
    /// let result = executor.run(&Context::background(), "show status dhcp").await?;
    /// println!("{}", result.cleaned());
    /// # Ok(())
    /// # }
    /// ```
    fn run(&self, ctx: &Context, command: &str) -> impl Future<Output = Result<CommandResult>> + Send;

    /// Run commands in order on one session and return their concatenated
    /// raw output. Stops at the first failure.
    fn run_batch(&self, ctx: &Context, commands: &[&str]) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Change the administrator password. Later elevations use `new`.
    fn set_administrator_password(
        &self,
        ctx: &Context,
        old: &SecretString,
        new: &SecretString,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Change the login password.
    fn set_login_password(&self, ctx: &Context, new: &SecretString) -> impl Future<Output = Result<()>> + Send;

    /// Regenerate the SSH server host key and return the device output.
    fn generate_sshd_host_key(&self, ctx: &Context) -> impl Future<Output = Result<String>> + Send;
}
