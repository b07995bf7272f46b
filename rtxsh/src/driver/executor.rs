//! Command executors.
//!
//! [`SimpleExecutor`] opens a fresh session for every call and closes it
//! afterwards. [`PooledExecutor`] borrows a session from a [`Pool`],
//! returning it on success and discarding it whenever the session can no
//! longer be trusted. Both retry transport failures with a
//! [`RetryStrategy`]; device-reported failures are surfaced as
//! [`Error::Device`] and never retried here.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info, warn};
use secrecy::SecretString;

use super::Executor;
use super::response::{CommandResult, concat_raw};
use super::session::Session;
use crate::context::Context;
use crate::error::{AuthError, Error, Result};
use crate::output::check_output;
use crate::platform::DeviceProfile;
use crate::pool::{Pool, Pooled, ResourceFactory};
use crate::redact::redact_command;
use crate::retry::{ExponentialBackoff, RetryStrategy, retry_when};

/// When executors enter administrator mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Elevation {
    /// Elevate before every command whenever an administrator password is
    /// configured.
    #[default]
    Always,
    /// Elevate only for commands the device profile lists as needing it.
    OnDemand,
}

/// Administrator credentials shared by an executor's sessions.
struct Privileges {
    password: RwLock<Option<SecretString>>,
    elevation: Elevation,
}

impl Privileges {
    fn new(password: Option<SecretString>, elevation: Elevation) -> Self {
        Self {
            password: RwLock::new(password),
            elevation,
        }
    }

    fn password(&self) -> Option<SecretString> {
        self.password.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_password(&self, password: SecretString) {
        *self.password.write().unwrap_or_else(PoisonError::into_inner) = Some(password);
    }

    fn has_password(&self) -> bool {
        self.password.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn needs_elevation(&self, profile: &DeviceProfile, command: &str) -> bool {
        profile.requires_administrator(command)
            || (self.elevation == Elevation::Always && self.has_password())
    }

    async fn elevate(&self, ctx: &Context, session: &mut Session) -> Result<()> {
        if session.is_administrator() {
            return Ok(());
        }
        let password = self.password().ok_or(AuthError::NoAdministratorPassword)?;
        session.enter_administrator_mode(ctx, &password).await
    }
}

impl fmt::Debug for Privileges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Privileges")
            .field("password", &self.has_password().then_some("<hidden>"))
            .field("elevation", &self.elevation)
            .finish()
    }
}

/// Run one command on `session`: elevate if needed, send and check the
/// output for device error markers. A missing prompt surfaces from
/// `send` as a protocol error.
async fn execute(ctx: &Context, session: &mut Session, command: &str, privileges: &Privileges) -> Result<CommandResult> {
    if privileges.needs_elevation(session.profile(), command) {
        privileges.elevate(ctx, session).await?;
    }

    let result = session.send(ctx, command).await?;
    check_output(command, &result.cleaned(), &session.profile().error_markers)?;
    Ok(result)
}

async fn execute_batch(
    ctx: &Context,
    session: &mut Session,
    commands: &[&str],
    privileges: &Privileges,
) -> Result<Vec<u8>> {
    let mut results = Vec::with_capacity(commands.len());
    for (index, command) in commands.iter().enumerate() {
        match execute(ctx, session, command, privileges).await {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(
                    "Batch aborted at command {} of {} ({}): {}",
                    index + 1,
                    commands.len(),
                    redact_command(command),
                    e
                );
                return Err(e);
            }
        }
    }
    Ok(concat_raw(&results))
}

async fn change_administrator_password(
    ctx: &Context,
    session: &mut Session,
    old: &SecretString,
    new: &SecretString,
    privileges: &Privileges,
) -> Result<()> {
    if !session.is_administrator() {
        let current = privileges.password().unwrap_or_else(|| old.clone());
        session.enter_administrator_mode(ctx, &current).await?;
    }
    session.change_administrator_password(ctx, old, new).await?;
    privileges.set_password(new.clone());
    Ok(())
}

async fn change_login_password(
    ctx: &Context,
    session: &mut Session,
    new: &SecretString,
    privileges: &Privileges,
) -> Result<()> {
    privileges.elevate(ctx, session).await?;
    session.change_login_password(ctx, new).await
}

async fn generate_host_key(ctx: &Context, session: &mut Session, privileges: &Privileges) -> Result<String> {
    privileges.elevate(ctx, session).await?;
    session.generate_sshd_host_key(ctx).await
}

/// Opens a new session for every call.
///
/// Simple and always in a known state, at the cost of a full SSH login
/// (and administrator elevation) per command.
pub struct SimpleExecutor<F: ResourceFactory<Resource = Session>> {
    factory: F,
    retry: Arc<dyn RetryStrategy>,
    privileges: Privileges,
}

impl<F: ResourceFactory<Resource = Session>> SimpleExecutor<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            retry: Arc::new(ExponentialBackoff::default()),
            privileges: Privileges::new(None, Elevation::default()),
        }
    }

    pub fn with_retry(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_administrator_password(mut self, password: SecretString) -> Self {
        self.privileges = Privileges::new(Some(password), self.privileges.elevation);
        self
    }

    pub fn with_elevation(mut self, elevation: Elevation) -> Self {
        self.privileges.elevation = elevation;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    async fn connect(&self, ctx: &Context) -> Result<Session> {
        retry_when(ctx, &*self.retry, Error::is_retryable, || self.factory.create(ctx)).await
    }

    async fn run_once(&self, ctx: &Context, command: &str) -> Result<CommandResult> {
        let mut session = self.factory.create(ctx).await?;
        let result = execute(ctx, &mut session, command, &self.privileges).await;
        self.factory.close(session).await;
        result
    }
}

impl<F: ResourceFactory<Resource = Session>> Executor for SimpleExecutor<F> {
    async fn run(&self, ctx: &Context, command: &str) -> Result<CommandResult> {
        retry_when(ctx, &*self.retry, Error::is_retryable, || self.run_once(ctx, command)).await
    }

    async fn run_batch(&self, ctx: &Context, commands: &[&str]) -> Result<Vec<u8>> {
        let mut session = self.connect(ctx).await?;
        let result = execute_batch(ctx, &mut session, commands, &self.privileges).await;
        self.factory.close(session).await;
        result
    }

    async fn set_administrator_password(&self, ctx: &Context, old: &SecretString, new: &SecretString) -> Result<()> {
        let mut session = self.connect(ctx).await?;
        let result = change_administrator_password(ctx, &mut session, old, new, &self.privileges).await;
        self.factory.close(session).await;
        result
    }

    async fn set_login_password(&self, ctx: &Context, new: &SecretString) -> Result<()> {
        let mut session = self.connect(ctx).await?;
        let result = change_login_password(ctx, &mut session, new, &self.privileges).await;
        self.factory.close(session).await;
        result
    }

    async fn generate_sshd_host_key(&self, ctx: &Context) -> Result<String> {
        let mut session = self.connect(ctx).await?;
        let result = generate_host_key(ctx, &mut session, &self.privileges).await;
        self.factory.close(session).await;
        result
    }
}

impl<F: ResourceFactory<Resource = Session>> fmt::Debug for SimpleExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleExecutor")
            .field("privileges", &self.privileges)
            .finish()
    }
}

/// Runs commands on sessions borrowed from a [`Pool`].
///
/// Sessions stay logged in, and stay elevated, between calls. A session
/// that failed with a transport, protocol or cancellation error is
/// discarded rather than returned.
pub struct PooledExecutor<F: ResourceFactory<Resource = Session>> {
    pool: Pool<F>,
    retry: Arc<dyn RetryStrategy>,
    privileges: Privileges,
}

impl<F: ResourceFactory<Resource = Session>> PooledExecutor<F> {
    pub fn new(pool: Pool<F>) -> Self {
        Self {
            pool,
            retry: Arc::new(ExponentialBackoff::default()),
            privileges: Privileges::new(None, Elevation::default()),
        }
    }

    pub fn with_retry(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_administrator_password(mut self, password: SecretString) -> Self {
        self.privileges = Privileges::new(Some(password), self.privileges.elevation);
        self
    }

    pub fn with_elevation(mut self, elevation: Elevation) -> Self {
        self.privileges.elevation = elevation;
        self
    }

    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    async fn acquire(&self, ctx: &Context) -> Result<Pooled<F>> {
        retry_when(ctx, &*self.retry, Error::is_retryable, || self.pool.acquire(ctx)).await
    }

    /// Give the session back, or throw it away if `result` says it can no
    /// longer be trusted.
    async fn finish<T>(&self, session: Pooled<F>, result: &Result<T>) {
        let poisoned = matches!(result, Err(e) if e.poisons_session());
        if poisoned || !session.is_open() {
            debug!("Session {} can no longer be trusted", session.id());
            self.pool.discard(session).await;
        } else {
            self.pool.release(session).await;
        }
    }

    async fn run_once(&self, ctx: &Context, command: &str) -> Result<CommandResult> {
        let mut session = self.pool.acquire(ctx).await?;
        let result = execute(ctx, &mut session, command, &self.privileges).await;
        self.finish(session, &result).await;
        result
    }
}

impl<F: ResourceFactory<Resource = Session>> Executor for PooledExecutor<F> {
    async fn run(&self, ctx: &Context, command: &str) -> Result<CommandResult> {
        retry_when(ctx, &*self.retry, Error::is_retryable, || self.run_once(ctx, command)).await
    }

    async fn run_batch(&self, ctx: &Context, commands: &[&str]) -> Result<Vec<u8>> {
        let mut session = self.acquire(ctx).await?;
        let result = execute_batch(ctx, &mut session, commands, &self.privileges).await;
        self.finish(session, &result).await;
        result
    }

    async fn set_administrator_password(&self, ctx: &Context, old: &SecretString, new: &SecretString) -> Result<()> {
        let mut session = self.acquire(ctx).await?;
        let result = change_administrator_password(ctx, &mut session, old, new, &self.privileges).await;
        self.finish(session, &result).await;
        if result.is_ok() {
            info!("Administrator password updated");
        }
        result
    }

    async fn set_login_password(&self, ctx: &Context, new: &SecretString) -> Result<()> {
        let mut session = self.acquire(ctx).await?;
        let result = change_login_password(ctx, &mut session, new, &self.privileges).await;
        self.finish(session, &result).await;
        result
    }

    async fn generate_sshd_host_key(&self, ctx: &Context) -> Result<String> {
        let mut session = self.acquire(ctx).await?;
        let result = generate_host_key(ctx, &mut session, &self.privileges).await;
        self.finish(session, &result).await;
        result
    }
}

impl<F: ResourceFactory<Resource = Session>> fmt::Debug for PooledExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledExecutor")
            .field("pool", &self.pool)
            .field("privileges", &self.privileges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceErrorKind, ProtocolError, TransportError};
    use crate::platform::vendors;
    use crate::pool::PoolConfig;
    use crate::retry::{LinearBackoff, NoRetry};
    use crate::testing::{ADMIN_PASSWORD, FakeRouter, FakeRouterFactory};
    use secrecy::ExposeSecret;
    use std::time::Duration;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn pooled(router: FakeRouter) -> PooledExecutor<FakeRouterFactory> {
        pooled_with(FakeRouterFactory::new(router))
    }

    fn pooled_with(factory: FakeRouterFactory) -> PooledExecutor<FakeRouterFactory> {
        let config = PoolConfig {
            idle_sweep: false,
            ..PoolConfig::default()
        };
        PooledExecutor::new(Pool::new(factory, config).unwrap())
            .with_retry(Arc::new(LinearBackoff::new(Duration::from_millis(10), 3)))
            .with_administrator_password(secret(ADMIN_PASSWORD))
    }

    #[tokio::test]
    async fn test_pooled_run_reuses_elevated_session() {
        let exec = pooled(FakeRouter::new().with_response("show status dhcp", "DHCP Scope number: 1"));
        let ctx = Context::background();

        let first = exec.run(&ctx, "show status dhcp").await.unwrap();
        assert_eq!(first.cleaned(), "DHCP Scope number: 1");
        assert_eq!(first.prompt.as_deref(), Some("[RTX1210] #"));
        exec.run(&ctx, "show status dhcp").await.unwrap();

        let factory = exec.pool().factory();
        assert_eq!(factory.created(), 1);
        let received = factory.received();
        assert_eq!(received.iter().filter(|l| *l == "administrator").count(), 1);
        assert_eq!(exec.pool().stats().available, 1);
        exec.pool().close().await;
    }

    #[tokio::test]
    async fn test_on_demand_elevation() {
        let exec = pooled(FakeRouter::new()).with_elevation(Elevation::OnDemand);
        let ctx = Context::background();

        exec.run(&ctx, "show environment").await.unwrap();
        assert!(!exec.pool().factory().received().contains(&"administrator".to_string()));

        exec.run(&ctx, "ip host router.local 192.168.100.1").await.unwrap();
        assert!(exec.pool().factory().received().contains(&"administrator".to_string()));
        exec.pool().close().await;
    }

    #[tokio::test]
    async fn test_missing_administrator_password() {
        let factory = FakeRouterFactory::new(FakeRouter::new());
        let exec = PooledExecutor::new(
            Pool::new(factory, PoolConfig { idle_sweep: false, ..PoolConfig::default() }).unwrap(),
        )
        .with_elevation(Elevation::OnDemand);
        let err = exec.run(&Context::background(), "show config").await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::NoAdministratorPassword)));
        // The session itself is fine and goes back to the pool.
        assert_eq!(exec.pool().stats().available, 1);
        exec.pool().close().await;
    }

    #[tokio::test]
    async fn test_device_error_is_not_retried() {
        let exec = pooled(
            FakeRouter::new().with_response("ip host router.local 192.168.100.1", "Error: already exists"),
        );
        let err = exec
            .run(&Context::background(), "ip host router.local 192.168.100.1")
            .await
            .unwrap_err();
        assert_eq!(err.device_kind(), Some(DeviceErrorKind::AlreadyExists));

        let factory = exec.pool().factory();
        assert_eq!(factory.created(), 1);
        assert_eq!(
            factory
                .received()
                .iter()
                .filter(|l| l.starts_with("ip host"))
                .count(),
            1
        );
        assert_eq!(exec.pool().stats().available, 1);
        exec.pool().close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_retried() {
        let exec = pooled_with(FakeRouterFactory::new(FakeRouter::new()).failing_first(2));
        exec.run(&Context::background(), "show environment").await.unwrap();
        assert_eq!(exec.pool().factory().created(), 3);
        exec.pool().close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_without_retry() {
        let exec = pooled_with(FakeRouterFactory::new(FakeRouter::new()).failing_first(1))
            .with_retry(Arc::new(NoRetry));
        let err = exec.run(&Context::background(), "show environment").await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
        assert_eq!(exec.pool().stats().pending, 0);
        exec.pool().close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_timeout_discards_session() {
        let exec = pooled(FakeRouter::new());
        let ctx = Context::background();
        let timeout = vendors::rtx::profile().timeouts.timeout_for("hang");

        let start = tokio::time::Instant::now();
        let err = exec.run(&ctx, "hang").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::PromptTimeout { .. })));
        // The elevated session is dropped without an exit dialogue.
        assert!(start.elapsed() < timeout + Duration::from_millis(100));
        assert_eq!(exec.pool().factory().received().iter().filter(|l| *l == "exit").count(), 0);

        let stats = exec.pool().stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, 0);
        assert_eq!(exec.pool().factory().closed(), 1);

        exec.run(&ctx, "show environment").await.unwrap();
        assert_eq!(exec.pool().factory().created(), 2);
        exec.pool().close().await;
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let exec = pooled(FakeRouter::new());
        let ctx = Context::background();
        ctx.cancel();
        let err = exec.run(&ctx, "show environment").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(exec.pool().factory().created(), 0);
    }

    #[tokio::test]
    async fn test_batch_concatenates_and_aborts_on_failure() {
        let exec = pooled(
            FakeRouter::new()
                .with_response("show environment", "CPU: 3%")
                .with_response("ip route bad", "Error: Invalid parameter"),
        );
        let ctx = Context::background();

        let output = exec
            .run_batch(&ctx, &["show environment", "dhcp scope bind 1 192.168.100.2 ethernet 00:a0:de:00:00:01"])
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("CPU: 3%"));
        assert!(text.contains("dhcp scope bind 1"));

        let err = exec
            .run_batch(&ctx, &["ip route bad", "show status dhcp"])
            .await
            .unwrap_err();
        assert_eq!(err.device_kind(), Some(DeviceErrorKind::InvalidParameter));
        assert!(!exec.pool().factory().received().contains(&"show status dhcp".to_string()));
        exec.pool().close().await;
    }

    #[tokio::test]
    async fn test_set_administrator_password_updates_credentials() {
        let exec = pooled(FakeRouter::new());
        let ctx = Context::background();
        exec.set_administrator_password(&ctx, &secret(ADMIN_PASSWORD), &secret("n3w-admin"))
            .await
            .unwrap();
        let stored = exec.privileges.password().unwrap();
        assert_eq!(stored.expose_secret(), "n3w-admin");

        // The elevated session is reused; no new login is needed.
        exec.run(&ctx, "show environment").await.unwrap();
        assert_eq!(exec.pool().factory().created(), 1);
        exec.pool().close().await;
    }

    #[tokio::test]
    async fn test_set_administrator_password_rejected() {
        let exec = pooled(FakeRouter::new());
        let ctx = Context::background();
        let err = exec
            .set_administrator_password(&ctx, &secret("wrong"), &secret("n3w-admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::PasswordChangeRejected { .. })));
        assert_eq!(exec.privileges.password().unwrap().expose_secret(), ADMIN_PASSWORD);
        exec.pool().close().await;
    }

    #[tokio::test]
    async fn test_set_login_password() {
        let exec = pooled(FakeRouter::new());
        exec.set_login_password(&Context::background(), &secret("l0gin"))
            .await
            .unwrap();
        let received = exec.pool().factory().received();
        assert!(received.contains(&"login password".to_string()));
        exec.pool().close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_simple_executor_opens_session_per_call() {
        let exec = SimpleExecutor::new(FakeRouterFactory::new(FakeRouter::new()))
            .with_administrator_password(secret(ADMIN_PASSWORD));
        let ctx = Context::background();

        exec.run(&ctx, "show environment").await.unwrap();
        exec.run(&ctx, "ip route default gateway pp 1").await.unwrap();

        let factory = exec.factory();
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.closed(), 2);
        let received = factory.received();
        // Each session leaves administrator mode and then the shell.
        assert_eq!(received.iter().filter(|l| *l == "exit").count(), 4);
        assert!(received.contains(&"Y".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simple_executor_host_key() {
        let exec = SimpleExecutor::new(FakeRouterFactory::new(FakeRouter::new()))
            .with_administrator_password(secret(ADMIN_PASSWORD));
        let output = exec.generate_sshd_host_key(&Context::background()).await.unwrap();
        assert!(output.contains("Generating host key"));
    }
}
