//! Per-device client.

use secrecy::SecretString;

use crate::context::Context;
use crate::driver::{CommandResult, Executor, PooledExecutor, Session};
use crate::error::Result;
use crate::pool::{PoolStats, ResourceFactory, SessionFactory};

/// Entry point for one router: an [`Executor`] plus a few device-level
/// conveniences.
///
/// Built with [`crate::ClientBuilder`]. The default executor keeps a pool
/// of SSH sessions; [`crate::ClientBuilder::build_simple`] gives a client
/// that logs in for every call instead.
#[derive(Debug)]
pub struct RtxClient<E: Executor = PooledExecutor<SessionFactory>> {
    executor: E,
}

impl<E: Executor> RtxClient<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run one command. See [`Executor::run`].
    pub async fn run(&self, ctx: &Context, command: &str) -> Result<CommandResult> {
        self.executor.run(ctx, command).await
    }

    /// Run several commands on one session. See [`Executor::run_batch`].
    pub async fn run_batch(&self, ctx: &Context, commands: &[&str]) -> Result<Vec<u8>> {
        self.executor.run_batch(ctx, commands).await
    }

    pub async fn set_administrator_password(&self, ctx: &Context, old: &SecretString, new: &SecretString) -> Result<()> {
        self.executor.set_administrator_password(ctx, old, new).await
    }

    pub async fn set_login_password(&self, ctx: &Context, new: &SecretString) -> Result<()> {
        self.executor.set_login_password(ctx, new).await
    }

    pub async fn generate_sshd_host_key(&self, ctx: &Context) -> Result<String> {
        self.executor.generate_sshd_host_key(ctx).await
    }

    /// Write the running configuration to flash (`save`).
    pub async fn save_config(&self, ctx: &Context) -> Result<()> {
        self.executor.run(ctx, "save").await?;
        Ok(())
    }
}

impl<F: ResourceFactory<Resource = Session>> RtxClient<PooledExecutor<F>> {
    pub fn stats(&self) -> PoolStats {
        self.executor.pool().stats()
    }

    pub fn log_stats(&self) {
        self.executor.pool().log_stats();
    }

    /// Close all pooled sessions. Commands issued afterwards fail with
    /// [`crate::error::PoolError::Closed`].
    pub async fn close(&self) {
        self.executor.pool().close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimpleExecutor;
    use crate::error::{Error, PoolError};
    use crate::pool::{Pool, PoolConfig};
    use crate::testing::{ADMIN_PASSWORD, FakeRouter, FakeRouterFactory};

    fn client(router: FakeRouter) -> RtxClient<PooledExecutor<FakeRouterFactory>> {
        let pool = Pool::new(
            FakeRouterFactory::new(router),
            PoolConfig {
                idle_sweep: false,
                ..PoolConfig::default()
            },
        )
        .unwrap();
        RtxClient::new(
            PooledExecutor::new(pool).with_administrator_password(SecretString::from(ADMIN_PASSWORD.to_string())),
        )
    }

    #[tokio::test]
    async fn test_run_and_stats() {
        let client = client(FakeRouter::new().with_response("show environment", "CPU: 3%"));
        let ctx = Context::background();
        let result = client.run(&ctx, "show environment").await.unwrap();
        assert_eq!(result.to_string(), "CPU: 3%");

        let stats = client.stats();
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.total_acquisitions, 1);
        client.log_stats();
        client.close().await;
    }

    #[tokio::test]
    async fn test_save_config() {
        let client = client(FakeRouter::new());
        let ctx = Context::background();
        client.run(&ctx, "ip route default gateway pp 1").await.unwrap();
        client.save_config(&ctx).await.unwrap();
        assert!(client.executor().pool().factory().received().contains(&"save".to_string()));
        client.close().await;
    }

    #[tokio::test]
    async fn test_closed_client_rejects_commands() {
        let client = client(FakeRouter::new());
        client.close().await;
        let err = client.run(&Context::background(), "show environment").await.unwrap_err();
        assert!(matches!(err, Error::Pool(PoolError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simple_client() {
        let client = RtxClient::new(SimpleExecutor::new(FakeRouterFactory::new(FakeRouter::new())));
        let output = client
            .run_batch(&Context::background(), &["show environment", "show status dhcp"])
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&output).contains("show status dhcp"));
        assert_eq!(client.executor().factory().created(), 1);
    }
}
