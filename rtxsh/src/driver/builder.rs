//! Builder for creating router clients.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::executor::{Elevation, PooledExecutor, SimpleExecutor};
use crate::client::RtxClient;
use crate::error::{ConfigError, Result};
use crate::platform::{CommandTimeouts, DeviceProfile};
use crate::pool::{Pool, PoolConfig, SessionFactory};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::transport::config::{AuthMethod, HostKeyVerification, SshConfig};

/// Builder for constructing an [`RtxClient`].
///
/// # Example
///
/// ```rust,no_run
/// use rtxsh::{ClientBuilder, Context};
///
/// # async fn example() -> Result<(), rtxsh::Error> {
/// let client = ClientBuilder::new("192.168.100.1")
///     .username("admin")
///     .password("login-secret")
///     .administrator_password("admin-secret")
///     .build()?;
///
/// let status = client.run(&Context::background(), "show status dhcp").await?;
/// println!("{}", status.cleaned());
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    auth: Option<AuthMethod>,
    administrator_password: Option<SecretString>,
    elevation: Elevation,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    connect_timeout: Duration,
    profile: DeviceProfile,
    pool: PoolConfig,
    retry: Arc<dyn RetryStrategy>,
}

impl ClientBuilder {
    /// Create a new builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            auth: None,
            administrator_password: None,
            elevation: Elevation::default(),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(30),
            profile: DeviceProfile::default(),
            pool: PoolConfig::default(),
            retry: Arc::new(ExponentialBackoff::default()),
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = Some(AuthMethod::Password(SecretString::from(password.into())));
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.auth = Some(AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: None,
        });
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(mut self, key_path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        self.auth = Some(AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: Some(SecretString::from(passphrase.into())),
        });
        self
    }

    /// Password for `administrator`. Without it, commands run at the
    /// login level.
    pub fn administrator_password(mut self, password: impl Into<String>) -> Self {
        self.administrator_password = Some(SecretString::from(password.into()));
        self
    }

    /// When to enter administrator mode (default: before every command).
    pub fn elevation(mut self, elevation: Elevation) -> Self {
        self.elevation = elevation;
        self
    }

    /// Set the host key verification mode (default: accept new keys).
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Accept only this host key (`alg base64` or bare base64).
    pub fn host_key(self, key: impl Into<String>) -> Self {
        self.host_key_verification(HostKeyVerification::Fixed(key.into()))
    }

    /// Use this known_hosts file instead of `~/.ssh/known_hosts`.
    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use a custom device profile instead of the built-in RTX one.
    pub fn profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Override the per-command read timeouts.
    pub fn timeouts(mut self, timeouts: CommandTimeouts) -> Self {
        self.profile.timeouts = timeouts;
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Retry strategy for transport failures.
    pub fn retry(mut self, strategy: impl RetryStrategy + 'static) -> Self {
        self.retry = Arc::new(strategy);
        self
    }

    fn factory(&mut self) -> Result<SessionFactory> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("host").into());
        }
        let username = self.username.take().ok_or(ConfigError::Missing("username"))?;
        let auth = self.auth.take().ok_or(ConfigError::Missing("password or private key"))?;
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "connect timeout must be positive".to_string(),
            }
            .into());
        }
        // Surface a bad custom prompt pattern now rather than on first connect.
        self.profile.detector()?;

        let mut ssh = SshConfig::new(self.host.clone(), username, auth);
        ssh.port = self.port;
        ssh.timeout = self.connect_timeout;
        ssh.host_key_verification = self.host_key_verification.clone();
        ssh.known_hosts_path = self.known_hosts_path.clone();

        Ok(SessionFactory::new(ssh, Arc::new(self.profile.clone())))
    }

    /// Build a client backed by a session pool.
    ///
    /// Nothing is dialed until the first command. Must be called from
    /// within a Tokio runtime when the idle sweep is enabled.
    pub fn build(mut self) -> Result<RtxClient> {
        let factory = self.factory()?;
        let pool = Pool::new(factory, self.pool)?;
        let mut executor = PooledExecutor::new(pool)
            .with_retry(self.retry)
            .with_elevation(self.elevation);
        if let Some(password) = self.administrator_password {
            executor = executor.with_administrator_password(password);
        }
        Ok(RtxClient::new(executor))
    }

    /// Build a client that opens a new SSH session for every call.
    pub fn build_simple(mut self) -> Result<RtxClient<SimpleExecutor<SessionFactory>>> {
        let factory = self.factory()?;
        let mut executor = SimpleExecutor::new(factory)
            .with_retry(self.retry)
            .with_elevation(self.elevation);
        if let Some(password) = self.administrator_password {
            executor = executor.with_administrator_password(password);
        }
        Ok(RtxClient::new(executor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_missing_username() {
        let err = ClientBuilder::new("192.168.100.1")
            .password("pw")
            .build_simple()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Missing("username"))));
    }

    #[test]
    fn test_missing_host() {
        let err = ClientBuilder::new(" ")
            .username("admin")
            .password("pw")
            .build_simple()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Missing("host"))));
    }

    #[test]
    fn test_missing_credentials() {
        let err = ClientBuilder::new("192.168.100.1")
            .username("admin")
            .build_simple()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Missing(_))));
    }

    #[test]
    fn test_invalid_prompt_pattern() {
        let err = ClientBuilder::new("192.168.100.1")
            .username("admin")
            .password("pw")
            .profile(DeviceProfile::default().with_prompt_pattern("(["))
            .build_simple()
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_invalid_pool_config() {
        let err = ClientBuilder::new("192.168.100.1")
            .username("admin")
            .password("pw")
            .pool_config(PoolConfig {
                max_sessions: 0,
                ..PoolConfig::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_build_pooled() {
        let client = ClientBuilder::new("192.168.100.1")
            .port(2222)
            .username("admin")
            .private_key("/home/admin/.ssh/id_ed25519")
            .administrator_password("admin-secret")
            .host_key("AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti")
            .connect_timeout(Duration::from_secs(5))
            .pool_config(PoolConfig {
                max_sessions: 3,
                ..PoolConfig::default()
            })
            .build()
            .unwrap();

        let factory = client.executor().pool().factory();
        assert_eq!(factory.ssh_config().socket_addr(), "192.168.100.1:2222");
        assert_eq!(factory.ssh_config().timeout, Duration::from_secs(5));
        assert!(matches!(
            factory.ssh_config().host_key_verification,
            HostKeyVerification::Fixed(_)
        ));
        assert_eq!(factory.profile().name, "yamaha_rtx");
        assert_eq!(client.stats().max_sessions, 3);
        assert_eq!(client.stats().total_created, 0);
        client.close().await;
    }
}
