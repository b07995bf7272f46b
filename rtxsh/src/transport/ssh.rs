//! SSH transport for the RTX console.
//!
//! RTX routers offer one interactive shell per login and no exec
//! channel, so the transport dials, authenticates and hands back the raw
//! byte stream of a PTY shell. Everything above the stream lives in
//! [`crate::channel`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use russh::Pty;
use russh::client::{self, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncWrite};

use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use crate::error::{Result, TransportError};

/// Terminal modes sent with the PTY request. The console echoes input
/// and reads `\r` as end of line, so CR is passed through untranslated.
const PTY_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::ICRNL, 0),
    (Pty::TTY_OP_ISPEED, 38400),
    (Pty::TTY_OP_OSPEED, 38400),
];

/// An authenticated SSH connection to one router.
pub struct SshTransport {
    session: Handle<RouterHostKeys>,
    config: SshConfig,
}

impl SshTransport {
    /// Dial, verify the host key and log in. Both the handshake and the
    /// login are bounded by `config.timeout`.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        // The router drops idle logins itself; russh must not race it.
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        if matches!(config.host_key_verification, HostKeyVerification::Disabled) {
            warn!(
                "Host key verification disabled for {}; the connection is open to interception",
                config.socket_addr()
            );
        }

        let handler = RouterHostKeys::new(&config);
        let rejection = handler.rejection.clone();

        debug!("Dialing {}", config.socket_addr());
        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            let rejected = rejection.lock().unwrap_or_else(PoisonError::into_inner).take();
            match (rejected, e) {
                (Some(reason), _) => reason,
                (None, russh::Error::IO(io)) => TransportError::ConnectionFailed {
                    host: config.host.clone(),
                    port: config.port,
                    source: io,
                },
                (None, e) => TransportError::Ssh(e),
            }
        })?;

        tokio::time::timeout(config.timeout, login(&mut session, &config))
            .await
            .map_err(|_| TransportError::Timeout(config.timeout))??;

        info!("Logged in to {} as {}", config.socket_addr(), config.username);
        Ok(Self { session, config })
    }

    /// Open the console: one session channel with a PTY and a shell.
    pub async fn open_shell(&self) -> Result<impl AsyncRead + AsyncWrite + Send + Unpin + 'static> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        let c = &self.config;
        debug!(
            "Requesting {} PTY {}x{} on {}",
            c.terminal_type,
            c.terminal_width,
            c.terminal_height,
            c.socket_addr()
        );
        channel
            .request_pty(true, &c.terminal_type, c.terminal_width, c.terminal_height, 0, 0, PTY_MODES)
            .await
            .map_err(TransportError::Ssh)?;
        channel.request_shell(true).await.map_err(TransportError::Ssh)?;

        Ok(channel.into_stream())
    }

    /// Target address, for logging.
    pub fn addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Disconnect.
    pub async fn close(&self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

async fn login(session: &mut Handle<RouterHostKeys>, config: &SshConfig) -> Result<()> {
    let accepted = match &config.auth {
        AuthMethod::Password(password) => {
            debug!("Password login for {}", config.username);
            session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success()
        }
        AuthMethod::PrivateKey { path, passphrase } => {
            debug!("Public key login for {} with {}", config.username, path.display());
            let key = read_private_key(path, passphrase.as_ref().map(|p| p.expose_secret()))?;
            // Older RTX firmware only verifies ssh-rsa signatures with SHA-1;
            // let the server tell us what it accepts.
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .map_err(TransportError::Ssh)?
                .flatten();
            session
                .authenticate_publickey(&config.username, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await
                .map_err(TransportError::Ssh)?
                .success()
        }
    };

    if accepted {
        Ok(())
    } else {
        Err(TransportError::AuthenticationFailed {
            user: config.username.clone(),
        }
        .into())
    }
}

fn read_private_key(path: &std::path::Path, passphrase: Option<&str>) -> Result<PrivateKey> {
    load_secret_key(path, passphrase)
        .map_err(|e| TransportError::Key(format!("{}: {}", path.display(), e)).into())
}

/// A known_hosts file, defaulting to `~/.ssh/known_hosts`.
#[derive(Debug, Clone)]
struct KnownHosts {
    host: String,
    port: u16,
    path: Option<PathBuf>,
}

impl KnownHosts {
    /// `Ok(true)` when recorded, `Ok(false)` when the host is absent.
    fn contains(&self, key: &PublicKey) -> std::result::Result<bool, TransportError> {
        let found = match &self.path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        };
        found.map_err(|e| match e {
            russh::keys::Error::KeyChanged { line } => TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            },
            e => TransportError::KnownHosts(e.to_string()),
        })
    }

    fn record(&self, key: &PublicKey) -> std::result::Result<(), TransportError> {
        let recorded = match &self.path {
            Some(path) => russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, key),
        };
        recorded.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }
}

/// Decide whether `key` is acceptable under `policy`.
fn verify_host_key(
    policy: &HostKeyVerification,
    known_hosts: &KnownHosts,
    key: &PublicKey,
) -> std::result::Result<(), TransportError> {
    match policy {
        HostKeyVerification::Disabled => Ok(()),
        HostKeyVerification::Fixed(expected) if fixed_key_matches(expected, key) => Ok(()),
        HostKeyVerification::Fixed(_) => Err(TransportError::HostKeyMismatch {
            host: known_hosts.host.clone(),
            port: known_hosts.port,
        }),
        HostKeyVerification::Strict => match known_hosts.contains(key)? {
            true => Ok(()),
            false => Err(TransportError::HostKeyUnknown {
                host: known_hosts.host.clone(),
                port: known_hosts.port,
            }),
        },
        HostKeyVerification::AcceptNew => {
            if !known_hosts.contains(key)? {
                info!("Recording new host key for {}:{}", known_hosts.host, known_hosts.port);
                if let Err(e) = known_hosts.record(key) {
                    warn!("Failed to save host key: {}", e);
                }
            }
            Ok(())
        }
    }
}

/// Compare a server key against a configured `alg base64` or bare base64
/// key, the two forms `show sshd public key` output is usually pasted in.
fn fixed_key_matches(expected: &str, actual: &PublicKey) -> bool {
    let Ok(openssh) = actual.to_openssh() else {
        return false;
    };
    let actual_b64 = openssh.split_whitespace().nth(1).unwrap_or_default();
    let expected_b64 = match expected.split_whitespace().collect::<Vec<_>>()[..] {
        [b64] | [_, b64, ..] => b64,
        [] => return false,
    };
    !actual_b64.is_empty() && actual_b64 == expected_b64
}

/// russh handler that applies the configured host key policy and keeps
/// the reason for a rejection, which russh would otherwise reduce to
/// `UnknownKey`.
struct RouterHostKeys {
    policy: HostKeyVerification,
    known_hosts: KnownHosts,
    rejection: Arc<Mutex<Option<TransportError>>>,
}

impl RouterHostKeys {
    fn new(config: &SshConfig) -> Self {
        Self {
            policy: config.host_key_verification.clone(),
            known_hosts: KnownHosts {
                host: config.host.clone(),
                port: config.port,
                path: config.known_hosts_path.clone(),
            },
            rejection: Arc::new(Mutex::new(None)),
        }
    }
}

impl client::Handler for RouterHostKeys {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        match verify_host_key(&self.policy, &self.known_hosts, server_public_key) {
            Ok(()) => Ok(true),
            Err(reason) => {
                warn!("Rejecting host key: {}", reason);
                *self.rejection.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti";
    const OTHER: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIA6rWI3G1sz07DnfFlrouTcysQlj2P+jpNSOEWD9OJ3X";

    fn key() -> PublicKey {
        PublicKey::from_openssh(KEY).unwrap()
    }

    fn known_hosts() -> KnownHosts {
        KnownHosts {
            host: "192.168.100.1".to_string(),
            port: 22,
            path: None,
        }
    }

    #[test]
    fn test_fixed_key_with_algorithm() {
        assert!(fixed_key_matches(KEY, &key()));
    }

    #[test]
    fn test_fixed_key_bare_base64() {
        let b64 = KEY.split_whitespace().nth(1).unwrap();
        assert!(fixed_key_matches(b64, &key()));
    }

    #[test]
    fn test_fixed_key_with_comment() {
        assert!(fixed_key_matches(&format!("{} rtx1210", KEY), &key()));
    }

    #[test]
    fn test_fixed_key_mismatch() {
        assert!(!fixed_key_matches(OTHER, &key()));
        assert!(!fixed_key_matches("", &key()));
    }

    #[test]
    fn test_fixed_policy_rejects_other_key() {
        let policy = HostKeyVerification::Fixed(OTHER.to_string());
        let err = verify_host_key(&policy, &known_hosts(), &key()).unwrap_err();
        assert!(matches!(err, TransportError::HostKeyMismatch { port: 22, .. }));

        let policy = HostKeyVerification::Fixed(KEY.to_string());
        assert!(verify_host_key(&policy, &known_hosts(), &key()).is_ok());
    }

    #[test]
    fn test_disabled_policy_accepts_any_key() {
        assert!(verify_host_key(&HostKeyVerification::Disabled, &known_hosts(), &key()).is_ok());
    }

    #[test]
    fn test_pty_passes_carriage_return_through() {
        assert!(PTY_MODES.contains(&(Pty::ICRNL, 0)));
        assert!(PTY_MODES.contains(&(Pty::ECHO, 1)));
    }
}
