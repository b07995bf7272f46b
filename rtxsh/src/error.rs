//! Error types for rtxsh.
//!
//! Errors are tagged once, at the boundary where they are observed:
//! transport failures when bytes cannot move, protocol failures when the
//! device stops answering with a recognizable prompt, authentication
//! failures during privilege escalation, and device errors when the
//! router itself reports that a command failed.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for rtxsh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session lost synchronization with the device
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Privilege escalation or password change was rejected
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The device reported a command failure in its output
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Session pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the operation finished
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Whether this is a transport-level failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Whether the executor may retry the operation on a fresh attempt.
    ///
    /// Only transport failures qualify. Transient device errors are
    /// retried by collaborators through [`crate::retry::retry_transient`].
    pub fn is_retryable(&self) -> bool {
        self.is_transport()
    }

    /// Whether the device reported a transient condition (busy, conflict, timeout).
    pub fn is_transient_device(&self) -> bool {
        matches!(self, Error::Device(e) if e.kind.is_transient())
    }

    /// Whether a session that produced this error must be discarded.
    ///
    /// After a transport failure, a lost prompt or a cancelled wait the
    /// outcome of the last command is unknown and the byte stream may
    /// still carry its output.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Protocol(_) | Error::Cancelled | Error::DeadlineExceeded
        )
    }

    /// The device error kind, if this is a device-reported failure.
    pub fn device_kind(&self) -> Option<DeviceErrorKind> {
        match self {
            Error::Device(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Transport layer errors (SSH connection, authentication, byte stream).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Server key does not match the configured fixed host key
    #[error("Host key mismatch for {host}:{port}")]
    HostKeyMismatch { host: String, port: u16 },

    /// Host is not present in known_hosts and strict checking is enabled
    #[error("Host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// The remote side closed the shell stream
    #[error("Connection disconnected")]
    Disconnected,

    /// The session was already closed locally
    #[error("Session is closed")]
    Closed,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error on the shell stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Protocol errors: the session no longer agrees with the device on where
/// one response ends and the next begins.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No recognizable prompt arrived within the timeout
    #[error("No prompt found within {timeout:?}")]
    PromptTimeout { timeout: Duration, output: String },

    /// An expected substring or confirmation did not arrive in time
    #[error("'{expected}' not found within {timeout:?}")]
    PatternTimeout {
        expected: String,
        timeout: Duration,
        output: String,
    },

    /// Polling never observed the expected state
    #[error("State did not converge after {attempts} attempts")]
    NotConverged { attempts: u32 },

    /// Invalid prompt pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl ProtocolError {
    /// Output received before the failure, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ProtocolError::PromptTimeout { output, .. }
            | ProtocolError::PatternTimeout { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Privilege escalation and password change failures. Never retried.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The device rejected the administrator password
    #[error("Administrator authentication failed: {output}")]
    AdministratorRejected { output: String },

    /// Password was accepted but the administrator prompt never appeared
    #[error("Administrator authentication failed: no administrator prompt in {output:?}")]
    AdministratorPromptMissing { output: String },

    /// An administrator password is required but none is configured
    #[error("No administrator password configured")]
    NoAdministratorPassword,

    /// The device rejected a password change
    #[error("{target} password change failed: {output}")]
    PasswordChangeRejected { target: String, output: String },
}

/// Error kinds reported by the device in command output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorKind {
    /// The object being created already exists
    AlreadyExists,
    /// The object being referenced does not exist
    NotFound,
    /// The command needs privileges the session does not hold
    PermissionDenied,
    /// A parameter was rejected
    InvalidParameter,
    /// The device is busy with another operation
    Busy,
    /// The change conflicts with a concurrent change
    Conflict,
    /// The device timed out internally
    Timeout,
    /// Any other reported failure
    CommandFailed,
}

impl DeviceErrorKind {
    /// Whether a later attempt of the same command may succeed.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            DeviceErrorKind::Busy | DeviceErrorKind::Conflict | DeviceErrorKind::Timeout
        )
    }
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceErrorKind::AlreadyExists => "already exists",
            DeviceErrorKind::NotFound => "not found",
            DeviceErrorKind::PermissionDenied => "permission denied",
            DeviceErrorKind::InvalidParameter => "invalid parameter",
            DeviceErrorKind::Busy => "busy",
            DeviceErrorKind::Conflict => "conflict",
            DeviceErrorKind::Timeout => "timeout",
            DeviceErrorKind::CommandFailed => "command failed",
        };
        f.write_str(s)
    }
}

/// A failure reported by the device for a specific command.
#[derive(Error, Debug, Clone)]
#[error("{kind} in response to '{command}': {message}")]
pub struct DeviceError {
    /// Classified failure kind.
    pub kind: DeviceErrorKind,
    /// The command that produced the failure (redacted if sensitive).
    pub command: String,
    /// The offending output line.
    pub message: String,
    /// Full raw output, including the trailing prompt.
    pub output: String,
}

/// Session pool errors.
#[derive(Error, Debug)]
pub enum PoolError {
    /// No session became available before the acquisition deadline
    #[error("Timed out after {waited:?} waiting for an available session")]
    Exhausted { waited: Duration },

    /// The pool has been closed
    #[error("Session pool is closed")]
    Closed,
}

/// Client configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required builder field was not provided
    #[error("{0} is required")]
    Missing(&'static str),

    /// A field value is out of range or malformed
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type alias using rtxsh's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn device(kind: DeviceErrorKind) -> Error {
        DeviceError {
            kind,
            command: "ip route 10.0.0.0/8 gateway 192.168.0.1".into(),
            message: "Error: busy".into(),
            output: String::new(),
        }
        .into()
    }

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(Error::from(TransportError::Disconnected).is_retryable());
        assert!(!Error::from(ProtocolError::PromptTimeout {
            timeout: Duration::from_secs(15),
            output: String::new(),
        })
        .is_retryable());
        assert!(!Error::from(AuthError::NoAdministratorPassword).is_retryable());
        assert!(!device(DeviceErrorKind::Busy).is_retryable());
        assert!(!Error::from(PoolError::Closed).is_retryable());
    }

    #[test]
    fn test_transient_device_errors() {
        assert!(device(DeviceErrorKind::Busy).is_transient_device());
        assert!(device(DeviceErrorKind::Conflict).is_transient_device());
        assert!(!device(DeviceErrorKind::NotFound).is_transient_device());
        assert!(!Error::from(TransportError::Disconnected).is_transient_device());
    }

    #[test]
    fn test_poisoning_errors() {
        assert!(Error::from(TransportError::Closed).poisons_session());
        assert!(
            Error::from(ProtocolError::PromptTimeout {
                timeout: Duration::from_secs(1),
                output: String::new(),
            })
            .poisons_session()
        );
        assert!(Error::Cancelled.poisons_session());
        assert!(!device(DeviceErrorKind::AlreadyExists).poisons_session());
        assert!(
            !Error::from(AuthError::AdministratorRejected { output: String::new() })
                .poisons_session()
        );
    }

    #[test]
    fn test_pool_errors_are_distinct() {
        let exhausted = Error::from(PoolError::Exhausted {
            waited: Duration::from_secs(30),
        });
        let closed = Error::from(PoolError::Closed);
        assert!(matches!(exhausted, Error::Pool(PoolError::Exhausted { .. })));
        assert!(matches!(closed, Error::Pool(PoolError::Closed)));
        assert_ne!(exhausted.to_string(), closed.to_string());
    }
}
