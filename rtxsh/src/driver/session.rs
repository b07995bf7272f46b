//! Interactive session over one PTY shell.
//!
//! A [`Session`] exists once the shell is open and walks through
//! `AwaitingInitialPrompt -> Ready(mode) -> Closing -> Closed`. A transport
//! failure, a lost prompt or a cancelled wait moves it straight to
//! `Closed`, and [`Session::close`] then skips the exit dialogue.
//! Commands take `&mut self`, so exactly one command can be in flight on
//! a session at a time; whoever holds the session owns its privilege
//! mode as well.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncWrite};

use super::response::CommandResult;
use crate::channel::{PtyConfig, ReadResult, ShellChannel, WaitFor};
use crate::context::Context;
use crate::error::{Error, Result, TransportError};
use crate::output::classify;
use crate::platform::{DeviceProfile, PrivilegeMode};
use crate::redact::redact_command;
use crate::transport::{SshConfig, SshTransport};

/// Pause after leaving administrator mode, before the final `exit`.
const EXIT_SETTLE: Duration = Duration::from_millis(500);

/// Pause after the final `exit`, before the transport is torn down.
const CLOSE_SETTLE: Duration = Duration::from_millis(300);

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInitialPrompt,
    Ready(PrivilegeMode),
    Closing,
    Closed,
}

/// One interactive CLI session.
pub struct Session {
    channel: ShellChannel,
    transport: Option<SshTransport>,
    profile: Arc<DeviceProfile>,
    state: SessionState,
    prompt: Option<String>,
}

impl Session {
    /// Dial the device, start a PTY shell and wait for the first prompt.
    pub async fn connect(ctx: &Context, config: SshConfig, profile: Arc<DeviceProfile>) -> Result<Self> {
        debug!("Connecting session to {}", config.socket_addr());
        let transport = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            t = SshTransport::connect(config) => t?,
        };
        let stream = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            s = transport.open_shell() => s?,
        };
        let (reader, writer) = tokio::io::split(stream);
        Self::start(ctx, reader, writer, Some(transport), profile).await
    }

    /// Start a session on an already established shell byte stream.
    pub async fn from_io<R, W>(
        ctx: &Context,
        reader: R,
        writer: W,
        profile: Arc<DeviceProfile>,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(ctx, reader, writer, None, profile).await
    }

    async fn start<R, W>(
        ctx: &Context,
        reader: R,
        writer: W,
        transport: Option<SshTransport>,
        profile: Arc<DeviceProfile>,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let channel = ShellChannel::new(reader, writer, profile.detector()?, PtyConfig::default());
        let mut session = Self {
            channel,
            transport,
            profile,
            state: SessionState::AwaitingInitialPrompt,
            prompt: None,
        };

        let initial_timeout = session.profile.timeouts.initial_prompt;
        let banner = session.expect(ctx, WaitFor::Prompt, initial_timeout).await?;
        let prompt = banner.prompt().unwrap_or_default().to_string();
        let mode = session.profile.mode_of(&prompt);
        debug!("Initial prompt {:?} ({} mode)", prompt, mode);
        session.prompt = Some(prompt);
        session.state = SessionState::Ready(mode);

        let setup = session.profile.on_open_commands.clone();
        for command in &setup {
            match session.send(ctx, command).await {
                Ok(result) => {
                    if let Some((kind, line)) = classify(&result.cleaned(), &session.profile.error_markers) {
                        warn!("Setup command '{}' rejected ({}): {}", command, kind, line);
                    }
                }
                Err(e) if e.poisons_session() => {
                    warn!("Setup command '{}' failed, abandoning session: {}", command, e);
                    session.close().await;
                    return Err(e);
                }
                Err(e) => warn!("Setup command '{}' failed: {}", command, e),
            }
        }

        info!("Session ready");
        Ok(session)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready(_) | SessionState::AwaitingInitialPrompt => Ok(()),
            _ => Err(TransportError::Closed.into()),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        if err.poisons_session() {
            debug!("Session unusable after: {}", err);
            self.state = SessionState::Closed;
        }
        err
    }

    /// Send a command and read until the prompt returns.
    ///
    /// The read timeout depends on the command (see
    /// [`crate::platform::CommandTimeouts`]). The result keeps the echo
    /// and the trailing prompt; use [`CommandResult::cleaned`] to drop them.
    pub async fn send(&mut self, ctx: &Context, command: &str) -> Result<CommandResult> {
        let timeout = self.profile.timeouts.timeout_for(command);
        self.send_with_timeout(ctx, command, timeout).await
    }

    /// Like [`Session::send`] with an explicit read timeout.
    pub async fn send_with_timeout(
        &mut self,
        ctx: &Context,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        self.ensure_ready()?;
        debug!("Sending command: {}", redact_command(command));
        let start = Instant::now();

        self.write_line(command).await?;
        let read = self.expect(ctx, WaitFor::Prompt, timeout).await?;

        let elapsed = start.elapsed();
        trace!("Command completed in {:?}, {} bytes", elapsed, read.data.len());
        Ok(CommandResult {
            command: command.to_string(),
            prompt: read.prompt().map(str::to_string),
            raw: read.data,
            elapsed,
        })
    }

    /// Write a line without reading anything back.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.ensure_ready()?;
        match self.channel.write_line(line).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Write raw bytes without a line terminator.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        match self.channel.write(data).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Write a secret followed by the line terminator. Never logged.
    pub async fn send_secret(&mut self, secret: &SecretString) -> Result<()> {
        trace!("Sending <hidden>");
        self.write_line(secret.expose_secret()).await
    }

    /// Read until `wait` is satisfied. A prompt match updates the
    /// session's privilege mode.
    pub async fn expect(
        &mut self,
        ctx: &Context,
        wait: WaitFor<'_>,
        timeout: Duration,
    ) -> Result<ReadResult> {
        self.ensure_ready()?;
        let read = match self.channel.read_until(ctx, wait, timeout).await {
            Ok(read) => read,
            Err(e) => return Err(self.fail(e)),
        };
        if let Some(prompt) = read.prompt() {
            trace!("Prompt detected: {:?}", prompt);
            let mode = self.profile.mode_of(prompt);
            if let SessionState::Ready(_) = self.state {
                self.state = SessionState::Ready(mode);
            }
            self.prompt = Some(prompt.to_string());
        }
        Ok(read)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current privilege mode (`Normal` unless the session is ready and elevated).
    pub fn mode(&self) -> PrivilegeMode {
        match self.state {
            SessionState::Ready(mode) => mode,
            _ => PrivilegeMode::Normal,
        }
    }

    pub fn is_administrator(&self) -> bool {
        self.mode() == PrivilegeMode::Administrator
    }

    /// Override the tracked privilege mode.
    pub fn set_administrator_mode(&mut self, administrator: bool) {
        if let SessionState::Ready(_) = self.state {
            self.state = SessionState::Ready(if administrator {
                PrivilegeMode::Administrator
            } else {
                PrivilegeMode::Normal
            });
        }
    }

    /// The last prompt seen.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn profile(&self) -> &Arc<DeviceProfile> {
        &self.profile
    }

    /// Whether the session can still run commands.
    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Ready(_)) && !self.channel.is_eof()
    }

    /// Leave the shell and tear down the connection.
    ///
    /// In administrator mode this first leaves administrator mode,
    /// answering a save confirmation if one appears, and then exits the
    /// shell: two exit commands in total. In normal mode a single exit
    /// is sent. A session that already failed is torn down without
    /// writing anything. Failures are logged; closing always completes.
    pub async fn close(&mut self) {
        let ctx = Context::background();

        if let SessionState::Ready(mode) = self.state {
            if mode == PrivilegeMode::Administrator {
                debug!("Session is in administrator mode, sending two exit commands");
                if let Err(e) = self.exit_administrator_mode(&ctx).await {
                    warn!("Failed to leave administrator mode cleanly: {}", e);
                }
                tokio::time::sleep(EXIT_SETTLE).await;
            } else {
                debug!("Session is in normal mode, sending one exit command");
            }

            self.state = SessionState::Closing;
            let exit = self.profile.normal.deescalate_command.clone();
            if let Err(e) = self.channel.write_line(&exit).await {
                debug!("Failed to send final exit: {}", e);
            }
            tokio::time::sleep(CLOSE_SETTLE).await;
        }

        self.state = SessionState::Closed;
        self.channel.shutdown().await;
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("Disconnect from {}: {}", transport.addr(), e);
            }
        }
        debug!("Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if matches!(self.state, SessionState::Ready(_)) {
            warn!("Session dropped without close(); the device may keep the login open until it times out");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("prompt", &self.prompt)
            .field("profile", &self.profile.name)
            .finish()
    }
}
