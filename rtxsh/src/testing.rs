//! Scripted router used by the unit tests.
//!
//! [`FakeRouter`] speaks just enough of the RTX CLI over an in-memory
//! duplex stream: login and administrator prompts, administrator
//! elevation, save confirmation on exit, password changes and host key
//! generation. Every line it receives is recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

use crate::context::Context;
use crate::driver::Session;
use crate::error::{Result, TransportError};
use crate::platform::{DeviceProfile, vendors};
use crate::pool::ResourceFactory;

pub(crate) const ADMIN_PASSWORD: &str = "admin-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Command,
    AdministratorPassword,
    OldPassword,
    NewPassword { administrator: bool, first: bool },
    SaveAnswer,
    HostKeyAnswer,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeRouter {
    hostname: String,
    banner: String,
    admin_password: String,
    responses: HashMap<String, String>,
    host_key_exists: bool,
}

/// Shared view of what a running [`FakeRouter`] has seen.
#[derive(Debug, Clone, Default)]
pub(crate) struct RouterLog {
    received: Arc<Mutex<Vec<String>>>,
}

impl RouterLog {
    pub(crate) fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, line: &str) -> usize {
        self.received.lock().unwrap().iter().filter(|l| *l == line).count()
    }

    fn push(&self, line: &str) {
        self.received.lock().unwrap().push(line.to_string());
    }
}

struct State {
    administrator: bool,
    dirty: bool,
    awaiting: Awaiting,
    new_password: Option<String>,
}

enum Reply {
    Send(String),
    Close(String),
}

impl FakeRouter {
    pub(crate) fn new() -> Self {
        Self {
            hostname: "RTX1210".to_string(),
            banner: "\r\nRTX1210 Rev.14.01.42 (Tue Jan 10 12:00:00 2023)\r\n".to_string(),
            admin_password: ADMIN_PASSWORD.to_string(),
            responses: HashMap::new(),
            host_key_exists: true,
        }
    }

    pub(crate) fn with_response(mut self, command: &str, output: &str) -> Self {
        self.responses.insert(command.to_string(), output.to_string());
        self
    }

    pub(crate) fn without_host_key(mut self) -> Self {
        self.host_key_exists = false;
        self
    }

    /// Start serving on one end of a duplex stream; returns the other end.
    pub(crate) fn spawn(self) -> (DuplexStream, RouterLog) {
        let (local, remote) = duplex(64 * 1024);
        let log = RouterLog::default();
        tokio::spawn(self.serve(remote, log.clone()));
        (local, log)
    }

    fn prompt(&self, state: &State) -> String {
        let terminator = if state.administrator { '#' } else { '>' };
        format!("[{}] {} ", self.hostname, terminator)
    }

    async fn serve(mut self, stream: DuplexStream, log: RouterLog) {
        let (mut rd, mut wr) = tokio::io::split(stream);
        let mut state = State {
            administrator: false,
            dirty: false,
            awaiting: Awaiting::Command,
            new_password: None,
        };
        let greeting = format!("{}{}", self.banner, self.prompt(&state));
        if wr.write_all(greeting.as_bytes()).await.is_err() {
            return;
        }

        let mut line = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = match rd.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for &byte in &buf[..n] {
                match byte {
                    b'\n' => continue,
                    b'\r' => {}
                    _ => {
                        line.push(byte);
                        continue;
                    }
                }
                let text = String::from_utf8_lossy(&line).into_owned();
                line.clear();
                log.push(&text);

                match self.handle(&mut state, &text) {
                    Reply::Send(out) => {
                        if wr.write_all(out.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Reply::Close(out) => {
                        let _ = wr.write_all(out.as_bytes()).await;
                        let _ = wr.shutdown().await;
                        return;
                    }
                }
            }
        }
    }

    fn handle(&mut self, state: &mut State, text: &str) -> Reply {
        match state.awaiting {
            Awaiting::AdministratorPassword => {
                state.awaiting = Awaiting::Command;
                if text == self.admin_password {
                    state.administrator = true;
                    Reply::Send(format!("\r\n{}", self.prompt(state)))
                } else {
                    Reply::Send(format!("\r\nPassword incorrect\r\n{}", self.prompt(state)))
                }
            }
            Awaiting::OldPassword => {
                if text == self.admin_password {
                    state.awaiting = Awaiting::NewPassword {
                        administrator: true,
                        first: true,
                    };
                    Reply::Send("\r\nNew_Password: ".to_string())
                } else {
                    state.awaiting = Awaiting::Command;
                    Reply::Send(format!("\r\nPassword incorrect\r\n{}", self.prompt(state)))
                }
            }
            Awaiting::NewPassword { administrator, first: true } => {
                state.new_password = Some(text.to_string());
                state.awaiting = Awaiting::NewPassword {
                    administrator,
                    first: false,
                };
                Reply::Send("\r\nNew_Password: ".to_string())
            }
            Awaiting::NewPassword { administrator, first: false } => {
                state.awaiting = Awaiting::Command;
                if state.new_password.take().as_deref() != Some(text) {
                    return Reply::Send(format!("\r\nPassword change failed\r\n{}", self.prompt(state)));
                }
                if administrator {
                    self.admin_password = text.to_string();
                }
                Reply::Send(format!("\r\n{}", self.prompt(state)))
            }
            Awaiting::SaveAnswer => {
                state.awaiting = Awaiting::Command;
                state.administrator = false;
                state.dirty = false;
                Reply::Send(format!("{}\r\n{}", text, self.prompt(state)))
            }
            Awaiting::HostKeyAnswer => {
                state.awaiting = Awaiting::Command;
                let out = if text.eq_ignore_ascii_case("y") {
                    "Generating host key...\r\n"
                } else {
                    ""
                };
                Reply::Send(format!("{}\r\n{}{}", text, out, self.prompt(state)))
            }
            Awaiting::Command => self.command(state, text),
        }
    }

    fn command(&mut self, state: &mut State, text: &str) -> Reply {
        match text {
            "administrator" => {
                state.awaiting = Awaiting::AdministratorPassword;
                Reply::Send("administrator\r\nPassword: ".to_string())
            }
            "exit" if state.administrator && state.dirty => {
                state.awaiting = Awaiting::SaveAnswer;
                Reply::Send("exit\r\nSave new configuration ? (Y/N)".to_string())
            }
            "exit" if state.administrator => {
                state.administrator = false;
                Reply::Send(format!("exit\r\n{}", self.prompt(state)))
            }
            "exit" | "drop" => Reply::Close(format!("{}\r\n", text)),
            "save" if state.administrator => {
                state.dirty = false;
                Reply::Send(format!("save\r\nSaving ... Done\r\n{}", self.prompt(state)))
            }
            "hang" => Reply::Send("hang\r\n".to_string()),
            "administrator password" if state.administrator => {
                state.awaiting = Awaiting::OldPassword;
                Reply::Send("administrator password\r\nOld_Password: ".to_string())
            }
            "login password" if state.administrator => {
                state.awaiting = Awaiting::NewPassword {
                    administrator: false,
                    first: true,
                };
                Reply::Send("login password\r\nNew_Password: ".to_string())
            }
            "sshd host key generate" if state.administrator && self.host_key_exists => {
                state.awaiting = Awaiting::HostKeyAnswer;
                Reply::Send("sshd host key generate\r\nUpdate host key ? (Y/N)".to_string())
            }
            _ => {
                let output = match self.responses.get(text) {
                    Some(out) => out.clone(),
                    None if !state.administrator && !text.starts_with("show") && !text.starts_with("console") => {
                        "Error: Permission denied".to_string()
                    }
                    None => String::new(),
                };
                if state.administrator && !text.starts_with("show") {
                    state.dirty = true;
                }
                let body = if output.is_empty() {
                    String::new()
                } else {
                    format!("{}\r\n", output.replace('\n', "\r\n"))
                };
                Reply::Send(format!("{}\r\n{}{}", text, body, self.prompt(state)))
            }
        }
    }
}

/// Open a [`Session`] against a freshly spawned fake router.
pub(crate) async fn fake_session(router: FakeRouter) -> (Session, RouterLog) {
    let (stream, log) = router.spawn();
    let (r, w) = tokio::io::split(stream);
    let session = Session::from_io(&Context::background(), r, w, Arc::new(vendors::rtx::profile()))
        .await
        .unwrap();
    (session, log)
}

/// Session factory backed by fake routers.
///
/// The first `fail_first` creations fail with a transport error.
#[derive(Debug)]
pub(crate) struct FakeRouterFactory {
    router: FakeRouter,
    profile: Arc<DeviceProfile>,
    fail_first: u32,
    created: AtomicU32,
    closed: AtomicU32,
    logs: Mutex<Vec<RouterLog>>,
}

impl FakeRouterFactory {
    pub(crate) fn new(router: FakeRouter) -> Self {
        Self {
            router,
            profile: Arc::new(vendors::rtx::profile()),
            fail_first: 0,
            created: AtomicU32::new(0),
            closed: AtomicU32::new(0),
            logs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub(crate) fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Lines received by every router this factory started, in order.
    pub(crate) fn received(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .flat_map(|log| log.received())
            .collect()
    }
}

impl ResourceFactory for FakeRouterFactory {
    type Resource = Session;

    async fn create(&self, ctx: &Context) -> Result<Session> {
        let attempt = self.created.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(TransportError::Disconnected.into());
        }
        let (stream, log) = self.router.clone().spawn();
        self.logs.lock().unwrap().push(log);
        let (r, w) = tokio::io::split(stream);
        Session::from_io(ctx, r, w, self.profile.clone()).await
    }

    async fn close(&self, mut session: Session) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        session.close().await;
    }
}
