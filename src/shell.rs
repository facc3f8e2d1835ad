//! SSH shell session.
//!
//! Commands run over a single libssh2 session that is opened lazily and kept
//! for reuse. libssh2 is blocking, so every call is moved onto tokio's
//! blocking pool.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("authentication failed for user {0}")]
    AuthFailed(String),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result of one remote command.
///
/// Any stderr output counts as failure even when stdout is non-empty;
/// callers probing the remote side rely on that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
    pub error: String,
    /// Set when the command never ran because the connection failed.
    pub connection_failed: bool,
}

impl CommandOutput {
    pub fn from_streams(output: String, error: String) -> Self {
        Self {
            success: error.is_empty(),
            output,
            error,
            connection_failed: false,
        }
    }

    pub fn ok(output: impl Into<String>) -> Self {
        Self::from_streams(output.into(), String::new())
    }

    pub fn connection_error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: msg.into(),
            connection_failed: true,
        }
    }
}

/// Something that can execute a shell command line on the remote machine.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> CommandOutput;

    /// Establish the connection up front. Runners without one succeed.
    async fn connect(&self) -> bool {
        true
    }

    /// Drop any live connection so the next command reconnects.
    async fn reset(&self) {}
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
}

pub struct ShellSession {
    config: ShellConfig,
    handle: tokio::sync::Mutex<Option<ssh2::Session>>,
}

impl ShellSession {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Open the SSH session if it is not open yet. Returns false on failure.
    pub async fn connect(&self) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return true;
        }
        match self.open().await {
            Ok(session) => {
                *handle = Some(session);
                true
            }
            Err(e) => {
                tracing::warn!(host = %self.config.host, port = self.config.port, error = %e, "SSH connection failed");
                false
            }
        }
    }

    pub async fn disconnect(&self) {
        let Some(session) = self.handle.lock().await.take() else {
            return;
        };
        let res = tokio::task::spawn_blocking(move || {
            session.disconnect(None, "closing", None)
        })
        .await;
        match res {
            Ok(Err(e)) => tracing::debug!(error = %e, "SSH disconnect error"),
            Err(e) => tracing::debug!(error = %e, "SSH disconnect task failed"),
            Ok(Ok(())) => tracing::debug!(host = %self.config.host, "SSH disconnected"),
        }
    }

    /// Run `command` and collect its output, connecting first if needed.
    pub async fn execute_command(&self, command: &str) -> CommandOutput {
        let session = {
            let mut handle = self.handle.lock().await;
            if handle.is_none() {
                match self.open().await {
                    Ok(session) => *handle = Some(session),
                    Err(e) => {
                        tracing::warn!(error = %e, "SSH connection failed");
                        return CommandOutput::connection_error(format!(
                            "Failed to connect to SSH server: {e}"
                        ));
                    }
                }
            }
            match handle.as_ref() {
                Some(s) => s.clone(),
                None => return CommandOutput::connection_error("Failed to connect to SSH server"),
            }
        };

        let cmd = command.to_string();
        tracing::debug!(command = %cmd, "executing remote command");
        let res = tokio::task::spawn_blocking(move || exec_blocking(&session, &cmd)).await;
        match res {
            Ok(Ok((output, error))) => CommandOutput::from_streams(output, error),
            Ok(Err(e)) => {
                // The channel could not be used; assume the session is gone.
                self.handle.lock().await.take();
                CommandOutput::connection_error(format!("Connection error: {e}"))
            }
            Err(e) => CommandOutput::connection_error(format!("command task failed: {e}")),
        }
    }

    async fn open(&self) -> Result<ssh2::Session, ShellError> {
        let config = self.config.clone();
        tracing::info!(host = %config.host, port = config.port, user = %config.username, "connecting SSH");
        tokio::task::spawn_blocking(move || connect_blocking(&config)).await?
    }
}

#[async_trait]
impl CommandRunner for ShellSession {
    async fn run(&self, command: &str) -> CommandOutput {
        self.execute_command(command).await
    }

    async fn connect(&self) -> bool {
        ShellSession::connect(self).await
    }

    /// Forget the session without a polite disconnect: a command that is
    /// still running holds the libssh2 lock, and the socket closes once its
    /// clone is dropped.
    async fn reset(&self) {
        if self.handle.lock().await.take().is_some() {
            tracing::info!(host = %self.config.host, "SSH session reset");
        }
    }
}

fn connect_blocking(config: &ShellConfig) -> Result<ssh2::Session, ShellError> {
    let target = format!("{}:{}", config.host, config.port);
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ShellError::Resolve(target.clone()))?;
    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;

    let mut session = ssh2::Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;

    if let Some(key) = &config.private_key {
        if let Err(e) = session.userauth_pubkey_file(&config.username, None, key, None) {
            tracing::debug!(error = %e, key = %key.display(), "public key auth rejected");
        }
    }
    if !session.authenticated() {
        if let Some(password) = &config.password {
            session.userauth_password(&config.username, password)?;
        }
    }
    if !session.authenticated() {
        return Err(ShellError::AuthFailed(config.username.clone()));
    }
    session.set_keepalive(true, 30);
    tracing::info!(target = %target, "SSH connected");
    Ok(session)
}

fn exec_blocking(session: &ssh2::Session, command: &str) -> Result<(String, String), ShellError> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let mut stdout = Vec::new();
    channel.read_to_end(&mut stdout)?;
    let mut stderr = Vec::new();
    channel.stderr().read_to_end(&mut stderr)?;
    channel.wait_close()?;

    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

// ── Quoting and xdotool helpers ──────────────────────────────────

/// Quote `s` for a POSIX shell.
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let safe = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

/// Builds `xdotool` command lines bound to one X display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xdotool {
    display_env: String,
}

impl Xdotool {
    pub fn new(display_num: Option<u32>) -> Self {
        let display_env = match display_num {
            Some(n) => format!("DISPLAY=:{n} "),
            None => String::new(),
        };
        Self { display_env }
    }

    /// `DISPLAY=:N ` prefix, or empty.
    pub fn display_env(&self) -> &str {
        &self.display_env
    }

    /// Full command line for `xdotool <args>`.
    pub fn cmd(&self, args: &str) -> String {
        format!("{}xdotool {}", self.display_env, args)
    }

    /// Join non-empty parts behind the xdotool binary.
    pub fn chain<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> String {
        let args: Vec<&str> = parts.into_iter().filter(|p| !p.is_empty()).collect();
        self.cmd(&args.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowDetails {
    pub success: bool,
    pub id: String,
    pub name: String,
    pub geometry: String,
}

/// Focus a window whose title matches `app`, or start `app` in the background.
///
/// `app` is a single program name; it is quoted in both halves of the
/// command, so arguments cannot be passed through it.
pub async fn launch_application(
    runner: &dyn CommandRunner,
    xdo: &Xdotool,
    app: &str,
) -> CommandOutput {
    let app = quote(app);
    let command = format!(
        "{} || {}{} &",
        xdo.cmd(&format!("search --name {app} windowactivate")),
        xdo.display_env(),
        app,
    );
    runner.run(&command).await
}

/// List visible windows with their titles.
pub async fn list_windows(
    runner: &dyn CommandRunner,
    xdo: &Xdotool,
) -> Result<Vec<WindowInfo>, CommandOutput> {
    let res = runner
        .run(&xdo.cmd("search --all --onlyvisible --name ''"))
        .await;
    if !res.success {
        return Err(res);
    }

    let mut windows = Vec::new();
    for id in res.output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let name = runner.run(&xdo.cmd(&format!("getwindowname {id}"))).await;
        if name.success {
            windows.push(WindowInfo {
                id: id.to_string(),
                name: name.output.trim().to_string(),
            });
        }
    }
    Ok(windows)
}

/// Geometry and title of one window.
pub async fn window_info(runner: &dyn CommandRunner, xdo: &Xdotool, id: &str) -> WindowDetails {
    let id_arg = quote(id);
    let geometry = runner
        .run(&xdo.cmd(&format!("getwindowgeometry {id_arg}")))
        .await;
    let name = runner.run(&xdo.cmd(&format!("getwindowname {id_arg}"))).await;
    WindowDetails {
        success: geometry.success && name.success,
        id: id.to_string(),
        name: if name.success { name.output.trim().to_string() } else { String::new() },
        geometry: if geometry.success { geometry.output } else { String::new() },
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    type Responder = Box<dyn Fn(&str) -> Option<CommandOutput> + Send + Sync>;

    /// Records every command and answers from a list of responders.
    /// Unmatched commands succeed with empty output.
    pub struct ScriptedRunner {
        pub commands: Mutex<Vec<String>>,
        responders: Vec<Responder>,
        pub resets: Mutex<usize>,
        pub reachable: bool,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                responders: Vec::new(),
                resets: Mutex::new(0),
                reachable: true,
            }
        }

        /// Fail `connect` like a host that refuses connections.
        pub fn unreachable(mut self) -> Self {
            self.reachable = false;
            self
        }

        pub fn respond(
            mut self,
            f: impl Fn(&str) -> Option<CommandOutput> + Send + Sync + 'static,
        ) -> Self {
            self.responders.push(Box::new(f));
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &str) -> CommandOutput {
            self.commands.lock().push(command.to_string());
            self.responders
                .iter()
                .find_map(|f| f(command))
                .unwrap_or_else(|| CommandOutput::ok(""))
        }

        async fn connect(&self) -> bool {
            self.reachable
        }

        async fn reset(&self) {
            *self.resets.lock() += 1;
        }
    }
}
