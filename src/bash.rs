//! The `bash` tool: one command per call over the shell channel, with a
//! fixed timeout and explicit restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::result::{ToolError, ToolResult};
use crate::shell::CommandRunner;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
struct BashSession {
    started: bool,
    /// Set after a timeout; cleared only by a restart.
    timed_out: bool,
}

pub struct BashTool {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    session: Mutex<Option<BashSession>>,
}

impl BashTool {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            session: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, command: Option<&str>, restart: bool) -> Result<ToolResult, ToolError> {
        let mut slot = self.session.lock().await;

        if restart {
            slot.take();
            self.runner.reset().await;
            *slot = Some(self.start().await?);
            tracing::info!("bash tool restarted");
            return Ok(ToolResult::system("tool has been restarted."));
        }

        let needs_start = slot.as_ref().map_or(true, |s| !s.started);
        if needs_start {
            let timed_out = slot.as_ref().is_some_and(|s| s.timed_out);
            let mut session = self.start().await?;
            session.timed_out = timed_out;
            *slot = Some(session);
        }

        let Some(command) = command else {
            return Err(ToolError::validation("no command provided."));
        };
        let Some(session) = slot.as_mut() else {
            return Err(ToolError::Connection("Session has not started.".into()));
        };
        self.exec(session, command).await
    }

    async fn start(&self) -> Result<BashSession, ToolError> {
        if !self.runner.connect().await {
            return Err(ToolError::Connection("Failed to connect to SSH server".into()));
        }
        Ok(BashSession {
            started: true,
            timed_out: false,
        })
    }

    async fn exec(&self, session: &mut BashSession, command: &str) -> Result<ToolResult, ToolError> {
        if session.timed_out {
            return Err(ToolError::Timeout(self.timeout.as_secs()));
        }

        let out = match tokio::time::timeout(self.timeout, self.runner.run(command)).await {
            Ok(out) => out,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "bash command timed out");
                session.timed_out = true;
                // The abandoned command keeps its connection busy; the other
                // tools share the runner and must get a fresh one.
                self.runner.reset().await;
                return Err(ToolError::Timeout(self.timeout.as_secs()));
            }
        };

        if out.connection_failed {
            session.started = false;
            return Ok(ToolResult {
                output: Some(String::new()),
                error: Some(format!("SSH connection error: {}", out.error)),
                ..Default::default()
            });
        }

        let output = trim_newline(out.output);
        let error = trim_newline(out.error);
        Ok(ToolResult {
            output: Some(output),
            error: (!error.is_empty()).then_some(error),
            ..Default::default()
        })
    }
}

/// Drop a single trailing newline.
fn trim_newline(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::fs::ShellFs;
    use crate::editor::{EditCommand, EditRequest, EditTool};
    use crate::shell::testing::ScriptedRunner;
    use crate::shell::CommandOutput;
    use async_trait::async_trait;

    /// Runner whose commands containing `sleep` never finish in time.
    struct SlowRunner;

    #[async_trait]
    impl CommandRunner for SlowRunner {
        async fn run(&self, command: &str) -> CommandOutput {
            if command.contains("sleep") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            CommandOutput::ok(format!("{command}\n"))
        }
    }

    /// Models one SSH session shared by every tool: a command occupies the
    /// session until it finishes, even after its caller gave up, and `reset`
    /// swaps in a fresh session.
    struct SharedSessionRunner {
        session: parking_lot::Mutex<Arc<Mutex<()>>>,
    }

    impl SharedSessionRunner {
        fn new() -> Self {
            Self {
                session: parking_lot::Mutex::new(Arc::new(Mutex::new(()))),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for SharedSessionRunner {
        async fn run(&self, command: &str) -> CommandOutput {
            let session = self.session.lock().clone();
            let busy = session.lock_owned().await;
            let command = command.to_string();
            let task = tokio::spawn(async move {
                let _busy = busy;
                if command.contains("sleep") {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                if command.starts_with("[ -e") {
                    CommandOutput::ok("exists\n")
                } else if command.starts_with("[ -d") {
                    CommandOutput::ok("file\n")
                } else {
                    CommandOutput::ok(format!("{command}\n"))
                }
            });
            task.await
                .unwrap_or_else(|e| CommandOutput::connection_error(e.to_string()))
        }

        async fn reset(&self) {
            *self.session.lock() = Arc::new(Mutex::new(()));
        }
    }

    fn bash(runner: impl CommandRunner + 'static) -> BashTool {
        BashTool::new(Arc::new(runner), DEFAULT_TIMEOUT)
    }

    #[tokio::test]
    async fn trims_one_trailing_newline() {
        let tool = bash(
            ScriptedRunner::new().respond(|_| Some(CommandOutput::ok("hello\n\n"))),
        );
        let res = tool.run(Some("echo hello"), false).await.unwrap();
        assert_eq!(res.output.as_deref(), Some("hello\n"));
        assert!(!res.is_error());
    }

    #[tokio::test]
    async fn stderr_is_an_error_and_stdout_is_kept() {
        let tool = bash(ScriptedRunner::new().respond(|_| {
            Some(CommandOutput::from_streams("out\n".into(), "oops\n".into()))
        }));
        let res = tool.run(Some("x"), false).await.unwrap();
        assert_eq!(res.output.as_deref(), Some("out"));
        assert_eq!(res.error.as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn missing_command_is_a_validation_error() {
        let tool = bash(ScriptedRunner::new());
        let err = tool.run(None, false).await.unwrap_err();
        assert_eq!(err, ToolError::validation("no command provided."));
    }

    #[tokio::test]
    async fn restart_resets_the_runner() {
        let runner = Arc::new(ScriptedRunner::new());
        let tool = BashTool::new(runner.clone(), DEFAULT_TIMEOUT);
        let res = tool.run(None, true).await.unwrap();
        assert_eq!(res.system.as_deref(), Some("tool has been restarted."));
        assert_eq!(*runner.resets.lock(), 1);
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn unreachable_host_fails_to_start() {
        let tool = bash(ScriptedRunner::new().unreachable());
        let err = tool.run(Some("ls"), false).await.unwrap_err();
        assert!(matches!(err, ToolError::Connection(_)));
    }

    #[tokio::test]
    async fn connection_error_restarts_on_next_call() {
        let runner = ScriptedRunner::new().respond(|cmd| {
            (cmd == "first").then(|| CommandOutput::connection_error("Connection error: reset"))
        });
        let tool = bash(runner);
        let res = tool.run(Some("first"), false).await.unwrap();
        assert!(res.is_error());
        assert!(res.error.unwrap().starts_with("SSH connection error"));

        let res = tool.run(Some("second"), false).await.unwrap();
        assert!(!res.is_error());
    }

    #[tokio::test]
    async fn timeout_latches_until_restart() {
        let tool = BashTool::new(Arc::new(SlowRunner), Duration::from_millis(50));

        let err = tool.run(Some("sleep 999"), false).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));

        let err = tool.run(Some("echo fast"), false).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));

        tool.run(None, true).await.unwrap();
        let res = tool.run(Some("echo fast"), false).await.unwrap();
        assert_eq!(res.output.as_deref(), Some("echo fast"));
    }

    #[tokio::test]
    async fn timeout_frees_the_shared_session_for_other_tools() {
        let runner = Arc::new(SharedSessionRunner::new());
        let tool = BashTool::new(runner.clone(), Duration::from_millis(50));
        let editor = EditTool::new(Arc::new(ShellFs::new(runner.clone())));

        let err = tool.run(Some("sleep 999"), false).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));

        let res = tokio::time::timeout(
            Duration::from_secs(5),
            editor.edit(EditRequest::new(EditCommand::View, "/etc/hostname")),
        )
        .await
        .expect("editor blocked behind the timed-out command")
        .unwrap();
        assert!(res.output.unwrap().contains("cat /etc/hostname"));
    }

    #[test]
    fn timeout_message() {
        assert_eq!(
            ToolError::Timeout(120).to_string(),
            "timed out: bash has not returned in 120 seconds and must be restarted"
        );
    }
}
