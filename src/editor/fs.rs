//! Remote filesystem access for the editor, expressed as shell commands.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;

use crate::result::ToolError;
use crate::shell::{quote, CommandOutput, CommandRunner};

const HEREDOC_MARKER: &str = "RCU_EDIT_EOF";

#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, ToolError>;
    async fn is_dir(&self, path: &str) -> Result<bool, ToolError>;
    async fn read(&self, path: &str) -> Result<String, ToolError>;
    /// Replace the file's content exactly, creating parent directories.
    async fn write(&self, path: &str, content: &str) -> Result<(), ToolError>;
    /// Entries up to two levels deep, hidden ones excluded, one per line.
    async fn list(&self, path: &str) -> Result<String, ToolError>;
}

/// [`RemoteFs`] over a [`CommandRunner`].
pub struct ShellFs {
    runner: Arc<dyn CommandRunner>,
}

impl ShellFs {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, command: &str) -> Result<String, ToolError> {
        let out = self.runner.run(command).await;
        checked(out)
    }

    /// Run `[ test ] && echo yes || echo no` and compare the answer.
    async fn sentinel_test(&self, test: &str, yes: &str, no: &str) -> Result<bool, ToolError> {
        let out = self
            .run(&format!("[ {test} ] && echo '{yes}' || echo '{no}'"))
            .await?;
        match out.trim() {
            s if s == yes => Ok(true),
            s if s == no => Ok(false),
            other => Err(ToolError::Remote(format!("unexpected test output {other:?}"))),
        }
    }
}

fn checked(out: CommandOutput) -> Result<String, ToolError> {
    if out.connection_failed {
        return Err(ToolError::Connection(out.error));
    }
    if !out.success {
        return Err(ToolError::Remote(out.error));
    }
    Ok(out.output)
}

/// Directory that holds `path`.
fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((dir, _)) => dir,
    }
}

#[async_trait]
impl RemoteFs for ShellFs {
    async fn exists(&self, path: &str) -> Result<bool, ToolError> {
        self.sentinel_test(&format!("-e {}", quote(path)), "exists", "not_exists")
            .await
    }

    async fn is_dir(&self, path: &str) -> Result<bool, ToolError> {
        self.sentinel_test(&format!("-d {}", quote(path)), "directory", "file")
            .await
    }

    async fn read(&self, path: &str) -> Result<String, ToolError> {
        self.run(&format!("cat {}", quote(path)))
            .await
            .map_err(|e| match e {
                ToolError::Remote(msg) => ToolError::Remote(format!("Failed to read {path}: {msg}")),
                other => other,
            })
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), ToolError> {
        let dir = parent_dir(path);
        self.run(&format!("mkdir -p {}", quote(dir)))
            .await
            .map_err(|e| ToolError::Remote(format!("Failed to create directory {dir}: {e}")))?;

        let tmp = format!("/tmp/rcu_edit_{}", uuid::Uuid::new_v4().simple());
        let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
        let upload = format!(
            "base64 -d > {tmp} << '{HEREDOC_MARKER}'\n{encoded}\n{HEREDOC_MARKER}"
        );
        let moved = match self.run(&upload).await {
            Ok(_) => self.run(&format!("mv {tmp} {}", quote(path))).await,
            Err(e) => Err(e),
        };
        if let Err(e) = moved {
            let cleanup = self.runner.run(&format!("rm -f {tmp}")).await;
            if !cleanup.success {
                tracing::debug!(tmp = %tmp, error = %cleanup.error, "temp file cleanup failed");
            }
            return Err(ToolError::Remote(format!("Failed to write to {path}: {e}")));
        }
        tracing::debug!(path, bytes = content.len(), "remote file written");
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<String, ToolError> {
        self.run(&format!("find {} -maxdepth 2 -not -path '*/\\.*'", quote(path)))
            .await
    }
}
