// Tool results and the error taxonomy shared by every remote-desktop tool.

use rmcp::model::{CallToolResult, Content, ErrorData};
use thiserror::Error;

/// Errors raised by tool operations.
///
/// `Validation` is raised before any remote side effect. The other variants
/// describe failures that happened while talking to the remote machine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("{0}")]
    Validation(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Remote(String),

    #[error("timed out: bash has not returned in {0} seconds and must be restarted")]
    Timeout(u64),
}

impl ToolError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResult {
    pub output: Option<String>,
    pub error: Option<String>,
    /// Base64-encoded PNG.
    pub base64_image: Option<String>,
    pub system: Option<String>,
}

impl ToolResult {
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn system(note: impl Into<String>) -> Self {
        Self {
            system: Some(note.into()),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, base64_image: impl Into<String>) -> Self {
        self.base64_image = Some(base64_image.into());
        self
    }

    /// True when the error field carries a non-empty message.
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Concatenate the text and images of several partial results.
    ///
    /// Used when one logical action is issued as several remote commands.
    pub fn combine(results: impl IntoIterator<Item = ToolResult>) -> Self {
        let mut output = String::new();
        let mut error = String::new();
        let mut image = None;
        for r in results {
            output.push_str(r.output.as_deref().unwrap_or(""));
            error.push_str(r.error.as_deref().unwrap_or(""));
            if r.base64_image.is_some() {
                image = r.base64_image;
            }
        }
        Self {
            output: Some(output),
            error: (!error.is_empty()).then_some(error),
            base64_image: image,
            system: None,
        }
    }

    /// Convert into MCP content. A populated error marks the call as failed
    /// without turning it into a protocol-level error.
    pub fn into_call_result(self) -> CallToolResult {
        let failed = self.is_error();
        let mut contents = Vec::new();
        if let Some(system) = self.system.filter(|s| !s.is_empty()) {
            contents.push(Content::text(system));
        }
        if let Some(output) = self.output.filter(|s| !s.is_empty()) {
            contents.push(Content::text(output));
        }
        if let Some(error) = self.error.filter(|s| !s.is_empty()) {
            contents.push(Content::text(format!("error: {error}")));
        }
        if let Some(image) = self.base64_image {
            contents.push(Content::image(image, "image/png"));
        }
        if contents.is_empty() {
            contents.push(Content::text(""));
        }
        if failed {
            CallToolResult::error(contents)
        } else {
            CallToolResult::success(contents)
        }
    }
}

/// Map a tool outcome onto the MCP boundary.
///
/// Validation errors become `invalid_params` protocol errors; every other
/// failure is returned as an error result so the caller can decide whether
/// to retry.
pub fn to_mcp(result: Result<ToolResult, ToolError>) -> Result<CallToolResult, ErrorData> {
    match result {
        Ok(r) => Ok(r.into_call_result()),
        Err(ToolError::Validation(msg)) => Err(ErrorData::invalid_params(msg, None)),
        Err(e) => Ok(ToolResult::error(e.to_string()).into_call_result()),
    }
}
