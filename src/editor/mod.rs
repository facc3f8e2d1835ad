//! The `str_replace_editor` tool: view, create and edit remote files with a
//! per-path undo history.

pub mod fs;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::result::{ToolError, ToolResult};
use fs::RemoteFs;

pub const SNIPPET_LINES: usize = 4;
pub const MAX_RESPONSE_LEN: usize = 16000;
pub const TRUNCATED_MESSAGE: &str = "<response clipped><NOTE>To save on context only part of this file has been shown to you. You should retry this tool after you have searched inside the file with `grep -n` in order to find the line numbers of what you are looking for.</NOTE>";

const TAB_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EditCommand {
    View,
    Create,
    StrReplace,
    Insert,
    UndoEdit,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct EditRequest {
    #[schemars(description = "The command to run: view, create, str_replace, insert or undo_edit")]
    pub command: EditCommand,
    #[schemars(description = "Absolute path to a file or directory on the remote machine")]
    pub path: String,
    #[serde(default)]
    #[schemars(description = "Content of the file to create (create only)")]
    pub file_text: Option<String>,
    #[serde(default)]
    #[schemars(description = "[start, end] 1-indexed line range to view; end -1 means end of file")]
    pub view_range: Option<Vec<i64>>,
    #[serde(default)]
    #[schemars(description = "Exact text to replace; must occur exactly once (str_replace)")]
    pub old_str: Option<String>,
    #[serde(default)]
    #[schemars(description = "Replacement text (str_replace) or text to insert (insert)")]
    pub new_str: Option<String>,
    #[serde(default)]
    #[schemars(description = "Line after which new_str is inserted; 0 inserts at the top (insert)")]
    pub insert_line: Option<i64>,
}

impl EditRequest {
    pub fn new(command: EditCommand, path: impl Into<String>) -> Self {
        Self {
            command,
            path: path.into(),
            file_text: None,
            view_range: None,
            old_str: None,
            new_str: None,
            insert_line: None,
        }
    }
}

pub struct EditTool {
    fs: Arc<dyn RemoteFs>,
    history: Mutex<HashMap<String, Vec<String>>>,
}

impl EditTool {
    pub fn new(fs: Arc<dyn RemoteFs>) -> Self {
        Self {
            fs,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub async fn edit(&self, req: EditRequest) -> Result<ToolResult, ToolError> {
        let path = req.path.as_str();
        self.validate_path(req.command, path).await?;
        tracing::debug!(command = ?req.command, path, "editor command");

        match req.command {
            EditCommand::View => self.view(path, req.view_range.as_deref()).await,
            EditCommand::Create => {
                let Some(text) = req.file_text else {
                    return Err(ToolError::validation(
                        "Parameter `file_text` is required for command: create",
                    ));
                };
                self.fs.write(path, &text).await?;
                Ok(ToolResult::output(format!("File created successfully at: {path}")))
            }
            EditCommand::StrReplace => {
                let Some(old_str) = req.old_str else {
                    return Err(ToolError::validation(
                        "Parameter `old_str` is required for command: str_replace",
                    ));
                };
                self.str_replace(path, &old_str, req.new_str.as_deref().unwrap_or(""))
                    .await
            }
            EditCommand::Insert => {
                let Some(line) = req.insert_line else {
                    return Err(ToolError::validation(
                        "Parameter `insert_line` is required for command: insert",
                    ));
                };
                let Some(new_str) = req.new_str else {
                    return Err(ToolError::validation(
                        "Parameter `new_str` is required for command: insert",
                    ));
                };
                self.insert(path, line, &new_str).await
            }
            EditCommand::UndoEdit => self.undo_edit(path).await,
        }
    }

    /// Number of undo entries recorded for `path`.
    pub fn history_len(&self, path: &str) -> usize {
        self.history.lock().get(path).map_or(0, Vec::len)
    }

    async fn validate_path(&self, command: EditCommand, path: &str) -> Result<(), ToolError> {
        if !path.starts_with('/') {
            return Err(ToolError::validation(format!(
                "The path {path} is not an absolute path, it should start with '/'. Maybe you meant /{path}?"
            )));
        }

        let exists = self.fs.exists(path).await?;
        if command == EditCommand::Create {
            if exists {
                return Err(ToolError::validation(format!(
                    "File already exists at: {path}. Cannot overwrite files using command `create`."
                )));
            }
            return Ok(());
        }
        if !exists {
            return Err(ToolError::validation(format!(
                "The path {path} does not exist. Please provide a valid path."
            )));
        }
        if command != EditCommand::View && self.fs.is_dir(path).await? {
            return Err(ToolError::validation(format!(
                "The path {path} is a directory and only the `view` command can be used on directories"
            )));
        }
        Ok(())
    }

    async fn view(&self, path: &str, view_range: Option<&[i64]>) -> Result<ToolResult, ToolError> {
        if self.fs.is_dir(path).await? {
            if view_range.is_some() {
                return Err(ToolError::validation(
                    "The `view_range` parameter is not allowed when `path` points to a directory.",
                ));
            }
            let listing = self.fs.list(path).await?;
            return Ok(ToolResult::output(format!(
                "Here's the files and directories up to 2 levels deep in {path}, excluding hidden items:\n{}\n",
                listing.trim_end_matches('\n')
            )));
        }

        let content = self.fs.read(path).await?;
        let Some(range) = view_range else {
            return Ok(ToolResult::output(make_output(&content, path, 1)));
        };

        let &[start, end] = range else {
            return Err(ToolError::validation(
                "Invalid `view_range`. It should be a list of two integers.",
            ));
        };
        let lines: Vec<&str> = content.split('\n').collect();
        let n = lines.len() as i64;
        if start < 1 || start > n {
            return Err(ToolError::validation(format!(
                "Invalid `view_range`: {range:?}. Its first element `{start}` should be within the range of lines of the file: {:?}",
                [1, n]
            )));
        }
        if end > n {
            return Err(ToolError::validation(format!(
                "Invalid `view_range`: {range:?}. Its second element `{end}` should be smaller than the number of lines in the file: `{n}`"
            )));
        }
        if end != -1 && end < start {
            return Err(ToolError::validation(format!(
                "Invalid `view_range`: {range:?}. Its second element `{end}` should be larger or equal than its first `{start}`"
            )));
        }

        let from = (start - 1) as usize;
        let selected = if end == -1 {
            &lines[from..]
        } else {
            &lines[from..end as usize]
        };
        Ok(ToolResult::output(make_output(
            &selected.join("\n"),
            path,
            start as usize,
        )))
    }

    async fn str_replace(
        &self,
        path: &str,
        old_str: &str,
        new_str: &str,
    ) -> Result<ToolResult, ToolError> {
        let original = self.fs.read(path).await?;
        let content = expand_tabs(&original);
        let old_str = expand_tabs(old_str);
        let new_str = expand_tabs(new_str);

        let occurrences = content.matches(old_str.as_str()).count();
        if occurrences == 0 {
            return Err(ToolError::validation(format!(
                "No replacement was performed, old_str `{old_str}` did not appear verbatim in {path}."
            )));
        }
        if occurrences > 1 {
            let lines: Vec<usize> = content
                .split('\n')
                .enumerate()
                .filter(|(_, line)| line.contains(old_str.as_str()))
                .map(|(i, _)| i + 1)
                .collect();
            return Err(ToolError::validation(format!(
                "No replacement was performed. Multiple occurrences of old_str `{old_str}` in lines {lines:?}. Please ensure it is unique"
            )));
        }

        let updated = content.replacen(old_str.as_str(), &new_str, 1);
        self.fs.write(path, &updated).await?;
        self.push_history(path, original);

        let replacement_line = content
            .split(old_str.as_str())
            .next()
            .unwrap_or("")
            .matches('\n')
            .count();
        let start = replacement_line.saturating_sub(SNIPPET_LINES);
        let end = replacement_line + SNIPPET_LINES + new_str.matches('\n').count();
        let snippet: Vec<&str> = updated
            .split('\n')
            .skip(start)
            .take(end + 1 - start)
            .collect();

        Ok(ToolResult::output(format!(
            "The file {path} has been edited. {}Review the changes and make sure they are as expected. Edit the file again if necessary.",
            make_output(&snippet.join("\n"), &format!("a snippet of {path}"), start + 1)
        )))
    }

    async fn insert(&self, path: &str, line: i64, new_str: &str) -> Result<ToolResult, ToolError> {
        let original = self.fs.read(path).await?;
        let content = expand_tabs(&original);
        let new_str = expand_tabs(new_str);
        let lines: Vec<&str> = content.split('\n').collect();
        let n = lines.len();

        let at = usize::try_from(line).ok().filter(|at| *at <= n).ok_or_else(|| {
            ToolError::validation(format!(
                "Invalid `insert_line` parameter: {line}. It should be within the range of lines of the file: {:?}",
                [0, n]
            ))
        })?;

        let new_lines: Vec<&str> = new_str.split('\n').collect();
        let mut updated: Vec<&str> = Vec::with_capacity(n + new_lines.len());
        updated.extend(&lines[..at]);
        updated.extend(&new_lines);
        updated.extend(&lines[at..]);

        let mut snippet: Vec<&str> = Vec::new();
        snippet.extend(&lines[at.saturating_sub(SNIPPET_LINES)..at]);
        snippet.extend(&new_lines);
        snippet.extend(&lines[at..(at + SNIPPET_LINES).min(n)]);

        self.fs.write(path, &updated.join("\n")).await?;
        self.push_history(path, original);

        let first = (at + 1).saturating_sub(SNIPPET_LINES).max(1);
        Ok(ToolResult::output(format!(
            "The file {path} has been edited. {}Review the changes and make sure they are as expected (correct indentation, no duplicate lines, etc). Edit the file again if necessary.",
            make_output(&snippet.join("\n"), "a snippet of the edited file", first)
        )))
    }

    async fn undo_edit(&self, path: &str) -> Result<ToolResult, ToolError> {
        let Some(previous) = self.history.lock().get_mut(path).and_then(Vec::pop) else {
            return Err(ToolError::validation(format!("No edit history found for {path}.")));
        };
        if let Err(e) = self.fs.write(path, &previous).await {
            // Keep the entry so the undo can be retried.
            self.push_history(path, previous);
            return Err(e);
        }
        Ok(ToolResult::output(format!(
            "Last edit to {path} undone successfully. {}",
            make_output(&previous, path, 1)
        )))
    }

    fn push_history(&self, path: &str, content: String) {
        self.history
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(content);
    }
}

/// `cat -n` style rendering with a header naming `descriptor`.
fn make_output(content: &str, descriptor: &str, init_line: usize) -> String {
    let content = expand_tabs(&truncate(content));
    let numbered: Vec<String> = content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:6}\t{line}", i + init_line))
        .collect();
    format!(
        "Here's the result of running `cat -n` on {descriptor}:\n{}\n",
        numbered.join("\n")
    )
}

fn truncate(content: &str) -> String {
    match content.char_indices().nth(MAX_RESPONSE_LEN) {
        Some((cut, _)) => format!("{}{TRUNCATED_MESSAGE}", &content[..cut]),
        None => content.to_string(),
    }
}

/// Replace tabs with spaces up to the next multiple-of-8 column.
fn expand_tabs(s: &str) -> String {
    if !s.contains('\t') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut col = 0;
    for c in s.chars() {
        match c {
            '\t' => {
                let n = TAB_SIZE - col % TAB_SIZE;
                out.extend(std::iter::repeat(' ').take(n));
                col += n;
            }
            '\n' | '\r' => {
                out.push(c);
                col = 0;
            }
            _ => {
                out.push(c);
                col += 1;
            }
        }
    }
    out
}
