//! Ephemeral per-turn context.
//!
//! Providers contribute system-role text that is attached to every request of
//! one turn and never persisted into history.

use std::path::PathBuf;
use std::process::{Command, Stdio};

pub const REPOSITORY_CONTEXT_HEADER: &str = "Repository state:";

const DEFAULT_MAX_STATUS_LINES: usize = 40;

pub trait ContextProvider: Send {
    fn name(&self) -> &str;

    /// Returns `None` when there is nothing to contribute for this turn.
    fn build_context(&mut self) -> Option<String>;
}

/// Summarizes `git status --short --branch` for a workspace.
#[derive(Debug, Clone)]
pub struct GitContextProvider {
    workspace_root: PathBuf,
    max_lines: usize,
}

impl GitContextProvider {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            max_lines: DEFAULT_MAX_STATUS_LINES,
        }
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }
}

impl ContextProvider for GitContextProvider {
    fn name(&self) -> &str {
        "git"
    }

    fn build_context(&mut self) -> Option<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.workspace_root)
            .args(["status", "--short", "--branch"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|error| {
                tracing::debug!(%error, "git unavailable for repository context");
            })
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let status = String::from_utf8_lossy(&output.stdout);
        Some(format_status(&status, self.max_lines))
    }
}

fn format_status(status: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = status
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();

    let mut context = String::from(REPOSITORY_CONTEXT_HEADER);
    if lines.is_empty() {
        context.push_str("\n(clean)");
        return context;
    }

    for line in lines.iter().take(max_lines) {
        context.push('\n');
        context.push_str(line);
    }

    let omitted = lines.len().saturating_sub(max_lines);
    if omitted > 0 {
        context.push_str(&format!("\n... {omitted} more entries"));
    }

    context
}
