use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use wait_timeout::ChildExt;

use crate::error::ToolExecutionError;
use crate::provider::{ToolArguments, ToolCall, ToolDefinition};

pub const BASH_TOOL: &str = "bash";
pub const READ_FILE_TOOL: &str = "read_file";
pub const WRITE_FILE_TOOL: &str = "write_file";
pub const EDIT_FILE_TOOL: &str = "edit_file";

const DEFAULT_BASH_TIMEOUT_SEC: u64 = 30;
const DEFAULT_BASH_MAX_OUTPUT_BYTES: usize = 100 * 1024;
const DEFAULT_READ_MAX_BYTES: usize = 200 * 1024;

/// Runs model-requested tool calls. Errors become failed tool results, never turn errors.
pub trait ToolExecutor: Send {
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    fn execute_tool_call(&mut self, call: &ToolCall) -> Result<Value, ToolExecutionError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BashArgs {
    command: String,
    #[serde(default)]
    timeout_sec: Option<u64>,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadFileArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EditFileArgs {
    path: String,
    old_text: String,
    new_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WriteFileArgs {
    path: String,
    content: String,
}

/// Filesystem and shell tools confined to one workspace root.
#[derive(Debug, Clone)]
pub struct BuiltinToolExecutor {
    workspace_root: PathBuf,
    default_bash_timeout_sec: u64,
    bash_max_output_bytes: usize,
    read_max_bytes: usize,
}

impl BuiltinToolExecutor {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Result<Self, ToolExecutionError> {
        let workspace_root = workspace_root.into();
        let canonical_root = workspace_root.canonicalize().map_err(|err| {
            ToolExecutionError::failed(format!("Failed to resolve workspace root: {err}"))
        })?;

        if !canonical_root.is_dir() {
            return Err(ToolExecutionError::failed(
                "Workspace root must be a directory",
            ));
        }

        Ok(Self {
            workspace_root: canonical_root,
            default_bash_timeout_sec: DEFAULT_BASH_TIMEOUT_SEC,
            bash_max_output_bytes: DEFAULT_BASH_MAX_OUTPUT_BYTES,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
        })
    }

    pub fn with_bash_timeout(mut self, timeout_sec: u64) -> Self {
        self.default_bash_timeout_sec = timeout_sec.max(1);
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn execute_bash(&self, args: BashArgs) -> Result<Value, ToolExecutionError> {
        let timeout = args.timeout_sec.unwrap_or(self.default_bash_timeout_sec);
        let mut command_builder = Command::new("bash");
        command_builder
            .arg("-lc")
            .arg(&args.command)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(cwd) = args.cwd {
            let cwd_path = self
                .resolve_existing_path(&cwd)
                .map_err(|error| ToolExecutionError::failed(format!("Invalid bash cwd: {error}")))?;
            if !cwd_path.is_dir() {
                return Err(ToolExecutionError::failed(
                    "Invalid bash cwd: expected a directory",
                ));
            }

            command_builder.current_dir(cwd_path);
        }

        let mut child = command_builder.spawn().map_err(|error| {
            ToolExecutionError::failed(format!("Failed to launch bash command: {error}"))
        })?;

        let (timed_out, status) = match child.wait_timeout(Duration::from_secs(timeout)) {
            Ok(Some(status)) => (false, status),
            Ok(None) => {
                let _ = child.kill();
                let status = child.wait().map_err(|error| {
                    ToolExecutionError::failed(format!(
                        "Command timed out after {timeout}s and wait failed: {error}"
                    ))
                })?;
                (true, status)
            }
            Err(error) => {
                let _ = child.kill();
                return Err(ToolExecutionError::failed(format!(
                    "Failed waiting for bash command: {error}"
                )));
            }
        };

        let stdout = truncate_to_byte_limit(
            String::from_utf8_lossy(&read_pipe_bytes(child.stdout.take())).into_owned(),
            self.bash_max_output_bytes,
        );
        let stderr = truncate_to_byte_limit(
            String::from_utf8_lossy(&read_pipe_bytes(child.stderr.take())).into_owned(),
            self.bash_max_output_bytes,
        );

        let status_label = if timed_out {
            format!("timeout after {timeout}s")
        } else {
            format_exit_status(status)
        };

        if timed_out || !status.success() {
            return Err(ToolExecutionError::failed(format!(
                "status: {status_label}\nstdout:\n{stdout}\nstderr:\n{stderr}"
            )));
        }

        Ok(json!({
            "status": status_label,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }

    fn execute_read_file(&self, args: ReadFileArgs) -> Result<Value, ToolExecutionError> {
        let resolved = self
            .resolve_existing_path(&args.path)
            .map_err(ToolExecutionError::Failed)?;

        let bytes = fs::read(&resolved).map_err(|error| {
            ToolExecutionError::failed(format!(
                "Failed to read file {}: {error}",
                resolved.display()
            ))
        })?;

        if bytes.len() > self.read_max_bytes {
            return Err(ToolExecutionError::failed(format!(
                "File exceeds max read size ({} bytes > {} bytes)",
                bytes.len(),
                self.read_max_bytes
            )));
        }

        let content = String::from_utf8(bytes)
            .map_err(|_| ToolExecutionError::failed("File is not valid UTF-8 text"))?;

        Ok(json!({
            "path": self.workspace_relative_display(&resolved),
            "content": content,
        }))
    }

    fn execute_edit_file(&self, args: EditFileArgs) -> Result<Value, ToolExecutionError> {
        if args.old_text.is_empty() {
            return Err(ToolExecutionError::invalid_arguments(
                EDIT_FILE_TOOL,
                "old_text must not be empty",
            ));
        }

        let resolved = self
            .resolve_existing_path(&args.path)
            .map_err(ToolExecutionError::Failed)?;

        let current_content = fs::read_to_string(&resolved).map_err(|error| {
            ToolExecutionError::failed(format!(
                "Failed to read file {}: {error}",
                resolved.display()
            ))
        })?;

        let occurrence_count = current_content.match_indices(&args.old_text).count();
        if occurrence_count != 1 {
            return Err(ToolExecutionError::failed(format!(
                "edit_file requires exactly one match; found {occurrence_count}"
            )));
        }

        let updated_content = current_content.replacen(&args.old_text, &args.new_text, 1);
        fs::write(&resolved, updated_content).map_err(|error| {
            ToolExecutionError::failed(format!(
                "Failed to write file {}: {error}",
                resolved.display()
            ))
        })?;

        Ok(json!({
            "path": self.workspace_relative_display(&resolved),
            "replacements": 1,
        }))
    }

    fn execute_write_file(&self, args: WriteFileArgs) -> Result<Value, ToolExecutionError> {
        let resolved = self
            .resolve_write_path(&args.path)
            .map_err(ToolExecutionError::Failed)?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                ToolExecutionError::failed(format!(
                    "Failed to create parent directories {}: {error}",
                    parent.display()
                ))
            })?;

            let canonical_parent = parent.canonicalize().map_err(|error| {
                ToolExecutionError::failed(format!(
                    "Failed to resolve write parent {}: {error}",
                    parent.display()
                ))
            })?;
            self.ensure_inside_workspace(&canonical_parent)
                .map_err(ToolExecutionError::Failed)?;
        }

        fs::write(&resolved, &args.content).map_err(|error| {
            ToolExecutionError::failed(format!(
                "Failed to write file {}: {error}",
                resolved.display()
            ))
        })?;

        Ok(json!({
            "path": self.workspace_relative_display(&resolved),
            "bytes_written": args.content.len(),
        }))
    }

    fn resolve_existing_path(&self, path: &str) -> Result<PathBuf, String> {
        if path.trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }

        let candidate = self.absolute_candidate(path);
        let canonical = candidate
            .canonicalize()
            .map_err(|error| format!("Failed to resolve path {}: {error}", candidate.display()))?;

        self.ensure_inside_workspace(&canonical)?;
        Ok(canonical)
    }

    fn resolve_write_path(&self, path: &str) -> Result<PathBuf, String> {
        if path.trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }

        let candidate = self.absolute_candidate(path);
        let parent = candidate.parent().ok_or_else(|| {
            format!(
                "Path {} has no parent directory and cannot be written safely",
                candidate.display()
            )
        })?;

        let anchor = canonicalize_existing_ancestor(parent)?;
        self.ensure_inside_workspace(&anchor)?;

        Ok(candidate)
    }

    fn absolute_candidate(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    fn ensure_inside_workspace(&self, canonical_path: &Path) -> Result<(), String> {
        if canonical_path.starts_with(&self.workspace_root) {
            Ok(())
        } else {
            Err(format!(
                "Path escapes workspace root: {}",
                canonical_path.display()
            ))
        }
    }

    fn workspace_relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace_root)
            .map(|relative| relative.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }
}

impl ToolExecutor for BuiltinToolExecutor {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            definition(
                READ_FILE_TOOL,
                "Read a UTF-8 text file inside the workspace.",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"],
                    "additionalProperties": false,
                }),
            ),
            definition(
                WRITE_FILE_TOOL,
                "Create or overwrite a file inside the workspace.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "content": { "type": "string" },
                    },
                    "required": ["path", "content"],
                    "additionalProperties": false,
                }),
            ),
            definition(
                EDIT_FILE_TOOL,
                "Replace exactly one occurrence of old_text with new_text in a workspace file.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "old_text": { "type": "string" },
                        "new_text": { "type": "string" },
                    },
                    "required": ["path", "old_text", "new_text"],
                    "additionalProperties": false,
                }),
            ),
            definition(
                BASH_TOOL,
                "Run a bash command in the workspace. Non-zero exit status is reported as a failure.",
                json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string" },
                        "timeout_sec": { "type": "integer", "minimum": 1 },
                        "cwd": { "type": "string" },
                    },
                    "required": ["command"],
                    "additionalProperties": false,
                }),
            ),
        ]
    }

    fn execute_tool_call(&mut self, call: &ToolCall) -> Result<Value, ToolExecutionError> {
        match call.name.as_str() {
            BASH_TOOL => self.execute_bash(decode_arguments(call)?),
            READ_FILE_TOOL => self.execute_read_file(decode_arguments(call)?),
            EDIT_FILE_TOOL => self.execute_edit_file(decode_arguments(call)?),
            WRITE_FILE_TOOL => self.execute_write_file(decode_arguments(call)?),
            unknown => Err(ToolExecutionError::UnknownTool(unknown.to_string())),
        }
    }
}

fn definition(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema,
    }
}

fn decode_arguments<T: DeserializeOwned>(call: &ToolCall) -> Result<T, ToolExecutionError> {
    match &call.arguments {
        ToolArguments::Parsed(value) => serde_json::from_value(value.clone())
            .map_err(|error| ToolExecutionError::invalid_arguments(&call.name, error.to_string())),
        ToolArguments::Raw(raw) => Err(ToolExecutionError::invalid_arguments(
            &call.name,
            format!("arguments are not valid JSON: {raw}"),
        )),
    }
}

fn read_pipe_bytes(pipe: Option<impl Read>) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };

    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes);
    bytes
}

fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, String> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor.canonicalize().map_err(|error| {
                format!("Failed to resolve path {}: {error}", ancestor.display())
            });
        }
    }

    Err(format!(
        "No existing ancestor found for path {}",
        path.display()
    ))
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}
