use std::fs;
use std::path::Path;

use coding_agent::error::ToolExecutionError;
use coding_agent::provider::ToolCall;
use coding_agent::tools::{BuiltinToolExecutor, ToolExecutor};
use serde_json::json;
use tempfile::tempdir;

fn new_executor(workspace_root: &Path) -> BuiltinToolExecutor {
    BuiltinToolExecutor::new(workspace_root).expect("workspace root should be valid")
}

fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall::new("call-1", name, arguments.to_string())
}

#[test]
fn all_four_tools_have_success_paths() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let written = executor
        .execute_tool_call(&call(
            "write_file",
            json!({ "path": "notes/hello.txt", "content": "hello" }),
        ))
        .expect("write_file should succeed");
    assert_eq!(written["path"], "notes/hello.txt");
    assert_eq!(written["bytes_written"], 5);

    let read = executor
        .execute_tool_call(&call("read_file", json!({ "path": "notes/hello.txt" })))
        .expect("read_file should succeed");
    assert_eq!(read["content"], "hello");

    let edited = executor
        .execute_tool_call(&call(
            "edit_file",
            json!({ "path": "notes/hello.txt", "old_text": "hello", "new_text": "hello world" }),
        ))
        .expect("edit_file should succeed");
    assert_eq!(edited["replacements"], 1);
    assert_eq!(
        fs::read_to_string(workspace.path().join("notes/hello.txt")).expect("file exists"),
        "hello world"
    );

    let bash = executor
        .execute_tool_call(&call(
            "bash",
            json!({ "command": "printf 'bash-ok'", "cwd": "." }),
        ))
        .expect("bash should succeed");
    assert_eq!(bash["status"], "exit_code=0");
    let stdout = bash["stdout"].as_str().unwrap_or_default();
    assert!(stdout.contains("bash-ok"), "{stdout}");
}

#[test]
fn bash_reports_non_zero_exit_as_failure() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let error = executor
        .execute_tool_call(&call("bash", json!({ "command": "echo boom >&2; exit 7" })))
        .expect_err("non-zero exit is a failure");

    let message = error.to_string();
    assert!(message.contains("exit_code=7"), "{message}");
    assert!(message.contains("boom"), "{message}");
}

#[test]
fn bash_timeout_is_reported_as_failure() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let error = executor
        .execute_tool_call(&call(
            "bash",
            json!({ "command": "sleep 5", "timeout_sec": 1 }),
        ))
        .expect_err("timeout is a failure");

    assert!(error.to_string().contains("timeout after 1s"), "{error}");
}

#[test]
fn executor_default_bash_timeout_applies_without_per_call_override() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path()).with_bash_timeout(1);

    let error = executor
        .execute_tool_call(&call("bash", json!({ "command": "sleep 5" })))
        .expect_err("default timeout is a failure");

    assert!(error.to_string().contains("timeout after 1s"), "{error}");
}

#[test]
fn read_file_rejects_path_escape_outside_workspace() {
    let outer = tempdir().expect("outer dir");
    let workspace = outer.path().join("workspace");
    fs::create_dir(&workspace).expect("workspace dir");
    fs::write(outer.path().join("secret.txt"), "secret").expect("outside file");
    let mut executor = new_executor(&workspace);

    let error = executor
        .execute_tool_call(&call("read_file", json!({ "path": "../secret.txt" })))
        .expect_err("escape is rejected");

    assert!(
        error.to_string().contains("Path escapes workspace root"),
        "{error}"
    );
}

#[test]
fn write_file_rejects_path_escape_outside_workspace() {
    let outer = tempdir().expect("outer dir");
    let workspace = outer.path().join("workspace");
    fs::create_dir(&workspace).expect("workspace dir");
    let mut executor = new_executor(&workspace);

    let error = executor
        .execute_tool_call(&call(
            "write_file",
            json!({ "path": "../escaped.txt", "content": "nope" }),
        ))
        .expect_err("escape is rejected");

    assert!(
        error.to_string().contains("Path escapes workspace root"),
        "{error}"
    );
    assert!(!outer.path().join("escaped.txt").exists());
}

#[test]
fn edit_file_fails_when_old_text_has_no_match() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("a.txt"), "alpha").expect("seed file");
    let mut executor = new_executor(workspace.path());

    let error = executor
        .execute_tool_call(&call(
            "edit_file",
            json!({ "path": "a.txt", "old_text": "beta", "new_text": "gamma" }),
        ))
        .expect_err("no match");

    assert!(error.to_string().contains("found 0"), "{error}");
}

#[test]
fn edit_file_fails_when_old_text_has_multiple_matches() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("a.txt"), "x x").expect("seed file");
    let mut executor = new_executor(workspace.path());

    let error = executor
        .execute_tool_call(&call(
            "edit_file",
            json!({ "path": "a.txt", "old_text": "x", "new_text": "y" }),
        ))
        .expect_err("ambiguous match");

    assert!(error.to_string().contains("found 2"), "{error}");
    assert_eq!(
        fs::read_to_string(workspace.path().join("a.txt")).expect("file exists"),
        "x x"
    );
}

#[test]
fn malformed_and_unknown_calls_are_typed_errors() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let malformed = executor
        .execute_tool_call(&ToolCall::new("c1", "read_file", "{\"path\":"))
        .expect_err("raw arguments");
    assert!(matches!(
        malformed,
        ToolExecutionError::InvalidArguments { .. }
    ));

    let missing = executor
        .execute_tool_call(&call("write_file", json!({ "path": "a.txt" })))
        .expect_err("missing content");
    assert!(matches!(missing, ToolExecutionError::InvalidArguments { .. }));

    let unknown = executor
        .execute_tool_call(&call("launch_rockets", json!({})))
        .expect_err("unknown tool");
    assert!(matches!(unknown, ToolExecutionError::UnknownTool(name) if name == "launch_rockets"));
}

#[test]
fn definitions_cover_every_builtin_tool() {
    let workspace = tempdir().expect("temp workspace");
    let executor = new_executor(workspace.path());

    let mut names: Vec<String> = executor
        .tool_definitions()
        .into_iter()
        .map(|definition| definition.name)
        .collect();
    names.sort();

    assert_eq!(names, vec!["bash", "edit_file", "read_file", "write_file"]);
}
