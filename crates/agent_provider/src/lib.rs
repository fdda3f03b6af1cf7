//! Minimal provider-agnostic contract for one model call.
//!
//! This crate defines only the message, tool-call, and request/result types
//! shared between the turn orchestrator and model providers. It excludes wire
//! formats, transport details, and multi-round orchestration concerns.

use std::fmt;
use std::ops::AddAssign;

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Error returned while constructing/configuring a provider before any call starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    /// Creates a new provider initialization error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderInitError {}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Error returned by a model call. Fatal for the turn that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<String> for ProviderError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Best-effort parse of a tool call's raw argument string.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    Parsed(Value),
    Raw(String),
}

impl ToolArguments {
    /// Parses raw arguments. Blank input is treated as an empty object; anything
    /// that is not valid JSON is kept verbatim.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Parsed(Value::Object(Map::new()));
        }

        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::Parsed(value),
            Err(_) => Self::Raw(raw.to_string()),
        }
    }

    /// JSON view of the arguments; unparseable input becomes `{"_raw": ...}`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Parsed(value) => value.clone(),
            Self::Raw(raw) => json!({ "_raw": raw }),
        }
    }

    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

impl Serialize for ToolArguments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// A model-emitted request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
    pub arguments: ToolArguments,
}

impl ToolCall {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        let raw_arguments = raw_arguments.into();
        let arguments = ToolArguments::parse(&raw_arguments);
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments,
            arguments,
        }
    }
}

/// Provider-neutral model-facing message history item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning_content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant message carrying tool calls and optional reasoning.
    #[must_use]
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        reasoning_content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            reasoning_content,
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// Generic host-mediated tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Prompt/tool-schema versions stamped on every request and event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractVersions {
    pub prompt_version: String,
    pub tool_schema_version: String,
}

impl ContractVersions {
    #[must_use]
    pub fn new(prompt_version: impl Into<String>, tool_schema_version: impl Into<String>) -> Self {
        Self {
            prompt_version: prompt_version.into(),
            tool_schema_version: tool_schema_version.into(),
        }
    }
}

/// Input for one model call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub trace_id: String,
    pub round: usize,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub contract: ContractVersions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Output of one model call, identical for streaming and non-streaming paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResult {
    pub output_text: String,
    pub finish_reason: String,
    pub tool_calls: Vec<ToolCall>,
    pub message: Message,
    pub usage: Usage,
    pub provider_meta: Value,
}

impl ModelResult {
    /// Builds a result whose assistant message mirrors the text and tool calls.
    #[must_use]
    pub fn new(
        output_text: impl Into<String>,
        reasoning_content: Option<String>,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
    ) -> Self {
        let output_text = output_text.into();
        let finish_reason = if tool_calls.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };

        Self {
            message: Message::assistant_with_tool_calls(
                output_text.clone(),
                reasoning_content,
                tool_calls.clone(),
            ),
            output_text,
            finish_reason: finish_reason.to_string(),
            tool_calls,
            usage,
            provider_meta: Value::Null,
        }
    }
}

/// Result of a streaming attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Delivered(ModelResult),
    /// The provider cannot stream this request; callers may retry without streaming.
    Unsupported { reason: String },
}

/// Immutable metadata describing a model provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
    pub thinking_level: Option<String>,
}

/// Provider interface for executing one model call.
pub trait ModelProvider: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Executes a request and returns the complete result.
    fn complete(&self, request: &ModelRequest) -> Result<ModelResult, ProviderError>;

    /// Executes a request, emitting text deltas in generation order before
    /// returning the result.
    ///
    /// Providers without streaming support keep the default, which reports
    /// [`StreamOutcome::Unsupported`] without emitting any delta.
    fn complete_stream(
        &self,
        request: &ModelRequest,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<StreamOutcome, ProviderError> {
        let _ = (request, on_delta);
        Ok(StreamOutcome::Unsupported {
            reason: "streaming is not supported by this provider".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct MinimalProvider;

    impl ModelProvider for MinimalProvider {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "minimal".to_string(),
                model_id: "minimal-model".to_string(),
                thinking_level: None,
            }
        }

        fn complete(&self, _request: &ModelRequest) -> Result<ModelResult, ProviderError> {
            Ok(ModelResult::new("done", None, Vec::new(), Usage::default()))
        }
    }

    fn request() -> ModelRequest {
        ModelRequest {
            trace_id: "trace-1".to_string(),
            round: 0,
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            contract: ContractVersions::new("p1", "t1"),
        }
    }

    #[test]
    fn provider_errors_preserve_message() {
        let init = ProviderInitError::new("missing token");
        assert_eq!(init.message(), "missing token");
        assert_eq!(init.to_string(), "missing token");

        let error = ProviderError::from("upstream 500");
        assert_eq!(error.message(), "upstream 500");
    }

    #[test]
    fn tool_arguments_parse_valid_json_objects() {
        let call = ToolCall::new("call-1", "read_file", r#"{"path":"README.md"}"#);
        assert_eq!(call.arguments.to_value(), json!({ "path": "README.md" }));
        assert!(!call.arguments.is_raw());
    }

    #[test]
    fn tool_arguments_keep_invalid_json_as_raw() {
        let call = ToolCall::new("call-1", "bash", "{not json");
        assert_eq!(call.arguments, ToolArguments::Raw("{not json".to_string()));
        assert_eq!(call.arguments.to_value(), json!({ "_raw": "{not json" }));
    }

    #[test]
    fn blank_tool_arguments_parse_as_empty_object() {
        let call = ToolCall::new("call-1", "list", "  ");
        assert_eq!(call.arguments.to_value(), json!({}));
    }

    #[test]
    fn default_stream_hook_reports_unsupported_without_deltas() {
        let mut deltas = Vec::new();
        let outcome = MinimalProvider
            .complete_stream(&request(), &mut |delta| deltas.push(delta.to_string()))
            .expect("default stream hook should not fail");

        assert!(matches!(outcome, StreamOutcome::Unsupported { .. }));
        assert!(deltas.is_empty());
    }

    #[test]
    fn model_result_mirrors_tool_calls_into_message() {
        let call = ToolCall::new("call-1", "write_file", "{}");
        let result = ModelResult::new(
            "",
            Some("thinking".to_string()),
            vec![call.clone()],
            Usage::default(),
        );

        assert_eq!(result.finish_reason, "tool_calls");
        assert_eq!(result.message.role, Role::Assistant);
        assert_eq!(result.message.tool_calls, vec![call]);
        assert_eq!(result.message.reasoning_content.as_deref(), Some("thinking"));
    }

    #[test]
    fn messages_serialize_without_empty_optional_fields() {
        let value = serde_json::to_value(Message::tool("call-1", "{}")).expect("serialize");
        assert_eq!(
            value,
            json!({ "role": "tool", "content": "{}", "tool_call_id": "call-1" })
        );
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total += Usage {
            input_tokens: 3,
            output_tokens: 2,
            total_tokens: 5,
        };
        total += Usage {
            input_tokens: 1,
            output_tokens: 1,
            total_tokens: 2,
        };
        assert_eq!(total.total_tokens, 7);
        assert_eq!(total.input_tokens, 4);
    }
}
