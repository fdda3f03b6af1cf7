//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing. Replies are scripted up
//! front and served in order; once the script is exhausted the provider either
//! repeats the last reply or echoes the latest user message.

use std::sync::{Mutex, MutexGuard};

use agent_provider::{
    Message, ModelProvider, ModelRequest, ModelResult, ProviderError, ProviderProfile, Role,
    StreamOutcome, ToolCall, Usage,
};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// One scripted model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedReply {
    text: String,
    reasoning_content: Option<String>,
    tool_calls: Vec<ToolCall>,
    failure: Option<String>,
}

impl ScriptedReply {
    /// Final assistant text with no tool calls.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reasoning_content: None,
            tool_calls: Vec::new(),
            failure: None,
        }
    }

    /// A reply requesting a single tool call.
    #[must_use]
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        Self::text("").and_tool_call(id, name, raw_arguments)
    }

    /// A reply whose model call fails with a provider error.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::text("")
        }
    }

    #[must_use]
    pub fn and_tool_call(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        self.tool_calls.push(ToolCall::new(id, name, raw_arguments));
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning_content = Some(reasoning.into());
        self
    }

    fn to_result(&self, request: &ModelRequest) -> Result<ModelResult, ProviderError> {
        if let Some(failure) = &self.failure {
            return Err(ProviderError::new(failure.clone()));
        }

        let input_tokens = request.messages.len() as u64;
        let output_tokens = self.text.split_whitespace().count() as u64;
        Ok(ModelResult::new(
            self.text.clone(),
            self.reasoning_content.clone(),
            self.tool_calls.clone(),
            Usage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
        ))
    }
}

/// Streaming behavior of the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Streams whitespace-delimited tokens of the reply text.
    #[default]
    Chunked,
    /// Emits `after_deltas` tokens, then reports streaming as unsupported.
    Unsupported { after_deltas: usize },
}

#[derive(Debug, Default)]
struct MockState {
    cursor: usize,
    calls: usize,
    stream_calls: usize,
    requests: Vec<ModelRequest>,
}

/// Deterministic mock provider used by `coding_agent` tests and local runs.
#[derive(Debug)]
pub struct MockProvider {
    script: Vec<ScriptedReply>,
    repeat_last: bool,
    stream_mode: StreamMode,
    model_id: String,
    state: Mutex<MockState>,
}

impl MockProvider {
    /// Creates a mock that serves `script` in order, then echoes user input.
    #[must_use]
    pub fn new(script: Vec<ScriptedReply>) -> Self {
        Self {
            script,
            repeat_last: false,
            stream_mode: StreamMode::default(),
            model_id: "mock".to_string(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Creates a mock that serves `reply` for every call.
    #[must_use]
    pub fn repeating(reply: ScriptedReply) -> Self {
        Self::new(vec![reply]).with_repeat_last(true)
    }

    #[must_use]
    pub fn with_repeat_last(mut self, repeat_last: bool) -> Self {
        self.repeat_last = repeat_last;
        self
    }

    #[must_use]
    pub fn with_stream_mode(mut self, stream_mode: StreamMode) -> Self {
        self.stream_mode = stream_mode;
        self
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        let trimmed = model_id.trim();
        if !trimmed.is_empty() {
            self.model_id = trimmed.to_string();
        }
        self
    }

    /// Total number of `complete` and `complete_stream` invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock_unpoisoned(&self.state).calls
    }

    /// Number of `complete_stream` invocations.
    #[must_use]
    pub fn stream_call_count(&self) -> usize {
        lock_unpoisoned(&self.state).stream_calls
    }

    /// Requests observed so far, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock_unpoisoned(&self.state).requests.clone()
    }

    fn reply_at(&self, cursor: usize) -> Option<ScriptedReply> {
        match self.script.get(cursor) {
            Some(reply) => Some(reply.clone()),
            None if self.repeat_last => self.script.last().cloned(),
            None => None,
        }
    }

    fn record_call(&self, request: &ModelRequest, streaming: bool) -> usize {
        let mut state = lock_unpoisoned(&self.state);
        state.calls += 1;
        if streaming {
            state.stream_calls += 1;
        }
        state.requests.push(request.clone());
        state.cursor
    }

    fn advance(&self) {
        lock_unpoisoned(&self.state).cursor += 1;
    }

    fn serve(&self, request: &ModelRequest, cursor: usize) -> Result<ModelResult, ProviderError> {
        self.advance();
        match self.reply_at(cursor) {
            Some(reply) => reply.to_result(request),
            None => ScriptedReply::text(echo_text(request)).to_result(request),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ModelProvider for MockProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
            thinking_level: None,
        }
    }

    fn complete(&self, request: &ModelRequest) -> Result<ModelResult, ProviderError> {
        let cursor = self.record_call(request, false);
        self.serve(request, cursor)
    }

    fn complete_stream(
        &self,
        request: &ModelRequest,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<StreamOutcome, ProviderError> {
        let cursor = self.record_call(request, true);

        if let StreamMode::Unsupported { after_deltas } = self.stream_mode {
            let text = self
                .reply_at(cursor)
                .map(|reply| reply.text)
                .unwrap_or_else(|| echo_text(request));
            for token in tokenize(&text).into_iter().take(after_deltas) {
                on_delta(&token);
            }

            return Ok(StreamOutcome::Unsupported {
                reason: "mock provider streaming disabled".to_string(),
            });
        }

        let result = self.serve(request, cursor)?;
        for token in tokenize(&result.output_text) {
            on_delta(&token);
        }

        Ok(StreamOutcome::Delivered(result))
    }
}

fn echo_text(request: &ModelRequest) -> String {
    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message: &Message| message.content.as_str())
        .unwrap_or("");

    format!("Mock response: {last_user}")
}

/// Splits text into whitespace-terminated tokens; concatenating them yields the input.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending_token = String::new();

    for ch in text.chars() {
        pending_token.push(ch);
        if matches!(ch, ' ' | '\n') {
            tokens.push(std::mem::take(&mut pending_token));
        }
    }

    if !pending_token.is_empty() {
        tokens.push(pending_token);
    }

    tokens
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
