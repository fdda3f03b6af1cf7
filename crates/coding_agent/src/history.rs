use std::collections::HashSet;

use crate::provider::{Message, Role};

/// Persisted, model-facing conversation owned by one orchestrator.
///
/// Grows by append only; [`ConversationHistory::replace_prefix`] is the single
/// in-place rewrite and is reserved for session-memory compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationHistory {
    system_prompt: String,
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            messages: vec![Message::system(system_prompt.clone())],
            system_prompt,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Replaces the first `count` messages with `replacement`.
    pub(crate) fn replace_prefix(&mut self, count: usize, replacement: Message) {
        let count = count.min(self.messages.len());
        self.messages.splice(..count, std::iter::once(replacement));
    }

    /// Returns true when `message` is the system prompt this history was seeded with.
    pub fn is_seed_prompt(&self, message: &Message) -> bool {
        message.role == Role::System && message.content == self.system_prompt
    }

    /// Assembles outbound request messages: system prompt, then ephemeral context,
    /// then persisted history.
    ///
    /// The seed prompt is not repeated, and tool messages no longer paired with
    /// a preceding assistant tool call are left out of the request.
    pub fn request_messages(&self, ephemeral: &[Message]) -> Vec<Message> {
        let mut request = Vec::with_capacity(1 + ephemeral.len() + self.messages.len());
        request.push(Message::system(self.system_prompt.clone()));
        request.extend(ephemeral.iter().cloned());

        let mut open_call_ids: HashSet<&str> = HashSet::new();
        for (index, message) in self.messages.iter().enumerate() {
            if index == 0 && self.is_seed_prompt(message) {
                continue;
            }

            match message.role {
                Role::Assistant => {
                    open_call_ids = message
                        .tool_calls
                        .iter()
                        .map(|call| call.id.as_str())
                        .collect();
                }
                Role::Tool => {
                    let paired = message
                        .tool_call_id
                        .as_deref()
                        .is_some_and(|id| open_call_ids.contains(id));
                    if !paired {
                        continue;
                    }
                }
                Role::System | Role::User => {}
            }

            request.push(message.clone());
        }

        request
    }
}
