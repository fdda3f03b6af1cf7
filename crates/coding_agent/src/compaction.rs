//! Session-memory compaction.
//!
//! Once persisted history reaches the trigger size, everything except the
//! most recent messages is folded into a single system message. User requests
//! are carried into the digest verbatim so they stay recoverable by substring
//! search, and an earlier summary's entries are carried forward into the next
//! one.
//!
//! Digest entries are one per line, except user entries, which are framed as
//! `- user [N chars]: <text>` so a multi-line request survives re-parsing.

use serde::Serialize;
use serde_json::json;

use crate::history::ConversationHistory;
use crate::model_io::{ModelIoPhase, ModelIoSink};
use crate::provider::{Message, Role};

pub const SESSION_SUMMARY_PREFIX: &str = "Session memory summary:";

const USER_ENTRY_PREFIX: &str = "- user [";
const USER_ENTRY_LENGTH_SUFFIX: &str = " chars]: ";
const ASSISTANT_ENTRY_MAX_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub digest: String,
    pub folded_messages: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMemoryCompactor {
    trigger_messages: usize,
    keep_recent: usize,
    max_digest_chars: usize,
}

impl SessionMemoryCompactor {
    pub fn new(trigger_messages: usize, keep_recent: usize, max_digest_chars: usize) -> Self {
        Self {
            trigger_messages,
            keep_recent,
            max_digest_chars,
        }
    }

    pub fn should_compact(&self, history: &ConversationHistory) -> bool {
        history.len() >= self.trigger_messages && history.len() > self.keep_recent + 1
    }

    /// Folds old messages into one summary when the trigger is reached.
    ///
    /// Afterwards the history holds exactly `1 + keep_recent` messages.
    pub fn compact(
        &self,
        history: &mut ConversationHistory,
        sink: &ModelIoSink<'_>,
    ) -> Option<SessionSummary> {
        if !self.should_compact(history) {
            return None;
        }

        let old_count = history.len();
        let fold_count = old_count - self.keep_recent;
        let entries = self.digest_entries(history, &history.messages()[..fold_count]);
        let digest = bound_entries(entries, self.max_digest_chars).join("\n");

        history.replace_prefix(
            fold_count,
            Message::system(format!("{SESSION_SUMMARY_PREFIX}\n{digest}")),
        );

        tracing::debug!(
            old_count,
            new_count = history.len(),
            folded = fold_count,
            "session memory compacted"
        );
        sink.emit(
            ModelIoPhase::SessionSummaryUpdate,
            None,
            json!({
                "old_count": old_count,
                "new_count": history.len(),
                "digest_chars": digest.chars().count(),
            }),
        );

        Some(SessionSummary {
            digest,
            folded_messages: fold_count,
        })
    }

    fn digest_entries(&self, history: &ConversationHistory, folded: &[Message]) -> Vec<Entry> {
        let mut entries = Vec::new();

        for message in folded {
            match message.role {
                Role::System => {
                    if let Some(previous) = message.content.strip_prefix(SESSION_SUMMARY_PREFIX) {
                        entries.extend(parse_summary_entries(previous));
                    } else if !history.is_seed_prompt(message) {
                        entries.push(Entry::other(format!(
                            "- note: {}",
                            clip(&message.content, ASSISTANT_ENTRY_MAX_CHARS)
                        )));
                    }
                }
                Role::User => entries.push(Entry::user(&message.content)),
                Role::Assistant => {
                    let mut text = String::from("- assistant:");
                    if !message.content.trim().is_empty() {
                        text.push(' ');
                        text.push_str(&clip(&message.content, ASSISTANT_ENTRY_MAX_CHARS));
                    }
                    if !message.tool_calls.is_empty() {
                        let names: Vec<&str> = message
                            .tool_calls
                            .iter()
                            .map(|call| call.name.as_str())
                            .collect();
                        text.push_str(&format!(" [called {}]", names.join(", ")));
                    }
                    entries.push(Entry::other(text));
                }
                Role::Tool => {
                    let outcome = tool_outcome_label(&message.content);
                    let id = message.tool_call_id.as_deref().unwrap_or("?");
                    entries.push(Entry::other(format!("- tool {id}: {outcome}")));
                }
            }
        }

        entries
    }
}

#[derive(Debug, Clone)]
struct Entry {
    user: bool,
    text: String,
}

impl Entry {
    fn user(request: &str) -> Self {
        Self {
            user: true,
            text: format!(
                "{USER_ENTRY_PREFIX}{}{USER_ENTRY_LENGTH_SUFFIX}{request}",
                request.chars().count()
            ),
        }
    }

    fn other(text: String) -> Self {
        Self { user: false, text }
    }
}

/// Splits an earlier digest back into entries, reading user entries by their
/// declared length and everything else line by line.
fn parse_summary_entries(digest: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut rest = digest.strip_prefix('\n').unwrap_or(digest);

    while !rest.is_empty() {
        if let Some((request, tail)) = split_user_entry(rest) {
            entries.push(Entry::user(request));
            rest = tail;
            continue;
        }

        let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        if !line.trim().is_empty() {
            entries.push(Entry::other(line.to_string()));
        }
        rest = tail;
    }

    entries
}

fn split_user_entry(text: &str) -> Option<(&str, &str)> {
    let framed = text.strip_prefix(USER_ENTRY_PREFIX)?;
    let (length, body) = framed.split_once(USER_ENTRY_LENGTH_SUFFIX)?;
    let length: usize = length.parse().ok()?;

    let end = match body.char_indices().nth(length) {
        Some((index, _)) => index,
        None if body.chars().count() == length => body.len(),
        None => return None,
    };

    let (request, tail) = body.split_at(end);
    Some((request, tail.strip_prefix('\n').unwrap_or(tail)))
}

/// Drops the oldest non-user entries first, then the oldest user entries,
/// until the joined digest fits in `max_chars`.
fn bound_entries(mut entries: Vec<Entry>, max_chars: usize) -> Vec<String> {
    let total = |entries: &[Entry]| -> usize {
        entries
            .iter()
            .map(|entry| entry.text.chars().count() + 1)
            .sum::<usize>()
            .saturating_sub(1)
    };

    while total(&entries) > max_chars {
        match entries.iter().position(|entry| !entry.user) {
            Some(index) => {
                entries.remove(index);
            }
            None if !entries.is_empty() => {
                entries.remove(0);
            }
            None => break,
        }
    }

    entries.into_iter().map(|entry| entry.text).collect()
}

fn tool_outcome_label(content: &str) -> &'static str {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) if value.get("denied").and_then(|v| v.as_bool()) == Some(true) => "denied",
        Ok(value) if value.get("ok").and_then(|v| v.as_bool()) == Some(false) => "failed",
        _ => "ok",
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }

    let mut clipped: String = single_line.chars().take(max_chars).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ContractVersions, ToolCall};

    fn sink_contract() -> ContractVersions {
        ContractVersions::new("v1", "v1")
    }

    fn history_with_turns(turns: &[&str]) -> ConversationHistory {
        let mut history = ConversationHistory::new("system prompt");
        for turn in turns {
            history.push(Message::user(*turn));
            history.push(Message::assistant(format!("answer to {turn}")));
        }
        history
    }

    #[test]
    fn below_threshold_is_a_no_op() {
        let contract = sink_contract();
        let sink = ModelIoSink::disabled("trace", &contract);
        let mut history = history_with_turns(&["one"]);

        let summary = SessionMemoryCompactor::new(4, 2, 1_000).compact(&mut history, &sink);

        assert!(summary.is_none());
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn compaction_keeps_recent_messages_and_summarizes_the_rest() {
        let contract = sink_contract();
        let sink = ModelIoSink::disabled("trace", &contract);
        let mut history = history_with_turns(&["first request", "second request"]);

        let summary = SessionMemoryCompactor::new(4, 2, 1_000)
            .compact(&mut history, &sink)
            .expect("compaction should run");

        assert_eq!(history.len(), 3);
        assert_eq!(summary.folded_messages, 3);
        let head = &history.messages()[0];
        assert_eq!(head.role, Role::System);
        assert!(head.content.starts_with(SESSION_SUMMARY_PREFIX));
        assert!(head.content.contains("first request"));
        assert!(!head.content.contains("system prompt"));
        assert_eq!(history.messages()[1].content, "second request");
    }

    #[test]
    fn earlier_summaries_are_carried_forward() {
        let contract = sink_contract();
        let sink = ModelIoSink::disabled("trace", &contract);
        let compactor = SessionMemoryCompactor::new(4, 2, 1_000);
        let mut history = history_with_turns(&["alpha", "beta"]);
        compactor.compact(&mut history, &sink);

        history.push(Message::user("gamma"));
        history.push(Message::assistant("answer to gamma"));
        compactor.compact(&mut history, &sink).expect("second compaction");

        let head = &history.messages()[0].content;
        assert!(head.contains("- user [5 chars]: alpha"));
        assert!(head.contains("- user [4 chars]: beta"));
        assert_eq!(head.matches(SESSION_SUMMARY_PREFIX).count(), 1);
    }

    #[test]
    fn digest_bound_drops_non_user_entries_first() {
        let contract = sink_contract();
        let sink = ModelIoSink::disabled("trace", &contract);
        let mut history = ConversationHistory::new("sys");
        history.push(Message::user("keep me"));
        history.push(Message::assistant("x".repeat(200)));
        history.push(Message::user("recent"));
        history.push(Message::assistant("recent answer"));

        let summary = SessionMemoryCompactor::new(4, 2, 20)
            .compact(&mut history, &sink)
            .expect("compaction");

        assert_eq!(summary.digest, "- user [7 chars]: keep me");
    }

    #[test]
    fn tool_entries_record_outcomes() {
        let contract = sink_contract();
        let sink = ModelIoSink::disabled("trace", &contract);
        let mut history = ConversationHistory::new("sys");
        history.push(Message::user("write it"));
        history.push(Message::assistant_with_tool_calls(
            "",
            None,
            vec![ToolCall::new("c1", "write_file", "{}")],
        ));
        history.push(Message::tool("c1", r#"{"denied":true,"permission":{}}"#));
        history.push(Message::assistant("could not write"));
        history.push(Message::user("ok"));

        let summary = SessionMemoryCompactor::new(5, 1, 1_000)
            .compact(&mut history, &sink)
            .expect("compaction");

        assert!(summary.digest.contains("[called write_file]"));
        assert!(summary.digest.contains("- tool c1: denied"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn multi_line_requests_survive_repeated_compaction() {
        let contract = sink_contract();
        let sink = ModelIoSink::disabled("trace", &contract);
        let compactor = SessionMemoryCompactor::new(4, 2, 10_000);
        let multi_line = "fix the parser:\n  handle  tabs\n- note: not an entry";
        let long = format!("long request {}", "word ".repeat(400));
        let mut history = history_with_turns(&[multi_line, long.as_str()]);

        compactor.compact(&mut history, &sink).expect("first compaction");
        history.push(Message::user("third"));
        history.push(Message::assistant("answer to third"));
        compactor.compact(&mut history, &sink).expect("second compaction");

        let head = &history.messages()[0].content;
        assert!(head.contains(multi_line));
        assert!(head.contains(&long));

        let body = head
            .strip_prefix(SESSION_SUMMARY_PREFIX)
            .expect("summary prefix");
        let users: Vec<Entry> = parse_summary_entries(body)
            .into_iter()
            .filter(|entry| entry.user)
            .collect();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].text, Entry::user(multi_line).text);
    }
}
