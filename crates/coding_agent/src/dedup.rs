//! Within-round collapsing of identical tool calls.
//!
//! Calls are identical when both the tool name and the raw argument string
//! match byte for byte. The plan is computed per round only; the same call in
//! a later round executes again because the workspace may have changed.

use std::collections::HashMap;

use crate::provider::ToolCall;

/// What to do with one tool call of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupSlot {
    /// First occurrence: execute it.
    Execute,
    /// Repeat of the call at index `of`: reuse its outcome.
    Reuse { of: usize },
}

/// Returns one slot per call, in the original array order.
pub fn plan_round(calls: &[ToolCall]) -> Vec<DedupSlot> {
    let mut first_seen: HashMap<(&str, &str), usize> = HashMap::with_capacity(calls.len());

    calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            let key = (call.name.as_str(), call.raw_arguments.as_str());
            match first_seen.get(&key) {
                Some(&of) => DedupSlot::Reuse { of },
                None => {
                    first_seen.insert(key, index);
                    DedupSlot::Execute
                }
            }
        })
        .collect()
}
