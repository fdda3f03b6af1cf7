//! Turn orchestration engine for a terminal coding agent.
//!
//! [`orchestrator::Orchestrator`] drives one user message through repeated
//! model calls and tool executions, composing:
//!
//! - stream delivery with transparent non-streaming fallback (`delivery`)
//! - within-round tool-call deduplication (`dedup`)
//! - policy-driven permission gating with an optional ask handler (`permission`)
//! - an optional planning call whose plan is attached as ephemeral context (`planning`)
//! - session-memory compaction of persisted history (`compaction`)
//! - best-effort telemetry and a per-phase model-IO log (`telemetry`, `model_io`)
//!
//! ## Provider bootstrap
//!
//! The binary selects its provider from `CODING_AGENT_PROVIDER`; only `mock`
//! is built in. Library callers pass any [`provider::ModelProvider`].
//!
//! ## Configuration
//!
//! [`config::AgentConfig::from_env`] reads an optional JSON file from
//! `CODING_AGENT_CONFIG_PATH` (unknown fields are rejected), then applies
//! `CODING_AGENT_SYSTEM_INSTRUCTIONS` and `CODING_AGENT_MAX_TOOL_ROUNDS`.
//!
//! Conversation memory contract: the orchestrator owns model-facing history
//! and replays it on every request. Ephemeral context (plans, repository
//! state) is attached to requests only and never persisted.

pub mod commands;
pub mod compaction;
pub mod config;
pub mod context;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod history;
pub mod model_io;
pub mod orchestrator;
pub mod permission;
pub mod planning;
pub mod provider;
pub mod providers;
pub mod telemetry;
pub mod tools;
