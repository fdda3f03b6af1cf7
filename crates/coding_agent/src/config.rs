use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::provider::ContractVersions;

pub const CONFIG_PATH_ENV_VAR: &str = "CODING_AGENT_CONFIG_PATH";
pub const SYSTEM_INSTRUCTIONS_ENV_VAR: &str = "CODING_AGENT_SYSTEM_INSTRUCTIONS";
pub const MAX_TOOL_ROUNDS_ENV_VAR: &str = "CODING_AGENT_MAX_TOOL_ROUNDS";

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str =
    "You are a careful coding agent. Follow user requests exactly, use the available tools to inspect and change the workspace, and fail explicitly when constraints cannot be satisfied.";

const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
const DEFAULT_SUMMARY_TRIGGER_MESSAGES: usize = 60;
const DEFAULT_SUMMARY_KEEP_RECENT: usize = 20;
const DEFAULT_SUMMARY_MAX_CHARS: usize = 6_000;
const DEFAULT_PLANNING_MAX_STEPS: usize = 8;
const DEFAULT_CONTRACT_VERSION: &str = "v1";

/// Orchestrator settings. Every field is optional in JSON; unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Tool rounds allowed per turn; the turn makes at most this many plus one model calls.
    pub max_tool_rounds: usize,
    pub session_summary_trigger_messages: usize,
    pub session_summary_keep_recent: usize,
    pub session_summary_max_chars: usize,
    pub planning_max_steps: usize,
    pub prompt_version: String,
    pub tool_schema_version: String,
    /// Passed to `TelemetryClient::flush` at turn end.
    pub telemetry_flush_limit: Option<usize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            session_summary_trigger_messages: DEFAULT_SUMMARY_TRIGGER_MESSAGES,
            session_summary_keep_recent: DEFAULT_SUMMARY_KEEP_RECENT,
            session_summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            planning_max_steps: DEFAULT_PLANNING_MAX_STEPS,
            prompt_version: DEFAULT_CONTRACT_VERSION.to_string(),
            tool_schema_version: DEFAULT_CONTRACT_VERSION.to_string(),
            telemetry_flush_limit: None,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = sanitize_system_instructions(Some(system_prompt.into()));
        self
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    pub fn with_session_summary(
        mut self,
        trigger_messages: usize,
        keep_recent: usize,
        max_chars: usize,
    ) -> Self {
        self.session_summary_trigger_messages = trigger_messages;
        self.session_summary_keep_recent = keep_recent;
        self.session_summary_max_chars = max_chars;
        self
    }

    pub fn with_planning_max_steps(mut self, planning_max_steps: usize) -> Self {
        self.planning_max_steps = planning_max_steps;
        self
    }

    pub fn with_contract_versions(
        mut self,
        prompt_version: impl Into<String>,
        tool_schema_version: impl Into<String>,
    ) -> Self {
        self.prompt_version = prompt_version.into();
        self.tool_schema_version = tool_schema_version.into();
        self
    }

    pub fn with_telemetry_flush_limit(mut self, limit: usize) -> Self {
        self.telemetry_flush_limit = Some(limit);
        self
    }

    pub fn contract_versions(&self) -> ContractVersions {
        ContractVersions::new(&self.prompt_version, &self.tool_schema_version)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::io("reading config file", path, source))?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.system_prompt = sanitize_system_instructions(Some(config.system_prompt));
        config.validate()?;
        Ok(config)
    }

    /// Loads the optional config file, then applies environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match non_blank_env(CONFIG_PATH_ENV_VAR) {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };

        if let Some(instructions) = non_blank_env(SYSTEM_INSTRUCTIONS_ENV_VAR) {
            config.system_prompt = instructions;
        }

        if let Some(value) = non_blank_env(MAX_TOOL_ROUNDS_ENV_VAR) {
            config.max_tool_rounds = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: MAX_TOOL_ROUNDS_ENV_VAR,
                value: value.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let trigger = self.session_summary_trigger_messages;
        let keep_recent = self.session_summary_keep_recent;

        if trigger < 2 {
            return Err(ConfigError::Invalid(format!(
                "session_summary_trigger_messages must be at least 2, got {trigger}"
            )));
        }

        if keep_recent >= trigger.saturating_sub(1) {
            return Err(ConfigError::Invalid(format!(
                "session_summary_keep_recent ({keep_recent}) must be smaller than session_summary_trigger_messages - 1 ({})",
                trigger - 1
            )));
        }

        if self.session_summary_max_chars == 0 {
            return Err(ConfigError::Invalid(
                "session_summary_max_chars must be greater than 0".to_string(),
            ));
        }

        if self.prompt_version.trim().is_empty() || self.tool_schema_version.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "prompt_version and tool_schema_version must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn sanitize_system_instructions(raw: Option<String>) -> String {
    let Some(value) = raw else {
        return DEFAULT_SYSTEM_INSTRUCTIONS.to_string();
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        DEFAULT_SYSTEM_INSTRUCTIONS.to_string()
    } else {
        trimmed.to_string()
    }
}

fn non_blank_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
