//! Provider contract re-exports used by `coding_agent`.

pub use agent_provider::{
    ContractVersions, Message, ModelProvider, ModelRequest, ModelResult, ProviderError,
    ProviderInitError, ProviderProfile, Role, StreamOutcome, ToolArguments, ToolCall,
    ToolDefinition, Usage,
};
