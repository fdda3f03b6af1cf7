//! Telemetry client contract and turn payloads.

use serde::Serialize;
use serde_json::Value;

use crate::compaction::SessionSummary;
use crate::error::TelemetryError;
use crate::orchestrator::{LatencyBreakdown, ToolExecutionRecord};
use crate::planning::Plan;
use crate::provider::{ContractVersions, Usage};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurnPayload {
    pub trace_id: String,
    pub contract: ContractVersions,
    pub user_text: String,
    pub final_text: String,
    pub usage: Usage,
    pub latency: LatencyBreakdown,
    pub tool_executions: Vec<ToolExecutionRecord>,
    pub plan: Option<Plan>,
    pub session_summary: Option<SessionSummary>,
    pub round_limit_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelBehaviorPayload {
    pub trace_id: String,
    pub contract: ContractVersions,
    pub model_calls: u64,
    pub tool_rounds: u64,
    pub finish_reasons: Vec<String>,
    pub reused_tool_calls: usize,
    pub denied_tool_calls: usize,
    pub failed_tool_calls: usize,
    pub stream_fallbacks: usize,
    pub planning: bool,
    pub round_limit_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelErrorPayload {
    pub trace_id: String,
    pub contract: ContractVersions,
    pub round: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlushOutcome {
    pub flushed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
}

/// Transport, spooling, and retry live behind this trait.
pub trait TelemetryClient: Send + Sync {
    fn capture_conversation_turn(
        &self,
        payload: &ConversationTurnPayload,
    ) -> Result<(), TelemetryError>;

    fn capture_model_behavior(&self, payload: &ModelBehaviorPayload)
        -> Result<(), TelemetryError>;

    fn capture_model_error(&self, payload: &ModelErrorPayload) -> Result<(), TelemetryError> {
        let _ = payload;
        Ok(())
    }

    fn flush(&self, limit: Option<usize>) -> Result<FlushOutcome, TelemetryError>;
}

/// Reports payload summaries through `tracing`; nothing is buffered.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetryClient for TracingTelemetry {
    fn capture_conversation_turn(
        &self,
        payload: &ConversationTurnPayload,
    ) -> Result<(), TelemetryError> {
        tracing::info!(
            trace_id = %payload.trace_id,
            model_calls = payload.latency.model_calls,
            tool_calls = payload.latency.tool_calls,
            tool_failures = payload.latency.tool_failures,
            total_tokens = payload.usage.total_tokens,
            "conversation turn"
        );
        Ok(())
    }

    fn capture_model_behavior(
        &self,
        payload: &ModelBehaviorPayload,
    ) -> Result<(), TelemetryError> {
        tracing::debug!(
            trace_id = %payload.trace_id,
            reused = payload.reused_tool_calls,
            denied = payload.denied_tool_calls,
            stream_fallbacks = payload.stream_fallbacks,
            round_limit_reached = payload.round_limit_reached,
            "model behavior"
        );
        Ok(())
    }

    fn capture_model_error(&self, payload: &ModelErrorPayload) -> Result<(), TelemetryError> {
        tracing::warn!(
            trace_id = %payload.trace_id,
            round = payload.round,
            error = %payload.error,
            "model call failed"
        );
        Ok(())
    }

    fn flush(&self, _limit: Option<usize>) -> Result<FlushOutcome, TelemetryError> {
        Ok(FlushOutcome {
            flushed: 0,
            skipped: 0,
            metrics: None,
        })
    }
}
