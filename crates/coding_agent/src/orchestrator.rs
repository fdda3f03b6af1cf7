//! Turn orchestration.
//!
//! One [`Orchestrator::run_turn`] drives a user message through up to
//! `max_tool_rounds + 1` model calls. Tool failures and permission denials are
//! folded into tool-role messages; only provider failures end the turn early.
//! The orchestrator owns its history exclusively, so turns on one instance are
//! serialized by `&mut self`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::compaction::{SessionMemoryCompactor, SessionSummary};
use crate::config::AgentConfig;
use crate::context::ContextProvider;
use crate::dedup::{plan_round, DedupSlot};
use crate::delivery::StreamDeliveryController;
use crate::error::{ConfigError, ToolExecutionError, TurnError};
use crate::history::ConversationHistory;
use crate::model_io::{ModelIoLogger, ModelIoPhase, ModelIoSink};
use crate::permission::{
    Authorization, PermissionContext, PermissionGate, PermissionManager, PermissionRequest,
};
use crate::planning::{Plan, PlanningCoordinator};
use crate::provider::{
    ContractVersions, Message, ModelProvider, ModelRequest, ProviderError, ToolCall, Usage,
};
use crate::telemetry::{
    ConversationTurnPayload, FlushOutcome, ModelBehaviorPayload, ModelErrorPayload,
    TelemetryClient,
};
use crate::tools::ToolExecutor;

pub const ROUND_LIMIT_MESSAGE: &str = "Tool-call round limit reached before final response.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyBreakdown {
    pub model_ms: u64,
    pub tool_ms: u64,
    pub other_ms: u64,
    pub model_calls: u64,
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub tool_rounds: u64,
}

/// Outcome of one tool-call attempt within a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecutionRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<Authorization>,
    pub reused: bool,
}

impl ToolExecutionRecord {
    fn denied(call: &ToolCall, authorization: Authorization) -> Self {
        let error = authorization
            .reason
            .clone()
            .unwrap_or_else(|| "denied by permission policy".to_string());
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.to_value(),
            ok: false,
            result: None,
            error: Some(error),
            duration_ms: 0,
            denied: true,
            permission: Some(authorization),
            reused: false,
        }
    }

    /// Copy of this outcome answering a duplicate call with its own id.
    fn reused_for(&self, call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            reused: true,
            ..self.clone()
        }
    }

    /// Tool-role message content for this outcome.
    pub fn payload(&self) -> Value {
        if let (true, Some(permission)) = (self.denied, self.permission.as_ref()) {
            return permission.denial_payload();
        }

        if self.ok {
            json!({ "ok": true, "result": self.result.clone().unwrap_or(Value::Null) })
        } else {
            json!({ "ok": false, "error": self.error.clone().unwrap_or_default() })
        }
    }

    fn is_failure(&self) -> bool {
        !self.ok && !self.denied
    }
}

/// Per-turn switches and callbacks.
///
/// `on_plan` runs at most once per turn. `on_text_delta` runs zero or more
/// times, strictly in generation order, and never after `run_turn` returns.
/// `on_stream_reset` receives the number of most recent deltas that belonged
/// to a streaming attempt abandoned for the non-streaming fallback.
#[derive(Default)]
pub struct TurnOptions<'a> {
    pub stream: bool,
    pub planning: bool,
    pub on_plan: Option<&'a mut dyn FnMut(&Plan)>,
    pub on_text_delta: Option<&'a mut dyn FnMut(&str)>,
    pub on_stream_reset: Option<&'a mut dyn FnMut(usize)>,
}

impl<'a> TurnOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn planning(mut self, planning: bool) -> Self {
        self.planning = planning;
        self
    }

    pub fn on_plan(mut self, on_plan: &'a mut dyn FnMut(&Plan)) -> Self {
        self.on_plan = Some(on_plan);
        self
    }

    pub fn on_text_delta(mut self, on_text_delta: &'a mut dyn FnMut(&str)) -> Self {
        self.on_text_delta = Some(on_text_delta);
        self
    }

    pub fn on_stream_reset(mut self, on_stream_reset: &'a mut dyn FnMut(usize)) -> Self {
        self.on_stream_reset = Some(on_stream_reset);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResult {
    pub trace_id: String,
    pub final_text: String,
    pub usage: Usage,
    pub latency: LatencyBreakdown,
    pub plan: Option<Plan>,
    pub session_summary: Option<SessionSummary>,
    pub contract_versions: ContractVersions,
    pub flush: Option<FlushOutcome>,
    pub tool_executions: Vec<ToolExecutionRecord>,
    pub round_limit_reached: bool,
}

#[derive(Debug, Default)]
struct TurnStats {
    model_time: Duration,
    tool_time: Duration,
    model_calls: u64,
    tool_calls: u64,
    tool_failures: u64,
    tool_rounds: u64,
    usage: Usage,
    finish_reasons: Vec<String>,
    stream_fallbacks: usize,
}

impl TurnStats {
    fn latency(&self, total: Duration) -> LatencyBreakdown {
        let model_ms = millis(self.model_time);
        let tool_ms = millis(self.tool_time);
        LatencyBreakdown {
            model_ms,
            tool_ms,
            other_ms: millis(total).saturating_sub(model_ms + tool_ms),
            model_calls: self.model_calls,
            tool_calls: self.tool_calls,
            tool_failures: self.tool_failures,
            tool_rounds: self.tool_rounds,
        }
    }
}

pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    config: AgentConfig,
    contract: ContractVersions,
    history: ConversationHistory,
    tool_executor: Option<Box<dyn ToolExecutor>>,
    permission_gate: PermissionGate,
    telemetry: Option<Arc<dyn TelemetryClient>>,
    model_io_logger: Option<Arc<dyn ModelIoLogger>>,
    context_providers: Vec<Box<dyn ContextProvider>>,
    delivery: StreamDeliveryController,
    planner: PlanningCoordinator,
    compactor: SessionMemoryCompactor,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, config: AgentConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            provider,
            contract: config.contract_versions(),
            history: ConversationHistory::new(config.system_prompt.clone()),
            tool_executor: None,
            permission_gate: PermissionGate::default(),
            telemetry: None,
            model_io_logger: None,
            context_providers: Vec::new(),
            delivery: StreamDeliveryController::new(),
            planner: PlanningCoordinator::new(config.planning_max_steps),
            compactor: SessionMemoryCompactor::new(
                config.session_summary_trigger_messages,
                config.session_summary_keep_recent,
                config.session_summary_max_chars,
            ),
            config,
        })
    }

    pub fn with_tool_executor(mut self, executor: Box<dyn ToolExecutor>) -> Self {
        self.tool_executor = Some(executor);
        self
    }

    pub fn with_permission_manager(mut self, manager: Box<dyn PermissionManager>) -> Self {
        self.permission_gate.set_manager(manager);
        self
    }

    pub fn with_ask_handler(
        mut self,
        ask_handler: impl FnMut(&PermissionRequest) -> bool + Send + 'static,
    ) -> Self {
        self.permission_gate.set_ask_handler(Box::new(ask_handler));
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryClient>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_model_io_logger(mut self, logger: Arc<dyn ModelIoLogger>) -> Self {
        self.model_io_logger = Some(logger);
        self
    }

    pub fn with_context_provider(mut self, provider: Box<dyn ContextProvider>) -> Self {
        self.context_providers.push(provider);
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn contract_versions(&self) -> &ContractVersions {
        &self.contract
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn run_turn(
        &mut self,
        user_text: &str,
        mut options: TurnOptions<'_>,
    ) -> Result<TurnResult, TurnError> {
        let started = Instant::now();
        let trace_id = Uuid::new_v4().to_string();
        let contract = self.contract.clone();
        let logger = self.model_io_logger.clone();
        let sink = ModelIoSink::new(logger.as_deref(), &trace_id, &contract);
        let mut stats = TurnStats::default();

        let mut ephemeral = self.collect_context();
        let mut plan = None;
        if options.planning {
            plan = self.run_planning(user_text, &ephemeral, &trace_id, &sink, &mut stats);
            if let Some(plan) = plan.as_ref() {
                if let Some(on_plan) = options.on_plan.as_deref_mut() {
                    on_plan(plan);
                }
                ephemeral.push(plan.context_message());
            }
        }

        self.history.push(Message::user(user_text));

        let tools = self
            .tool_executor
            .as_ref()
            .map(|executor| executor.tool_definitions())
            .unwrap_or_default();
        let max_rounds = self.config.max_tool_rounds;
        let mut final_text = String::new();
        let mut round_limit_reached = false;
        let mut tool_executions = Vec::new();

        for round in 0..=max_rounds {
            let request = ModelRequest {
                trace_id: trace_id.clone(),
                round,
                messages: self.history.request_messages(&ephemeral),
                tools: tools.clone(),
                contract: contract.clone(),
            };
            sink.emit(
                ModelIoPhase::ModelRequest,
                Some(round),
                json!({
                    "messages": request.messages.len(),
                    "tools": request.tools.len(),
                    "stream": options.stream,
                }),
            );

            let call_started = Instant::now();
            let delivered = {
                let on_text_delta = &mut options.on_text_delta;
                let on_stream_reset = &mut options.on_stream_reset;
                let mut forward = |delta: &str| {
                    if let Some(on_text_delta) = on_text_delta.as_deref_mut() {
                        on_text_delta(delta);
                    }
                };
                let mut reset = |discarded: usize| {
                    if let Some(on_stream_reset) = on_stream_reset.as_deref_mut() {
                        on_stream_reset(discarded);
                    }
                };
                self.delivery.deliver(
                    self.provider.as_ref(),
                    &request,
                    options.stream,
                    &mut forward,
                    &mut reset,
                    &sink,
                )
            };
            stats.model_time += call_started.elapsed();
            stats.model_calls += 1;

            let delivery = match delivered {
                Ok(delivery) => delivery,
                Err(source) => return Err(self.abort_turn(round, source, &trace_id, &sink)),
            };
            if delivery.fell_back {
                stats.stream_fallbacks += 1;
            }

            let result = delivery.result;
            stats.usage += result.usage;
            stats.finish_reasons.push(result.finish_reason.clone());
            sink.emit(
                ModelIoPhase::ModelResponse,
                Some(round),
                json!({
                    "finish_reason": result.finish_reason,
                    "tool_calls": result.tool_calls.len(),
                    "output_chars": result.output_text.chars().count(),
                    "usage": result.usage,
                    "streamed": delivery.streamed,
                    "fell_back": delivery.fell_back,
                }),
            );

            if result.tool_calls.is_empty() || self.tool_executor.is_none() {
                final_text = result.output_text;
                self.history.push(Message::assistant(final_text.clone()));
                break;
            }

            let mut assistant = result.message;
            if assistant.tool_calls.is_empty() {
                assistant.tool_calls = result.tool_calls.clone();
            }
            self.history.push(assistant);

            let records = self.execute_round(round, &result.tool_calls, &trace_id, &sink);
            stats.tool_rounds += 1;
            for record in &records {
                self.history
                    .push(Message::tool(record.id.clone(), record.payload().to_string()));
                stats.tool_calls += 1;
                if record.is_failure() {
                    stats.tool_failures += 1;
                }
                if !record.reused {
                    stats.tool_time += Duration::from_millis(record.duration_ms);
                }
            }
            tool_executions.extend(records);

            if round == max_rounds {
                tracing::info!(%trace_id, max_rounds, "tool-call round limit reached");
                final_text = ROUND_LIMIT_MESSAGE.to_string();
                self.history.push(Message::assistant(ROUND_LIMIT_MESSAGE));
                round_limit_reached = true;
            }
        }

        if let Some(plan) = plan.as_mut() {
            plan.complete();
        }

        let latency = stats.latency(started.elapsed());
        let session_summary = self.compactor.compact(&mut self.history, &sink);

        let turn_payload = ConversationTurnPayload {
            trace_id: trace_id.clone(),
            contract: contract.clone(),
            user_text: user_text.to_string(),
            final_text: final_text.clone(),
            usage: stats.usage,
            latency,
            tool_executions: tool_executions.clone(),
            plan: plan.clone(),
            session_summary: session_summary.clone(),
            round_limit_reached,
        };
        let behavior_payload = ModelBehaviorPayload {
            trace_id: trace_id.clone(),
            contract: contract.clone(),
            model_calls: stats.model_calls,
            tool_rounds: stats.tool_rounds,
            finish_reasons: stats.finish_reasons.clone(),
            reused_tool_calls: tool_executions.iter().filter(|r| r.reused).count(),
            denied_tool_calls: tool_executions.iter().filter(|r| r.denied).count(),
            failed_tool_calls: tool_executions.iter().filter(|r| r.is_failure()).count(),
            stream_fallbacks: stats.stream_fallbacks,
            planning: options.planning,
            round_limit_reached,
        };
        let flush = self.emit_turn_telemetry(&turn_payload, &behavior_payload);

        sink.emit(
            ModelIoPhase::TurnEnd,
            None,
            json!({
                "final_chars": final_text.chars().count(),
                "usage": stats.usage,
                "latency": latency,
                "history_len": self.history.len(),
                "round_limit_reached": round_limit_reached,
            }),
        );

        Ok(TurnResult {
            trace_id,
            final_text,
            usage: stats.usage,
            latency,
            plan,
            session_summary,
            contract_versions: contract,
            flush,
            tool_executions,
            round_limit_reached,
        })
    }

    fn collect_context(&mut self) -> Vec<Message> {
        self.context_providers
            .iter_mut()
            .filter_map(|provider| {
                let context = provider.build_context()?;
                tracing::debug!(provider = provider.name(), "ephemeral context attached");
                Some(Message::system(context))
            })
            .collect()
    }

    fn run_planning(
        &self,
        user_text: &str,
        ephemeral: &[Message],
        trace_id: &str,
        sink: &ModelIoSink<'_>,
        stats: &mut TurnStats,
    ) -> Option<Plan> {
        sink.emit(
            ModelIoPhase::ModelRequest,
            None,
            json!({ "purpose": "planning" }),
        );

        let call_started = Instant::now();
        let outcome = self.planner.plan(
            self.provider.as_ref(),
            trace_id,
            &self.contract,
            self.history.request_messages(ephemeral),
            user_text,
        );
        stats.model_time += call_started.elapsed();
        stats.model_calls += 1;

        match outcome {
            Ok(outcome) => {
                stats.usage += outcome.usage;
                sink.emit(
                    ModelIoPhase::ModelResponse,
                    None,
                    json!({
                        "purpose": "planning",
                        "steps": outcome.plan.as_ref().map_or(0, |plan| plan.steps.len()),
                    }),
                );
                outcome.plan
            }
            Err(error) => {
                tracing::warn!(%trace_id, %error, "planning call failed, continuing without a plan");
                None
            }
        }
    }

    fn execute_round(
        &mut self,
        round: usize,
        calls: &[ToolCall],
        trace_id: &str,
        sink: &ModelIoSink<'_>,
    ) -> Vec<ToolExecutionRecord> {
        let context = PermissionContext {
            trace_id: trace_id.to_string(),
            round,
        };
        let mut records: Vec<ToolExecutionRecord> = Vec::with_capacity(calls.len());

        for (call, slot) in calls.iter().zip(plan_round(calls)) {
            let record = match slot {
                DedupSlot::Reuse { of } => {
                    let record = records[of].reused_for(call);
                    tracing::debug!(tool = %call.name, id = %call.id, "reusing duplicate tool call");
                    sink.emit(
                        ModelIoPhase::ToolResult,
                        Some(round),
                        tool_result_event(&record),
                    );
                    record
                }
                DedupSlot::Execute => self.execute_call(call, &context, sink),
            };
            records.push(record);
        }

        records
    }

    fn execute_call(
        &mut self,
        call: &ToolCall,
        context: &PermissionContext,
        sink: &ModelIoSink<'_>,
    ) -> ToolExecutionRecord {
        sink.emit(
            ModelIoPhase::ToolStart,
            Some(context.round),
            json!({
                "id": call.id,
                "name": call.name,
                "arguments": call.arguments,
            }),
        );

        let authorization = self.permission_gate.authorize(call, context);
        let record = if authorization.allowed {
            let started = Instant::now();
            let outcome = match self.tool_executor.as_mut() {
                Some(executor) => catch_unwind(AssertUnwindSafe(|| executor.execute_tool_call(call)))
                    .unwrap_or_else(|_| Err(ToolExecutionError::Panicked(call.name.clone()))),
                None => Err(ToolExecutionError::UnknownTool(call.name.clone())),
            };
            let duration_ms = millis(started.elapsed());

            if let Err(error) = &outcome {
                tracing::debug!(tool = %call.name, id = %call.id, %error, "tool call failed");
            }

            let (ok, result, error) = match outcome {
                Ok(value) => (true, Some(value), None),
                Err(error) => (false, None, Some(error.to_string())),
            };
            ToolExecutionRecord {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.to_value(),
                ok,
                result,
                error,
                duration_ms,
                denied: false,
                permission: Some(authorization),
                reused: false,
            }
        } else {
            ToolExecutionRecord::denied(call, authorization)
        };

        sink.emit(
            ModelIoPhase::ToolResult,
            Some(context.round),
            tool_result_event(&record),
        );
        record
    }

    fn emit_turn_telemetry(
        &self,
        turn: &ConversationTurnPayload,
        behavior: &ModelBehaviorPayload,
    ) -> Option<FlushOutcome> {
        let telemetry = self.telemetry.as_ref()?;

        if let Err(error) = telemetry.capture_conversation_turn(turn) {
            tracing::debug!(trace_id = %turn.trace_id, %error, "conversation turn telemetry dropped");
        }
        if let Err(error) = telemetry.capture_model_behavior(behavior) {
            tracing::debug!(trace_id = %turn.trace_id, %error, "model behavior telemetry dropped");
        }

        match telemetry.flush(self.config.telemetry_flush_limit) {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                tracing::debug!(trace_id = %turn.trace_id, %error, "telemetry flush failed");
                None
            }
        }
    }

    fn abort_turn(
        &self,
        round: usize,
        source: ProviderError,
        trace_id: &str,
        sink: &ModelIoSink<'_>,
    ) -> TurnError {
        tracing::warn!(%trace_id, round, error = %source, "model call failed, aborting turn");
        sink.emit(
            ModelIoPhase::TurnEnd,
            Some(round),
            json!({ "error": source.message() }),
        );

        if let Some(telemetry) = self.telemetry.as_ref() {
            let payload = ModelErrorPayload {
                trace_id: trace_id.to_string(),
                contract: self.contract.clone(),
                round,
                error: source.message().to_string(),
            };
            if let Err(error) = telemetry.capture_model_error(&payload) {
                tracing::debug!(%trace_id, %error, "model error telemetry dropped");
            }
            if let Err(error) = telemetry.flush(self.config.telemetry_flush_limit) {
                tracing::debug!(%trace_id, %error, "telemetry flush failed");
            }
        }

        TurnError::provider(round, source)
    }
}

fn tool_result_event(record: &ToolExecutionRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "ok": record.ok,
        "denied": record.denied,
        "reused": record.reused,
        "duration_ms": record.duration_ms,
        "error": record.error,
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
