#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use coding_agent::error::{TelemetryError, ToolExecutionError};
use coding_agent::model_io::{ModelIoEvent, ModelIoLogger, ModelIoPhase};
use coding_agent::permission::{PermissionContext, PermissionDecision, PermissionManager};
use coding_agent::provider::{ToolCall, ToolDefinition};
use coding_agent::telemetry::{
    ConversationTurnPayload, FlushOutcome, ModelBehaviorPayload, ModelErrorPayload,
    TelemetryClient,
};
use coding_agent::tools::ToolExecutor;
use serde_json::{json, Value};

#[derive(Default)]
pub struct TelemetryTrace {
    pub turns: Vec<ConversationTurnPayload>,
    pub behaviors: Vec<ModelBehaviorPayload>,
    pub errors: Vec<ModelErrorPayload>,
    pub flush_limits: Vec<Option<usize>>,
}

/// Records every payload; optionally fails every call to prove failures are swallowed.
#[derive(Default)]
pub struct RecordingTelemetry {
    pub trace: Mutex<TelemetryTrace>,
    pub fail: bool,
}

impl RecordingTelemetry {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn outcome(&self) -> Result<(), TelemetryError> {
        if self.fail {
            Err(TelemetryError("telemetry offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl TelemetryClient for RecordingTelemetry {
    fn capture_conversation_turn(
        &self,
        payload: &ConversationTurnPayload,
    ) -> Result<(), TelemetryError> {
        lock_unpoisoned(&self.trace).turns.push(payload.clone());
        self.outcome()
    }

    fn capture_model_behavior(
        &self,
        payload: &ModelBehaviorPayload,
    ) -> Result<(), TelemetryError> {
        lock_unpoisoned(&self.trace).behaviors.push(payload.clone());
        self.outcome()
    }

    fn capture_model_error(&self, payload: &ModelErrorPayload) -> Result<(), TelemetryError> {
        lock_unpoisoned(&self.trace).errors.push(payload.clone());
        self.outcome()
    }

    fn flush(&self, limit: Option<usize>) -> Result<FlushOutcome, TelemetryError> {
        lock_unpoisoned(&self.trace).flush_limits.push(limit);
        self.outcome()?;
        Ok(FlushOutcome {
            flushed: 2,
            skipped: 0,
            metrics: None,
        })
    }
}

#[derive(Default)]
pub struct RecordingLogger {
    pub events: Mutex<Vec<ModelIoEvent>>,
}

impl RecordingLogger {
    pub fn phases(&self) -> Vec<ModelIoPhase> {
        lock_unpoisoned(&self.events)
            .iter()
            .map(|event| event.phase)
            .collect()
    }

    pub fn events(&self) -> Vec<ModelIoEvent> {
        lock_unpoisoned(&self.events).clone()
    }
}

impl ModelIoLogger for RecordingLogger {
    fn log(&self, event: &ModelIoEvent) -> Result<(), TelemetryError> {
        lock_unpoisoned(&self.events).push(event.clone());
        Ok(())
    }
}

/// Executor that counts executions per tool and answers with a fixed shape.
pub struct CountingExecutor {
    executions: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<ToolCall>>>,
    fail_tool: Option<String>,
    panic_tool: Option<String>,
}

impl CountingExecutor {
    pub fn new() -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<ToolCall>>>) {
        let executions = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                executions: Arc::clone(&executions),
                calls: Arc::clone(&calls),
                fail_tool: None,
                panic_tool: None,
            },
            executions,
            calls,
        )
    }

    pub fn failing_on(mut self, tool: &str) -> Self {
        self.fail_tool = Some(tool.to_string());
        self
    }

    pub fn panicking_on(mut self, tool: &str) -> Self {
        self.panic_tool = Some(tool.to_string());
        self
    }
}

impl ToolExecutor for CountingExecutor {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        ["write_file", "read_file", "explode"]
            .into_iter()
            .map(|name| ToolDefinition {
                name: name.to_string(),
                description: None,
                input_schema: json!({ "type": "object" }),
            })
            .collect()
    }

    fn execute_tool_call(&mut self, call: &ToolCall) -> Result<Value, ToolExecutionError> {
        let count = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        lock_unpoisoned(&self.calls).push(call.clone());

        if self.panic_tool.as_deref() == Some(call.name.as_str()) {
            panic!("executor blew up on {}", call.name);
        }
        if self.fail_tool.as_deref() == Some(call.name.as_str()) {
            return Err(ToolExecutionError::failed(format!("{} failed", call.name)));
        }

        Ok(json!({ "tool": call.name, "execution": count }))
    }
}

/// Policy answering with a fixed decision for one tool and allowing the rest.
pub struct ScriptedPermissions {
    tool: String,
    decision: PermissionDecision,
    pub seen: Arc<Mutex<Vec<(String, usize)>>>,
}

impl ScriptedPermissions {
    pub fn new(tool: &str, decision: PermissionDecision) -> Self {
        Self {
            tool: tool.to_string(),
            decision,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl PermissionManager for ScriptedPermissions {
    fn authorize_tool_call(
        &self,
        call: &ToolCall,
        context: &PermissionContext,
    ) -> PermissionDecision {
        lock_unpoisoned(&self.seen).push((call.name.clone(), context.round));
        if call.name == self.tool {
            self.decision.clone()
        } else {
            PermissionDecision::allow()
        }
    }
}

pub fn tool_payload(content: &str) -> Value {
    serde_json::from_str(content).expect("tool message content should be JSON")
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
