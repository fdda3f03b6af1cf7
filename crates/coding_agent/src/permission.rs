//! Adapts an external permission policy into an execute/deny branch.

use serde::Serialize;
use serde_json::{json, Value};

use crate::provider::ToolCall;

/// Verdict returned by a permission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionVerdict {
    Allow,
    Deny,
    /// Defer to the interactive ask handler.
    Ask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub verdict: PermissionVerdict,
    pub reason: Option<String>,
    pub rule: Option<String>,
}

impl PermissionDecision {
    pub fn allow() -> Self {
        Self {
            verdict: PermissionVerdict::Allow,
            reason: None,
            rule: None,
        }
    }

    pub fn deny(reason: impl Into<String>, rule: Option<String>) -> Self {
        Self {
            verdict: PermissionVerdict::Deny,
            reason: Some(reason.into()),
            rule,
        }
    }

    pub fn ask(reason: impl Into<String>) -> Self {
        Self {
            verdict: PermissionVerdict::Ask,
            reason: Some(reason.into()),
            rule: None,
        }
    }
}

/// Caller context passed alongside each decision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionContext {
    pub trace_id: String,
    pub round: usize,
}

/// External policy engine. Rule storage and matching live behind this trait.
pub trait PermissionManager: Send + Sync {
    fn authorize_tool_call(&self, call: &ToolCall, context: &PermissionContext)
        -> PermissionDecision;
}

/// Interactive approval callback; `true` approves. Invoked at most once per decision.
///
/// Runs on the turn's thread, so the turn waits for as long as the handler does.
pub type AskHandler = Box<dyn FnMut(&PermissionRequest) -> bool + Send>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl PermissionRequest {
    fn for_call(call: &ToolCall) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.to_value(),
        }
    }
}

/// Final gate decision after any interactive ask was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Allow,
    Deny,
    AskApproved,
    AskRejected,
    AskUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Authorization {
    pub allowed: bool,
    pub decision: GateDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_rule: Option<String>,
    pub request: PermissionRequest,
}

impl Authorization {
    /// Machine-readable tool payload recorded in place of a denied execution.
    pub fn denial_payload(&self) -> Value {
        json!({
            "denied": true,
            "permission": self,
        })
    }
}

const NO_ASK_HANDLER_REASON: &str = "no interactive approval handler configured";

#[derive(Default)]
pub struct PermissionGate {
    manager: Option<Box<dyn PermissionManager>>,
    ask_handler: Option<AskHandler>,
}

impl PermissionGate {
    pub fn new(manager: Option<Box<dyn PermissionManager>>, ask_handler: Option<AskHandler>) -> Self {
        Self {
            manager,
            ask_handler,
        }
    }

    pub fn set_manager(&mut self, manager: Box<dyn PermissionManager>) {
        self.manager = Some(manager);
    }

    pub fn set_ask_handler(&mut self, ask_handler: AskHandler) {
        self.ask_handler = Some(ask_handler);
    }

    /// Decides whether `call` may run. Without a policy engine every call is allowed.
    pub fn authorize(&mut self, call: &ToolCall, context: &PermissionContext) -> Authorization {
        let request = PermissionRequest::for_call(call);
        let Some(manager) = self.manager.as_ref() else {
            return Authorization {
                allowed: true,
                decision: GateDecision::Allow,
                reason: None,
                denied_rule: None,
                request,
            };
        };

        let decision = manager.authorize_tool_call(call, context);
        let (allowed, gate_decision, reason) = match decision.verdict {
            PermissionVerdict::Allow => (true, GateDecision::Allow, decision.reason),
            PermissionVerdict::Deny => (false, GateDecision::Deny, decision.reason),
            PermissionVerdict::Ask => match self.ask_handler.as_mut() {
                Some(ask) => {
                    if ask(&request) {
                        (true, GateDecision::AskApproved, decision.reason)
                    } else {
                        let reason = decision
                            .reason
                            .unwrap_or_else(|| "rejected by user".to_string());
                        (false, GateDecision::AskRejected, Some(reason))
                    }
                }
                None => (
                    false,
                    GateDecision::AskUnavailable,
                    Some(NO_ASK_HANDLER_REASON.to_string()),
                ),
            },
        };

        if !allowed {
            tracing::info!(
                trace_id = %context.trace_id,
                tool = %call.name,
                decision = ?gate_decision,
                "tool call denied by permission gate"
            );
        }

        Authorization {
            allowed,
            decision: gate_decision,
            reason,
            denied_rule: if allowed { None } else { decision.rule },
            request,
        }
    }
}
