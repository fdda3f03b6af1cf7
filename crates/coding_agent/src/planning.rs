//! Optional pre-round planning step.
//!
//! The plan is produced by one extra model call without tools and injected
//! into the turn's requests as ephemeral system context. It never enters
//! persisted history.

use serde::{Deserialize, Serialize};

use crate::provider::{
    ContractVersions, Message, ModelProvider, ModelRequest, ProviderError, Usage,
};

pub const PLANNING_INSTRUCTIONS: &str = "Before acting, produce a short execution plan for the user's latest request. Reply with JSON only: {\"goal\": \"...\", \"steps\": [\"...\"]}. Do not call tools.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<String>,
    pub status: PlanStatus,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            steps,
            status: PlanStatus::Pending,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn complete(&mut self) {
        self.status = PlanStatus::Completed;
    }

    /// Ephemeral system message carrying the plan into requests.
    pub fn context_message(&self) -> Message {
        let mut content = format!("Current plan for this turn.\nGoal: {}\nSteps:", self.goal);
        for (index, step) in self.steps.iter().enumerate() {
            content.push_str(&format!("\n{}. {step}", index + 1));
        }
        Message::system(content)
    }
}

/// Output of the planning call.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningOutcome {
    pub plan: Option<Plan>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    goal: String,
    #[serde(default)]
    steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanningCoordinator {
    max_steps: usize,
}

impl PlanningCoordinator {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    /// Asks the model for a plan covering `user_text`, given the request
    /// messages built so far (system prompt, ephemeral context, history).
    pub fn plan(
        &self,
        provider: &dyn ModelProvider,
        trace_id: &str,
        contract: &ContractVersions,
        mut messages: Vec<Message>,
        user_text: &str,
    ) -> Result<PlanningOutcome, ProviderError> {
        messages.insert(1usize.min(messages.len()), Message::system(PLANNING_INSTRUCTIONS));
        messages.push(Message::user(user_text));

        let request = ModelRequest {
            trace_id: trace_id.to_string(),
            round: 0,
            messages,
            tools: Vec::new(),
            contract: contract.clone(),
        };

        let result = provider.complete(&request)?;

        let plan = self
            .parse_plan(&result.output_text, user_text)
            .filter(|plan| !plan.is_empty());

        Ok(PlanningOutcome {
            plan,
            usage: result.usage,
        })
    }

    /// Accepts a JSON object (optionally fenced) or a plain list of steps.
    pub fn parse_plan(&self, text: &str, fallback_goal: &str) -> Option<Plan> {
        let trimmed = strip_code_fence(text.trim());
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(reply) = serde_json::from_str::<PlanReply>(trimmed) {
            let steps = self.clean_steps(reply.steps);
            let goal = if reply.goal.trim().is_empty() {
                fallback_goal.trim().to_string()
            } else {
                reply.goal.trim().to_string()
            };
            return Some(Plan::new(goal, steps));
        }

        let mut goal = None;
        let mut steps = Vec::new();
        for line in trimmed.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if let Some(rest) = strip_prefix_ignore_case(line, "goal:") {
                goal = Some(rest.trim().to_string());
            } else if let Some(step) = strip_list_marker(line) {
                steps.push(step.to_string());
            }
        }

        let goal = goal.unwrap_or_else(|| fallback_goal.trim().to_string());
        Some(Plan::new(goal, self.clean_steps(steps)))
    }

    fn clean_steps(&self, steps: Vec<String>) -> Vec<String> {
        steps
            .into_iter()
            .map(|step| step.trim().to_string())
            .filter(|step| !step.is_empty())
            .take(self.max_steps)
            .collect()
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };

    let body = body.trim_start_matches(|ch: char| ch.is_ascii_alphanumeric());
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        line.get(prefix.len()..)
    } else {
        None
    }
}

fn strip_list_marker(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim());
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    let rest = &line[digits..];
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use agent_provider_mock::{MockProvider, ScriptedReply};

    use super::*;
    use crate::provider::Role;

    #[test]
    fn parses_json_plans() {
        let plan = PlanningCoordinator::new(8)
            .parse_plan(
                r#"{"goal":"add tests","steps":["read code","write tests"]}"#,
                "fallback",
            )
            .expect("plan");

        assert_eq!(plan.goal, "add tests");
        assert_eq!(plan.steps, vec!["read code", "write tests"]);
        assert_eq!(plan.status, PlanStatus::Pending);
    }

    #[test]
    fn parses_fenced_json_plans() {
        let plan = PlanningCoordinator::new(8)
            .parse_plan(
                "```json\n{\"goal\":\"g\",\"steps\":[\"s1\"]}\n```",
                "fallback",
            )
            .expect("plan");
        assert_eq!(plan.steps, vec!["s1"]);
    }

    #[test]
    fn parses_plain_text_lists_and_caps_steps() {
        let plan = PlanningCoordinator::new(2)
            .parse_plan(
                "Goal: fix the bug\n1. reproduce\n2) patch\n- verify",
                "fallback",
            )
            .expect("plan");

        assert_eq!(plan.goal, "fix the bug");
        assert_eq!(plan.steps, vec!["reproduce", "patch"]);
    }

    #[test]
    fn text_without_steps_yields_empty_plan() {
        let plan = PlanningCoordinator::new(4)
            .parse_plan("I will just answer.", "question")
            .expect("plan");
        assert!(plan.is_empty());
        assert_eq!(plan.goal, "question");
    }

    #[test]
    fn plan_call_sends_instructions_without_tools() {
        let provider = MockProvider::new(vec![ScriptedReply::text(
            r#"{"goal":"g","steps":["one"]}"#,
        )]);
        let contract = ContractVersions::new("v1", "v1");

        let outcome = PlanningCoordinator::new(8)
            .plan(
                &provider,
                "trace",
                &contract,
                vec![Message::system("sys")],
                "do the thing",
            )
            .expect("planning call");

        let plan = outcome.plan.expect("non-empty plan");
        assert_eq!(plan.steps, vec!["one"]);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_empty());
        assert_eq!(requests[0].messages[1].content, PLANNING_INSTRUCTIONS);
        let last = requests[0].messages.last().expect("user message");
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "do the thing");
    }

    #[test]
    fn context_message_numbers_steps() {
        let plan = Plan::new("g", vec!["a".to_string(), "b".to_string()]);
        let message = plan.context_message();
        assert_eq!(message.role, Role::System);
        assert!(message.content.contains("Goal: g"));
        assert!(message.content.contains("1. a\n2. b"));
    }
}
