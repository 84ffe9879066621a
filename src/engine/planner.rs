//! Planning seam - turns a user task plus context into an [`AiPlan`]
//!
//! The engine only sees the [`Planner`] trait. `LlmPlanner` is the
//! LLM-backed implementation; `StaticPlanner` replays queued plans for
//! tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::llm::{drain_text, ChatRequest, GenerationOptions, LlmClient, Message};
use crate::session::SessionContext;
use crate::specialist::extract_json_object;

use super::plan::{AiPlan, ExecutionPlan, PlanToolCall, ResponseMode};

/// Everything the planner sees for one iteration
#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// The user's task for this turn
    pub current_task: String,
    /// The current session, if any
    pub session: Option<SessionContext>,
    /// Compressed history context
    pub history_context: Vec<String>,
    /// Compressed tool-results context
    pub tool_results_context: Vec<String>,
    /// Tool inventory text for prompt injection
    pub tool_inventory: String,
}

/// The planning seam
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce the plan for one iteration
    async fn plan(&self, request: PlanRequest) -> Result<AiPlan>;
}

// ---------------------------------------------------------------------------
// LLM-backed implementation
// ---------------------------------------------------------------------------

const PLANNER_SYSTEM_PROMPT: &str = "\
You are the orchestrator of a requirements-authoring agent. Decide how to \
handle the user's request and answer with ONE JSON object:
{
  \"thought\": \"why you chose this\",
  \"response_mode\": \"KNOWLEDGE_QA\" | \"TOOL_EXECUTION\" | \"PLAN_EXECUTION\",
  \"direct_response\": \"answer text (KNOWLEDGE_QA only)\",
  \"tool_calls\": [{\"name\": \"...\", \"args\": {}}],
  \"execution_plan\": {\"steps\": [{\"step\": 1, \"specialist\": \"...\", \"description\": \"...\"}]}
}
Use KNOWLEDGE_QA for questions you can answer directly, TOOL_EXECUTION for \
flat tool work, PLAN_EXECUTION for multi-step specialist work.";

/// Planner backed by an [`LlmClient`]
pub struct LlmPlanner {
    llm: std::sync::Arc<dyn LlmClient>,
}

impl LlmPlanner {
    /// Create a planner over a shared client
    pub fn new(llm: std::sync::Arc<dyn LlmClient>) -> Self {
        LlmPlanner { llm }
    }

    fn build_prompt(request: &PlanRequest) -> String {
        let mut prompt = String::new();

        if let Some(session) = &request.session {
            prompt.push_str(&format!(
                "Project: {} (base dir: {})\n\n",
                session.project_name.as_deref().unwrap_or("unnamed"),
                session.base_dir.as_deref().unwrap_or("unknown"),
            ));
        }

        if !request.history_context.is_empty() {
            prompt.push_str("## Execution history\n");
            for line in &request.history_context {
                prompt.push_str(line);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        if !request.tool_results_context.is_empty() {
            prompt.push_str("## Recent tool results\n");
            for line in &request.tool_results_context {
                prompt.push_str(line);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str("## Available tools\n");
        prompt.push_str(&request.tool_inventory);
        prompt.push_str("\n## Task\n");
        prompt.push_str(&request.current_task);
        prompt
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, request: PlanRequest) -> Result<AiPlan> {
        let chat = ChatRequest::new(
            vec![
                Message::system(PLANNER_SYSTEM_PROMPT),
                Message::user(Self::build_prompt(&request)),
            ],
            "Plan the next engine iteration",
        )
        .with_options(GenerationOptions::precise());

        let raw = drain_text(self.llm.send_request(chat).await?).await?;
        Ok(parse_ai_plan(&raw))
    }
}

/// Parse raw planner output, tolerating partially-shaped JSON
pub fn parse_ai_plan(raw: &str) -> AiPlan {
    if let Some(value) = extract_json_object(raw) {
        if let Ok(plan) = serde_json::from_value::<AiPlan>(value.clone()) {
            return plan;
        }
        debug!("Planner output missing or invalid response_mode; inferring");
        return infer_plan_shape(value, raw);
    }
    AiPlan::direct("", raw.trim())
}

/// Infer the response mode from which fields the object carries
fn infer_plan_shape(value: Value, raw: &str) -> AiPlan {
    let thought = value
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Some(plan_value) = value.get("execution_plan") {
        if let Ok(execution_plan) = serde_json::from_value::<ExecutionPlan>(plan_value.clone()) {
            return AiPlan {
                thought,
                response_mode: ResponseMode::PlanExecution,
                direct_response: None,
                tool_calls: None,
                execution_plan: Some(execution_plan),
            };
        }
    }

    if let Some(calls_value) = value.get("tool_calls") {
        if let Ok(tool_calls) = serde_json::from_value::<Vec<PlanToolCall>>(calls_value.clone()) {
            if !tool_calls.is_empty() {
                return AiPlan {
                    thought,
                    response_mode: ResponseMode::ToolExecution,
                    direct_response: None,
                    tool_calls: Some(tool_calls),
                    execution_plan: None,
                };
            }
        }
    }

    let direct = value
        .get("direct_response")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| raw.trim().to_string());
    AiPlan::direct(thought, direct)
}

// ---------------------------------------------------------------------------
// Static implementation
// ---------------------------------------------------------------------------

/// Planner that replays queued plans in order
///
/// When the queue runs dry it answers with a terminating direct response.
pub struct StaticPlanner {
    plans: Mutex<VecDeque<AiPlan>>,
}

impl StaticPlanner {
    /// Create a planner that will replay `plans` in order
    pub fn new(plans: Vec<AiPlan>) -> Self {
        StaticPlanner {
            plans: Mutex::new(plans.into()),
        }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _request: PlanRequest) -> Result<AiPlan> {
        let next = self
            .plans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(next.unwrap_or_else(|| AiPlan::direct("plan queue exhausted", "Task wrapped up.")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_plan() {
        let raw = r#"{"thought": "simple", "response_mode": "TOOL_EXECUTION",
                      "tool_calls": [{"name": "listAllFiles", "args": {}}]}"#;
        let plan = parse_ai_plan(raw);
        assert_eq!(plan.response_mode, ResponseMode::ToolExecution);
        assert_eq!(plan.tool_calls.unwrap()[0].name, "listAllFiles");
    }

    #[test]
    fn infers_mode_from_fields() {
        let raw = r#"{"thought": "t", "tool_calls": [{"name": "readFile", "args": {}}]}"#;
        let plan = parse_ai_plan(raw);
        assert_eq!(plan.response_mode, ResponseMode::ToolExecution);

        let raw = r#"{"execution_plan": {"steps": [{"specialist": "fr_writer", "description": "d"}]}}"#;
        let plan = parse_ai_plan(raw);
        assert_eq!(plan.response_mode, ResponseMode::PlanExecution);

        let raw = r#"{"direct_response": "An NFR is a quality attribute."}"#;
        let plan = parse_ai_plan(raw);
        assert_eq!(plan.response_mode, ResponseMode::KnowledgeQa);
        assert_eq!(
            plan.direct_response.as_deref(),
            Some("An NFR is a quality attribute.")
        );
    }

    #[test]
    fn unparseable_output_becomes_direct_response() {
        let plan = parse_ai_plan("no json here");
        assert_eq!(plan.response_mode, ResponseMode::KnowledgeQa);
        assert_eq!(plan.direct_response.as_deref(), Some("no json here"));
    }

    #[tokio::test]
    async fn static_planner_replays_then_terminates() {
        let planner = StaticPlanner::new(vec![AiPlan::direct("t", "first")]);
        let request = PlanRequest {
            current_task: "x".into(),
            session: None,
            history_context: vec![],
            tool_results_context: vec![],
            tool_inventory: String::new(),
        };

        let first = planner.plan(request.clone()).await.unwrap();
        assert_eq!(first.direct_response.as_deref(), Some("first"));

        let second = planner.plan(request).await.unwrap();
        assert_eq!(second.direct_response.as_deref(), Some("Task wrapped up."));
    }
}
