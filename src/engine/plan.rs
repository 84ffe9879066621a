//! Plan types - the LLM's structured decision for one turn

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the planner chose to answer the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseMode {
    /// Short-circuit textual answer (knowledge retrieval tools may still run)
    KnowledgeQa,
    /// A flat, ordered list of tool calls
    ToolExecution,
    /// A multi-step plan dispatched to specialists
    PlanExecution,
}

/// One tool call requested by a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanToolCall {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(default)]
    pub args: Value,
}

/// One step of a multi-step execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step index, 1-based as the LLM writes them
    #[serde(default)]
    pub step: usize,
    /// Specialist that owns this step
    pub specialist: String,
    /// What the step should do
    pub description: String,
    /// What the step is expected to produce
    #[serde(default)]
    pub expected_output: String,
    /// Indices of steps whose results this one depends on
    #[serde(default)]
    pub depends_on: Vec<usize>,
    /// Language or format hint for produced content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

/// A multi-step plan executed by specialists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Plan identifier assigned by the planner
    #[serde(default)]
    pub plan_id: String,
    /// Overall goal description
    #[serde(default)]
    pub description: String,
    /// Ordered steps
    pub steps: Vec<PlanStep>,
}

/// The planner's structured decision for one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiPlan {
    /// The model's reasoning for this turn
    #[serde(default)]
    pub thought: String,
    /// Chosen response mode
    pub response_mode: ResponseMode,
    /// Short-circuit answer, present in `KnowledgeQa` mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_response: Option<String>,
    /// Ordered tool calls, present in `ToolExecution` mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<PlanToolCall>>,
    /// Multi-step plan, present in `PlanExecution` mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<ExecutionPlan>,
}

impl AiPlan {
    /// A plain knowledge-QA answer
    pub fn direct(thought: impl Into<String>, response: impl Into<String>) -> Self {
        AiPlan {
            thought: thought.into(),
            response_mode: ResponseMode::KnowledgeQa,
            direct_response: Some(response.into()),
            tool_calls: None,
            execution_plan: None,
        }
    }

    /// Whether the plan carries any tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plan_execution_payload() {
        let plan: AiPlan = serde_json::from_str(
            r#"{
                "thought": "needs two specialists",
                "response_mode": "PLAN_EXECUTION",
                "execution_plan": {
                    "plan_id": "plan-1",
                    "description": "write the FR chapter",
                    "steps": [
                        {"step": 1, "specialist": "fr_writer", "description": "draft FRs"},
                        {"step": 2, "specialist": "document_formatter", "description": "format", "depends_on": [1]}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(plan.response_mode, ResponseMode::PlanExecution);
        let steps = &plan.execution_plan.as_ref().unwrap().steps;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].depends_on, vec![1]);
    }

    #[test]
    fn response_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&ResponseMode::KnowledgeQa).unwrap(),
            "\"KNOWLEDGE_QA\""
        );
        assert_eq!(
            serde_json::to_string(&ResponseMode::ToolExecution).unwrap(),
            "\"TOOL_EXECUTION\""
        );
    }
}
