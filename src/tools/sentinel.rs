//! Sentinel tools
//!
//! Three internal tools carry the engine's control-flow signals:
//! `finalAnswer` ends a turn with a structured summary, `taskComplete` ends
//! a specialist task and carries the edit-requirement decision, and
//! `askQuestion` suspends the pipeline until the user replies.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;

use super::traits::{InteractionType, RiskLevel, Tool, ToolDescriptor, ToolLayer, ToolResult};

/// Name of the turn-terminating sentinel
pub const FINAL_ANSWER: &str = "finalAnswer";
/// Name of the task-completion sentinel
pub const TASK_COMPLETE: &str = "taskComplete";
/// Name of the user-question sentinel
pub const ASK_QUESTION: &str = "askQuestion";

/// `nextStepType` value signalling the whole task is done
pub const TASK_FINISHED: &str = "TASK_FINISHED";

/// Register all three sentinels into a registry
pub fn register_sentinels(registry: &super::registry::ToolRegistry) {
    registry.register(FinalAnswerTool);
    registry.register(TaskCompleteTool);
    registry.register(AskQuestionTool);
}

/// Ends the current turn with a structured summary
pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            FINAL_ANSWER,
            "Deliver the final answer for the current task and end the turn",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "What was accomplished"},
                    "result": {"type": "string", "description": "The answer or outcome"},
                    "achievement": {"type": "string", "description": "Optional notable achievement"}
                },
                "required": ["summary"]
            }),
        )
        .with_layer(ToolLayer::Internal)
        .with_category("flow")
        .with_classification(RiskLevel::Low, InteractionType::Autonomous, false)
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        if args.get("summary").and_then(Value::as_str).is_none() {
            return Ok(ToolResult::failure("finalAnswer requires a 'summary' string"));
        }
        Ok(ToolResult::success(json!({
            "final_answer": args,
        })))
    }
}

/// Ends a specialist task; the result carries the edit-requirement decision
pub struct TaskCompleteTool;

#[async_trait]
impl Tool for TaskCompleteTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            TASK_COMPLETE,
            "Signal that the current specialist task is complete",
            json!({
                "type": "object",
                "properties": {
                    "nextStepType": {
                        "type": "string",
                        "enum": ["TASK_FINISHED", "CONTINUE_SAME_SPECIALIST", "HANDOFF_TO_SPECIALIST"]
                    },
                    "summary": {"type": "string"},
                    "contextForNext": {
                        "type": "object",
                        "properties": {
                            "projectState": {
                                "type": "object",
                                "properties": {
                                    "requires_file_editing": {"type": "boolean"},
                                    "target_file": {"type": "string"},
                                    "edit_instructions": {"type": "array"},
                                    "content": {"type": "string"}
                                }
                            }
                        }
                    }
                },
                "required": ["summary"]
            }),
        )
        .with_layer(ToolLayer::Internal)
        .with_category("flow")
        .with_classification(RiskLevel::Low, InteractionType::Autonomous, false)
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        if args.get("summary").and_then(Value::as_str).is_none() {
            return Ok(ToolResult::failure(
                "taskComplete requires a 'summary' string",
            ));
        }

        let next_step_type = args
            .get("nextStepType")
            .and_then(Value::as_str)
            .unwrap_or(TASK_FINISHED)
            .to_string();

        let mut payload = json!({
            "completed": true,
            "nextStepType": next_step_type,
            "summary": args.get("summary").cloned().unwrap_or(Value::Null),
        });
        if let Some(context_for_next) = args.get("contextForNext") {
            payload["contextForNext"] = context_for_next.clone();
        }

        Ok(ToolResult::success(payload))
    }
}

/// Suspends the pipeline with a question for the user
pub struct AskQuestionTool;

#[async_trait]
impl Tool for AskQuestionTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            ASK_QUESTION,
            "Ask the user a clarifying question and wait for the reply",
            json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string", "description": "The question to ask"},
                    "context": {"type": "string", "description": "Why the answer is needed"}
                },
                "required": ["question"]
            }),
        )
        .with_layer(ToolLayer::Internal)
        .with_category("flow")
        .with_classification(RiskLevel::Low, InteractionType::Interactive, false)
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let Some(question) = args.get("question").and_then(Value::as_str) else {
            return Ok(ToolResult::failure(
                "askQuestion requires a 'question' string",
            ));
        };

        Ok(ToolResult::success(json!({
            "needs_chat_interaction": true,
            "chat_question": question,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ask_question_carries_the_interaction_flag() {
        let result = AskQuestionTool
            .execute(json!({"question": "Which modules should we cover?"}))
            .await
            .unwrap();
        assert!(result.success);
        let content = result.content.unwrap();
        assert_eq!(content["needs_chat_interaction"], true);
        assert_eq!(content["chat_question"], "Which modules should we cover?");
    }

    #[tokio::test]
    async fn ask_question_requires_a_question() {
        let result = AskQuestionTool.execute(json!({})).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn task_complete_defaults_to_task_finished() {
        let result = TaskCompleteTool
            .execute(json!({"summary": "done"}))
            .await
            .unwrap();
        let content = result.content.unwrap();
        assert_eq!(content["nextStepType"], TASK_FINISHED);
        assert_eq!(content["completed"], true);
    }

    #[tokio::test]
    async fn task_complete_propagates_project_state() {
        let result = TaskCompleteTool
            .execute(json!({
                "summary": "wrote FRs",
                "contextForNext": {
                    "projectState": {
                        "requires_file_editing": true,
                        "target_file": "SRS.md",
                        "edit_instructions": [{"type": "replace_section"}]
                    }
                }
            }))
            .await
            .unwrap();
        let content = result.content.unwrap();
        assert_eq!(
            content["contextForNext"]["projectState"]["requires_file_editing"],
            true
        );
    }

    #[tokio::test]
    async fn final_answer_requires_summary() {
        assert!(!FinalAnswerTool.execute(json!({})).await.unwrap().success);
        assert!(
            FinalAnswerTool
                .execute(json!({"summary": "answered"}))
                .await
                .unwrap()
                .success
        );
    }
}
