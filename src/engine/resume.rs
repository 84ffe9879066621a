//! Resume machinery - the serialisable snapshot that survives a suspension
//!
//! When a specialist asks the user a question, the whole pipeline freezes
//! into a [`ResumeContext`]: the plan, the step cursor, the completed step
//! results, a session snapshot and the specialist's inner-loop state. A
//! valid context suffices to rebuild the prompt the specialist would have
//! produced had the user answered synchronously.
//!
//! Readers must tolerate the legacy variant (none of the three sections
//! present) and respond with a compatibility notice instead of crashing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::session::SessionContext;
use crate::specialist::{
    SpecialistContext, SpecialistLoopState, SpecialistOutput, SpecialistResumeState,
};

use super::plan::{ExecutionPlan, PlanToolCall};

/// What the engine should do with the user's reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    ContinueSpecialistExecution,
    RetryToolCall,
    EscalateToUser,
}

/// Where in the specialist loop execution resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePoint {
    BeforeToolCall,
    AfterToolCall,
    NextIteration,
}

/// What kind of reply the pending question expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedResponse {
    Text,
    Confirmation,
    Selection,
}

/// Declarative guidance for the resume machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeGuidance {
    /// What to do with the reply
    pub next_action: NextAction,
    /// Where the specialist loop picks up
    pub resume_point: ResumePoint,
    /// Expected reply shape
    pub expected_response_type: ExpectedResponse,
}

/// The plan executor's frozen position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExecutorState {
    /// The plan being executed
    pub plan: ExecutionPlan,
    /// Index of the suspended step
    pub current_step: usize,
    /// Outputs of the steps completed before the suspension
    #[serde(default)]
    pub completed_step_results: BTreeMap<usize, SpecialistOutput>,
    /// Session snapshot taken at suspension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serialized_session_context: Option<SessionContext>,
    /// The user input that started the plan
    pub original_user_input: String,
    /// The specialist's loop position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialist_loop_state: Option<SpecialistLoopState>,
}

/// The original askQuestion exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskQuestionContext {
    /// The tool call that asked the question
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_tool_call: Option<PlanToolCall>,
    /// The question text
    pub question: String,
    /// The raw tool result, which embeds the specialist's resume state
    pub original_result: Value,
}

/// Complete snapshot to restart a suspended pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeContext {
    /// Plan executor position; absent in legacy contexts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_executor_state: Option<PlanExecutorState>,
    /// The question exchange; absent in legacy contexts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_question_context: Option<AskQuestionContext>,
    /// Resume guidance; absent in legacy contexts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_guidance: Option<ResumeGuidance>,
}

impl ResumeContext {
    /// A legacy context carries none of the structured sections
    pub fn is_legacy(&self) -> bool {
        self.plan_executor_state.is_none()
            && self.ask_question_context.is_none()
            && self.resume_guidance.is_none()
    }

    /// Reconstruct the specialist's frozen loop state.
    ///
    /// The primary source is the resume state embedded in the raw
    /// askQuestion result; when that is missing or unparseable, fall back
    /// to rebuilding a minimal state from the plan executor's
    /// `specialist_loop_state`.
    pub fn specialist_resume_state(&self) -> Option<SpecialistResumeState> {
        if let Some(ask) = &self.ask_question_context {
            let embedded = ask
                .original_result
                .get("resume_context")
                .or_else(|| ask.original_result.get("resumeContext"));
            if let Some(embedded) = embedded {
                match serde_json::from_value::<SpecialistResumeState>(embedded.clone()) {
                    Ok(state) => return Some(state),
                    Err(e) => {
                        debug!("Embedded specialist resume state unparseable: {}", e);
                    }
                }
            }
        }

        // Fallback: rebuild from the loop state snapshot
        let pes = self.plan_executor_state.as_ref()?;
        let loop_state = pes.specialist_loop_state.as_ref()?;
        Some(SpecialistResumeState {
            specialist_id: loop_state.specialist_id.clone(),
            iteration: loop_state.current_iteration,
            internal_history: loop_state.execution_history.clone(),
            current_plan: None,
            tool_results: Vec::new(),
            context_for_this_step: SpecialistContext {
                user_requirements: pes.original_user_input.clone(),
                ..Default::default()
            },
            user_response: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn plan() -> ExecutionPlan {
        ExecutionPlan {
            plan_id: "p1".into(),
            description: "demo".into(),
            steps: vec![],
        }
    }

    #[test]
    fn legacy_context_deserializes_from_empty_object() {
        let context: ResumeContext = serde_json::from_str("{}").unwrap();
        assert!(context.is_legacy());
        assert!(context.specialist_resume_state().is_none());
    }

    #[test]
    fn embedded_resume_state_is_preferred() {
        let embedded = serde_json::json!({
            "needs_chat_interaction": true,
            "question": "Which modules?",
            "resume_context": {
                "specialist_id": "fr_writer",
                "iteration": 3,
                "internal_history": ["迭代 1: AI计划 tool: readFile"],
                "context_for_this_step": {
                    "user_requirements": "write FRs",
                    "structured_context": {},
                    "project_metadata": {}
                }
            }
        });

        let context = ResumeContext {
            plan_executor_state: Some(PlanExecutorState {
                plan: plan(),
                current_step: 0,
                completed_step_results: BTreeMap::new(),
                serialized_session_context: None,
                original_user_input: "original".into(),
                specialist_loop_state: Some(SpecialistLoopState {
                    specialist_id: "other".into(),
                    current_iteration: 1,
                    max_iterations: 5,
                    execution_history: vec![],
                    is_looping: false,
                    start_time: Utc::now(),
                    last_continue_reason: None,
                }),
            }),
            ask_question_context: Some(AskQuestionContext {
                original_tool_call: None,
                question: "Which modules?".into(),
                original_result: embedded,
            }),
            resume_guidance: None,
        };

        let state = context.specialist_resume_state().unwrap();
        assert_eq!(state.specialist_id, "fr_writer");
        assert_eq!(state.iteration, 3);
        assert_eq!(state.internal_history.len(), 1);
    }

    #[test]
    fn falls_back_to_loop_state_snapshot() {
        let context = ResumeContext {
            plan_executor_state: Some(PlanExecutorState {
                plan: plan(),
                current_step: 1,
                completed_step_results: BTreeMap::new(),
                serialized_session_context: None,
                original_user_input: "cover auth".into(),
                specialist_loop_state: Some(SpecialistLoopState {
                    specialist_id: "fr_writer".into(),
                    current_iteration: 2,
                    max_iterations: 5,
                    execution_history: vec!["迭代 1: something".into()],
                    is_looping: true,
                    start_time: Utc::now(),
                    last_continue_reason: Some("awaiting user".into()),
                }),
            }),
            // Unparseable original result: no embedded resume_context
            ask_question_context: Some(AskQuestionContext {
                original_tool_call: None,
                question: "q".into(),
                original_result: serde_json::json!("just a string"),
            }),
            resume_guidance: None,
        };

        let state = context.specialist_resume_state().unwrap();
        assert_eq!(state.specialist_id, "fr_writer");
        assert_eq!(state.iteration, 2);
        assert_eq!(state.context_for_this_step.user_requirements, "cover auth");
    }

    #[test]
    fn round_trips_through_json() {
        let context = ResumeContext {
            plan_executor_state: Some(PlanExecutorState {
                plan: plan(),
                current_step: 0,
                completed_step_results: BTreeMap::new(),
                serialized_session_context: None,
                original_user_input: "x".into(),
                specialist_loop_state: None,
            }),
            ask_question_context: None,
            resume_guidance: Some(ResumeGuidance {
                next_action: NextAction::ContinueSpecialistExecution,
                resume_point: ResumePoint::NextIteration,
                expected_response_type: ExpectedResponse::Text,
            }),
        };

        let json = serde_json::to_string(&context).unwrap();
        let back: ResumeContext = serde_json::from_str(&json).unwrap();
        assert!(!back.is_legacy());
        assert_eq!(
            back.resume_guidance.unwrap().next_action,
            NextAction::ContinueSpecialistExecution
        );
    }
}
