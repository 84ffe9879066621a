//! Plan executor - drives a multi-step execution plan through specialists
//!
//! Steps run strictly in order, each specialist seeing the outputs of the
//! steps it depends on. A specialist question suspends the whole plan into
//! a [`ResumeContext`]; `resume_specialist` restarts the suspended step
//! with the user's reply and then continues the remaining steps.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::SpecialistLimits;
use crate::error::{Error, Result};
use crate::session::SessionStore;
use crate::specialist::{
    SpecialistContext, SpecialistInteractionResult, SpecialistLoopState, SpecialistOutput,
    SpecialistResult, SpecialistRunner, SpecialistSpec, StructuredContext,
};
use crate::tools::{ASK_QUESTION, TASK_FINISHED};

use super::plan::{ExecutionPlan, PlanToolCall};
use super::resume::{
    AskQuestionContext, ExpectedResponse, NextAction, PlanExecutorState, ResumeContext,
    ResumeGuidance, ResumePoint,
};

/// Outcome of running (or resuming) a plan
#[derive(Debug, Clone)]
pub enum PlanExecutionResult {
    /// Every step completed
    Completed {
        /// Human-readable outcome summary
        summary: String,
    },
    /// A step failed and the plan stopped
    Failed {
        /// What went wrong
        error: String,
    },
    /// A specialist asked the user a question
    UserInteractionRequired {
        /// The question for the user
        question: String,
        /// Frozen pipeline snapshot
        resume_context: ResumeContext,
    },
}

/// Executes multi-step plans over the specialist runner
pub struct PlanExecutor {
    runner: Arc<SpecialistRunner>,
    session_store: Arc<SessionStore>,
    specialists: RwLock<HashMap<String, SpecialistSpec>>,
    limits: SpecialistLimits,
}

impl PlanExecutor {
    /// Create an executor over a runner and the shared session store
    pub fn new(
        runner: Arc<SpecialistRunner>,
        session_store: Arc<SessionStore>,
        limits: SpecialistLimits,
    ) -> Self {
        PlanExecutor {
            runner,
            session_store,
            specialists: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// Register a specialist role so plan steps can resolve its category
    pub fn register_specialist(&self, spec: SpecialistSpec) {
        self.specialists
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(spec.id.clone(), spec);
    }

    /// Resolve a specialist id; unknown ids default to a content role
    pub fn specialist_spec(&self, id: &str) -> SpecialistSpec {
        self.specialists
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_else(|| {
                warn!("Unknown specialist '{}', treating as content role", id);
                SpecialistSpec::content(id, id)
            })
    }

    /// Execute a plan from its first step
    pub async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        original_user_input: &str,
        model: &str,
    ) -> Result<PlanExecutionResult> {
        info!(
            "Executing plan '{}' with {} steps",
            plan.plan_id,
            plan.steps.len()
        );
        self.run_from(plan, 0, BTreeMap::new(), original_user_input, model)
            .await
    }

    /// Continue a plan after `current_step` produced `specialist_result`
    pub async fn continue_execution(
        &self,
        plan: &ExecutionPlan,
        current_step: usize,
        mut step_results: BTreeMap<usize, SpecialistOutput>,
        original_user_input: &str,
        model: &str,
        specialist_result: Option<SpecialistOutput>,
    ) -> Result<PlanExecutionResult> {
        if let Some(output) = specialist_result {
            step_results.insert(current_step, output);
        }
        self.run_from(
            plan,
            current_step + 1,
            step_results,
            original_user_input,
            model,
        )
        .await
    }

    /// Resume the suspended specialist with the user's reply, then continue
    /// the remaining plan steps.
    pub async fn resume_specialist(
        &self,
        context: &ResumeContext,
        user_reply: &str,
        model: &str,
    ) -> Result<PlanExecutionResult> {
        let pes = context
            .plan_executor_state
            .clone()
            .ok_or_else(|| Error::Resume("resume context has no plan executor state".into()))?;
        let mut state = context
            .specialist_resume_state()
            .ok_or_else(|| Error::Resume("resume context has no specialist state".into()))?;
        state.user_response = Some(user_reply.to_string());

        // Restore the session snapshot; the live session wins on identity
        if let Some(snapshot) = &pes.serialized_session_context {
            match self.session_store.current_session() {
                Some(mut live) => {
                    live.merge_snapshot(snapshot);
                    self.session_store.set_session(live);
                }
                None => self.session_store.set_session(snapshot.clone()),
            }
        }

        let spec = self.specialist_spec(&state.specialist_id);
        let step_context = state.context_for_this_step.clone();

        match self
            .runner
            .execute(&spec, step_context, model, Some(state))
            .await?
        {
            SpecialistResult::Interaction(interaction) => Ok(self.suspend(
                &pes.plan,
                pes.current_step,
                pes.completed_step_results.clone(),
                &pes.original_user_input,
                interaction,
            )),
            SpecialistResult::Output(output) if output.success => {
                let finished = output
                    .structured_data
                    .as_ref()
                    .and_then(|d| d.get("nextStepType"))
                    .and_then(Value::as_str)
                    == Some(TASK_FINISHED);

                if finished && pes.current_step + 1 >= pes.plan.steps.len() {
                    return Ok(PlanExecutionResult::Completed {
                        summary: output
                            .content
                            .unwrap_or_else(|| "Plan completed".to_string()),
                    });
                }

                self.continue_execution(
                    &pes.plan,
                    pes.current_step,
                    pes.completed_step_results,
                    &pes.original_user_input,
                    model,
                    Some(output),
                )
                .await
            }
            SpecialistResult::Output(output) => Ok(PlanExecutionResult::Failed {
                error: output
                    .error
                    .unwrap_or_else(|| "specialist failed without an error message".to_string()),
            }),
        }
    }

    async fn run_from(
        &self,
        plan: &ExecutionPlan,
        start_step: usize,
        mut results: BTreeMap<usize, SpecialistOutput>,
        original_user_input: &str,
        model: &str,
    ) -> Result<PlanExecutionResult> {
        for idx in start_step..plan.steps.len() {
            let step = &plan.steps[idx];
            let spec = self.specialist_spec(&step.specialist);
            let context = build_step_context(plan, idx, &results, original_user_input);

            match self.runner.execute(&spec, context, model, None).await? {
                SpecialistResult::Interaction(interaction) => {
                    return Ok(self.suspend(plan, idx, results, original_user_input, interaction));
                }
                SpecialistResult::Output(output) if output.success => {
                    results.insert(idx, output);
                }
                SpecialistResult::Output(output) => {
                    return Ok(PlanExecutionResult::Failed {
                        error: output.error.unwrap_or_else(|| {
                            format!("step {} ({}) failed", idx + 1, step.specialist)
                        }),
                    });
                }
            }
        }

        let summary = results
            .values()
            .last()
            .and_then(|output| output.content.clone())
            .unwrap_or_else(|| format!("Plan completed: {} steps", plan.steps.len()));
        Ok(PlanExecutionResult::Completed { summary })
    }

    /// Freeze the plan position and the specialist's loop state
    fn suspend(
        &self,
        plan: &ExecutionPlan,
        step_index: usize,
        results: BTreeMap<usize, SpecialistOutput>,
        original_user_input: &str,
        interaction: SpecialistInteractionResult,
    ) -> PlanExecutionResult {
        let loop_state = SpecialistLoopState {
            specialist_id: interaction.resume_context.specialist_id.clone(),
            current_iteration: interaction.resume_context.iteration,
            max_iterations: self.limits.max_internal_iterations,
            execution_history: interaction.resume_context.internal_history.clone(),
            is_looping: true,
            start_time: Utc::now(),
            last_continue_reason: Some("awaiting user reply".to_string()),
        };

        let original_result = serde_json::to_value(&interaction).unwrap_or(Value::Null);

        let resume_context = ResumeContext {
            plan_executor_state: Some(PlanExecutorState {
                plan: plan.clone(),
                current_step: step_index,
                completed_step_results: results,
                serialized_session_context: self.session_store.current_session(),
                original_user_input: original_user_input.to_string(),
                specialist_loop_state: Some(loop_state),
            }),
            ask_question_context: Some(AskQuestionContext {
                original_tool_call: Some(PlanToolCall {
                    name: ASK_QUESTION.to_string(),
                    args: json!({"question": interaction.question}),
                }),
                question: interaction.question.clone(),
                original_result,
            }),
            resume_guidance: Some(ResumeGuidance {
                next_action: NextAction::ContinueSpecialistExecution,
                resume_point: ResumePoint::NextIteration,
                expected_response_type: ExpectedResponse::Text,
            }),
        };

        PlanExecutionResult::UserInteractionRequired {
            question: interaction.question,
            resume_context,
        }
    }
}

/// Assemble the context one plan step hands its specialist
fn build_step_context(
    plan: &ExecutionPlan,
    step_index: usize,
    results: &BTreeMap<usize, SpecialistOutput>,
    original_user_input: &str,
) -> SpecialistContext {
    let step = &plan.steps[step_index];

    // depends_on names 1-based step numbers; resolve them against the
    // steps' own numbering, falling back to all prior results
    let dependent_results: Vec<Value> = if step.depends_on.is_empty() {
        results
            .values()
            .filter_map(|output| serde_json::to_value(output).ok())
            .collect()
    } else {
        step.depends_on
            .iter()
            .filter_map(|dep| {
                plan.steps
                    .iter()
                    .position(|s| s.step == *dep)
                    .and_then(|idx| results.get(&idx))
            })
            .filter_map(|output| serde_json::to_value(output).ok())
            .collect()
    };

    SpecialistContext {
        user_requirements: original_user_input.to_string(),
        structured_context: StructuredContext {
            current_step: serde_json::to_value(step).ok(),
            dependent_results,
            internal_history: Vec::new(),
            user_response: None,
        },
        project_metadata: serde_json::Map::new(),
    }
}
