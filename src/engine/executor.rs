//! Agent execution engine - the outer state machine
//!
//! One engine owns one user session. Every call to [`AgentEngine::execute_task`]
//! either terminates (`Completed` / `Error`) or suspends (`AwaitingUser`);
//! [`AgentEngine::handle_user_response`] round-trips the suspension. The
//! engine never caches the session: every access reads the store's current
//! value, and a cleared session while suspended completes the turn.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::history::HistoryCompressor;
use crate::session::{
    ObserverHandle, OperationType, SessionContext, SessionLogEntry, SessionObserver, SessionStore,
};
use crate::tools::{InteractionType, ToolLayer, ToolRegistry, FINAL_ANSWER};

use super::classifier::classify_tool;
use super::loop_detector::LoopDetector;
use super::plan::{AiPlan, PlanToolCall, ResponseMode};
use super::plan_executor::{PlanExecutionResult, PlanExecutor};
use super::planner::{PlanRequest, Planner};
use super::resume::{AskQuestionContext, ResumeContext};
use super::state::{AgentState, ExecutionStep, PendingInteraction, Stage};

// ---------------------------------------------------------------------------
// Callback trait
// ---------------------------------------------------------------------------

/// Hooks for hosts to stream engine progress without the engine knowing
/// anything about the UI
#[async_trait]
pub trait EngineCallback: Send + Sync {
    /// A plan thought was recorded
    async fn on_thought(&self, _iteration: u32, _thought: &str) {}
    /// A tool finished executing
    async fn on_tool_executed(&self, _tool_name: &str, _success: bool) {}
    /// A user-facing message (direct answers, summaries, errors)
    async fn on_message(&self, _message: &str) {}
    /// The turn reached a terminal stage
    async fn on_complete(&self, _stage: Stage) {}
}

/// Default no-op callback
pub struct NoOpEngineCallback;

#[async_trait]
impl EngineCallback for NoOpEngineCallback {}

// ---------------------------------------------------------------------------
// Session observer
// ---------------------------------------------------------------------------

struct EngineSessionObserver {
    state: Arc<Mutex<AgentState>>,
}

impl SessionObserver for EngineSessionObserver {
    fn on_session_changed(&self, session: Option<&SessionContext>) {
        if session.is_none() {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.stage == Stage::AwaitingUser {
                info!("Session cleared while awaiting user; completing the turn");
                state.pending_interaction = None;
                state.resume_context = None;
                state.stage = Stage::Completed;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The outer agent execution loop
pub struct AgentEngine {
    state: Arc<Mutex<AgentState>>,
    planner: Arc<dyn Planner>,
    plan_executor: Arc<PlanExecutor>,
    registry: Arc<ToolRegistry>,
    session_store: Arc<SessionStore>,
    compressor: HistoryCompressor,
    detector: LoopDetector,
    callback: Arc<dyn EngineCallback>,
    limits: crate::config::EngineLimits,
    model: String,
    observer: Mutex<Option<ObserverHandle>>,
}

impl AgentEngine {
    /// Create an engine and subscribe it to the session store
    pub fn new(
        planner: Arc<dyn Planner>,
        plan_executor: Arc<PlanExecutor>,
        registry: Arc<ToolRegistry>,
        session_store: Arc<SessionStore>,
        callback: Arc<dyn EngineCallback>,
        config: &Config,
        model: impl Into<String>,
    ) -> Self {
        let state = Arc::new(Mutex::new(AgentState::new(config.engine.max_iterations)));
        let handle = session_store.subscribe(Arc::new(EngineSessionObserver {
            state: Arc::clone(&state),
        }));

        AgentEngine {
            state,
            planner,
            plan_executor,
            registry,
            session_store,
            compressor: HistoryCompressor::new(config.compression.clone()),
            detector: LoopDetector::new(
                config.engine.duplicate_window_secs,
                config.engine.loop_window,
                config.engine.loop_threshold,
            ),
            callback,
            limits: config.engine.clone(),
            model: model.into(),
            observer: Mutex::new(Some(handle)),
        }
    }

    /// Whether a user interaction is pending
    pub fn is_awaiting_user(&self) -> bool {
        self.lock_state().stage == Stage::AwaitingUser
    }

    /// A snapshot of the engine state
    pub fn state(&self) -> AgentState {
        self.lock_state().clone()
    }

    /// Request cancellation; the loop aborts at the top of its next iteration
    pub fn cancel(&self) {
        self.lock_state().cancelled = true;
    }

    /// Unsubscribe from the session store
    pub fn dispose(&self) {
        let handle = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            self.session_store.unsubscribe(handle);
        }
    }

    /// Run one user turn
    pub async fn execute_task(&self, user_input: &str) -> crate::Result<()> {
        if self.is_awaiting_user() {
            self.callback
                .on_message("A question is pending; please answer it before starting a new task.")
                .await;
            return Ok(());
        }

        {
            let mut state = self.lock_state();
            state.current_task = user_input.to_string();
            state.stage = Stage::Planning;
            state.iteration_count = 0;
            state.pending_interaction = None;
            state.pending_confirmation_tool = None;
            state.push_step(ExecutionStep::system(format!(
                "=== New task: {} ===",
                user_input
            )));
            state.trim_history(
                self.limits.history_trim_threshold,
                self.limits.history_trim_keep,
            );
        }

        info!("Starting task: {}", user_input);
        self.run_execution_loop().await
    }

    /// Feed the user's reply into a suspended pipeline
    pub async fn handle_user_response(&self, reply: &str) -> crate::Result<()> {
        let resume = {
            let mut state = self.lock_state();
            if state.stage != Stage::AwaitingUser || state.pending_interaction.is_none() {
                drop(state);
                self.callback
                    .on_message("There is no pending question; reply ignored.")
                    .await;
                return Ok(());
            }
            // Cleared unconditionally; the specialist may re-establish it
            let pending = state.pending_interaction.take();
            let iteration = state.iteration_count;
            state.push_step(ExecutionStep::user_interaction(iteration, reply));

            // A declined confirmation forgets the gated tool; an accepted
            // one keeps it so the re-planned call runs without a second gate
            if pending.map(|p| p.kind) == Some(super::state::InteractionKind::Confirmation)
                && !is_affirmative(reply)
            {
                state.pending_confirmation_tool = None;
            }
            state.resume_context.take()
        };

        self.log_session(
            OperationType::UserResponseReceived,
            format!("User replied: {}", reply),
            None,
            true,
        );

        if let Some(context) = resume {
            if context.plan_executor_state.is_some() {
                match self
                    .plan_executor
                    .resume_specialist(&context, reply, &self.model)
                    .await
                {
                    Ok(result) => {
                        let resolved = self.apply_plan_result(result, true).await;
                        if resolved {
                            self.finish_turn().await;
                            return Ok(());
                        }
                        // Specialist failure: fall through to re-plan
                    }
                    Err(e) if matches!(e, crate::Error::Resume(_)) => {
                        warn!("Resume context unusable: {}", e);
                        self.callback
                            .on_message(
                                "The saved progress could not be restored; re-planning from the conversation.",
                            )
                            .await;
                    }
                    Err(e) => {
                        error!("Fatal error while resuming: {}", e);
                        let mut state = self.lock_state();
                        let iteration = state.iteration_count;
                        state.push_step(ExecutionStep::result(iteration, e.to_string(), false));
                        state.stage = Stage::Error;
                        drop(state);
                        self.finish_turn().await;
                        return Ok(());
                    }
                }
            } else {
                // Legacy resume context: cannot restore the pipeline
                warn!("Legacy resume context encountered; discarding");
                self.callback
                    .on_message(
                        "This task was suspended by an older version and cannot be resumed; starting over from your reply.",
                    )
                    .await;
            }
        }

        // Re-plan path: the reply is in the history, plan from scratch
        {
            let mut state = self.lock_state();
            state.resume_context = None;
            state.stage = Stage::Executing;
        }
        self.run_execution_loop().await
    }

    // -- inner loop ---------------------------------------------------------

    async fn run_execution_loop(&self) -> crate::Result<()> {
        loop {
            let (stage, cancelled, iteration, max_iterations) = {
                let state = self.lock_state();
                (
                    state.stage,
                    state.cancelled,
                    state.iteration_count,
                    state.max_iterations,
                )
            };

            if stage == Stage::AwaitingUser || stage.is_terminal() {
                break;
            }

            if cancelled {
                let mut state = self.lock_state();
                state.push_step(ExecutionStep::result(iteration, "Task cancelled", false));
                state.stage = Stage::Completed;
                state.cancelled = false;
                drop(state);
                self.callback.on_message("Task cancelled.").await;
                break;
            }

            if iteration >= max_iterations {
                let mut state = self.lock_state();
                state.push_step(ExecutionStep::forced_response(
                    iteration,
                    "Reached the iteration limit",
                ));
                state.stage = Stage::Completed;
                drop(state);
                self.callback
                    .on_message("Reached the iteration limit; stopping with the progress so far.")
                    .await;
                break;
            }

            if let Err(e) = self.execute_iteration().await {
                error!("Iteration failed: {}", e);
                let mut state = self.lock_state();
                let iteration = state.iteration_count;
                state.push_step(ExecutionStep::result(iteration, e.to_string(), false));
                state.stage = Stage::Error;
                drop(state);
                self.callback
                    .on_message(&format!("Something went wrong: {}", e))
                    .await;
                break;
            }
        }

        self.finish_turn().await;
        Ok(())
    }

    async fn execute_iteration(&self) -> crate::Result<()> {
        let (task, history_lines, tool_lines, iteration) = {
            let mut state = self.lock_state();
            state.stage = Stage::Planning;
            (
                state.current_task.clone(),
                state.history_lines(),
                state.tool_result_lines(),
                state.iteration_count,
            )
        };

        let plan = self
            .planner
            .plan(PlanRequest {
                current_task: task.clone(),
                session: self.session_store.current_session(),
                history_context: self.compressor.compress(&history_lines, iteration),
                tool_results_context: self.compressor.compress(&tool_lines, iteration),
                tool_inventory: self.registry.tool_inventory_text(),
            })
            .await?;

        {
            let mut state = self.lock_state();
            state.push_step(ExecutionStep::thought(iteration, plan.thought.clone()));
            state.stage = Stage::Executing;
        }
        self.callback.on_thought(iteration, &plan.thought).await;

        // PLAN_EXECUTION: delegate, reusing the plan we already have
        if plan.response_mode == ResponseMode::PlanExecution {
            if let Some(execution_plan) = &plan.execution_plan {
                let result = self
                    .plan_executor
                    .execute_plan(execution_plan, &task, &self.model)
                    .await?;
                self.apply_plan_result(result, false).await;
                return Ok(());
            }
            debug!("PLAN_EXECUTION mode without a plan; completing with the thought");
        }

        // KNOWLEDGE_QA short-circuit: direct answer, no tools
        if !plan.has_tool_calls() {
            let text = plan
                .direct_response
                .clone()
                .unwrap_or_else(|| plan.thought.clone());
            self.callback.on_message(&text).await;
            let mut state = self.lock_state();
            state.push_step(ExecutionStep::result(iteration, text, true));
            state.stage = Stage::Completed;
            drop(state);
            self.log_session(
                OperationType::AiResponseReceived,
                "Direct response emitted".to_string(),
                None,
                true,
            );
            return Ok(());
        }

        // TOOL_EXECUTION (knowledge retrieval tools may also land here)
        if self.execute_tool_calls(&plan, iteration).await? {
            return Ok(());
        }

        // Iterate
        let mut state = self.lock_state();
        state.iteration_count += 1;
        if let Some(tool) = self.detector.detect_infinite_loop(&state) {
            let iteration = state.iteration_count;
            state.push_step(ExecutionStep::forced_response(
                iteration,
                format!("Loop detected on tool '{}'", tool),
            ));
            state.stage = Stage::Completed;
            drop(state);
            self.callback
                .on_message(&format!(
                    "The plan kept calling '{}'; stopping with the progress so far.",
                    tool
                ))
                .await;
        }
        Ok(())
    }

    /// Execute a plan's tool calls in order. Returns `true` when the turn
    /// ended (completed or suspended) inside this batch.
    async fn execute_tool_calls(&self, plan: &AiPlan, iteration: u32) -> crate::Result<bool> {
        let calls = plan.tool_calls.clone().unwrap_or_default();
        let mut any_executed = false;

        for call in &calls {
            let duplicate = {
                let state = self.lock_state();
                self.detector.has_recent_tool_execution(
                    &call.name,
                    &call.args,
                    &state.execution_history,
                )
            };
            if duplicate {
                debug!("Skipping duplicate call to '{}'", call.name);
                self.lock_state().push_step(ExecutionStep::tool_call_skipped(
                    iteration,
                    call.name.clone(),
                    call.args.clone(),
                ));
                continue;
            }
            any_executed = true;

            // finalAnswer ends the turn with a structured summary
            if call.name == FINAL_ANSWER {
                if self.execute_final_answer(call, iteration).await {
                    return Ok(true);
                }
                continue;
            }

            let classification = {
                let state = self.lock_state();
                classify_tool(call, &self.registry, &state.execution_history)
            };

            match classification.interaction_type {
                InteractionType::Interactive => {
                    let prompt = interactive_prompt(call);
                    self.suspend_for_input(iteration, prompt, None).await;
                    return Ok(true);
                }
                InteractionType::Confirmation if classification.requires_confirmation => {
                    let approved = {
                        let mut state = self.lock_state();
                        if state.pending_confirmation_tool.as_deref() == Some(call.name.as_str()) {
                            state.pending_confirmation_tool = None;
                            true
                        } else {
                            false
                        }
                    };
                    if approved {
                        if self.execute_autonomous_call(call, iteration).await? {
                            return Ok(true);
                        }
                        continue;
                    }

                    let prompt =
                        format!("Execute '{}'? Reply yes to proceed, no to skip.", call.name);
                    let mut state = self.lock_state();
                    state.push_step(ExecutionStep::user_interaction(iteration, prompt.clone()));
                    state.pending_interaction = Some(PendingInteraction::confirmation(
                        prompt.clone(),
                        self.limits.interaction_timeout_secs,
                    ));
                    state.pending_confirmation_tool = Some(call.name.clone());
                    state.stage = Stage::AwaitingUser;
                    drop(state);
                    self.log_session(
                        OperationType::UserQuestionAsked,
                        prompt.clone(),
                        Some(call.name.clone()),
                        true,
                    );
                    self.callback.on_message(&prompt).await;
                    return Ok(true);
                }
                _ => {
                    // Autonomous, or confirmation without a gate
                    if self.execute_autonomous_call(call, iteration).await? {
                        return Ok(true);
                    }
                }
            }
        }

        if !any_executed && !calls.is_empty() {
            // Every call duplicated a recent execution: force a summary
            let message =
                "Every requested tool call repeated a recent execution; stopping with the results already gathered.";
            let mut state = self.lock_state();
            state.push_step(ExecutionStep::forced_response(iteration, message));
            state.stage = Stage::Completed;
            drop(state);
            self.callback.on_message(message).await;
            return Ok(true);
        }

        Ok(false)
    }

    /// Execute one autonomous tool call. Returns `true` when the call
    /// suspended the pipeline (specialist question).
    async fn execute_autonomous_call(
        &self,
        call: &PlanToolCall,
        iteration: u32,
    ) -> crate::Result<bool> {
        self.log_session(
            OperationType::ToolExecutionStart,
            format!("Executing {}", call.name),
            Some(call.name.clone()),
            true,
        );

        let started = Instant::now();
        match self
            .registry
            .execute_tool(&call.name, call.args.clone())
            .await
        {
            Ok(result) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let payload = decode_result_payload(result.content.clone());

                // Specialist invocations may suspend the whole pipeline
                let is_specialist = self
                    .registry
                    .tool_descriptor(&call.name)
                    .map(|d| d.layer == ToolLayer::Specialist)
                    .unwrap_or(false);
                if is_specialist {
                    if let Some((question, context)) = extract_interaction(payload.as_ref(), call)
                    {
                        self.log_session(
                            OperationType::SpecialistInvoked,
                            format!("Specialist tool {} suspended", call.name),
                            Some(call.name.clone()),
                            true,
                        );
                        self.suspend_for_input(iteration, question, Some(context)).await;
                        return Ok(true);
                    }
                }

                let mut state = self.lock_state();
                state.push_step(ExecutionStep::tool_call(
                    iteration,
                    call.name.clone(),
                    call.args.clone(),
                    payload,
                    result.success,
                    duration_ms,
                ));
                drop(state);

                self.callback
                    .on_tool_executed(&call.name, result.success)
                    .await;
                self.log_session(
                    if result.success {
                        OperationType::ToolExecutionEnd
                    } else {
                        OperationType::ToolExecutionFailed
                    },
                    format!("{} finished", call.name),
                    Some(call.name.clone()),
                    result.success,
                );
                Ok(false)
            }
            Err(e) => {
                // Recorded with an error code; the loop carries on and the
                // LLM may retry on its next iteration
                warn!("Tool '{}' failed: {}", call.name, e);
                self.lock_state().push_step(ExecutionStep::tool_failure(
                    iteration,
                    call.name.clone(),
                    call.args.clone(),
                    e.to_string(),
                ));
                self.log_session(
                    OperationType::ToolExecutionFailed,
                    e.to_string(),
                    Some(call.name.clone()),
                    false,
                );
                Ok(false)
            }
        }
    }

    /// Execute the finalAnswer sentinel. Returns `true` on success.
    async fn execute_final_answer(&self, call: &PlanToolCall, iteration: u32) -> bool {
        match self
            .registry
            .execute_tool(&call.name, call.args.clone())
            .await
        {
            Ok(result) if result.success => {
                let summary = result
                    .content
                    .as_ref()
                    .and_then(|c| c.pointer("/final_answer/summary"))
                    .and_then(Value::as_str)
                    .unwrap_or("Task finished.")
                    .to_string();
                self.callback.on_message(&summary).await;
                let mut state = self.lock_state();
                state.push_step(ExecutionStep::result(iteration, summary, true));
                state.stage = Stage::Completed;
                true
            }
            Ok(result) => {
                self.lock_state().push_step(ExecutionStep::tool_failure(
                    iteration,
                    call.name.clone(),
                    call.args.clone(),
                    result.error.unwrap_or_else(|| "finalAnswer failed".into()),
                ));
                false
            }
            Err(e) => {
                self.lock_state().push_step(ExecutionStep::tool_failure(
                    iteration,
                    call.name.clone(),
                    call.args.clone(),
                    e.to_string(),
                ));
                false
            }
        }
    }

    /// Map a plan-executor result onto the engine state. With
    /// `lenient_failure` (the resume path) a failure is reported but not
    /// terminal, so the caller can fall through to re-planning; returns
    /// whether the result resolved the turn.
    async fn apply_plan_result(&self, result: PlanExecutionResult, lenient_failure: bool) -> bool {
        match result {
            PlanExecutionResult::Completed { summary } => {
                let mut state = self.lock_state();
                let iteration = state.iteration_count;
                state.push_step(ExecutionStep::plan_execution(
                    iteration,
                    summary.clone(),
                    true,
                ));
                state.stage = Stage::Completed;
                drop(state);
                self.callback.on_message(&summary).await;
                true
            }
            PlanExecutionResult::Failed { error } => {
                let mut state = self.lock_state();
                let iteration = state.iteration_count;
                state.push_step(ExecutionStep::plan_execution(
                    iteration,
                    error.clone(),
                    false,
                ));
                if !lenient_failure {
                    state.stage = Stage::Error;
                }
                drop(state);
                self.callback
                    .on_message(&format!("The specialist could not finish: {}", error))
                    .await;
                !lenient_failure
            }
            PlanExecutionResult::UserInteractionRequired {
                question,
                resume_context,
            } => {
                let iteration = self.lock_state().iteration_count;
                self.suspend_for_input(iteration, question, Some(resume_context))
                    .await;
                true
            }
        }
    }

    async fn suspend_for_input(
        &self,
        iteration: u32,
        question: String,
        resume_context: Option<ResumeContext>,
    ) {
        {
            let mut state = self.lock_state();
            state.push_step(ExecutionStep::user_interaction(iteration, question.clone()));
            state.pending_interaction = Some(PendingInteraction::input(
                question.clone(),
                self.limits.interaction_timeout_secs,
            ));
            if let Some(context) = resume_context {
                state.resume_context = Some(context);
            }
            state.stage = Stage::AwaitingUser;
        }
        self.log_session(
            OperationType::UserQuestionAsked,
            question.clone(),
            None,
            true,
        );
        self.callback.on_message(&question).await;
    }

    async fn finish_turn(&self) {
        let stage = self.lock_state().stage;
        if stage.is_terminal() {
            self.callback.on_complete(stage).await;
        }
    }

    fn log_session(
        &self,
        operation_type: OperationType,
        operation: String,
        tool_name: Option<String>,
        success: bool,
    ) {
        self.session_store.update_session_with_log(SessionLogEntry {
            operation_type,
            operation,
            tool_name,
            success,
            execution_time: None,
            error: None,
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether a reply accepts a pending confirmation
fn is_affirmative(reply: &str) -> bool {
    matches!(
        reply.trim().to_lowercase().as_str(),
        "yes" | "y" | "ok" | "confirm" | "sure" | "是" | "确认"
    )
}

/// The prompt an interactive tool presents, taken from its arguments
fn interactive_prompt(call: &PlanToolCall) -> String {
    ["question", "prompt", "message"]
        .iter()
        .find_map(|k| call.args.get(*k))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("Tool '{}' needs your input.", call.name))
}

/// Specialist results may arrive as JSON-encoded strings; decode them
fn decode_result_payload(content: Option<Value>) -> Option<Value> {
    match content {
        Some(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(decoded) => Some(decoded),
            Err(_) => Some(Value::String(text)),
        },
        other => other,
    }
}

/// Detect a specialist interaction payload and build the engine-level
/// resume context for it
fn extract_interaction(
    payload: Option<&Value>,
    call: &PlanToolCall,
) -> Option<(String, ResumeContext)> {
    let payload = payload?;
    let flagged = payload
        .get("needs_chat_interaction")
        .or_else(|| payload.get("needsChatInteraction"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !flagged {
        return None;
    }

    let question = payload
        .get("chat_question")
        .or_else(|| payload.get("chatQuestion"))
        .or_else(|| payload.get("question"))
        .and_then(Value::as_str)
        .unwrap_or("The specialist needs more information.")
        .to_string();

    // Prefer a full resume context embedded in the payload; otherwise wrap
    // the raw payload so at least the question survives
    let context = payload
        .get("resume_context")
        .or_else(|| payload.get("resumeContext"))
        .and_then(|rc| serde_json::from_value::<ResumeContext>(rc.clone()).ok())
        .filter(|rc| !rc.is_legacy())
        .unwrap_or_else(|| ResumeContext {
            plan_executor_state: None,
            ask_question_context: Some(AskQuestionContext {
                original_tool_call: Some(call.clone()),
                question: question.clone(),
                original_result: payload.clone(),
            }),
            resume_guidance: None,
        });

    Some((question, context))
}
