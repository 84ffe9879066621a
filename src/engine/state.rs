//! Engine state - stages, execution steps and the per-session agent state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resume::ResumeContext;

/// Stage of the outer execution loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Executing,
    AwaitingUser,
    Completed,
    Error,
}

impl Stage {
    /// Whether the loop must stop at this stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }
}

/// Kind of an execution step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thought,
    ToolCall,
    ToolCallSkipped,
    UserInteraction,
    Result,
    ForcedResponse,
    System,
    PlanExecution,
}

/// Step-level error category, derived from the error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ToolNotFound,
    PermissionDenied,
    Timeout,
    NetworkError,
    ExecutionFailed,
}

/// Categorise a tool failure by substring inspection of its message
pub fn categorize_error(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("not found") || lower.contains("unknown tool") {
        ErrorCode::ToolNotFound
    } else if lower.contains("permission") || lower.contains("denied") || lower.contains("access")
    {
        ErrorCode::PermissionDenied
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorCode::Timeout
    } else if lower.contains("network")
        || lower.contains("connection")
        || lower.contains("econnrefused")
    {
        ErrorCode::NetworkError
    } else {
        ErrorCode::ExecutionFailed
    }
}

/// One immutable entry of the execution history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Step kind
    pub kind: StepKind,
    /// When the step happened
    pub timestamp: DateTime<Utc>,
    /// Iteration the step belongs to
    pub iteration: u32,
    /// Free-form step text (thought, question, summary)
    pub content: String,
    /// Tool involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Tool or step result payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Whether the step succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error category on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Retries performed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl ExecutionStep {
    fn base(kind: StepKind, iteration: u32, content: impl Into<String>) -> Self {
        ExecutionStep {
            kind,
            timestamp: Utc::now(),
            iteration,
            content: content.into(),
            tool_name: None,
            args: None,
            result: None,
            success: None,
            duration_ms: None,
            error_code: None,
            retry_count: None,
        }
    }

    /// A recorded plan thought
    pub fn thought(iteration: u32, text: impl Into<String>) -> Self {
        Self::base(StepKind::Thought, iteration, text)
    }

    /// A task-separator system step
    pub fn system(text: impl Into<String>) -> Self {
        Self::base(StepKind::System, 0, text)
    }

    /// A completed tool call
    pub fn tool_call(
        iteration: u32,
        tool_name: impl Into<String>,
        args: Value,
        result: Option<Value>,
        success: bool,
        duration_ms: u64,
    ) -> Self {
        let mut step = Self::base(StepKind::ToolCall, iteration, "");
        step.tool_name = Some(tool_name.into());
        step.args = Some(args);
        step.result = result;
        step.success = Some(success);
        step.duration_ms = Some(duration_ms);
        step
    }

    /// A failed tool call with its error category
    pub fn tool_failure(
        iteration: u32,
        tool_name: impl Into<String>,
        args: Value,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        let mut step = Self::base(StepKind::ToolCall, iteration, error.clone());
        step.tool_name = Some(tool_name.into());
        step.args = Some(args);
        step.success = Some(false);
        step.error_code = Some(categorize_error(&error));
        step
    }

    /// A duplicate call that was suppressed
    pub fn tool_call_skipped(iteration: u32, tool_name: impl Into<String>, args: Value) -> Self {
        let mut step = Self::base(
            StepKind::ToolCallSkipped,
            iteration,
            "duplicate of a recent execution",
        );
        step.tool_name = Some(tool_name.into());
        step.args = Some(args);
        step
    }

    /// A user-facing question or reply
    pub fn user_interaction(iteration: u32, text: impl Into<String>) -> Self {
        Self::base(StepKind::UserInteraction, iteration, text)
    }

    /// A terminal result step
    pub fn result(iteration: u32, text: impl Into<String>, success: bool) -> Self {
        let mut step = Self::base(StepKind::Result, iteration, text);
        step.success = Some(success);
        step
    }

    /// A forced summarising response (loop break)
    pub fn forced_response(iteration: u32, text: impl Into<String>) -> Self {
        Self::base(StepKind::ForcedResponse, iteration, text)
    }

    /// A plan-execution delegation record
    pub fn plan_execution(iteration: u32, text: impl Into<String>, success: bool) -> Self {
        let mut step = Self::base(StepKind::PlanExecution, iteration, text);
        step.success = Some(success);
        step
    }

    /// Render the step as a history line for the compressor
    pub fn to_history_line(&self) -> String {
        match self.kind {
            StepKind::Thought => format!("迭代 {}: AI计划 {}", self.iteration, self.content),
            StepKind::ToolCall => {
                let marker = if self.success == Some(false) {
                    "❌"
                } else {
                    "✅"
                };
                let snippet = self
                    .result
                    .as_ref()
                    .map(|r| snippet(&r.to_string(), 160))
                    .unwrap_or_else(|| snippet(&self.content, 160));
                format!(
                    "迭代 {}: 工具 {} {} {}",
                    self.iteration,
                    self.tool_name.as_deref().unwrap_or("?"),
                    marker,
                    snippet
                )
            }
            StepKind::ToolCallSkipped => format!(
                "迭代 {}: 工具 {} skipped ({})",
                self.iteration,
                self.tool_name.as_deref().unwrap_or("?"),
                self.content
            ),
            StepKind::UserInteraction => {
                format!("迭代 {}: 用户回复 {}", self.iteration, self.content)
            }
            StepKind::Result => format!(
                "迭代 {}: {} {}",
                self.iteration,
                if self.success == Some(false) {
                    "任务失败"
                } else {
                    "任务阶段完成"
                },
                self.content
            ),
            StepKind::ForcedResponse => {
                format!("迭代 {}: 强制总结 {}", self.iteration, self.content)
            }
            StepKind::System => self.content.clone(),
            StepKind::PlanExecution => format!(
                "迭代 {}: 专家任务执行完成 {}",
                self.iteration, self.content
            ),
        }
    }
}

fn snippet(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

/// Kind of a pending user interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    /// Free-form text input
    Input,
    /// A yes/no gate
    Confirmation,
}

/// A pending question for the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInteraction {
    /// Interaction kind
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    /// Message shown to the user
    pub message: String,
    /// When the interaction was created
    pub created_at: DateTime<Utc>,
    /// Advisory timeout in seconds; the engine does not forcibly cancel
    pub timeout_secs: u64,
}

impl PendingInteraction {
    /// A free-form input request
    pub fn input(message: impl Into<String>, timeout_secs: u64) -> Self {
        PendingInteraction {
            kind: InteractionKind::Input,
            message: message.into(),
            created_at: Utc::now(),
            timeout_secs,
        }
    }

    /// A yes/no confirmation request
    pub fn confirmation(message: impl Into<String>, timeout_secs: u64) -> Self {
        PendingInteraction {
            kind: InteractionKind::Confirmation,
            message: message.into(),
            created_at: Utc::now(),
            timeout_secs,
        }
    }
}

/// Per-session engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Current stage
    pub stage: Stage,
    /// The task the engine is working on
    pub current_task: String,
    /// Append-only execution history
    pub execution_history: Vec<ExecutionStep>,
    /// The pending question, non-empty iff `stage == AwaitingUser`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_interaction: Option<PendingInteraction>,
    /// Frozen pipeline snapshot while suspended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_context: Option<ResumeContext>,
    /// Iterations used this turn
    pub iteration_count: u32,
    /// Iteration bound
    pub max_iterations: u32,
    /// Set to abort the loop at the top of the next iteration
    pub cancelled: bool,
    /// Tool gated behind the pending confirmation; survives an affirmative
    /// reply so the re-planned call executes without a second gate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_confirmation_tool: Option<String>,
}

impl AgentState {
    /// Fresh state with the given iteration bound
    pub fn new(max_iterations: u32) -> Self {
        AgentState {
            stage: Stage::Completed,
            current_task: String::new(),
            execution_history: Vec::new(),
            pending_interaction: None,
            resume_context: None,
            iteration_count: 0,
            max_iterations,
            cancelled: false,
            pending_confirmation_tool: None,
        }
    }

    /// Append a step; history is append-only
    pub fn push_step(&mut self, step: ExecutionStep) {
        self.execution_history.push(step);
    }

    /// Trim the history when it exceeds `threshold`, keeping the most
    /// recent `keep` entries.
    pub fn trim_history(&mut self, threshold: usize, keep: usize) {
        if self.execution_history.len() > threshold {
            let drop = self.execution_history.len() - keep;
            self.execution_history.drain(..drop);
        }
    }

    /// All history lines for the compressor
    pub fn history_lines(&self) -> Vec<String> {
        self.execution_history
            .iter()
            .map(ExecutionStep::to_history_line)
            .collect()
    }

    /// Tool-result history lines for the compressor
    pub fn tool_result_lines(&self) -> Vec<String> {
        self.execution_history
            .iter()
            .filter(|s| s.kind == StepKind::ToolCall)
            .map(ExecutionStep::to_history_line)
            .collect()
    }
}
