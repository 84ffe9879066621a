//! Type definitions for specialists

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::plan::PlanToolCall;
use crate::tools::CallerType;

/// Specialist category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialistCategory {
    /// Produces content and edit instructions for documents
    Content,
    /// Performs side-effecting operations (git, project scaffolding)
    Process,
}

impl SpecialistCategory {
    /// The caller type this category maps to for tool access
    pub fn caller_type(&self) -> CallerType {
        match self {
            SpecialistCategory::Content => CallerType::SpecialistContent,
            SpecialistCategory::Process => CallerType::SpecialistProcess,
        }
    }
}

/// Identity of a specialist role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistSpec {
    /// Stable identifier (e.g. `fr_writer`)
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: SpecialistCategory,
}

impl SpecialistSpec {
    /// A content specialist
    pub fn content(id: impl Into<String>, name: impl Into<String>) -> Self {
        SpecialistSpec {
            id: id.into(),
            name: name.into(),
            category: SpecialistCategory::Content,
        }
    }

    /// A process specialist
    pub fn process(id: impl Into<String>, name: impl Into<String>) -> Self {
        SpecialistSpec {
            id: id.into(),
            name: name.into(),
            category: SpecialistCategory::Process,
        }
    }
}

/// Everything a specialist needs to work on one plan step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecialistContext {
    /// The user's requirements for this step
    pub user_requirements: String,
    /// Structured execution context
    #[serde(default)]
    pub structured_context: StructuredContext,
    /// Project metadata (name, base dir, intent, active files)
    #[serde(default)]
    pub project_metadata: serde_json::Map<String, Value>,
}

/// The structured half of a specialist context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredContext {
    /// Description of the current plan step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<Value>,
    /// Outputs of the steps this one depends on
    #[serde(default)]
    pub dependent_results: Vec<Value>,
    /// The specialist's own prior iterations this invocation
    #[serde(default)]
    pub internal_history: Vec<String>,
    /// The user's reply when resuming after a question; this is the
    /// well-known slot the resume machine fills
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_response: Option<String>,
}

/// A parsed specialist plan, standardised from raw LLM output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecialistPlan {
    /// Free-form content produced by the specialist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
    /// Short-circuit textual answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_response: Option<String>,
    /// Tool calls to execute in order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<PlanToolCall>>,
}

impl SpecialistPlan {
    /// A plan is valid iff it has at least one tool call or non-empty
    /// content / direct response.
    pub fn is_valid(&self) -> bool {
        if let Some(calls) = &self.tool_calls {
            if !calls.is_empty() {
                return true;
            }
        }
        self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
            || self
                .direct_response
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }

    /// Whether the plan carries any tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// One recorded tool result inside a specialist's internal history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    /// Tool name
    pub tool: String,
    /// Whether it succeeded
    pub success: bool,
    /// Result payload, already filtered for prompt re-injection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execution metadata attached to every specialist output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistMetadata {
    /// Specialist identifier
    pub specialist: String,
    /// Iterations the inner loop ran
    pub iterations: u32,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
    /// Completion timestamp
    pub timestamp: DateTime<Utc>,
    /// Names of the tools the specialist used
    pub tools_used: Vec<String>,
}

/// The structured output of a completed specialist invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistOutput {
    /// Whether the task succeeded
    pub success: bool,
    /// Produced content or summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the output must be applied to a file by the edit engine
    pub requires_file_editing: bool,
    /// Target file for the edits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    /// Edit instructions, opaque to the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_instructions: Option<Value>,
    /// Structured payload for downstream steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
    /// Execution metadata
    pub metadata: SpecialistMetadata,
}

impl SpecialistOutput {
    /// A failed output; failure never requires file editing
    pub fn failure(error: impl Into<String>, metadata: SpecialistMetadata) -> Self {
        SpecialistOutput {
            success: false,
            content: None,
            error: Some(error.into()),
            requires_file_editing: false,
            target_file: None,
            edit_instructions: None,
            structured_data: None,
            metadata,
        }
    }
}

/// Frozen inner-loop state; doubles as the resume input once the user's
/// reply is injected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistResumeState {
    /// Specialist identifier
    pub specialist_id: String,
    /// Iteration at which the loop suspended
    pub iteration: u32,
    /// Internal history accumulated so far
    pub internal_history: Vec<String>,
    /// The plan that was executing when the loop suspended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_plan: Option<SpecialistPlan>,
    /// Tool results recorded so far
    #[serde(default)]
    pub tool_results: Vec<ToolResultRecord>,
    /// Context the specialist was invoked with
    pub context_for_this_step: SpecialistContext,
    /// The user's reply; `None` while suspended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_response: Option<String>,
}

/// The suspension signal a specialist returns when it asks a question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistInteractionResult {
    /// Always `false`; the task did not complete
    pub success: bool,
    /// Always `true`; distinguishes this shape from an output
    pub needs_chat_interaction: bool,
    /// Frozen loop state for the resume machine
    pub resume_context: SpecialistResumeState,
    /// The question for the user
    pub question: String,
}

/// Result of one specialist invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecialistResult {
    /// The specialist suspended to ask the user a question
    Interaction(SpecialistInteractionResult),
    /// The specialist finished (successfully or not)
    Output(SpecialistOutput),
}

/// Per-specialist loop state embedded in the engine's resume context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistLoopState {
    /// Specialist identifier
    pub specialist_id: String,
    /// Iteration at suspension
    pub current_iteration: u32,
    /// Configured iteration bound
    pub max_iterations: u32,
    /// Internal history at suspension
    pub execution_history: Vec<String>,
    /// Whether the loop was mid-iteration when it suspended
    pub is_looping: bool,
    /// When the invocation started
    pub start_time: DateTime<Utc>,
    /// Why the loop last chose to continue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_continue_reason: Option<String>,
}
