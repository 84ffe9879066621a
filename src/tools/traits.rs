//! Core tool trait, descriptors and result types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Architectural layer a tool belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolLayer {
    /// Low-level primitives (file reads, listings)
    Atomic,
    /// Document-scoped operations (section edits, yaml updates)
    Document,
    /// Specialist invocations
    Specialist,
    /// Engine-internal sentinels and helpers
    Internal,
    /// Anything a host registered without a recognised layer
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ToolLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolLayer::Atomic => "atomic",
            ToolLayer::Document => "document",
            ToolLayer::Specialist => "specialist",
            ToolLayer::Internal => "internal",
            ToolLayer::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// How dangerous a tool is when executed without oversight
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// How the engine must involve the user before executing a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    /// Execute without asking
    Autonomous,
    /// May require a yes/no gate depending on `requires_confirmation`
    Confirmation,
    /// Always presents a prompt and suspends
    Interactive,
}

/// The kinds of callers the access controller distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallerType {
    /// Orchestrator executing a flat tool plan
    OrchestratorToolExecution,
    /// Orchestrator answering a knowledge question
    OrchestratorKnowledgeQa,
    /// Content-producing specialist (emits edit instructions)
    SpecialistContent,
    /// Process specialist (performs side-effecting operations)
    SpecialistProcess,
    /// Document-layer internal caller
    Document,
}

impl CallerType {
    /// Whether this caller is one of the two specialist types
    pub fn is_specialist(&self) -> bool {
        matches!(
            self,
            CallerType::SpecialistContent | CallerType::SpecialistProcess
        )
    }

    /// Whether this caller is one of the orchestrator modes
    pub fn is_orchestrator(&self) -> bool {
        matches!(
            self,
            CallerType::OrchestratorToolExecution | CallerType::OrchestratorKnowledgeQa
        )
    }
}

/// One entry of a tool's `accessible_by` list
///
/// Serialised as a bare string: caller-type names deserialize to
/// [`AccessEntry::Caller`], anything else is a specialist identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessEntry {
    /// Matches a whole caller type
    Caller(CallerType),
    /// Matches one specialist by identifier
    Specialist(String),
}

/// Full description of a registered tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique, process-wide tool name
    pub name: String,
    /// Human description handed to the LLM
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub parameters: Value,
    /// Architectural layer
    pub layer: ToolLayer,
    /// Free-form category (grouping for stats and inventory text)
    pub category: String,
    /// Risk level
    pub risk_level: RiskLevel,
    /// Interaction type
    pub interaction_type: InteractionType,
    /// Whether a confirmation-type tool actually gates on the user
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Explicit access list; when empty, the layer default policy applies
    #[serde(default)]
    pub accessible_by: Vec<AccessEntry>,
    /// Marked experimental in the inventory
    #[serde(default)]
    pub experimental: bool,
    /// Marked deprecated in the inventory
    #[serde(default)]
    pub deprecated: bool,
}

impl ToolDescriptor {
    /// Create a descriptor with conservative defaults (atomic, autonomous, low risk)
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            parameters,
            layer: ToolLayer::Atomic,
            category: "general".to_string(),
            risk_level: RiskLevel::Low,
            interaction_type: InteractionType::Autonomous,
            requires_confirmation: false,
            accessible_by: Vec::new(),
            experimental: false,
            deprecated: false,
        }
    }

    /// Set the layer
    pub fn with_layer(mut self, layer: ToolLayer) -> Self {
        self.layer = layer;
        self
    }

    /// Set the category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set risk level and interaction type together
    pub fn with_classification(
        mut self,
        risk: RiskLevel,
        interaction: InteractionType,
        requires_confirmation: bool,
    ) -> Self {
        self.risk_level = risk;
        self.interaction_type = interaction;
        self.requires_confirmation = requires_confirmation;
        self
    }

    /// Restrict access to an explicit list of callers/specialists
    pub fn with_access(mut self, entries: Vec<AccessEntry>) -> Self {
        self.accessible_by = entries;
        self
    }
}

/// A tool that can be called by the LLM
#[async_trait]
pub trait Tool: Send + Sync {
    /// Full descriptor for this tool
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with given arguments
    async fn execute(&self, args: Value) -> Result<ToolResult>;
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution was successful
    pub success: bool,
    /// Result payload (for successful execution)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Error message (for failed execution)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Friendly message shown to the user on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    /// Whether the failure is worth retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
    /// Hint on how to fix a recoverable failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ToolResult {
    /// Create a successful result from a JSON payload
    pub fn success(content: Value) -> Self {
        ToolResult {
            success: true,
            content: Some(content),
            error: None,
            user_message: None,
            recoverable: None,
            suggestion: None,
        }
    }

    /// Create a successful result from plain text
    pub fn success_text(content: impl Into<String>) -> Self {
        Self::success(Value::String(content.into()))
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            content: None,
            error: Some(error.into()),
            user_message: None,
            recoverable: None,
            suggestion: None,
        }
    }

    /// Attach the user-facing failure fields
    pub fn with_recovery(
        mut self,
        user_message: impl Into<String>,
        recoverable: bool,
        suggestion: Option<String>,
    ) -> Self {
        self.user_message = Some(user_message.into());
        self.recoverable = Some(recoverable);
        self.suggestion = suggestion;
        self
    }

    /// Render the result as text for the LLM
    pub fn to_llm_string(&self) -> String {
        if self.success {
            match &self.content {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => String::new(),
            }
        } else {
            format!("Error: {}", self.error.clone().unwrap_or_default())
        }
    }
}

/// A tool call request from the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call ID
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool arguments as JSON
    pub arguments: Value,
}

impl ToolCall {
    /// Create a call with a fresh ID
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    /// Parse arguments into a specific type
    pub fn parse_arguments<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.arguments.clone())
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid tool arguments: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_entry_deserializes_caller_types_and_specialists() {
        let entries: Vec<AccessEntry> =
            serde_json::from_str(r#"["SPECIALIST_CONTENT", "fr_writer"]"#).unwrap();
        assert_eq!(
            entries[0],
            AccessEntry::Caller(CallerType::SpecialistContent)
        );
        assert_eq!(entries[1], AccessEntry::Specialist("fr_writer".into()));
    }

    #[test]
    fn unknown_layer_falls_through() {
        let layer: ToolLayer = serde_json::from_str("\"weird\"").unwrap();
        assert_eq!(layer, ToolLayer::Unknown);
    }

    #[test]
    fn tool_result_llm_rendering() {
        let ok = ToolResult::success_text("Done!");
        assert_eq!(ok.to_llm_string(), "Done!");

        let structured = ToolResult::success(serde_json::json!({"count": 3}));
        assert_eq!(structured.to_llm_string(), r#"{"count":3}"#);

        let failed = ToolResult::failure("Oops!");
        assert_eq!(failed.to_llm_string(), "Error: Oops!");
    }
}
