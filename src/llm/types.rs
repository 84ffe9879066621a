//! Type definitions for the LLM adapter

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing context and instructions
    System,
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
    /// Tool/function result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Tool descriptor handed to the LLM host
///
/// This is the adapter-facing shape; the registry's richer
/// [`crate::tools::ToolDescriptor`] is projected down to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolDescriptor {
    /// Tool name
    pub name: String,
    /// Human description
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub parameters_schema: serde_json::Value,
}

/// Tool-choice strategy for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    /// Let the model decide
    Auto,
    /// Never use tools
    None,
    /// The model must call a tool
    Required,
}

/// A chat request to the LLM adapter
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The conversation messages (system + user + prior context)
    pub messages: Vec<Message>,
    /// Model override; `None` uses the adapter default
    pub model: Option<String>,
    /// Tool descriptors offered to the model, if any
    pub tools: Option<Vec<LlmToolDescriptor>>,
    /// Tool-choice strategy; `None` leaves the adapter default
    pub tool_mode: Option<ToolMode>,
    /// Short human-readable reason for the request, surfaced by hosts
    /// that require one (e.g. consent dialogs)
    pub justification: String,
    /// Generation options (temperature etc.)
    pub options: GenerationOptions,
}

impl ChatRequest {
    /// Create a plain request with no tools
    pub fn new(messages: Vec<Message>, justification: impl Into<String>) -> Self {
        ChatRequest {
            messages,
            model: None,
            tools: None,
            tool_mode: None,
            justification: justification.into(),
            options: GenerationOptions::balanced(),
        }
    }

    /// Override the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach tool descriptors
    pub fn with_tools(mut self, tools: Vec<LlmToolDescriptor>) -> Self {
        self.tools = Some(tools);
        self.tool_mode = Some(ToolMode::Auto);
        self
    }

    /// Override generation options
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Generation options for chat completions
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Top-p sampling (0.0 - 1.0)
    pub top_p: Option<f32>,
}

impl GenerationOptions {
    /// Create options for precise, deterministic output
    pub fn precise() -> Self {
        GenerationOptions {
            temperature: Some(0.0),
            ..Default::default()
        }
    }

    /// Create options for balanced output
    pub fn balanced() -> Self {
        GenerationOptions {
            temperature: Some(0.5),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn generation_options() {
        assert_eq!(GenerationOptions::precise().temperature, Some(0.0));
        assert_eq!(GenerationOptions::balanced().temperature, Some(0.5));
    }

    #[test]
    fn request_builder_attaches_tools() {
        let req = ChatRequest::new(vec![Message::user("hi")], "unit test").with_tools(vec![
            LlmToolDescriptor {
                name: "readFile".into(),
                description: "Read a file".into(),
                parameters_schema: serde_json::json!({"type": "object"}),
            },
        ]);
        assert_eq!(req.tool_mode, Some(ToolMode::Auto));
        assert_eq!(req.tools.as_ref().map(|t| t.len()), Some(1));
    }
}
