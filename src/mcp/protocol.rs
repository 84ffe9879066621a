//! Wire types for the MCP-style tool host

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool discovered on the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostToolDescriptor {
    /// Tool name as the host knows it
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's input
    #[serde(default)]
    pub input_schema: Value,
}

/// One part of a host tool's result content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    /// A text part
    Text {
        /// The text payload
        value: String,
    },
    /// Any non-text part (images, resources)
    Other(Value),
}

impl ContentPart {
    /// The text payload, if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { value } => Some(value),
            ContentPart::Other(_) => None,
        }
    }
}

/// The output of one host tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostToolOutput {
    /// Ordered result parts
    pub content: Vec<ContentPart>,
}

impl HostToolOutput {
    /// Join all text parts with newlines
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_parts_deserialize_text_and_other() {
        let output: HostToolOutput = serde_json::from_str(
            r#"{"content": [{"value": "hello"}, {"mimeType": "image/png", "data": "…"}, {"value": "world"}]}"#,
        )
        .unwrap();
        assert_eq!(output.content.len(), 3);
        assert_eq!(output.joined_text(), "hello\nworld");
    }
}
