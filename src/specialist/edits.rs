//! Edit-instruction classification
//!
//! Specialists emit edit instructions for the external markdown edit
//! engine. The runner only classifies and tags them; applying them is the
//! editor's concern.

use serde_json::Value;
use tracing::warn;

/// Semantic instruction types understood by the edit engine
const SEMANTIC_TYPES: [&str; 10] = [
    "replace_section",
    "insert_after_section",
    "insert_before_section",
    "append_to_list",
    "update_subsection",
    "update_content_in_section",
    "insert_line_in_section",
    "remove_content_in_section",
    "append_to_section",
    "prepend_to_section",
];

/// Classification of one edit instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditInstructionKind {
    /// Section-addressed semantic edit
    Semantic,
    /// Line-addressed traditional edit
    Traditional,
    /// Neither shape
    Unknown,
}

impl EditInstructionKind {
    fn tag(&self) -> &'static str {
        match self {
            EditInstructionKind::Semantic => "semantic",
            EditInstructionKind::Traditional => "traditional",
            EditInstructionKind::Unknown => "unknown",
        }
    }
}

/// Classify a single instruction
pub fn classify_instruction(instruction: &Value) -> EditInstructionKind {
    if is_semantic(instruction) {
        EditInstructionKind::Semantic
    } else if is_traditional(instruction) {
        EditInstructionKind::Traditional
    } else {
        EditInstructionKind::Unknown
    }
}

fn is_semantic(instruction: &Value) -> bool {
    let has_known_type = instruction
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| SEMANTIC_TYPES.contains(&t));

    let has_section_target = instruction
        .pointer("/target/sectionName")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());

    has_known_type && has_section_target
}

fn is_traditional(instruction: &Value) -> bool {
    let has_action = instruction
        .get("action")
        .and_then(Value::as_str)
        .is_some_and(|a| a == "insert" || a == "replace");

    let has_lines = instruction
        .get("lines")
        .and_then(Value::as_array)
        .is_some_and(|lines| {
            !lines.is_empty()
                && lines
                    .iter()
                    .all(|l| l.as_u64().is_some_and(|n| n > 0))
        });

    let has_content = instruction.get("content").and_then(Value::as_str).is_some();

    has_action && has_lines && has_content
}

/// Validate the required fields of a semantic instruction
pub fn validate_semantic(instruction: &Value) -> Result<(), String> {
    if instruction.get("content").and_then(Value::as_str).is_none() {
        return Err("semantic instruction is missing 'content' string".into());
    }
    if instruction.get("reason").and_then(Value::as_str).is_none() {
        return Err("semantic instruction is missing 'reason' string".into());
    }
    if let Some(priority) = instruction.get("priority") {
        if priority.as_u64().is_none() {
            return Err("'priority' must be a non-negative integer".into());
        }
    }
    Ok(())
}

/// Normalise an `edit_instructions` payload: tag each instruction with its
/// classification and demote invalid semantic instructions to unknown.
pub fn normalize_edit_instructions(instructions: &Value) -> Value {
    let Some(list) = instructions.as_array() else {
        return instructions.clone();
    };

    let normalized: Vec<Value> = list
        .iter()
        .map(|instruction| {
            let mut kind = classify_instruction(instruction);
            if kind == EditInstructionKind::Semantic {
                if let Err(issue) = validate_semantic(instruction) {
                    warn!("Demoting semantic edit instruction: {}", issue);
                    kind = EditInstructionKind::Unknown;
                }
            }
            let mut tagged = instruction.clone();
            if let Some(map) = tagged.as_object_mut() {
                map.insert("kind".to_string(), Value::String(kind.tag().to_string()));
            }
            tagged
        })
        .collect();

    Value::Array(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_semantic_instructions() {
        let instruction = json!({
            "type": "replace_section",
            "target": {"sectionName": "Functional Requirements"},
            "content": "new text",
            "reason": "user asked"
        });
        assert_eq!(
            classify_instruction(&instruction),
            EditInstructionKind::Semantic
        );
        assert!(validate_semantic(&instruction).is_ok());
    }

    #[test]
    fn semantic_requires_known_type_and_target() {
        let bad_type = json!({
            "type": "replace_everything",
            "target": {"sectionName": "X"}
        });
        assert_eq!(classify_instruction(&bad_type), EditInstructionKind::Unknown);

        let no_target = json!({"type": "replace_section"});
        assert_eq!(classify_instruction(&no_target), EditInstructionKind::Unknown);
    }

    #[test]
    fn classifies_traditional_instructions() {
        let instruction = json!({
            "action": "insert",
            "lines": [12, 13],
            "content": "- new bullet"
        });
        assert_eq!(
            classify_instruction(&instruction),
            EditInstructionKind::Traditional
        );

        // Zero and negative line numbers are rejected
        let bad_lines = json!({"action": "insert", "lines": [0], "content": "x"});
        assert_eq!(classify_instruction(&bad_lines), EditInstructionKind::Unknown);
    }

    #[test]
    fn validation_catches_missing_fields_and_bad_priority() {
        let missing_reason = json!({
            "type": "append_to_section",
            "target": {"sectionName": "Glossary"},
            "content": "term"
        });
        assert!(validate_semantic(&missing_reason).is_err());

        let bad_priority = json!({
            "type": "append_to_section",
            "target": {"sectionName": "Glossary"},
            "content": "term",
            "reason": "r",
            "priority": -1
        });
        assert!(validate_semantic(&bad_priority).is_err());
    }

    #[test]
    fn normalize_tags_each_instruction() {
        let instructions = json!([
            {
                "type": "replace_section",
                "target": {"sectionName": "Intro"},
                "content": "c",
                "reason": "r"
            },
            {"action": "replace", "lines": [1], "content": "x"},
            {"whatever": true},
            {
                // Semantic shape but missing required fields
                "type": "replace_section",
                "target": {"sectionName": "Intro"}
            }
        ]);

        let normalized = normalize_edit_instructions(&instructions);
        let list = normalized.as_array().unwrap();
        assert_eq!(list[0]["kind"], "semantic");
        assert_eq!(list[1]["kind"], "traditional");
        assert_eq!(list[2]["kind"], "unknown");
        assert_eq!(list[3]["kind"], "unknown");
    }
}
