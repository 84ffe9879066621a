//! Tool risk and interaction classification
//!
//! A registry descriptor that declares its interaction type and risk level
//! always wins; name- and argument-based rules only cover tools the
//! registry does not know (e.g. calls the LLM invented).

use serde_json::Value;

use crate::tools::{InteractionType, RiskLevel, ToolRegistry};

use super::plan::PlanToolCall;
use super::state::{ExecutionStep, StepKind};

/// The classification triple for one tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// How the engine must involve the user
    pub interaction_type: InteractionType,
    /// Risk level
    pub risk_level: RiskLevel,
    /// Whether a confirmation-type call actually gates on the user
    pub requires_confirmation: bool,
}

const INTERACTIVE_PATTERNS: [&str; 10] = [
    "ask", "question", "input", "select", "choose", "confirm", "prompt", "dialog", "modal",
    "picker",
];

const HIGH_RISK_PATTERNS: [&str; 13] = [
    "delete",
    "remove",
    "drop",
    "truncate",
    "destroy",
    "execute",
    "run",
    "command",
    "shell",
    "terminal",
    "admin",
    "sudo",
    "privileged",
];

const MEDIUM_RISK_PATTERNS: [&str; 9] = [
    "write", "create", "modify", "update", "edit", "move", "rename", "copy", "install",
];

const IMPORTANT_PATHS: [&str; 4] = ["package.json", "config", "settings", ".env"];

/// Content size above which a write always asks for confirmation
const LARGE_CONTENT_CHARS: usize = 5_000;

/// How many identical recent calls count as a burst
const BURST_THRESHOLD: usize = 2;

/// Classify one tool call
pub fn classify_tool(
    call: &PlanToolCall,
    registry: &ToolRegistry,
    history: &[ExecutionStep],
) -> Classification {
    // 1. The registry's declaration always wins
    if let Some(descriptor) = registry.tool_descriptor(&call.name) {
        return Classification {
            interaction_type: descriptor.interaction_type,
            risk_level: descriptor.risk_level,
            requires_confirmation: descriptor.requires_confirmation,
        };
    }

    let name = call.name.to_lowercase();

    // 2. Interactive tools: by name pattern or interaction-shaped arguments
    let interactive_args = ["options", "choices", "question", "prompt"]
        .iter()
        .any(|k| call.args.get(*k).is_some());
    if INTERACTIVE_PATTERNS.iter().any(|p| name.contains(p)) || interactive_args {
        return Classification {
            interaction_type: InteractionType::Interactive,
            risk_level: RiskLevel::Low,
            requires_confirmation: false,
        };
    }

    // 3. High risk: dangerous names, dangerous paths or command arguments
    let risky_args = has_dangerous_path(&call.args)
        || call.args.get("command").is_some()
        || call.args.get("script").is_some();
    if HIGH_RISK_PATTERNS.iter().any(|p| name.contains(p)) || risky_args {
        return Classification {
            interaction_type: InteractionType::Confirmation,
            risk_level: RiskLevel::High,
            requires_confirmation: true,
        };
    }

    // 4. Medium risk: mutating names, confirmation gated by context
    if MEDIUM_RISK_PATTERNS.iter().any(|p| name.contains(p)) {
        return Classification {
            interaction_type: InteractionType::Confirmation,
            risk_level: RiskLevel::Medium,
            requires_confirmation: context_heuristic(call, history),
        };
    }

    // 5. Everything else runs autonomously
    Classification {
        interaction_type: InteractionType::Autonomous,
        risk_level: RiskLevel::Low,
        requires_confirmation: false,
    }
}

/// Context heuristic for medium-risk calls.
///
/// Large writes and writes to important paths always confirm; a burst of
/// the same tool lowers the confirmation frequency; otherwise confirm.
fn context_heuristic(call: &PlanToolCall, history: &[ExecutionStep]) -> bool {
    if content_length(&call.args) > LARGE_CONTENT_CHARS || touches_important_path(&call.args) {
        return true;
    }
    if recent_burst(&call.name, history) {
        return false;
    }
    true
}

fn content_length(args: &Value) -> usize {
    ["content", "text", "data"]
        .iter()
        .find_map(|k| args.get(*k))
        .and_then(Value::as_str)
        .map(str::len)
        .unwrap_or(0)
}

fn touches_important_path(args: &Value) -> bool {
    ["path", "file", "target_file"]
        .iter()
        .filter_map(|k| args.get(*k))
        .filter_map(Value::as_str)
        .any(|path| {
            let lower = path.to_lowercase();
            IMPORTANT_PATHS.iter().any(|p| lower.contains(p))
        })
}

/// Whether the last calls of this tool form a >= 2-repeat burst
fn recent_burst(tool_name: &str, history: &[ExecutionStep]) -> bool {
    let mut consecutive = 0usize;
    for step in history.iter().rev() {
        if step.kind != StepKind::ToolCall {
            continue;
        }
        if step.tool_name.as_deref() == Some(tool_name) {
            consecutive += 1;
            if consecutive >= BURST_THRESHOLD {
                return true;
            }
        } else {
            break;
        }
    }
    false
}

/// Absolute or parent-traversal paths anywhere in the arguments
fn has_dangerous_path(args: &Value) -> bool {
    match args {
        Value::String(s) => {
            s.starts_with('/') || s.contains("..") || (s.len() > 2 && s.as_bytes()[1] == b':')
        }
        Value::Array(items) => items.iter().any(has_dangerous_path),
        Value::Object(map) => map.values().any(has_dangerous_path),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolDescriptor, ToolLayer};
    use serde_json::json;

    fn call(name: &str, args: Value) -> PlanToolCall {
        PlanToolCall {
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn registry_declaration_wins_over_name_rules() {
        let registry = ToolRegistry::new();
        // "deleteDraft" would pattern-match high risk, but the registry says
        // it is a harmless autonomous tool.
        registry.register_descriptor(
            ToolDescriptor::new("deleteDraft", "Discard the in-memory draft", Value::Null)
                .with_layer(ToolLayer::Internal),
        );

        let classification = classify_tool(&call("deleteDraft", json!({})), &registry, &[]);
        assert_eq!(classification.interaction_type, InteractionType::Autonomous);
        assert_eq!(classification.risk_level, RiskLevel::Low);
        assert!(!classification.requires_confirmation);
    }

    #[test]
    fn interactive_by_name_and_by_args() {
        let registry = ToolRegistry::new();

        let by_name = classify_tool(&call("askUser", json!({})), &registry, &[]);
        assert_eq!(by_name.interaction_type, InteractionType::Interactive);

        let by_args = classify_tool(
            &call("gather", json!({"options": ["a", "b"]})),
            &registry,
            &[],
        );
        assert_eq!(by_args.interaction_type, InteractionType::Interactive);
        assert!(!by_args.requires_confirmation);
    }

    #[test]
    fn high_risk_by_name_path_and_command() {
        let registry = ToolRegistry::new();

        let by_name = classify_tool(&call("executeScript", json!({})), &registry, &[]);
        assert_eq!(by_name.risk_level, RiskLevel::High);
        assert!(by_name.requires_confirmation);

        let by_path = classify_tool(
            &call("fetchNotes", json!({"path": "../../etc/passwd"})),
            &registry,
            &[],
        );
        assert_eq!(by_path.risk_level, RiskLevel::High);

        let by_abs = classify_tool(
            &call("fetchNotes", json!({"path": "/etc/hosts"})),
            &registry,
            &[],
        );
        assert_eq!(by_abs.risk_level, RiskLevel::High);

        let by_command = classify_tool(
            &call("helper", json!({"command": "rm -rf"})),
            &registry,
            &[],
        );
        assert_eq!(by_command.risk_level, RiskLevel::High);
    }

    #[test]
    fn medium_risk_confirmation_heuristics() {
        let registry = ToolRegistry::new();

        // Large content always confirms
        let large = classify_tool(
            &call("writeFile", json!({"path": "notes.md", "content": "x".repeat(8000)})),
            &registry,
            &[],
        );
        assert_eq!(large.risk_level, RiskLevel::Medium);
        assert!(large.requires_confirmation);

        // Important path always confirms
        let important = classify_tool(
            &call("writeFile", json!({"path": "config.yaml", "content": "a"})),
            &registry,
            &[],
        );
        assert!(important.requires_confirmation);

        // A burst of the same tool lowers the gate
        let history = vec![
            ExecutionStep::tool_call(1, "writeFile", json!({}), None, true, 1),
            ExecutionStep::tool_call(1, "writeFile", json!({}), None, true, 1),
        ];
        let burst = classify_tool(
            &call("writeFile", json!({"path": "notes.md", "content": "a"})),
            &registry,
            &history,
        );
        assert!(!burst.requires_confirmation);

        // Large content still confirms during a burst
        let burst_large = classify_tool(
            &call("writeFile", json!({"path": "notes.md", "content": "x".repeat(8000)})),
            &registry,
            &history,
        );
        assert!(burst_large.requires_confirmation);
    }

    #[test]
    fn default_is_autonomous_low() {
        let registry = ToolRegistry::new();
        let classification = classify_tool(&call("listAllFiles", json!({})), &registry, &[]);
        assert_eq!(classification.interaction_type, InteractionType::Autonomous);
        assert_eq!(classification.risk_level, RiskLevel::Low);
        assert!(!classification.requires_confirmation);
    }

    #[test]
    fn classification_is_deterministic() {
        let registry = ToolRegistry::new();
        let c = call("writeFile", json!({"path": "notes.md", "content": "a"}));
        let first = classify_tool(&c, &registry, &[]);
        let second = classify_tool(&c, &registry, &[]);
        assert_eq!(first, second);
    }
}
