//! Duplicate and infinite-loop detection
//!
//! Two guards keep the outer loop from burning iterations: a duplicate
//! detector that suppresses a tool call identical to one executed within
//! the last 30 seconds, and an infinite-loop detector that forces a
//! summarising response when the recent tool-name window is dominated by
//! one tool.

use chrono::{Duration, Utc};
use serde_json::Value;

use super::state::{AgentState, ExecutionStep, StepKind};

/// How many recent tool-call steps the duplicate scan inspects
const DUPLICATE_SCAN_WINDOW: usize = 10;

/// Detector configuration; both thresholds are tunable
#[derive(Debug, Clone)]
pub struct LoopDetector {
    /// Seconds within which an identical call counts as a duplicate
    pub duplicate_window_secs: i64,
    /// How many recent tool calls the infinite-loop scan inspects
    pub loop_window: usize,
    /// Identical tool names within the window that count as a loop
    pub loop_threshold: usize,
}

impl Default for LoopDetector {
    fn default() -> Self {
        LoopDetector {
            duplicate_window_secs: 30,
            loop_window: 5,
            loop_threshold: 3,
        }
    }
}

impl LoopDetector {
    /// Create a detector with explicit thresholds
    pub fn new(duplicate_window_secs: i64, loop_window: usize, loop_threshold: usize) -> Self {
        LoopDetector {
            duplicate_window_secs,
            loop_window,
            loop_threshold,
        }
    }

    /// Whether an identical call (name + args) executed recently
    pub fn has_recent_tool_execution(
        &self,
        tool_name: &str,
        args: &Value,
        history: &[ExecutionStep],
    ) -> bool {
        let target = fingerprint(tool_name, args);
        let cutoff = Utc::now() - Duration::seconds(self.duplicate_window_secs);

        history
            .iter()
            .rev()
            .filter(|s| s.kind == StepKind::ToolCall)
            .take(DUPLICATE_SCAN_WINDOW)
            .any(|step| {
                step.timestamp >= cutoff
                    && step.tool_name.as_deref() == Some(tool_name)
                    && step
                        .args
                        .as_ref()
                        .map(|a| fingerprint(tool_name, a) == target)
                        .unwrap_or(false)
            })
    }

    /// Whether the recent tool-name window is dominated by one tool.
    /// Returns the offending tool name.
    pub fn detect_infinite_loop(&self, state: &AgentState) -> Option<String> {
        let recent: Vec<&str> = state
            .execution_history
            .iter()
            .rev()
            .filter(|s| s.kind == StepKind::ToolCall)
            .take(self.loop_window)
            .filter_map(|s| s.tool_name.as_deref())
            .collect();

        for name in &recent {
            let count = recent.iter().filter(|n| *n == name).count();
            if count >= self.loop_threshold {
                return Some(name.to_string());
            }
        }
        None
    }
}

/// Non-cryptographic fingerprint over a call's name and arguments
fn fingerprint(tool_name: &str, args: &Value) -> u64 {
    let serialized = format!("{}::{}", tool_name, args);
    let mut h: u64 = 0;
    for b in serialized.bytes() {
        h = h.wrapping_mul(31).wrapping_add(b as u64);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_step(name: &str, args: Value) -> ExecutionStep {
        ExecutionStep::tool_call(1, name, args, None, true, 1)
    }

    #[test]
    fn detects_recent_duplicate() {
        let detector = LoopDetector::default();
        let history = vec![tool_step("readFile", json!({"path": "SRS.md"}))];

        assert!(detector.has_recent_tool_execution(
            "readFile",
            &json!({"path": "SRS.md"}),
            &history
        ));
        // Different args are not duplicates
        assert!(!detector.has_recent_tool_execution(
            "readFile",
            &json!({"path": "other.md"}),
            &history
        ));
        // Different tool is not a duplicate
        assert!(!detector.has_recent_tool_execution(
            "writeFile",
            &json!({"path": "SRS.md"}),
            &history
        ));
    }

    #[test]
    fn old_executions_are_not_duplicates() {
        let detector = LoopDetector::default();
        let mut step = tool_step("readFile", json!({}));
        step.timestamp = Utc::now() - Duration::seconds(60);

        assert!(!detector.has_recent_tool_execution("readFile", &json!({}), &[step]));
    }

    #[test]
    fn infinite_loop_requires_threshold_repeats() {
        let detector = LoopDetector::default();
        let mut state = AgentState::new(15);
        state.push_step(tool_step("readFile", json!({"path": "a"})));
        state.push_step(tool_step("readFile", json!({"path": "b"})));
        assert_eq!(detector.detect_infinite_loop(&state), None);

        state.push_step(tool_step("readFile", json!({"path": "c"})));
        assert_eq!(
            detector.detect_infinite_loop(&state),
            Some("readFile".to_string())
        );
    }

    #[test]
    fn window_limits_the_scan() {
        let detector = LoopDetector::new(30, 3, 3);
        let mut state = AgentState::new(15);
        // Two old repeats pushed out of the window by newer distinct calls
        state.push_step(tool_step("readFile", json!({})));
        state.push_step(tool_step("readFile", json!({})));
        state.push_step(tool_step("a", json!({})));
        state.push_step(tool_step("b", json!({})));
        state.push_step(tool_step("c", json!({})));
        assert_eq!(detector.detect_infinite_loop(&state), None);
    }

    #[test]
    fn non_tool_steps_are_ignored() {
        let detector = LoopDetector::default();
        let mut state = AgentState::new(15);
        for _ in 0..3 {
            state.push_step(tool_step("readFile", json!({})));
            state.push_step(ExecutionStep::thought(1, "thinking"));
        }
        assert_eq!(
            detector.detect_infinite_loop(&state),
            Some("readFile".to_string())
        );
    }
}
