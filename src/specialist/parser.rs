//! Multi-strategy parsing of raw LLM output into a specialist plan
//!
//! LLM output is unreliable: plans arrive fenced, embedded in prose, with
//! trailing commas or single-quoted strings. Strategies are tried in order
//! and the first result passing the valid-plan predicate wins:
//!
//! 1. fenced ```json code block
//! 2. brace-balanced extraction (string-literal aware)
//! 3. greedy first-`{` to last-`}`
//! 4. the whole raw string as a `direct_response`
//!
//! Every JSON candidate goes through a repair pass before parsing.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::engine::plan::PlanToolCall;

use super::types::SpecialistPlan;

fn fenced_json_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").unwrap())
}

fn unquoted_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).unwrap())
}

/// Parse raw LLM output into a standardised [`SpecialistPlan`]
pub fn parse_specialist_response(raw: &str) -> SpecialistPlan {
    // Strategy 1: fenced ```json block
    if let Some(captures) = fenced_json_pattern().captures(raw) {
        if let Some(value) = parse_with_repair(captures[1].trim()) {
            let plan = standardize(value);
            if plan.is_valid() {
                return plan;
            }
        }
    }

    // Strategy 2: brace-balanced extraction
    if let Some(candidate) = extract_balanced_object(raw) {
        if let Some(value) = parse_with_repair(&candidate) {
            let plan = standardize(value);
            if plan.is_valid() {
                return plan;
            }
        }
    }

    // Strategy 3: greedy first-{ to last-}
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Some(value) = parse_with_repair(&raw[start..=end]) {
                let plan = standardize(value);
                if plan.is_valid() {
                    return plan;
                }
            }
        }
    }

    // Strategy 4: the whole string is the response
    debug!("All JSON strategies failed; treating raw output as direct response");
    SpecialistPlan {
        direct_response: Some(raw.trim().to_string()),
        ..Default::default()
    }
}

/// Extract the first parseable JSON object from raw LLM output, using the
/// same strategy chain as the plan parser but without the plan predicate.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    if let Some(captures) = fenced_json_pattern().captures(raw) {
        if let Some(value) = parse_with_repair(captures[1].trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    if let Some(candidate) = extract_balanced_object(raw) {
        if let Some(value) = parse_with_repair(&candidate) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Some(value) = parse_with_repair(&raw[start..=end]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Try strict parsing first, then once more after repair
fn parse_with_repair(candidate: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }
    serde_json::from_str::<Value>(&repair_json(candidate)).ok()
}

/// Best-effort repair of common LLM JSON defects: single-quoted strings,
/// trailing commas and unquoted object keys.
pub fn repair_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut in_string = false;
    let mut delimiter = '"';
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            if c == '\\' {
                escaped = true;
                out.push(c);
            } else if c == delimiter {
                in_string = false;
                out.push('"');
            } else if c == '"' {
                // A bare double quote inside a single-quoted string
                out.push('\\');
                out.push('"');
            } else {
                out.push(c);
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                in_string = true;
                delimiter = c;
                out.push('"');
            }
            ',' => {
                // Drop the comma when the next non-whitespace closes a scope
                let mut lookahead = chars.clone();
                let next_non_ws = loop {
                    match lookahead.peek() {
                        Some(n) if n.is_whitespace() => {
                            lookahead.next();
                        }
                        other => break other.copied(),
                    }
                };
                if !matches!(next_non_ws, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    unquoted_key_pattern()
        .replace_all(&out, "$1\"$2\":")
        .to_string()
}

/// Find the outermost `{…}` object, ignoring braces inside string literals
fn extract_balanced_object(raw: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut delimiter = '"';
    let mut escaped = false;

    for (i, c) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == delimiter {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_string = true;
                delimiter = c;
            }
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let begin = start?;
                        return Some(raw[begin..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Standardise a parsed value to the `{content?, structured_data?,
/// direct_response?, tool_calls?}` shape, tolerating camelCase keys.
fn standardize(value: Value) -> SpecialistPlan {
    let Value::Object(map) = value else {
        return SpecialistPlan::default();
    };

    let get_str = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| map.get(*k))
            .and_then(Value::as_str)
            .map(String::from)
    };

    let content = get_str(&["content"]);
    let direct_response = get_str(&["direct_response", "directResponse", "response"]);
    let structured_data = ["structured_data", "structuredData"]
        .iter()
        .find_map(|k| map.get(*k))
        .cloned();

    let tool_calls = ["tool_calls", "toolCalls"]
        .iter()
        .find_map(|k| map.get(*k))
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let name = call.get("name").and_then(Value::as_str)?;
                    let args = call
                        .get("args")
                        .or_else(|| call.get("arguments"))
                        .cloned()
                        .unwrap_or(Value::Object(Default::default()));
                    Some(PlanToolCall {
                        name: name.to_string(),
                        args,
                    })
                })
                .collect::<Vec<_>>()
        });

    SpecialistPlan {
        content,
        structured_data,
        direct_response,
        tool_calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let raw = "Here is my plan:\n```json\n{\"tool_calls\": [{\"name\": \"readFile\", \"args\": {\"path\": \"SRS.md\"}}]}\n```\nDone.";
        let plan = parse_specialist_response(raw);
        let calls = plan.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "readFile");
    }

    #[test]
    fn parses_embedded_object_with_brace_noise_in_strings() {
        let raw = r#"Thinking... {"content": "section {intro} done", "tool_calls": [{"name": "taskComplete", "args": {"summary": "ok"}}]} trailing"#;
        let plan = parse_specialist_response(raw);
        assert_eq!(plan.content.as_deref(), Some("section {intro} done"));
        assert_eq!(plan.tool_calls.unwrap()[0].name, "taskComplete");
    }

    #[test]
    fn repairs_trailing_commas_and_single_quotes() {
        let raw = "{'direct_response': 'hello', }";
        let plan = parse_specialist_response(raw);
        assert_eq!(plan.direct_response.as_deref(), Some("hello"));
    }

    #[test]
    fn repairs_unquoted_keys() {
        let repaired = repair_json("{name: \"readFile\", args: {path: \"SRS.md\"}}");
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["name"], "readFile");
        assert_eq!(value["args"]["path"], "SRS.md");
    }

    #[test]
    fn camel_case_keys_are_standardized() {
        let raw = r#"{"directResponse": "hi", "toolCalls": [{"name": "finalAnswer", "arguments": {"summary": "s"}}]}"#;
        let plan = parse_specialist_response(raw);
        assert_eq!(plan.direct_response.as_deref(), Some("hi"));
        let calls = plan.tool_calls.unwrap();
        assert_eq!(calls[0].name, "finalAnswer");
        assert_eq!(calls[0].args["summary"], "s");
    }

    #[test]
    fn falls_back_to_direct_response() {
        let raw = "I could not produce JSON, sorry.";
        let plan = parse_specialist_response(raw);
        assert_eq!(plan.direct_response.as_deref(), Some(raw));
    }

    #[test]
    fn invalid_json_object_without_plan_fields_falls_back() {
        // Parses as JSON but fails the valid-plan predicate
        let raw = r#"{"unrelated": 1}"#;
        let plan = parse_specialist_response(raw);
        assert_eq!(plan.direct_response.as_deref(), Some(raw));
    }

    #[test]
    fn balanced_extraction_ignores_escapes() {
        let candidate =
            extract_balanced_object(r#"noise {"a": "quote \" and { brace"} tail"#).unwrap();
        assert_eq!(candidate, r#"{"a": "quote \" and { brace"}"#);
    }
}
