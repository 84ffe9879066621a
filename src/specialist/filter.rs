//! Internal-history result filtering
//!
//! A specialist that reads an editable document and records the full result
//! would re-feed the entire document into its next prompt. The filter drops
//! read-tool results on known editable documents and any payload that
//! carries sizeable markdown section content; everything else is kept.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::tools::ToolResult;

/// Tools whose results are subject to document filtering
const READ_TOOLS: [&str; 3] = ["readFile", "readMarkdownFile", "readYamlFile"];

/// Payloads longer than this with markdown headings count as document dumps
const MARKDOWN_DUMP_THRESHOLD: usize = 2_000;

fn editable_doc_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(SRS\.md|requirements\.ya?ml|fr\.ya?ml|nfr\.ya?ml|glossary\.ya?ml)$")
            .unwrap()
    })
}

/// Whether a tool result should be kept in the internal history
pub fn should_keep_tool_result(tool_name: &str, args: &Value, result: &ToolResult) -> bool {
    if !READ_TOOLS.contains(&tool_name) {
        return true;
    }

    let path = ["path", "file", "target_file"]
        .iter()
        .find_map(|k| args.get(*k))
        .and_then(Value::as_str);

    if let Some(path) = path {
        if editable_doc_pattern().is_match(path) {
            return false;
        }
    }

    !payload_is_markdown_dump(result)
}

/// A payload is a markdown dump when its text form is large and carries
/// multiple section headings.
fn payload_is_markdown_dump(result: &ToolResult) -> bool {
    let Some(content) = &result.content else {
        return false;
    };
    let text = match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.len() < MARKDOWN_DUMP_THRESHOLD {
        return false;
    }
    text.matches("\n#").count() >= 2 || text.starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_result(text: &str) -> ToolResult {
        ToolResult::success_text(text)
    }

    #[test]
    fn drops_reads_of_editable_documents() {
        let result = text_result("# SRS\ncontent");
        assert!(!should_keep_tool_result(
            "readFile",
            &json!({"path": "project/SRS.md"}),
            &result
        ));
        assert!(!should_keep_tool_result(
            "readYamlFile",
            &json!({"path": "requirements.yml"}),
            &result
        ));
        assert!(!should_keep_tool_result(
            "readFile",
            &json!({"path": "fr.yaml"}),
            &result
        ));
        assert!(!should_keep_tool_result(
            "readFile",
            &json!({"path": "docs/glossary.yaml"}),
            &result
        ));
    }

    #[test]
    fn keeps_reads_of_other_files() {
        let result = text_result("short readme");
        assert!(should_keep_tool_result(
            "readFile",
            &json!({"path": "README.md"}),
            &result
        ));
    }

    #[test]
    fn keeps_non_read_tools_unconditionally() {
        let big_markdown = format!("# Title\n{}\n## Section\n{}", "x".repeat(1500), "y".repeat(1500));
        let result = text_result(&big_markdown);
        assert!(should_keep_tool_result(
            "writeFile",
            &json!({"path": "SRS.md"}),
            &result
        ));
    }

    #[test]
    fn drops_markdown_dumps_even_without_a_matching_path() {
        let big_markdown = format!("# Title\n{}\n## Section\n{}", "x".repeat(1500), "y".repeat(1500));
        let result = text_result(&big_markdown);
        assert!(!should_keep_tool_result(
            "readFile",
            &json!({"path": "notes/chapter.md"}),
            &result
        ));
    }

    #[test]
    fn keeps_unparseable_args() {
        // No path in args at all: keep unless the payload is a dump
        let result = text_result("ok");
        assert!(should_keep_tool_result("readFile", &json!(null), &result));
    }
}
