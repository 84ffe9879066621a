//! Prompt assembly for specialists
//!
//! The runner hands the assembler a [`SpecialistSpec`] and a fully
//! populated [`PromptVariables`]; the assembler finds the role's markdown
//! template on the search path and renders it with handlebars `{{VAR}}`
//! substitution. A built-in generic template covers roles without a file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::specialist::SpecialistSpec;

/// The variable set available to role templates
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptVariables {
    #[serde(rename = "INITIAL_USER_REQUEST")]
    pub initial_user_request: String,
    #[serde(rename = "CURRENT_USER_RESPONSE")]
    pub current_user_response: String,
    #[serde(rename = "PROJECT_NAME")]
    pub project_name: String,
    #[serde(rename = "BASE_DIR")]
    pub base_dir: String,
    #[serde(rename = "TIMESTAMP")]
    pub timestamp: String,
    #[serde(rename = "DATE")]
    pub date: String,
    #[serde(rename = "CURRENT_STEP_DESCRIPTION")]
    pub current_step_description: String,
    #[serde(rename = "EXPECTED_OUTPUT")]
    pub expected_output: String,
    #[serde(rename = "DEPENDENT_RESULTS")]
    pub dependent_results: String,
    #[serde(rename = "INTERNAL_HISTORY")]
    pub internal_history: String,
    #[serde(rename = "CONVERSATION_HISTORY")]
    pub conversation_history: String,
    #[serde(rename = "TOOL_RESULTS_CONTEXT")]
    pub tool_results_context: String,
    #[serde(rename = "USER_INPUT")]
    pub user_input: String,
    #[serde(rename = "HAS_ACTIVE_PROJECT")]
    pub has_active_project: bool,
    #[serde(rename = "INTENT")]
    pub intent: String,
    #[serde(rename = "AVAILABLE_TOOLS")]
    pub available_tools: String,
    #[serde(rename = "ALL_TOOL_GUIDES")]
    pub all_tool_guides: String,
    #[serde(rename = "LAST_INTENT")]
    pub last_intent: String,
    #[serde(rename = "ACTIVE_FILES")]
    pub active_files: String,
    /// Per-tool calling guides, addressed as `TOOL_CALLING_GUIDE.<name>`
    #[serde(rename = "TOOL_CALLING_GUIDE")]
    pub tool_calling_guide: BTreeMap<String, String>,
}

impl PromptVariables {
    /// Fill `TIMESTAMP` and `DATE` from the current clock
    pub fn stamp_now(mut self) -> Self {
        let now = Utc::now();
        self.timestamp = now.to_rfc3339();
        self.date = now.format("%Y-%m-%d").to_string();
        self
    }
}

/// The prompt-assembly seam
pub trait PromptAssembler: Send + Sync {
    /// Build the full prompt for one specialist invocation
    fn assemble_specialist_prompt(
        &self,
        specialist: &SpecialistSpec,
        variables: &PromptVariables,
    ) -> Result<String>;
}

/// Generic template used when a role has no markdown file
const DEFAULT_SPECIALIST_TEMPLATE: &str = "\
You are the {{SPECIALIST_NAME}} specialist working on project {{PROJECT_NAME}}.

## Task
{{CURRENT_STEP_DESCRIPTION}}

Expected output: {{EXPECTED_OUTPUT}}

## User requirements
{{INITIAL_USER_REQUEST}}
{{#if CURRENT_USER_RESPONSE}}
## User reply
{{CURRENT_USER_RESPONSE}}
{{/if}}

## Prior results
{{DEPENDENT_RESULTS}}

## Your progress so far
{{INTERNAL_HISTORY}}

## Available tools
{{AVAILABLE_TOOLS}}

Respond with a single JSON object containing either \"tool_calls\" or a \
\"direct_response\". Call taskComplete when the task is done, or \
askQuestion when you need the user.";

/// File-system template assembler
pub struct TemplateAssembler {
    search_paths: Vec<PathBuf>,
}

impl TemplateAssembler {
    /// Create an assembler over explicit search paths
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        TemplateAssembler { search_paths }
    }

    /// Default search path: `./prompts` then `$CONFIG_DIR/srsagent/prompts`
    pub fn with_default_paths() -> Self {
        let mut paths = vec![PathBuf::from("prompts")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("srsagent").join("prompts"));
        }
        TemplateAssembler::new(paths)
    }

    fn load_template(&self, specialist_id: &str) -> Option<String> {
        for dir in &self.search_paths {
            let candidate = dir.join(format!("{}.md", specialist_id));
            if candidate.exists() {
                match std::fs::read_to_string(&candidate) {
                    Ok(template) => {
                        debug!("Loaded role template {}", candidate.display());
                        return Some(template);
                    }
                    Err(e) => {
                        debug!("Failed to read {}: {}", candidate.display(), e);
                    }
                }
            }
        }
        None
    }

    fn render(&self, template: &str, data: &serde_json::Value) -> Result<String> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string("role", template)
            .map_err(|e| Error::Template(format!("Invalid template: {}", e)))?;
        registry
            .render("role", data)
            .map_err(|e| Error::Template(format!("Template render error: {}", e)))
    }
}

impl PromptAssembler for TemplateAssembler {
    fn assemble_specialist_prompt(
        &self,
        specialist: &SpecialistSpec,
        variables: &PromptVariables,
    ) -> Result<String> {
        let template = self
            .load_template(&specialist.id)
            .unwrap_or_else(|| DEFAULT_SPECIALIST_TEMPLATE.to_string());

        let mut data = serde_json::to_value(variables)?;
        if let Some(map) = data.as_object_mut() {
            map.insert(
                "SPECIALIST_NAME".to_string(),
                serde_json::Value::String(specialist.name.clone()),
            );
            map.insert(
                "SPECIALIST_ID".to_string(),
                serde_json::Value::String(specialist.id.clone()),
            );
        }

        self.render(&template, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spec() -> SpecialistSpec {
        SpecialistSpec::content("fr_writer", "Functional Requirements Writer")
    }

    #[test]
    fn falls_back_to_builtin_template() {
        let assembler = TemplateAssembler::new(vec![PathBuf::from("/nonexistent")]);
        let variables = PromptVariables {
            initial_user_request: "Write the FR chapter".into(),
            project_name: "demo".into(),
            current_step_description: "draft FRs".into(),
            ..Default::default()
        };

        let prompt = assembler
            .assemble_specialist_prompt(&spec(), &variables)
            .unwrap();
        assert!(prompt.contains("Functional Requirements Writer"));
        assert!(prompt.contains("Write the FR chapter"));
        assert!(prompt.contains("draft FRs"));
        // No reply: the conditional block is omitted
        assert!(!prompt.contains("## User reply"));
    }

    #[test]
    fn loads_role_template_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("fr_writer.md")).unwrap();
        write!(
            file,
            "Role template for {{{{PROJECT_NAME}}}}: {{{{USER_INPUT}}}} \
             (guide: {{{{TOOL_CALLING_GUIDE.readFile}}}})"
        )
        .unwrap();

        let assembler = TemplateAssembler::new(vec![dir.path().to_path_buf()]);
        let mut variables = PromptVariables {
            project_name: "demo".into(),
            user_input: "cover auth".into(),
            ..Default::default()
        };
        variables
            .tool_calling_guide
            .insert("readFile".into(), "pass a path".into());

        let prompt = assembler
            .assemble_specialist_prompt(&spec(), &variables)
            .unwrap();
        assert_eq!(prompt, "Role template for demo: cover auth (guide: pass a path)");
    }

    #[test]
    fn user_reply_block_appears_on_resume() {
        let assembler = TemplateAssembler::new(vec![]);
        let variables = PromptVariables {
            current_user_response: "auth, billing".into(),
            ..Default::default()
        };
        let prompt = assembler
            .assemble_specialist_prompt(&spec(), &variables)
            .unwrap();
        assert!(prompt.contains("## User reply"));
        assert!(prompt.contains("auth, billing"));
    }

    #[test]
    fn stamp_now_fills_time_fields() {
        let variables = PromptVariables::default().stamp_now();
        assert!(!variables.timestamp.is_empty());
        assert_eq!(variables.date.len(), 10);
    }
}
