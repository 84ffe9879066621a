//! Specialist runner - the inner bounded LLM-tool loop
//!
//! One invocation drives a single specialist through at most
//! `max_internal_iterations` rounds of prompt → LLM → parse → tools. Two
//! sentinels end the loop early: `taskComplete` yields a
//! [`SpecialistOutput`], `askQuestion` freezes the loop state into a
//! [`SpecialistResumeState`] and returns the question. Supplying a resume
//! state restarts the loop exactly where it froze, with the user's reply
//! injected into the context.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SpecialistLimits;
use crate::llm::{drain_text, ChatRequest, GenerationOptions, LlmClient, Message};
use crate::prompts::{PromptAssembler, PromptVariables};
use crate::session::SessionStore;
use crate::tools::{ToolCache, ToolRegistry, ASK_QUESTION, TASK_COMPLETE};

use super::edits::normalize_edit_instructions;
use super::filter::should_keep_tool_result;
use super::parser::parse_specialist_response;
use super::types::{
    SpecialistContext, SpecialistInteractionResult, SpecialistMetadata, SpecialistOutput,
    SpecialistPlan, SpecialistResult, SpecialistResumeState, SpecialistSpec, ToolResultRecord,
};

/// Specialists that execute their edits directly and never hand
/// instructions to the edit engine
const DIRECT_EXECUTION_SPECIALISTS: [&str; 3] =
    ["project_initializer", "git_operator", "document_formatter"];

/// Specialists whose edit requirement depends on the tools they used
const DECISION_ONLY_SPECIALISTS: [&str; 2] = ["requirement_syncer", "prototype_designer"];

/// Specialists that never touch files
const NON_FILE_SPECIALISTS: [&str; 2] = ["knowledge_qa", "summary_writer"];

/// Tools that write to the workspace
const FILE_WRITING_TOOLS: [&str; 6] = [
    "writeFile",
    "createFile",
    "appendTextToFile",
    "createDirectory",
    "createNewProjectFolder",
    "renameFile",
];

/// Drives one specialist through its bounded inner loop
pub struct SpecialistRunner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    tool_cache: Arc<ToolCache>,
    assembler: Arc<dyn PromptAssembler>,
    session_store: Arc<SessionStore>,
    limits: SpecialistLimits,
}

impl SpecialistRunner {
    /// Create a runner over the shared engine collaborators
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        tool_cache: Arc<ToolCache>,
        assembler: Arc<dyn PromptAssembler>,
        session_store: Arc<SessionStore>,
        limits: SpecialistLimits,
    ) -> Self {
        SpecialistRunner {
            llm,
            registry,
            tool_cache,
            assembler,
            session_store,
            limits,
        }
    }

    /// Execute (or resume) one specialist invocation
    pub async fn execute(
        &self,
        specialist: &SpecialistSpec,
        context_for_this_step: SpecialistContext,
        model: &str,
        resume_state: Option<SpecialistResumeState>,
    ) -> crate::Result<SpecialistResult> {
        let wall_start = Instant::now();
        let start_time = Utc::now();

        let mut iteration: u32;
        let mut internal_history: Vec<String>;
        let mut tool_results: Vec<ToolResultRecord>;
        let mut context: SpecialistContext;

        match resume_state {
            Some(resume) => {
                iteration = resume.iteration;
                internal_history = resume.internal_history;
                tool_results = resume.tool_results;
                context = resume.context_for_this_step;
                if let Some(reply) = resume.user_response {
                    // The well-known slot the next prompt reads the reply from
                    context.structured_context.user_response = Some(reply);
                }
                info!(
                    "Resuming specialist '{}' at iteration {}",
                    specialist.id, iteration
                );
            }
            None => {
                iteration = 0;
                internal_history = Vec::new();
                tool_results = Vec::new();
                context = context_for_this_step;
            }
        }

        let caller = specialist.category.caller_type();
        let mut tools_used: Vec<String> = Vec::new();

        while iteration < self.limits.max_internal_iterations {
            iteration += 1;
            debug!(
                "Specialist '{}' iteration {}/{}",
                specialist.id, iteration, self.limits.max_internal_iterations
            );

            // Tools first: the prompt lists what the specialist may call
            let toolset = self
                .tool_cache
                .get_tools(caller, Some(specialist.id.as_str()))
                .await;

            let variables = self.build_variables(&context, &internal_history, &toolset.schema_json);
            let prompt = self
                .assembler
                .assemble_specialist_prompt(specialist, &variables)?;

            let request = ChatRequest::new(
                vec![Message::user(prompt)],
                format!("Specialist {} iteration {}", specialist.id, iteration),
            )
            .with_model(model)
            .with_tools(toolset.llm_descriptors())
            .with_options(GenerationOptions::precise());

            let raw = drain_text(self.llm.send_request(request).await?).await?;
            if raw.trim().is_empty() {
                warn!(
                    "Specialist '{}' got an empty LLM response at iteration {}",
                    specialist.id, iteration
                );
                internal_history
                    .push(format!("迭代 {}: LLM returned an empty response", iteration));
                continue;
            }

            let plan = parse_specialist_response(&raw);
            if !plan.has_tool_calls() {
                // A content-only plan cannot make progress in the inner loop
                warn!(
                    "Specialist '{}' produced a plan without tool calls at iteration {}",
                    specialist.id, iteration
                );
                internal_history.push(format!(
                    "迭代 {}: plan had no tool calls (format error), retrying",
                    iteration
                ));
                continue;
            }

            internal_history.push(format!(
                "迭代 {}: AI计划 {}",
                iteration,
                plan_summary(&plan)
            ));

            let calls = plan.tool_calls.clone().unwrap_or_default();
            let mut task_complete_payload: Option<Value> = None;

            for call in &calls {
                match self.registry.execute_tool(&call.name, call.args.clone()).await {
                    Ok(result) => {
                        tools_used.push(call.name.clone());

                        if call.name == ASK_QUESTION && result.success {
                            if let Some(question) = extract_question(result.content.as_ref()) {
                                let resume_context = SpecialistResumeState {
                                    specialist_id: specialist.id.clone(),
                                    iteration,
                                    internal_history: internal_history.clone(),
                                    current_plan: Some(plan.clone()),
                                    tool_results: tool_results.clone(),
                                    context_for_this_step: context.clone(),
                                    user_response: None,
                                };
                                info!(
                                    "Specialist '{}' suspended with a question",
                                    specialist.id
                                );
                                return Ok(SpecialistResult::Interaction(
                                    SpecialistInteractionResult {
                                        success: false,
                                        needs_chat_interaction: true,
                                        resume_context,
                                        question,
                                    },
                                ));
                            }
                        }

                        if call.name == TASK_COMPLETE && result.success {
                            task_complete_payload = result.content.clone();
                        }

                        let keep = should_keep_tool_result(&call.name, &call.args, &result);
                        let record = ToolResultRecord {
                            tool: call.name.clone(),
                            success: result.success,
                            result: if keep { result.content.clone() } else { None },
                            error: result.error.clone(),
                        };
                        internal_history.push(format!(
                            "迭代 {}: 工具 {} {}",
                            iteration,
                            call.name,
                            if result.success { "✅" } else { "❌" }
                        ));
                        tool_results.push(record);
                    }
                    Err(e) => {
                        warn!(
                            "Specialist '{}' tool '{}' failed: {}",
                            specialist.id, call.name, e
                        );
                        internal_history
                            .push(format!("迭代 {}: 工具 {} ❌ {}", iteration, call.name, e));
                        tool_results.push(ToolResultRecord {
                            tool: call.name.clone(),
                            success: false,
                            result: None,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }

            if let Some(payload) = task_complete_payload {
                let metadata = SpecialistMetadata {
                    specialist: specialist.id.clone(),
                    iterations: iteration,
                    execution_time_ms: wall_start.elapsed().as_millis() as u64,
                    timestamp: start_time,
                    tools_used: tools_used.clone(),
                };
                return Ok(SpecialistResult::Output(completion_output(
                    specialist,
                    &payload,
                    &tools_used,
                    metadata,
                )));
            }
        }

        let metadata = SpecialistMetadata {
            specialist: specialist.id.clone(),
            iterations: iteration,
            execution_time_ms: wall_start.elapsed().as_millis() as u64,
            timestamp: start_time,
            tools_used,
        };
        Ok(SpecialistResult::Output(SpecialistOutput::failure(
            format!(
                "Specialist '{}' exceeded max iterations ({})",
                specialist.id, self.limits.max_internal_iterations
            ),
            metadata,
        )))
    }

    fn build_variables(
        &self,
        context: &SpecialistContext,
        internal_history: &[String],
        available_tools: &str,
    ) -> PromptVariables {
        let session = self.session_store.current_session();

        let current_step = context.structured_context.current_step.as_ref();
        let step_field = |key: &str| {
            current_step
                .and_then(|s| s.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let dependent_results = context
            .structured_context
            .dependent_results
            .iter()
            .map(|r| serde_json::to_string(r).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");

        let session_value = |key: &str| {
            session
                .as_ref()
                .and_then(|s| s.values.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        PromptVariables {
            initial_user_request: context.user_requirements.clone(),
            current_user_response: context
                .structured_context
                .user_response
                .clone()
                .unwrap_or_default(),
            project_name: session
                .as_ref()
                .and_then(|s| s.project_name.clone())
                .unwrap_or_default(),
            base_dir: session
                .as_ref()
                .and_then(|s| s.base_dir.clone())
                .unwrap_or_default(),
            current_step_description: step_field("description"),
            expected_output: step_field("expected_output"),
            dependent_results,
            internal_history: internal_history.join("\n"),
            user_input: context.user_requirements.clone(),
            has_active_project: session.is_some(),
            intent: session_value("intent"),
            last_intent: session_value("last_intent"),
            active_files: session_value("active_files"),
            available_tools: available_tools.to_string(),
            ..Default::default()
        }
        .stamp_now()
    }
}

/// One-line summary of a plan for the internal history
fn plan_summary(plan: &SpecialistPlan) -> String {
    let calls = plan
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    format!("tool: {}", calls)
}

/// Pull the question text out of an askQuestion result
fn extract_question(content: Option<&Value>) -> Option<String> {
    let content = content?;
    let flagged = content
        .get("needs_chat_interaction")
        .or_else(|| content.get("needsChatInteraction"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !flagged {
        return None;
    }
    content
        .get("chat_question")
        .or_else(|| content.get("chatQuestion"))
        .or_else(|| content.get("question"))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Build the final output from a successful `taskComplete` payload
fn completion_output(
    specialist: &SpecialistSpec,
    payload: &Value,
    tools_used: &[String],
    metadata: SpecialistMetadata,
) -> SpecialistOutput {
    let project_state = payload.pointer("/contextForNext/projectState");
    let summary = payload
        .get("summary")
        .and_then(Value::as_str)
        .map(String::from);

    let declared = project_state
        .and_then(|ps| ps.get("requires_file_editing"))
        .and_then(Value::as_bool);

    let edit_instructions = project_state.and_then(|ps| ps.get("edit_instructions"));
    let target_file = project_state
        .and_then(|ps| ps.get("target_file"))
        .and_then(Value::as_str)
        .map(String::from);
    let content = project_state
        .and_then(|ps| ps.get("content"))
        .and_then(Value::as_str)
        .map(String::from)
        .or(summary);

    let requires_file_editing = match declared {
        Some(flag) => flag,
        None => infer_edit_requirement(&specialist.id, tools_used, edit_instructions),
    };

    // Downstream (the resume machine) reads nextStepType off the output
    let mut structured_data = payload
        .get("structuredData")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    if let Some(map) = structured_data.as_object_mut() {
        map.insert(
            "nextStepType".to_string(),
            payload
                .get("nextStepType")
                .cloned()
                .unwrap_or(Value::String(crate::tools::TASK_FINISHED.to_string())),
        );
    }

    SpecialistOutput {
        success: true,
        content,
        error: None,
        requires_file_editing,
        target_file: if requires_file_editing { target_file } else { None },
        edit_instructions: if requires_file_editing {
            edit_instructions.map(normalize_edit_instructions)
        } else {
            None
        },
        structured_data: Some(structured_data),
        metadata,
    }
}

/// Infer the edit requirement when `taskComplete` did not declare one
fn infer_edit_requirement(
    specialist_id: &str,
    tools_used: &[String],
    edit_instructions: Option<&Value>,
) -> bool {
    if DIRECT_EXECUTION_SPECIALISTS.contains(&specialist_id)
        || NON_FILE_SPECIALISTS.contains(&specialist_id)
    {
        return false;
    }
    if DECISION_ONLY_SPECIALISTS.contains(&specialist_id) {
        return tools_used
            .iter()
            .any(|t| FILE_WRITING_TOOLS.contains(&t.as_str()));
    }
    // Content specialists outside the closed sets: edits are required
    // exactly when instructions were produced
    edit_instructions
        .and_then(Value::as_array)
        .is_some_and(|list| !list.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecialistLimits;
    use crate::llm::StaticLlmClient;
    use crate::prompts::TemplateAssembler;
    use crate::session::SessionContext;
    use crate::tools::{register_sentinels, AccessController, ToolCache, ToolRegistry};

    fn runner_with(responses: Vec<String>) -> (SpecialistRunner, Arc<ToolRegistry>) {
        let registry = Arc::new(ToolRegistry::new());
        register_sentinels(&registry);
        let cache = ToolCache::new(AccessController::new(Arc::clone(&registry)));
        let session_store = Arc::new(SessionStore::new());
        session_store.set_session(SessionContext::new(
            Some("demo".into()),
            Some("/work/demo".into()),
        ));

        let runner = SpecialistRunner::new(
            Arc::new(StaticLlmClient::new(responses)),
            Arc::clone(&registry),
            cache,
            Arc::new(TemplateAssembler::new(vec![])),
            session_store,
            SpecialistLimits::default(),
        );
        (runner, registry)
    }

    fn spec() -> SpecialistSpec {
        SpecialistSpec::content("fr_writer", "FR Writer")
    }

    #[tokio::test]
    async fn task_complete_with_edits_produces_editing_output() {
        let response = serde_json::json!({
            "tool_calls": [{
                "name": "taskComplete",
                "args": {
                    "summary": "FR chapter drafted",
                    "contextForNext": {
                        "projectState": {
                            "requires_file_editing": true,
                            "target_file": "SRS.md",
                            "edit_instructions": [{
                                "type": "replace_section",
                                "target": {"sectionName": "FR"},
                                "content": "...",
                                "reason": "draft"
                            }]
                        }
                    }
                }
            }]
        })
        .to_string();

        let (runner, _registry) = runner_with(vec![response]);
        let result = runner
            .execute(&spec(), SpecialistContext::default(), "m", None)
            .await
            .unwrap();

        let SpecialistResult::Output(output) = result else {
            panic!("expected output");
        };
        assert!(output.success);
        assert!(output.requires_file_editing);
        assert_eq!(output.target_file.as_deref(), Some("SRS.md"));
        let instructions = output.edit_instructions.unwrap();
        assert_eq!(instructions[0]["kind"], "semantic");
        assert_eq!(output.metadata.iterations, 1);
        assert_eq!(output.metadata.tools_used, vec!["taskComplete"]);
    }

    #[tokio::test]
    async fn ask_question_suspends_with_resume_state() {
        let response = serde_json::json!({
            "tool_calls": [{
                "name": "askQuestion",
                "args": {"question": "Which modules should we cover?"}
            }]
        })
        .to_string();

        let (runner, _registry) = runner_with(vec![response]);
        let result = runner
            .execute(&spec(), SpecialistContext::default(), "m", None)
            .await
            .unwrap();

        let SpecialistResult::Interaction(interaction) = result else {
            panic!("expected interaction");
        };
        assert!(interaction.needs_chat_interaction);
        assert!(!interaction.success);
        assert_eq!(interaction.question, "Which modules should we cover?");
        assert_eq!(interaction.resume_context.specialist_id, "fr_writer");
        assert_eq!(interaction.resume_context.iteration, 1);
        assert!(interaction.resume_context.user_response.is_none());
    }

    #[tokio::test]
    async fn resume_injects_user_response_and_completes() {
        let first = serde_json::json!({
            "tool_calls": [{
                "name": "askQuestion",
                "args": {"question": "Which modules?"}
            }]
        })
        .to_string();
        let second = serde_json::json!({
            "tool_calls": [{
                "name": "taskComplete",
                "args": {
                    "summary": "covered auth and billing",
                    "contextForNext": {"projectState": {"requires_file_editing": false}}
                }
            }]
        })
        .to_string();

        let (runner, _registry) = runner_with(vec![first, second]);

        let result = runner
            .execute(&spec(), SpecialistContext::default(), "m", None)
            .await
            .unwrap();
        let SpecialistResult::Interaction(interaction) = result else {
            panic!("expected interaction");
        };

        let mut resume = interaction.resume_context;
        resume.user_response = Some("auth, billing".into());

        let result = runner
            .execute(&spec(), SpecialistContext::default(), "m", Some(resume))
            .await
            .unwrap();
        let SpecialistResult::Output(output) = result else {
            panic!("expected output");
        };
        assert!(output.success);
        assert!(!output.requires_file_editing);
        assert_eq!(output.content.as_deref(), Some("covered auth and billing"));
        // The resumed loop continued from iteration 1
        assert_eq!(output.metadata.iterations, 2);
    }

    #[tokio::test]
    async fn exhausts_iterations_on_unparseable_output() {
        let responses = vec!["not json at all".to_string(); 5];
        let (runner, _registry) = runner_with(responses);

        let result = runner
            .execute(&spec(), SpecialistContext::default(), "m", None)
            .await
            .unwrap();
        let SpecialistResult::Output(output) = result else {
            panic!("expected output");
        };
        assert!(!output.success);
        assert!(!output.requires_file_editing);
        assert!(output.error.unwrap().contains("exceeded max iterations"));
        assert_eq!(output.metadata.iterations, 5);
    }

    #[tokio::test]
    async fn direct_execution_specialist_never_requires_edits() {
        let response = serde_json::json!({
            "tool_calls": [{
                "name": "taskComplete",
                "args": {"summary": "repo initialised"}
            }]
        })
        .to_string();

        let (runner, _registry) = runner_with(vec![response]);
        let result = runner
            .execute(
                &SpecialistSpec::process("git_operator", "Git Operator"),
                SpecialistContext::default(),
                "m",
                None,
            )
            .await
            .unwrap();

        let SpecialistResult::Output(output) = result else {
            panic!("expected output");
        };
        assert!(output.success);
        assert!(!output.requires_file_editing);
    }

    #[test]
    fn decision_only_inference_depends_on_file_tools() {
        assert!(infer_edit_requirement(
            "requirement_syncer",
            &["readFile".into(), "writeFile".into()],
            None
        ));
        assert!(!infer_edit_requirement(
            "requirement_syncer",
            &["readFile".into()],
            None
        ));
        // Non-file specialists never require edits
        assert!(!infer_edit_requirement(
            "summary_writer",
            &["writeFile".into()],
            None
        ));
        // Unlisted content specialists follow the instructions' presence
        assert!(infer_edit_requirement(
            "nfr_writer",
            &[],
            Some(&serde_json::json!([{"type": "replace_section"}]))
        ));
        assert!(!infer_edit_requirement("nfr_writer", &[], None));
    }
}
