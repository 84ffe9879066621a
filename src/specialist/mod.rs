//! Specialists - role-bound sub-agents with a bounded inner loop
//!
//! A specialist is identified by a stable string id and belongs to the
//! `content` or `process` category. The [`SpecialistRunner`] drives one
//! specialist per plan step; parsing, edit classification and history
//! filtering live in their own submodules.

mod edits;
mod filter;
mod parser;
mod runner;
mod types;

pub use edits::{
    classify_instruction, normalize_edit_instructions, validate_semantic, EditInstructionKind,
};
pub use filter::should_keep_tool_result;
pub use parser::{extract_json_object, parse_specialist_response, repair_json};
pub use runner::SpecialistRunner;
pub use types::{
    SpecialistCategory, SpecialistContext, SpecialistInteractionResult, SpecialistLoopState,
    SpecialistMetadata, SpecialistOutput, SpecialistPlan, SpecialistResult, SpecialistResumeState,
    SpecialistSpec, StructuredContext, ToolResultRecord,
};
