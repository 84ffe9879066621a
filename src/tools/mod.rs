//! Tools module - registry, access control and sentinels
//!
//! Tools are described by a [`ToolDescriptor`] (layer, category, risk,
//! interaction type, access list) and optionally backed by a [`Tool`]
//! implementation. The [`ToolRegistry`] owns both for process lifetime;
//! the [`AccessController`] filters it per caller; the [`ToolCache`]
//! memoises the filtered sets and is cleared on every registry mutation.
//!
//! ## Adding a New Tool
//!
//! 1. Implement the `Tool` trait (descriptor + execute)
//! 2. Register it with `registry.register(MyTool)`
//! 3. Pick the layer/access list that matches who may call it

mod access;
mod cache;
mod registry;
pub mod sentinel;
mod traits;

// Core trait and types
pub use traits::{
    AccessEntry, CallerType, InteractionType, RiskLevel, Tool, ToolCall, ToolDescriptor,
    ToolLayer, ToolResult,
};

// Registry
pub use registry::{RegistryStats, ToolRegistry};

// Access control
pub use access::{AccessController, AccessStats};

// Cache
pub use cache::{AccessKey, CachedToolSet, ToolCache};

// Sentinels
pub use sentinel::{
    register_sentinels, AskQuestionTool, FinalAnswerTool, TaskCompleteTool, ASK_QUESTION,
    FINAL_ANSWER, TASK_COMPLETE, TASK_FINISHED,
};
