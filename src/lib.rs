//! # SrsAgent
//!
//! An autonomous agent execution engine for software-requirements
//! authoring, built with Rust.
//!
//! ## Architecture
//!
//! SrsAgent drives an LLM through multi-step tasks against a requirements
//! document. A user request becomes a plan; the plan is dispatched to one
//! or more *specialists* (role-bound sub-agents); each specialist runs its
//! own bounded tool-calling loop; the engine keeps durable state so a
//! user-interaction interrupt can suspend and resume the whole pipeline:
//!
//! - **Engine** (`engine`): the outer state machine, planner seam, plan
//!   executor, risk classifier and loop guards
//! - **Specialists** (`specialist`): the inner LLM-tool loop, LLM JSON
//!   parsing, edit-instruction classification and history filtering
//! - **Tools** (`tools`): registry, per-caller access control, cached tool
//!   sets and the control-flow sentinels
//! - **History** (`history`): token-budgeted, tiered history compression
//! - **LLM** (`llm`): the streaming chat-adapter seam
//! - **Session** (`session`): the observable project session store
//! - **Prompts** (`prompts`): role templates with `{{VAR}}` substitution
//! - **MCP** (`mcp`): importing host-discovered tools
//!
//! ## Design Principles
//!
//! 1. **Trait seams everywhere**: the planner, LLM client, prompt
//!    assembler, tool host and session observers are all traits, so hosts
//!    swap implementations without touching the core
//! 2. **No cached globals**: the registry and session store expose
//!    subscription APIs; components read current values on every access
//! 3. **Suspension as data**: "waiting for the user" is a serialisable
//!    [`engine::ResumeContext`], not a blocked task
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use srsagent::config::load_config;
//! use srsagent::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Load configuration from file or environment
//!     let config = load_config()?;
//!
//!     // Wire an engine from the config; see `engine::AgentEngine::new`
//!     let _ = config;
//!     Ok(())
//! }
//! ```

// Outer execution loop and plan dispatch
pub mod engine;

// Specialist inner loop and parsing
pub mod specialist;

// Tool registry, access control and sentinels
pub mod tools;

// Token-budgeted history compression
pub mod history;

// LLM chat adapter
pub mod llm;

// Session store and observers
pub mod session;

// Prompt assembly
pub mod prompts;

// MCP host-tool import
pub mod mcp;

// Configuration
pub mod config;

// Error types
pub mod error;

// Re-export commonly used items
pub use error::{Error, Result};

pub use engine::{AgentEngine, EngineCallback, NoOpEngineCallback};
pub use specialist::{SpecialistOutput, SpecialistRunner, SpecialistSpec};
pub use tools::{AccessController, ToolCache, ToolRegistry};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Install a tracing subscriber honouring `RUST_LOG` (default `info`).
///
/// Hosts embedding the crate usually install their own; this is for
/// binaries and tests that just want logs.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .ok();
}
