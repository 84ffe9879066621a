//! LLM chat adapter - message types and the streaming client seam
//!
//! The engine and the specialist runner talk to the model through the
//! [`LlmClient`] trait, which returns the response as an async stream of
//! text fragments. `HttpLlmClient` is the OpenRouter-compatible reference
//! implementation; hosts embedding the crate can supply their own.

mod client;
pub(crate) mod types;

pub use client::{drain_text, HttpLlmClient, LlmClient, StaticLlmClient, TextStream};
pub use types::{ChatRequest, GenerationOptions, LlmToolDescriptor, Message, Role, ToolMode};
