//! MCP integration - importing host tools into the registry
//!
//! The host is external; this module defines its seam ([`ToolHost`]), the
//! bridge that makes host tools look like built-ins, and the keyword
//! blacklist applied at import time.

mod bridge;
mod protocol;

pub use bridge::{import_host_tools, CancellationToken, HostToolBridge, ToolHost};
pub use protocol::{ContentPart, HostToolDescriptor, HostToolOutput};
