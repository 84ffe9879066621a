//! Host-tool bridge
//!
//! Adapts tools discovered on an MCP-style host into the crate's [`Tool`]
//! trait so the registry can serve them next to built-ins. Each invocation
//! gets its own cancellation token, disposed on completion or error; host
//! failures are wrapped with a recoverability verdict inferred from the
//! error text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tools::{Tool, ToolDescriptor, ToolLayer, ToolRegistry, ToolResult};

use super::protocol::{HostToolDescriptor, HostToolOutput};

/// Disposable cancellation token handed to every host invocation
#[derive(Debug, Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    disposed: AtomicBool,
}

impl CancellationToken {
    /// Create a fresh token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Release the token; idempotent
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Whether the token was disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for CancellationToken {
    fn drop(&mut self) {
        // Tokens must never outlive their invocation undisposed
        self.dispose();
    }
}

/// The MCP-style tool host seam
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Enumerate the host's tools
    async fn list_tools(&self) -> Result<Vec<HostToolDescriptor>>;

    /// Invoke one tool
    async fn invoke_tool(
        &self,
        name: &str,
        input: Value,
        cancellation: &CancellationToken,
    ) -> Result<HostToolOutput>;
}

/// Bridge that exposes one host tool through the [`Tool`] trait
pub struct HostToolBridge {
    host: Arc<dyn ToolHost>,
    tool: HostToolDescriptor,
}

impl HostToolBridge {
    /// Wrap a single host tool
    pub fn new(host: Arc<dyn ToolHost>, tool: HostToolDescriptor) -> Self {
        HostToolBridge { host, tool }
    }
}

#[async_trait]
impl Tool for HostToolBridge {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            self.tool.name.clone(),
            self.tool.description.clone(),
            self.tool.input_schema.clone(),
        )
        .with_layer(ToolLayer::Atomic)
        .with_category("mcp")
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let token = CancellationToken::new();
        let result = self.host.invoke_tool(&self.tool.name, args, &token).await;
        token.dispose();

        match result {
            Ok(output) => Ok(ToolResult::success_text(output.joined_text())),
            Err(e) => {
                let message = e.to_string();
                warn!("Host tool '{}' failed: {}", self.tool.name, message);
                Ok(wrap_host_failure(&self.tool, message))
            }
        }
    }
}

/// Wrap a host failure with a recoverability verdict
fn wrap_host_failure(tool: &HostToolDescriptor, message: String) -> ToolResult {
    let lower = message.to_lowercase();

    if lower.contains("not running")
        || lower.contains("connection refused")
        || lower.contains("econnrefused")
    {
        return ToolResult::failure(message).with_recovery(
            format!("The server providing '{}' is not reachable.", tool.name),
            true,
            Some("Start the MCP server and try again.".to_string()),
        );
    }

    if lower.contains("invalid input") || lower.contains("validation failed") {
        return ToolResult::failure(message).with_recovery(
            format!("The arguments for '{}' were rejected.", tool.name),
            true,
            Some(format!(
                "Match the tool's input schema: {}",
                tool.input_schema
            )),
        );
    }

    ToolResult::failure(message).with_recovery(
        format!("'{}' failed and is unlikely to succeed on retry.", tool.name),
        false,
        None,
    )
}

/// Discover the host's tools and register them, skipping any whose name
/// contains one of `exclude_keywords`. Returns how many were registered.
pub async fn import_host_tools(
    registry: &ToolRegistry,
    host: Arc<dyn ToolHost>,
    exclude_keywords: &[String],
) -> Result<usize> {
    let tools = host.list_tools().await?;
    let mut registered = 0usize;

    for tool in tools {
        let excluded = exclude_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && tool.name.contains(keyword.as_str()));
        if excluded {
            debug!("Skipping excluded host tool '{}'", tool.name);
            continue;
        }
        registry.register(HostToolBridge::new(Arc::clone(&host), tool));
        registered += 1;
    }

    info!("Imported {} host tools", registered);
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    struct ScriptedHost {
        fail_with: Option<String>,
    }

    #[async_trait]
    impl ToolHost for ScriptedHost {
        async fn list_tools(&self) -> Result<Vec<HostToolDescriptor>> {
            Ok(vec![
                HostToolDescriptor {
                    name: "browser_navigate".into(),
                    description: "Navigate".into(),
                    input_schema: json!({"type": "object"}),
                },
                HostToolDescriptor {
                    name: "fetch_page".into(),
                    description: "Fetch".into(),
                    input_schema: json!({"type": "object"}),
                },
            ])
        }

        async fn invoke_tool(
            &self,
            _name: &str,
            _input: Value,
            cancellation: &CancellationToken,
        ) -> Result<HostToolOutput> {
            assert!(!cancellation.is_cancelled());
            match &self.fail_with {
                Some(message) => Err(Error::ToolHost(message.clone())),
                None => Ok(HostToolOutput {
                    content: vec![super::super::protocol::ContentPart::Text {
                        value: "page content".into(),
                    }],
                }),
            }
        }
    }

    #[tokio::test]
    async fn import_applies_the_keyword_blacklist() {
        let registry = ToolRegistry::new();
        let host = Arc::new(ScriptedHost { fail_with: None });

        let count = import_host_tools(&registry, host, &["browser".to_string()])
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(registry.has_tool("fetch_page"));
        assert!(!registry.has_tool("browser_navigate"));
    }

    #[tokio::test]
    async fn successful_invocation_joins_text_parts() {
        let host = Arc::new(ScriptedHost { fail_with: None });
        let tools = host.list_tools().await.unwrap();
        let bridge = HostToolBridge::new(host, tools[1].clone());

        let result = bridge.execute(json!({"url": "x"})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.to_llm_string(), "page content");
    }

    #[tokio::test]
    async fn connection_failures_are_recoverable() {
        let host = Arc::new(ScriptedHost {
            fail_with: Some("server not running (ECONNREFUSED)".into()),
        });
        let tools = host.list_tools().await.unwrap();
        let bridge = HostToolBridge::new(host, tools[1].clone());

        let result = bridge.execute(json!({})).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.recoverable, Some(true));
        assert!(result.suggestion.unwrap().contains("MCP server"));
    }

    #[tokio::test]
    async fn validation_failures_suggest_the_schema() {
        let host = Arc::new(ScriptedHost {
            fail_with: Some("Invalid input: missing field 'url'".into()),
        });
        let tools = host.list_tools().await.unwrap();
        let bridge = HostToolBridge::new(host, tools[1].clone());

        let result = bridge.execute(json!({})).await.unwrap();
        assert_eq!(result.recoverable, Some(true));
        assert!(result.suggestion.unwrap().contains("input schema"));
    }

    #[tokio::test]
    async fn other_failures_are_not_recoverable() {
        let host = Arc::new(ScriptedHost {
            fail_with: Some("internal explosion".into()),
        });
        let tools = host.list_tools().await.unwrap();
        let bridge = HostToolBridge::new(host, tools[1].clone());

        let result = bridge.execute(json!({})).await.unwrap();
        assert_eq!(result.recoverable, Some(false));
        assert!(result.suggestion.is_none());
    }

    #[test]
    fn tokens_dispose_on_drop() {
        let token = CancellationToken::new();
        assert!(!token.is_disposed());
        token.dispose();
        assert!(token.is_disposed());
    }
}
