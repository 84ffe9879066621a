//! Tool registry - manages available tools for the agent
//!
//! The registry is the process-wide source of truth for tool descriptors and
//! implementations. Every registration or unregistration fires the
//! cache-invalidation callbacks synchronously after the registry's own maps
//! have been mutated, so a reader that starts after the mutation returns
//! never observes a stale cache against a fresh registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

use super::traits::{Tool, ToolCall, ToolDescriptor, ToolLayer, ToolResult};

type InvalidationCallback = Box<dyn Fn() + Send + Sync>;

/// Aggregate registry statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Total registered tools
    pub total_tools: usize,
    /// Tool counts per layer
    pub by_layer: HashMap<String, usize>,
    /// Tool counts per category
    pub by_category: HashMap<String, usize>,
    /// Tools marked experimental
    pub experimental: usize,
    /// Tools marked deprecated
    pub deprecated: usize,
}

#[derive(Default)]
struct RegistryInner {
    descriptors: HashMap<String, ToolDescriptor>,
    implementations: HashMap<String, Arc<dyn Tool>>,
    usage: HashMap<String, u64>,
    enabled_specialists: HashSet<String>,
}

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
    callbacks: RwLock<Vec<InvalidationCallback>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool implementation; the descriptor comes from the tool itself
    pub fn register<T: Tool + 'static>(&self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool implementation
    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor();
        let name = descriptor.name.clone();
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if inner.descriptors.contains_key(name.as_str()) {
                warn!("Replacing already-registered tool '{}'", name);
            }
            inner.descriptors.insert(name.clone(), descriptor);
            inner.implementations.insert(name.clone(), tool);
        }
        debug!("Registered tool '{}'", name);
        self.notify_invalidation();
    }

    /// Register a descriptor without an implementation
    ///
    /// Such a tool is visible to the LLM and the access controller but
    /// cannot be executed.
    pub fn register_descriptor(&self, descriptor: ToolDescriptor) {
        let name = descriptor.name.clone();
        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.descriptors.insert(name.clone(), descriptor);
            inner.implementations.remove(&name);
        }
        debug!("Registered descriptor-only tool '{}'", name);
        self.notify_invalidation();
    }

    /// Remove a tool. Returns whether anything was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.implementations.remove(name);
            inner.descriptors.remove(name).is_some()
        };
        if removed {
            debug!("Unregistered tool '{}'", name);
            self.notify_invalidation();
        }
        removed
    }

    /// Whether a tool with this name is registered
    pub fn has_tool(&self, name: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .descriptors
            .contains_key(name)
    }

    /// Look up one tool's descriptor
    pub fn tool_descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .descriptors
            .get(name)
            .cloned()
    }

    /// All registered descriptors, sorted by name for stable output
    pub fn all_descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .descriptors
            .values()
            .cloned()
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Descriptors belonging to one layer
    pub fn tools_by_layer(&self, layer: ToolLayer) -> Vec<ToolDescriptor> {
        self.all_descriptors()
            .into_iter()
            .filter(|d| d.layer == layer)
            .collect()
    }

    /// Descriptors belonging to one category
    pub fn tools_by_category(&self, category: &str) -> Vec<ToolDescriptor> {
        self.all_descriptors()
            .into_iter()
            .filter(|d| d.category == category)
            .collect()
    }

    /// Execute a registered tool
    ///
    /// Implementation errors are logged and re-thrown; an unknown or
    /// descriptor-only tool yields `Error::NotFound`.
    pub async fn execute_tool(&self, name: &str, args: Value) -> Result<ToolResult> {
        let implementation = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if !inner.descriptors.contains_key(name) {
                return Err(Error::NotFound(format!("Tool not found: {}", name)));
            }
            *inner.usage.entry(name.to_string()).or_insert(0) += 1;
            inner.implementations.get(name).cloned()
        };

        let implementation = implementation
            .ok_or_else(|| Error::NotFound(format!("Tool '{}' has no implementation", name)))?;

        match implementation.execute(args).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("Tool '{}' implementation failed: {}", name, e);
                Err(e)
            }
        }
    }

    /// Execute a [`ToolCall`]
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        self.execute_tool(&call.name, call.arguments.clone()).await
    }

    /// How many times a tool has been executed
    pub fn usage_count(&self, name: &str) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .usage
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Register a callback fired after every registry mutation
    pub fn on_cache_invalidation(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(callback));
    }

    fn notify_invalidation(&self) {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        for callback in callbacks.iter() {
            callback();
        }
    }

    /// Mark a specialist identifier as enabled
    ///
    /// The access controller only honours identity-based `accessible_by`
    /// entries for enabled specialists.
    pub fn enable_specialist(&self, id: impl Into<String>) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .enabled_specialists
            .insert(id.into());
    }

    /// Remove a specialist from the enabled set
    pub fn disable_specialist(&self, id: &str) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .enabled_specialists
            .remove(id);
    }

    /// Whether a specialist identifier is enabled
    pub fn is_specialist_enabled(&self, id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .enabled_specialists
            .contains(id)
    }

    /// Aggregate statistics over registered tools
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut stats = RegistryStats {
            total_tools: inner.descriptors.len(),
            ..Default::default()
        };
        for descriptor in inner.descriptors.values() {
            *stats
                .by_layer
                .entry(descriptor.layer.to_string())
                .or_insert(0) += 1;
            *stats
                .by_category
                .entry(descriptor.category.clone())
                .or_insert(0) += 1;
            if descriptor.experimental {
                stats.experimental += 1;
            }
            if descriptor.deprecated {
                stats.deprecated += 1;
            }
        }
        stats
    }

    /// Human-readable tool inventory for prompt injection
    pub fn tool_inventory_text(&self) -> String {
        let descriptors = self.all_descriptors();
        let mut out = String::new();

        for layer in [
            ToolLayer::Atomic,
            ToolLayer::Document,
            ToolLayer::Specialist,
            ToolLayer::Internal,
            ToolLayer::Unknown,
        ] {
            let in_layer: Vec<&ToolDescriptor> =
                descriptors.iter().filter(|d| d.layer == layer).collect();
            if in_layer.is_empty() {
                continue;
            }
            out.push_str(&format!("## {} tools\n", layer));
            for descriptor in in_layer {
                let mut line = format!("- {}: {}", descriptor.name, descriptor.description);
                if descriptor.experimental {
                    line.push_str(" [experimental]");
                }
                if descriptor.deprecated {
                    line.push_str(" [deprecated]");
                }
                line.push('\n');
                out.push_str(&line);
            }
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::{InteractionType, RiskLevel};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("echo", "Echo arguments back", serde_json::json!({"type": "object"}))
                .with_category("debug")
        }

        async fn execute(&self, args: Value) -> Result<ToolResult> {
            Ok(ToolResult::success(args))
        }
    }

    #[tokio::test]
    async fn register_execute_unregister() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool);

        assert!(registry.has_tool("echo"));
        let result = registry
            .execute_tool("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(registry.usage_count("echo"), 1);

        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(matches!(
            registry.execute_tool("echo", Value::Null).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn descriptor_only_tool_is_visible_but_not_executable() {
        let registry = ToolRegistry::new();
        registry.register_descriptor(
            ToolDescriptor::new("ghost", "Declared elsewhere", Value::Null)
                .with_layer(ToolLayer::Document),
        );

        assert!(registry.has_tool("ghost"));
        assert!(matches!(
            registry.execute_tool("ghost", Value::Null).await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn invalidation_fires_on_register_and_unregister() {
        let registry = ToolRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        registry.on_cache_invalidation(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.register(EchoTool);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        registry.unregister("echo");
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        // No-op unregister does not fire
        registry.unregister("echo");
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stats_count_layers_and_flags() {
        let registry = ToolRegistry::new();
        registry.register_descriptor(
            ToolDescriptor::new("a", "", Value::Null).with_layer(ToolLayer::Atomic),
        );
        let mut experimental =
            ToolDescriptor::new("b", "", Value::Null).with_layer(ToolLayer::Document);
        experimental.experimental = true;
        registry.register_descriptor(experimental);

        let stats = registry.stats();
        assert_eq!(stats.total_tools, 2);
        assert_eq!(stats.by_layer.get("atomic"), Some(&1));
        assert_eq!(stats.by_layer.get("document"), Some(&1));
        assert_eq!(stats.experimental, 1);
        assert_eq!(stats.deprecated, 0);
    }

    #[test]
    fn inventory_text_groups_by_layer() {
        let registry = ToolRegistry::new();
        registry.register_descriptor(
            ToolDescriptor::new("readFile", "Read a file", Value::Null)
                .with_layer(ToolLayer::Atomic)
                .with_classification(RiskLevel::Low, InteractionType::Autonomous, false),
        );
        registry.register_descriptor(
            ToolDescriptor::new("replaceSection", "Edit a section", Value::Null)
                .with_layer(ToolLayer::Document),
        );

        let text = registry.tool_inventory_text();
        assert!(text.contains("## atomic tools"));
        assert!(text.contains("- readFile: Read a file"));
        assert!(text.contains("## document tools"));
    }
}
