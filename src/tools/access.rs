//! Per-caller tool visibility
//!
//! A tool with a non-empty `accessible_by` list is visible iff any entry
//! matches the caller's type, or the caller's specialist identifier when the
//! registry has that specialist enabled. A tool with an empty list falls
//! back to a default policy keyed on its layer.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::registry::ToolRegistry;
use super::traits::{AccessEntry, CallerType, ToolDescriptor, ToolLayer};

/// Access statistics for one caller
#[derive(Debug, Clone, Default)]
pub struct AccessStats {
    /// Tools in the registry
    pub total_tools: usize,
    /// Tools visible to the caller
    pub accessible_tools: usize,
    /// Tools denied to the caller
    pub denied_tools: usize,
    /// Accessible-tool counts per layer
    pub by_layer: HashMap<String, usize>,
}

/// Stateless visibility filter over the registry
#[derive(Clone)]
pub struct AccessController {
    registry: Arc<ToolRegistry>,
}

impl AccessController {
    /// Create a controller over a shared registry
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        AccessController { registry }
    }

    /// The registry this controller filters
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Whether `caller` (optionally acting as `specialist_id`) may see a tool
    pub fn validate_access(
        &self,
        caller: CallerType,
        tool_name: &str,
        specialist_id: Option<&str>,
    ) -> bool {
        match self.registry.tool_descriptor(tool_name) {
            Some(descriptor) => self.descriptor_accessible(&descriptor, caller, specialist_id),
            None => false,
        }
    }

    /// All descriptors visible to a caller
    pub fn available_tools(
        &self,
        caller: CallerType,
        specialist_id: Option<&str>,
    ) -> Vec<ToolDescriptor> {
        self.registry
            .all_descriptors()
            .into_iter()
            .filter(|d| self.descriptor_accessible(d, caller, specialist_id))
            .collect()
    }

    /// Access statistics for one caller
    pub fn stats(&self, caller: CallerType, specialist_id: Option<&str>) -> AccessStats {
        let all = self.registry.all_descriptors();
        let mut stats = AccessStats {
            total_tools: all.len(),
            ..Default::default()
        };
        for descriptor in &all {
            if self.descriptor_accessible(descriptor, caller, specialist_id) {
                stats.accessible_tools += 1;
                *stats
                    .by_layer
                    .entry(descriptor.layer.to_string())
                    .or_insert(0) += 1;
            } else {
                stats.denied_tools += 1;
            }
        }
        stats
    }

    /// Human-readable access report for debugging
    pub fn access_report(&self, caller: CallerType, specialist_id: Option<&str>) -> String {
        let mut out = format!(
            "Access report for {:?}{}\n",
            caller,
            specialist_id
                .map(|id| format!(" (specialist '{}')", id))
                .unwrap_or_default()
        );

        for descriptor in self.registry.all_descriptors() {
            let granted = self.descriptor_accessible(&descriptor, caller, specialist_id);
            out.push_str(&format!(
                "  [{}] {} (layer: {})\n",
                if granted { "allow" } else { "deny " },
                descriptor.name,
                descriptor.layer,
            ));
        }

        let stats = self.stats(caller, specialist_id);
        out.push_str(&format!(
            "  {} of {} tools accessible\n",
            stats.accessible_tools, stats.total_tools
        ));
        out
    }

    fn descriptor_accessible(
        &self,
        descriptor: &ToolDescriptor,
        caller: CallerType,
        specialist_id: Option<&str>,
    ) -> bool {
        if !descriptor.accessible_by.is_empty() {
            return descriptor.accessible_by.iter().any(|entry| match entry {
                AccessEntry::Caller(entry_caller) => *entry_caller == caller,
                AccessEntry::Specialist(entry_id) => {
                    if !caller.is_specialist() {
                        return false;
                    }
                    match specialist_id {
                        Some(id) if id == entry_id => {
                            if self.registry.is_specialist_enabled(id) {
                                true
                            } else {
                                warn!(
                                    "Tool '{}' names specialist '{}' which is not enabled; denying",
                                    descriptor.name, id
                                );
                                false
                            }
                        }
                        _ => false,
                    }
                }
            });
        }

        // Empty accessible_by: layer default policy
        match descriptor.layer {
            ToolLayer::Specialist => caller.is_specialist(),
            ToolLayer::Document => {
                caller == CallerType::OrchestratorToolExecution || caller.is_specialist()
            }
            ToolLayer::Atomic | ToolLayer::Internal => {
                caller.is_orchestrator() || caller.is_specialist()
            }
            ToolLayer::Unknown => {
                let granted = caller == CallerType::OrchestratorToolExecution;
                if granted {
                    warn!(
                        "Tool '{}' has an unknown layer; granting only to the tool-execution orchestrator",
                        descriptor.name
                    );
                }
                granted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn setup() -> (Arc<ToolRegistry>, AccessController) {
        let registry = Arc::new(ToolRegistry::new());
        let controller = AccessController::new(Arc::clone(&registry));
        (registry, controller)
    }

    #[test]
    fn layer_defaults() {
        let (registry, controller) = setup();
        registry.register_descriptor(
            ToolDescriptor::new("readFile", "", Value::Null).with_layer(ToolLayer::Atomic),
        );
        registry.register_descriptor(
            ToolDescriptor::new("replaceSection", "", Value::Null).with_layer(ToolLayer::Document),
        );
        registry.register_descriptor(
            ToolDescriptor::new("fr_writer", "", Value::Null).with_layer(ToolLayer::Specialist),
        );

        // Atomic: everyone except the document caller
        assert!(controller.validate_access(CallerType::OrchestratorKnowledgeQa, "readFile", None));
        assert!(controller.validate_access(CallerType::SpecialistProcess, "readFile", None));
        assert!(!controller.validate_access(CallerType::Document, "readFile", None));

        // Document: tool-execution orchestrator and specialists only
        assert!(controller.validate_access(
            CallerType::OrchestratorToolExecution,
            "replaceSection",
            None
        ));
        assert!(controller.validate_access(CallerType::SpecialistContent, "replaceSection", None));
        assert!(!controller.validate_access(
            CallerType::OrchestratorKnowledgeQa,
            "replaceSection",
            None
        ));

        // Specialist layer: specialists only
        assert!(controller.validate_access(CallerType::SpecialistContent, "fr_writer", None));
        assert!(!controller.validate_access(
            CallerType::OrchestratorToolExecution,
            "fr_writer",
            None
        ));
    }

    #[test]
    fn explicit_access_list_overrides_layer() {
        let (registry, controller) = setup();
        registry.register_descriptor(
            ToolDescriptor::new("gitCommit", "", Value::Null)
                .with_layer(ToolLayer::Atomic)
                .with_access(vec![AccessEntry::Caller(
                    CallerType::OrchestratorToolExecution,
                )]),
        );

        assert!(controller.validate_access(
            CallerType::OrchestratorToolExecution,
            "gitCommit",
            None
        ));
        // Atomic default would grant this, but the explicit list denies it
        assert!(!controller.validate_access(CallerType::SpecialistProcess, "gitCommit", None));
    }

    #[test]
    fn specialist_identity_requires_enablement() {
        let (registry, controller) = setup();
        registry.register_descriptor(
            ToolDescriptor::new("syncRequirements", "", Value::Null)
                .with_layer(ToolLayer::Document)
                .with_access(vec![AccessEntry::Specialist("requirement_syncer".into())]),
        );

        // Not enabled yet: denied with a warning
        assert!(!controller.validate_access(
            CallerType::SpecialistProcess,
            "syncRequirements",
            Some("requirement_syncer")
        ));

        registry.enable_specialist("requirement_syncer");
        assert!(controller.validate_access(
            CallerType::SpecialistProcess,
            "syncRequirements",
            Some("requirement_syncer")
        ));

        // A different specialist never matches
        assert!(!controller.validate_access(
            CallerType::SpecialistProcess,
            "syncRequirements",
            Some("fr_writer")
        ));
        // An orchestrator never matches an identity entry
        assert!(!controller.validate_access(
            CallerType::OrchestratorToolExecution,
            "syncRequirements",
            None
        ));
    }

    #[test]
    fn stats_and_report_agree_with_validate() {
        let (registry, controller) = setup();
        registry.register_descriptor(
            ToolDescriptor::new("readFile", "", Value::Null).with_layer(ToolLayer::Atomic),
        );
        registry.register_descriptor(
            ToolDescriptor::new("fr_writer", "", Value::Null).with_layer(ToolLayer::Specialist),
        );

        let stats = controller.stats(CallerType::OrchestratorToolExecution, None);
        assert_eq!(stats.total_tools, 2);
        assert_eq!(stats.accessible_tools, 1);
        assert_eq!(stats.denied_tools, 1);

        let report = controller.access_report(CallerType::OrchestratorToolExecution, None);
        assert!(report.contains("[allow] readFile"));
        assert!(report.contains("[deny ] fr_writer"));
    }

    #[test]
    fn unknown_tool_is_denied() {
        let (_registry, controller) = setup();
        assert!(!controller.validate_access(CallerType::OrchestratorToolExecution, "nope", None));
    }
}
