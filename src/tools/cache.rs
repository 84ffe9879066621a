//! Per-caller cached tool sets
//!
//! Filtering the registry and serialising tool schemas for the LLM happens
//! on every specialist iteration, so the filtered result is memoised per
//! `(caller, specialist)` key. The cache subscribes to the registry's
//! invalidation channel and clears itself wholesale on any registration or
//! unregistration; there is no partial invalidation, so a single mutation
//! across layers is atomic for readers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use moka::future::Cache;
use tracing::info;

use crate::llm::LlmToolDescriptor;

use super::access::AccessController;
use super::traits::{CallerType, ToolDescriptor};

/// Cache key: the caller plus its specialist identity, if any
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessKey {
    /// Caller type
    pub caller: CallerType,
    /// Specialist identifier for specialist callers
    pub specialist_id: Option<String>,
}

/// A memoised filtered tool set
#[derive(Debug, Clone)]
pub struct CachedToolSet {
    /// Descriptors visible to the key's caller
    pub definitions: Vec<ToolDescriptor>,
    /// Precomputed JSON of the LLM-facing descriptors
    pub schema_json: String,
}

impl CachedToolSet {
    /// Project the cached descriptors down to the LLM adapter shape
    pub fn llm_descriptors(&self) -> Vec<LlmToolDescriptor> {
        self.definitions
            .iter()
            .map(|d| LlmToolDescriptor {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters_schema: d.parameters.clone(),
            })
            .collect()
    }
}

/// Memo of filtered tool sets, cleared on every registry mutation
pub struct ToolCache {
    controller: AccessController,
    cache: Cache<AccessKey, Arc<CachedToolSet>>,
    logged_keys: Mutex<HashSet<AccessKey>>,
}

impl ToolCache {
    /// Create a cache over `controller` and wire it to the registry's
    /// invalidation channel
    pub fn new(controller: AccessController) -> Arc<Self> {
        let cache: Cache<AccessKey, Arc<CachedToolSet>> =
            Cache::builder().max_capacity(64).build();

        let tool_cache = Arc::new(ToolCache {
            controller: controller.clone(),
            cache: cache.clone(),
            logged_keys: Mutex::new(HashSet::new()),
        });

        controller.registry().on_cache_invalidation(move || {
            cache.invalidate_all();
        });

        tool_cache
    }

    /// The filtered tool set for a caller, computed on first access
    pub async fn get_tools(
        &self,
        caller: CallerType,
        specialist_id: Option<&str>,
    ) -> Arc<CachedToolSet> {
        let key = AccessKey {
            caller,
            specialist_id: specialist_id.map(String::from),
        };

        {
            let mut logged = self.logged_keys.lock().unwrap_or_else(|e| e.into_inner());
            if logged.insert(key.clone()) {
                info!(
                    "Building tool set for {:?}{}",
                    caller,
                    specialist_id
                        .map(|id| format!(" (specialist '{}')", id))
                        .unwrap_or_default()
                );
            }
        }

        self.cache
            .get_with(key.clone(), async {
                let definitions = self
                    .controller
                    .available_tools(key.caller, key.specialist_id.as_deref());
                let llm_shapes: Vec<LlmToolDescriptor> = definitions
                    .iter()
                    .map(|d| LlmToolDescriptor {
                        name: d.name.clone(),
                        description: d.description.clone(),
                        parameters_schema: d.parameters.clone(),
                    })
                    .collect();
                let schema_json =
                    serde_json::to_string(&llm_shapes).unwrap_or_else(|_| "[]".to_string());

                Arc::new(CachedToolSet {
                    definitions,
                    schema_json,
                })
            })
            .await
    }

    /// Drop every cached entry
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
