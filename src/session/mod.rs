//! Session store - the process-wide project session and its observers
//!
//! The store owns the current [`SessionContext`] and fans out every change
//! to subscribed observers. Components never cache the session; they read
//! the current value on every access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Operation kinds recorded into the session log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    UserResponseReceived,
    UserQuestionAsked,
    ToolExecutionStart,
    ToolExecutionEnd,
    ToolExecutionFailed,
    SpecialistInvoked,
    AiResponseReceived,
}

/// One entry of the session operation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    /// Operation kind
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    /// Human-readable operation description
    pub operation: String,
    /// Tool involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Whether the operation succeeded
    pub success: bool,
    /// Execution time in milliseconds, if measured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Last time the session was mutated
    pub last_modified: DateTime<Utc>,
}

/// The current project session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Stable session identifier
    pub session_context_id: Uuid,
    /// Project the session works on
    pub project_name: Option<String>,
    /// Project base directory
    pub base_dir: Option<String>,
    /// Session metadata
    pub metadata: SessionMetadata,
    /// Free-form session values (active files, intent, etc.)
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
}

impl SessionContext {
    /// Create a fresh session for a project
    pub fn new(project_name: Option<String>, base_dir: Option<String>) -> Self {
        SessionContext {
            session_context_id: Uuid::new_v4(),
            project_name,
            base_dir,
            metadata: SessionMetadata {
                last_modified: Utc::now(),
            },
            values: HashMap::new(),
        }
    }

    /// Merge a serialized snapshot onto this session.
    ///
    /// The live session wins on `base_dir` and `project_name`; snapshot
    /// values fill everything else that is absent.
    pub fn merge_snapshot(&mut self, snapshot: &SessionContext) {
        for (key, value) in &snapshot.values {
            self.values.entry(key.clone()).or_insert(value.clone());
        }
        self.metadata.last_modified = Utc::now();
    }
}

/// Observer notified on every session change
pub trait SessionObserver: Send + Sync {
    /// Called with the new session, or `None` when the session was cleared
    fn on_session_changed(&self, session: Option<&SessionContext>);
}

/// Handle returned by [`SessionStore::subscribe`]; used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle(u64);

/// Process-wide session store with observer fan-out
#[derive(Default)]
pub struct SessionStore {
    session: RwLock<Option<SessionContext>>,
    observers: Mutex<Vec<(u64, Arc<dyn SessionObserver>)>>,
    next_observer_id: Mutex<u64>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session, if any
    pub fn current_session(&self) -> Option<SessionContext> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the current session and notify observers
    pub fn set_session(&self, session: SessionContext) {
        {
            let mut slot = self.session.write().unwrap_or_else(|e| e.into_inner());
            *slot = Some(session);
        }
        self.notify();
    }

    /// Clear the session and notify observers with `None`
    pub fn clear_session(&self) {
        {
            let mut slot = self.session.write().unwrap_or_else(|e| e.into_inner());
            *slot = None;
        }
        self.notify();
    }

    /// Record an operation into the session and bump `last_modified`
    pub fn update_session_with_log(&self, entry: SessionLogEntry) {
        debug!(
            "Session log: {:?} {} (success={})",
            entry.operation_type, entry.operation, entry.success
        );
        {
            let mut slot = self.session.write().unwrap_or_else(|e| e.into_inner());
            if let Some(session) = slot.as_mut() {
                session.metadata.last_modified = Utc::now();
                let log = session
                    .values
                    .entry("operation_log".to_string())
                    .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                if let Some(array) = log.as_array_mut() {
                    if let Ok(value) = serde_json::to_value(&entry) {
                        array.push(value);
                    }
                }
            }
        }
        self.notify();
    }

    /// Subscribe an observer; it is immediately called with the current value
    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> ObserverHandle {
        let id = {
            let mut next = self
                .next_observer_id
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        observer.on_session_changed(self.current_session().as_ref());
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, observer));
        ObserverHandle(id)
    }

    /// Remove a previously subscribed observer
    pub fn unsubscribe(&self, handle: ObserverHandle) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _)| *id != handle.0);
    }

    fn notify(&self) {
        let observers: Vec<Arc<dyn SessionObserver>> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        let current = self.current_session();
        for observer in observers {
            observer.on_session_changed(current.as_ref());
        }
    }
}
