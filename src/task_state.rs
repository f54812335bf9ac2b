use chrono::Utc;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEntry {
    pub state: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub artifacts: HashMap<String, Value>,
    pub created_at: String,
}

impl TaskEntry {
    fn new() -> Self {
        Self {
            state: TaskStatus::Pending,
            progress: 0,
            message: String::new(),
            artifacts: HashMap::new(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A partial update merged atomically into one task entry.
#[derive(Debug, Default, Clone)]
pub struct TaskUpdate {
    pub state: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub artifacts: Vec<(String, Value)>,
}

impl TaskUpdate {
    pub fn state(mut self, state: TaskStatus) -> Self {
        self.state = Some(state);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn artifact(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.artifacts.push((name.into(), value.into()));
        self
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, TaskEntry>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a fresh entry for `task_id`. Re-creating an existing id is an
/// explicit restart: state, progress and artifacts are reset.
pub fn create(task_id: &str) {
    let mut map = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    map.insert(task_id.to_string(), TaskEntry::new());
}

/// Merges `update` into the entry for `task_id`. Progress never moves
/// backwards within a run; a lower value is ignored, not an error.
pub fn update(task_id: &str, update: TaskUpdate) {
    let mut map = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    let entry = map.entry(task_id.to_string()).or_insert_with(TaskEntry::new);

    if let Some(state) = update.state {
        entry.state = state;
    }
    if let Some(progress) = update.progress {
        if progress > entry.progress {
            entry.progress = progress.min(100);
        }
    }
    if let Some(message) = update.message {
        entry.message = message;
    }
    for (name, value) in update.artifacts {
        entry.artifacts.insert(name, value);
    }
}

pub fn get(task_id: &str) -> Option<TaskEntry> {
    let map = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
    map.get(task_id).cloned()
}
