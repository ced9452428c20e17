//! Task requests queued by scripts for the host's task executor.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// An automation task requested by a script.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Name of the script that created the task.
    pub script: String,
    /// Task name.
    pub name: String,
    /// Task kind ("gather", "travel", "combat", "custom", ...).
    pub kind: String,
    /// Scheduling priority; higher runs earlier.
    pub priority: i64,
    /// Free-form parameters supplied by the script.
    pub params: JsonValue,
    /// Creation timestamp.
    pub requested_at: DateTime<Utc>,
}

/// FIFO queue of task requests, drained by the host between ticks.
#[derive(Debug, Default)]
pub struct TaskSink {
    queue: Mutex<VecDeque<TaskRequest>>,
}

impl TaskSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request.
    pub fn push(&self, request: TaskRequest) {
        self.queue.lock().expect("task sink poisoned").push_back(request);
    }

    /// Take all queued requests, oldest first.
    pub fn drain(&self) -> Vec<TaskRequest> {
        self.queue
            .lock()
            .expect("task sink poisoned")
            .drain(..)
            .collect()
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.queue.lock().expect("task sink poisoned").len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
