use serde::{Deserialize, Serialize};

/// Payload produced when a pending alarm fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub task_id: i64,
    pub title: String,
    pub time: String,
    pub fired_at: String,
}

impl AlarmEvent {
    pub fn message(&self) -> String {
        format!("Reminder: {}", self.title)
    }
}
