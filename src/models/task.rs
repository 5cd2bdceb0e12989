use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Sort rank used by the priority view: High first, Low last.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "High" => Ok(Priority::High),
            "Medium" => Ok(Priority::Medium),
            "Low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    /// "HH:MM" or empty when the task has no reminder.
    pub time: String,
    pub priority: Priority,
    pub completed: bool,
}

impl Task {
    pub fn has_time(&self) -> bool {
        !self.time.is_empty()
    }
}

/// Body of a create request. Hour and minute arrive as free text, the way a
/// spin box hands them over; anything that is not a valid clock value leaves
/// the task without a reminder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hour: Option<String>,
    #[serde(default)]
    pub minute: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl NewTaskRequest {
    pub fn time(&self) -> String {
        match (self.hour.as_deref(), self.minute.as_deref()) {
            (Some(hour), Some(minute)) => format_time(hour, minute).unwrap_or_default(),
            _ => String::new(),
        }
    }
}

/// Builds a zero-padded "HH:MM" string from spin box text.
pub fn format_time(hour: &str, minute: &str) -> Option<String> {
    let hour = parse_component(hour, 23)?;
    let minute = parse_component(minute, 59)?;
    Some(format!("{:02}:{:02}", hour, minute))
}

fn parse_component(raw: &str, max: u32) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u32>().ok().filter(|v| *v <= max)
}

/// Display projection of a task for list views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub time: String,
    pub priority: Priority,
    pub completed: String,
    pub tag: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            time: task.time.clone(),
            priority: task.priority,
            completed: if task.completed { "Yes" } else { "No" }.to_string(),
            tag: task.priority.as_str().to_lowercase(),
        }
    }
}
