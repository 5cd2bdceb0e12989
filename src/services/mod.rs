pub mod scheduler;
pub mod task_service;

pub use scheduler::{AlarmQueue, Clock, PendingAlarm, ReminderScheduler, SystemClock};
pub use task_service::{TaskService, TaskView};
