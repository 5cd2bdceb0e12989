use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::TaskStore;
use crate::error::AppError;
use crate::models::{NewTaskRequest, Task};
use crate::services::scheduler::{AlarmQueue, PendingAlarm};

/// Which list query a view maps to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskView {
    #[default]
    All,
    Completed,
    Priority,
    Time,
}

impl FromStr for TaskView {
    type Err = AppError;

    /// An empty value selects the default view.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(TaskView::All),
            "completed" => Ok(TaskView::Completed),
            "priority" => Ok(TaskView::Priority),
            "time" => Ok(TaskView::Time),
            other => Err(AppError::BadRequest(format!(
                "unknown view '{}', expected one of: all, completed, priority, time",
                other
            ))),
        }
    }
}

/// Entry point for the presentation layer: keeps the store and the pending
/// alarms consistent with each other.
#[derive(Clone)]
pub struct TaskService {
    store: TaskStore,
    alarms: AlarmQueue,
}

impl TaskService {
    pub fn new(store: TaskStore, alarms: AlarmQueue) -> Self {
        Self { store, alarms }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn alarms(&self) -> &AlarmQueue {
        &self.alarms
    }

    pub async fn create(&self, req: NewTaskRequest) -> Result<Task, AppError> {
        let time = req.time();
        let task = self
            .store
            .create(&req.title, req.description.as_deref(), &time, req.priority)
            .await?;

        if task.has_time() {
            self.alarms.schedule(PendingAlarm {
                task_id: task.id,
                time: task.time.clone(),
                title: task.title.clone(),
            });
        }

        info!("created task {} ({})", task.id, task.title);
        Ok(task)
    }

    /// Fails with `NotFound` when no task has this id.
    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        if !self.store.delete(id).await? {
            return Err(AppError::NotFound);
        }
        self.alarms.retract(&[id]);
        info!("deleted task {}", id);
        Ok(())
    }

    /// Deletes every task with this title. Matching nothing is not an error.
    pub async fn delete_by_title(&self, title: &str) -> Result<usize, AppError> {
        let ids = self.store.delete_by_title(title).await?;
        let retracted = self.alarms.retract(&ids);
        info!(
            "deleted {} task(s) titled {:?}, retracted {} alarm(s)",
            ids.len(),
            title,
            retracted
        );
        Ok(ids.len())
    }

    /// Fails with `NotFound` when no task has this id.
    pub async fn complete(&self, id: i64) -> Result<(), AppError> {
        if !self.store.mark_completed(id).await? {
            return Err(AppError::NotFound);
        }
        info!("completed task {}", id);
        Ok(())
    }

    pub async fn complete_by_title(&self, title: &str) -> Result<u64, AppError> {
        let affected = self.store.mark_completed_by_title(title).await?;
        info!("completed {} task(s) titled {:?}", affected, title);
        Ok(affected)
    }

    pub async fn list(&self, view: TaskView) -> Result<Vec<Task>, AppError> {
        match view {
            TaskView::All => self.store.list_all().await,
            TaskView::Completed => self.store.list_completed().await,
            TaskView::Priority => self.store.list_sorted_by_priority().await,
            TaskView::Time => self.store.list_sorted_by_time().await,
        }
    }

    /// Queues alarms for stored tasks that are still waiting on their time.
    /// Returns how many alarms were queued.
    pub async fn reseed_alarms(&self) -> Result<usize, AppError> {
        let tasks = self.store.list_scheduled().await?;
        let queued: Vec<i64> = self.alarms.snapshot().iter().map(|a| a.task_id).collect();

        let mut count = 0;
        for task in tasks.into_iter().filter(|t| !queued.contains(&t.id)) {
            self.alarms.schedule(PendingAlarm {
                task_id: task.id,
                time: task.time,
                title: task.title,
            });
            count += 1;
        }

        info!("reseeded {} pending alarm(s) from the store", count);
        Ok(count)
    }
}
