use sqlx::SqlitePool;
use tracing::debug;

use crate::error::AppError;
use crate::models::{Priority, Task};

/// 優先度カラムの正規化
/// 旧クライアントは任意の文字列を書き込めるため、未知の値は Low として扱う（NULL は既定値の Medium）
const PRIORITY: &str = "CASE WHEN priority IS NULL OR priority = 'Medium' THEN 'Medium' WHEN priority = 'High' THEN 'High' ELSE 'Low' END";

fn select_tasks(tail: &str) -> String {
    format!(
        r#"
        SELECT
            id,
            title,
            description,
            COALESCE(time, '') AS time,
            {PRIORITY} AS priority,
            COALESCE(completed, 0) AS completed
        FROM tasks
        {tail}
        "#
    )
}

/// Durable task table. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct TaskStore {
    db: SqlitePool,
}

impl TaskStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// タスクの登録
    /// 空の説明は NULL として保存する
    pub async fn create(
        &self,
        title: &str,
        description: Option<&str>,
        time: &str,
        priority: Priority,
    ) -> Result<Task, AppError> {
        if title.is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }
        let description = description.filter(|d| !d.is_empty());

        let id = sqlx::query(
            "INSERT INTO tasks (title, description, time, priority, completed) VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(title)
        .bind(description)
        .bind(time)
        .bind(priority)
        .execute(&self.db)
        .await?
        .last_insert_rowid();

        debug!("inserted task {} ({})", id, title);

        Ok(Task {
            id,
            title: title.to_string(),
            description: description.map(str::to_string),
            time: time.to_string(),
            priority,
            completed: false,
        })
    }

    pub async fn find(&self, id: i64) -> Result<Option<Task>, AppError> {
        let task = sqlx::query_as::<_, Task>(&select_tasks("WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(task)
    }

    /// Returns false when no task has this id.
    pub async fn delete(&self, id: i64) -> Result<bool, AppError> {
        let affected = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    /// Deletes every task carrying this title and returns their ids.
    pub async fn delete_by_title(&self, title: &str) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>("DELETE FROM tasks WHERE title = ?1 RETURNING id")
            .bind(title)
            .fetch_all(&self.db)
            .await?;
        debug!("deleted {} task(s) titled {:?}", ids.len(), title);
        Ok(ids)
    }

    /// Returns false when no task has this id.
    pub async fn mark_completed(&self, id: i64) -> Result<bool, AppError> {
        let affected = sqlx::query("UPDATE tasks SET completed = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    /// 同名のタスクをすべて完了にし、更新件数を返す
    pub async fn mark_completed_by_title(&self, title: &str) -> Result<u64, AppError> {
        let affected = sqlx::query("UPDATE tasks SET completed = 1 WHERE title = ?1")
            .bind(title)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(affected)
    }

    pub async fn list_all(&self) -> Result<Vec<Task>, AppError> {
        self.fetch(&select_tasks("ORDER BY id")).await
    }

    pub async fn list_completed(&self) -> Result<Vec<Task>, AppError> {
        self.fetch(&select_tasks("WHERE completed = 1 ORDER BY id"))
            .await
    }

    pub async fn list_sorted_by_priority(&self) -> Result<Vec<Task>, AppError> {
        // High → Medium → Low、同順位は登録順
        self.fetch(&select_tasks(&format!(
            "ORDER BY CASE {PRIORITY} WHEN 'High' THEN 1 WHEN 'Medium' THEN 2 ELSE 3 END, id"
        )))
        .await
    }

    pub async fn list_sorted_by_time(&self) -> Result<Vec<Task>, AppError> {
        self.fetch(&select_tasks("ORDER BY COALESCE(time, ''), id"))
            .await
    }

    /// 未完了かつ時刻付きのタスク（起動時のアラーム再登録用）
    pub async fn list_scheduled(&self) -> Result<Vec<Task>, AppError> {
        self.fetch(&select_tasks(
            "WHERE COALESCE(time, '') != '' AND COALESCE(completed, 0) = 0 ORDER BY id",
        ))
        .await
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<Task>, AppError> {
        let tasks = sqlx::query_as::<_, Task>(sql).fetch_all(&self.db).await?;
        Ok(tasks)
    }
}
