use axum::Json;
use axum::extract::{Path, Query};
use axum::routing::patch;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::*;
use crate::services::{PendingAlarm, TaskView};
use crate::state::AppState;

#[derive(Deserialize)]
struct ListParams {
    view: Option<String>,
}

impl ListParams {
    fn view(&self) -> Result<TaskView, AppError> {
        self.view.as_deref().map_or(Ok(TaskView::All), str::parse)
    }
}

#[derive(Deserialize)]
struct TitleParams {
    title: Option<String>,
}

impl TitleParams {
    fn require(self) -> Result<String, AppError> {
        self.title
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::BadRequest("title query parameter is required".to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Affected {
    pub affected: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/tasks",
            get(list_tasks).post(create_task).delete(delete_tasks_by_title),
        )
        .route("/tasks/complete", patch(complete_tasks_by_title))
        .route("/tasks/{id}", axum::routing::delete(delete_task))
        .route("/tasks/{id}/complete", patch(complete_task))
        .route("/alarms", get(list_alarms))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(state.tasks.store().pool()).await?;
    Ok(StatusCode::OK)
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TaskRow>>, AppError> {
    let tasks = state.tasks.list(params.view()?).await?;
    Ok(Json(tasks.iter().map(TaskRow::from).collect()))
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<NewTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let task = state.tasks.create(req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.tasks.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.tasks.complete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_tasks_by_title(
    State(state): State<AppState>,
    Query(params): Query<TitleParams>,
) -> Result<Json<Affected>, AppError> {
    let title = params.require()?;
    let affected = state.tasks.delete_by_title(&title).await? as u64;
    Ok(Json(Affected { affected }))
}

async fn complete_tasks_by_title(
    State(state): State<AppState>,
    Query(params): Query<TitleParams>,
) -> Result<Json<Affected>, AppError> {
    let title = params.require()?;
    let affected = state.tasks.complete_by_title(&title).await?;
    Ok(Json(Affected { affected }))
}

async fn list_alarms(State(state): State<AppState>) -> Json<Vec<PendingAlarm>> {
    Json(state.tasks.alarms().snapshot())
}
