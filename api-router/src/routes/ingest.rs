use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use common::{error::AppError, storage::types::ingestion_task::IngestionTask};
use ingestion_pipeline::{connectors::LocalFsConnector, task_manager::run_task};

use crate::{
    api_state::ApiState,
    error::ApiError,
    pagination::{Cursor, Page},
};

const DEFAULT_PAGE_SIZE: usize = 20;
const ALLOWED_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "pdf", "json", "csv"];

#[derive(Debug, Deserialize)]
pub struct IngestFolderRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct IngestFolderResponse {
    pub task_id: String,
    pub status: &'static str,
}

/// Rejects a `path` that would resolve outside `config.ingest_root` once
/// canonicalized, the same canonicalize-then-prefix-check idiom
/// `ingestion_pipeline::connectors::LocalFsConnector::resolve` uses. Also
/// rejects anything that doesn't canonicalize to a directory.
fn guarded_ingest_path(ingest_root: &str, path: &str) -> Result<PathBuf, AppError> {
    let relative = Path::new(path);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(AppError::Validation(format!("path escapes ingest root: {path}")));
    }

    let root = Path::new(ingest_root);
    let candidate = root.join(relative);
    let canonical_root = root
        .canonicalize()
        .map_err(|err| AppError::Internal(format!("resolving ingest root: {err}")))?;
    let canonical_candidate = candidate
        .canonicalize()
        .map_err(|err| AppError::Validation(format!("path not found: {path} ({err})")))?;

    if !canonical_candidate.starts_with(&canonical_root) {
        return Err(AppError::Validation(format!("path escapes ingest root: {path}")));
    }
    if !canonical_candidate.is_dir() {
        return Err(AppError::Validation(format!("path is not a directory: {path}")));
    }

    Ok(canonical_candidate)
}

/// `POST /ingest/folder`. Validates the path, creates the task row, and hands
/// the actual walk-and-ingest work off to its own `tokio::spawn`'d task so
/// the request returns immediately with a 202.
pub async fn ingest_folder(
    State(state): State<ApiState>,
    Json(request): Json<IngestFolderRequest>,
) -> Result<(StatusCode, Json<IngestFolderResponse>), ApiError> {
    let resolved = guarded_ingest_path(&state.config.ingest_root, &request.path)?;

    let task = IngestionTask::create(IngestionTask::new(request.path.clone()), &state.db).await?;
    let cancel = CancellationToken::new();
    state.task_cancellations.lock().await.insert(task.id.clone(), cancel.clone());

    let connector = Box::new(LocalFsConnector::new(
        resolved,
        ALLOWED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
    ));

    tokio::spawn(run_task(
        task.id.clone(),
        request.path,
        connector,
        state.db.clone(),
        state.embedder.clone(),
        Arc::new(state.openai_client.clone()),
        state.ingestion_config.clone(),
        Some(state.search_cache.clone()),
        cancel,
    ));

    Ok((StatusCode::ACCEPTED, Json(IngestFolderResponse { task_id: task.id, status: "pending" })))
}

/// `GET /ingest/tasks/{id}`.
pub async fn get_task(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<IngestionTask>, ApiError> {
    let task = IngestionTask::get(&id, &state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingestion task not found: {id}")))?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /ingest/tasks?cursor=&limit=`. Keyset-paginated, newest first.
pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Page<IngestionTask>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);
    let cursor_id = match &query.cursor {
        Some(token) => Some(Cursor::decode(token)?.id),
        None => None,
    };

    let tasks = IngestionTask::list(cursor_id.as_deref(), limit + 1, &state.db).await?;
    let total = IngestionTask::count(&state.db).await?;

    Ok(Json(Page::new(tasks, limit, total, |task| (task.id.clone(), task.id.clone()))))
}

/// `POST /ingest/tasks/{id}/cancel`. Signals the token if this process owns
/// the running task, then flips the row's status regardless -- covers both
/// an in-flight task and one that was queued by a process that has since
/// restarted (in which case there is nothing to signal, only the row to flip).
pub async fn cancel_task(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    if let Some(token) = state.task_cancellations.lock().await.get(&id) {
        token.cancel();
    }
    IngestionTask::cancel(&id, &state.db).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_rejects_parent_dir_escape() {
        let err = guarded_ingest_path("/data/ingest", "../outside").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn guard_rejects_absolute_path() {
        let err = guarded_ingest_path("/data/ingest", "/etc/passwd").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
