use axum::{extract::State, Json};
use serde::Serialize;

use common::storage::types::{
    document::Document, extracted_entity::ExtractedEntity, ingestion_task::IngestionTask,
    segment::Segment,
};

use crate::{api_state::ApiState, error::ApiError};

const RECENT_TASKS_LIMIT: usize = 5;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub document_count: i64,
    pub segment_count: i64,
    pub entity_count: i64,
    pub recent_tasks: Vec<IngestionTask>,
}

/// `GET /stats`. Corpus-wide counts plus the most recent ingestion tasks, for
/// a dashboard view of the knowledge base's size and ingestion activity.
pub async fn stats(State(state): State<ApiState>) -> Result<Json<StatsResponse>, ApiError> {
    let document_count = Document::count(&state.db).await?;
    let segment_count = Segment::count(&state.db).await?;
    let entity_count = ExtractedEntity::count(&state.db).await?;
    let recent_tasks = IngestionTask::list(None, RECENT_TASKS_LIMIT, &state.db).await?;

    Ok(Json(StatsResponse { document_count, segment_count, entity_count, recent_tasks }))
}
