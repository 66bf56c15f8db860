use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use common::{
    error::AppError,
    storage::types::{document::Document, segment::Segment},
};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct SegmentDetail {
    pub segment: Segment,
    pub document_title: String,
    pub document_source_url: Option<String>,
}

/// `GET /segments/{id}`. Joins the segment's parent document so a caller
/// rendering a citation doesn't need a second round trip.
pub async fn get_segment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SegmentDetail>, ApiError> {
    let segment = Segment::get(&id, &state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("segment not found: {id}")))?;

    let document: Option<Document> = state.db.get_item(&segment.document_id).await?;
    let document = document
        .ok_or_else(|| AppError::Internal(format!("segment {id} references a missing document")))?;

    Ok(Json(SegmentDetail {
        segment,
        document_title: document.title,
        document_source_url: document.source_url,
    }))
}
