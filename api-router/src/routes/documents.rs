use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use common::{error::AppError, storage::types::document::Document};

use crate::{
    api_state::ApiState,
    error::ApiError,
    pagination::{Cursor, Page},
};

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /documents?cursor=&limit=`. Keyset-paginated, ordered by id.
pub async fn list_documents(
    State(state): State<ApiState>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<Page<Document>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);
    let cursor_id = match &query.cursor {
        Some(token) => Some(Cursor::decode(token)?.id),
        None => None,
    };

    let documents = Document::list_documents(cursor_id.as_deref(), limit + 1, &state.db).await?;
    let total = Document::count(&state.db).await?;

    Ok(Json(Page::new(documents, limit, total, |doc| (doc.id.clone(), doc.id.clone()))))
}

/// `GET /documents/{id}`.
pub async fn get_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    let document: Option<Document> = state.db.get_item(&id).await?;
    let document = document.ok_or_else(|| AppError::NotFound(format!("document not found: {id}")))?;
    Ok(Json(document))
}
