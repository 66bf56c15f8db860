use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::storage::types::{document::Document, system_settings::SystemSettings};
use retrieval_pipeline::hybrid_search;

use crate::{api_state::ApiState, error::ApiError};

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    pub source_type: Option<String>,
    pub project: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub segment_id: String,
    pub content: String,
    pub score: f32,
    pub source_url: Option<String>,
    pub source_id: Option<String>,
    pub section_path: Option<String>,
    pub document_title: Option<String>,
    pub segment_type: String,
}

/// `POST /search`. Runs the hybrid retriever and applies the request's
/// `source_type`/`project`/date-range filter post-fusion by joining each
/// candidate against its document, the same pattern
/// `agent-loop::tools::search_knowledge` uses -- a single SurrealDB-backed
/// store serves rel, index, and graph data here, so there's no separate
/// per-store filter adapter to build per spec.md §9's filter-AST note.
///
/// `top_k` is clamped to `1..=50` rather than rejected outside that range --
/// malformed JSON or a wrong field type still hits `Json`'s own 422 via the
/// request extractor, but an out-of-range `top_k` is a caller asking for
/// "more" or "fewer" than we allow, not a schema violation.
pub async fn search(
    State(state): State<ApiState>,
    Json(request): Json<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let top_k = request.top_k.clamp(1, 50);

    let settings = SystemSettings::get_current(&state.db).await?;
    let embedding = state
        .embedder
        .embed(&request.query, &settings.embedding_model, settings.embedding_dimensions)
        .await?;

    let lease = match &state.reranker_pool {
        Some(pool) => Some(pool.checkout().await),
        None => None,
    };
    let hits = hybrid_search(
        &state.db,
        &request.query,
        embedding,
        top_k,
        &state.hybrid_config,
        lease.as_ref(),
    )
    .await?;

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let document: Option<Document> = state.db.get_item(&hit.segment.document_id).await?;
        let Some(document) = document else { continue };

        if let Some(filter) = &request.source_type {
            if &document.source_type != filter {
                continue;
            }
        }
        if let Some(project) = &request.project {
            if document.project_id.as_deref() != Some(project.as_str()) {
                continue;
            }
        }
        if let Some(from) = request.date_from {
            if document.created_at < from {
                continue;
            }
        }
        if let Some(to) = request.date_to {
            if document.created_at > to {
                continue;
            }
        }

        results.push(SearchResult {
            segment_id: hit.segment.id.clone(),
            content: hit.segment.content.clone(),
            score: hit.score,
            source_url: document.source_url.clone(),
            source_id: Some(document.source_id.clone()),
            section_path: hit.segment.section_path.clone(),
            document_title: Some(document.title.clone()),
            segment_type: hit.segment.segment_type.clone(),
        });
    }

    Ok(Json(results))
}
