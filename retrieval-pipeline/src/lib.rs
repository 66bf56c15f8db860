pub mod extraction;
pub mod fts;
pub mod graph;
pub mod reranking;
pub mod scoring;
pub mod vector;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{graph_entity::GraphEntity, segment::Segment, StoredObject},
    },
};
use reranking::RerankerLease;
use scoring::{apply_rrf, Scored};
use tracing::instrument;

/// Over-fetch factor applied to the caller's `take` when sizing the lexical
/// and vector search stages, so RRF fusion (and a later rerank pass) has a
/// wider candidate pool than the final result count to draw from.
const OVER_FETCH_MULTIPLIER: usize = 2;

/// HNSW ef-search breadth factor applied to `take` -- how many candidates
/// the vector index explores per requested result.
const VECTOR_CANDIDATE_MULTIPLIER: usize = 10;

/// Tunables for a single hybrid search call, threaded through from
/// `AppConfig` at the call site rather than re-read per request.
#[derive(Debug, Clone)]
pub struct HybridSearchConfig {
    pub rank_constant: f64,
    pub graph_context_enabled: bool,
    pub graph_neighbor_limit: usize,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self {
            rank_constant: 60.0,
            graph_context_enabled: false,
            graph_neighbor_limit: 6,
        }
    }
}

/// A single ranked segment, optionally carrying graph-context entities
/// surfaced because they neighbor an entity mentioned in the segment's document.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub segment: Segment,
    pub score: f32,
    pub related_entities: Vec<GraphEntity>,
}

/// Runs the hybrid retriever: lexical search, vector search, Reciprocal Rank
/// Fusion over the two rank orders, optional one-hop graph-context
/// augmentation, and an optional rerank pass. Cache short-circuiting is the
/// caller's responsibility (`common::utils::cache::TtlCache`), since the
/// cache key includes request-scoped fields this crate doesn't see.
#[instrument(skip_all, fields(query_len = query.len()))]
pub async fn hybrid_search(
    db: &SurrealDbClient,
    query: &str,
    query_embedding: Vec<f32>,
    take: usize,
    config: &HybridSearchConfig,
    reranker: Option<&RerankerLease>,
) -> Result<Vec<SearchHit>, AppError> {
    let take = take.max(1);
    let over_fetch_take = take.saturating_mul(OVER_FETCH_MULTIPLIER).max(take);
    let num_candidates = take.saturating_mul(VECTOR_CANDIDATE_MULTIPLIER).max(over_fetch_take);

    let lexical = fts::search_segments(query, over_fetch_take, db).await?;
    let vector = vector::search_segments(query_embedding, over_fetch_take, num_candidates, db).await?;

    let lexical_ranked: Vec<String> = lexical.iter().map(|s| s.item.get_id().to_owned()).collect();
    let vector_ranked: Vec<String> = vector.iter().map(|s| s.item.get_id().to_owned()).collect();

    let mut candidates = std::collections::HashMap::new();
    scoring::merge_scored_by_id(&mut candidates, lexical);
    scoring::merge_scored_by_id(&mut candidates, vector);

    let mut fused = apply_rrf(candidates, &vector_ranked, &lexical_ranked, config.rank_constant);
    fused.truncate(over_fetch_take);

    let mut hits = Vec::with_capacity(fused.len());
    for Scored { item, fused: score, .. } in fused {
        let related_entities = if config.graph_context_enabled {
            let seeds = graph::entities_mentioned_in_document(&item.document_id, db).await?;
            let seed_ids: Vec<String> = seeds.iter().map(|e| e.id.clone()).collect();
            graph::expand_context(&seed_ids, config.graph_neighbor_limit, db).await?
        } else {
            Vec::new()
        };
        hits.push(SearchHit {
            segment: item,
            score,
            related_entities,
        });
    }

    if let Some(lease) = reranker {
        hits = rerank_hits(lease, query, hits).await?;
    }
    hits.truncate(take);

    Ok(hits)
}

async fn rerank_hits(
    lease: &RerankerLease,
    query: &str,
    hits: Vec<SearchHit>,
) -> Result<Vec<SearchHit>, AppError> {
    if hits.is_empty() {
        return Ok(hits);
    }
    let documents: Vec<String> = hits.iter().map(|hit| hit.segment.content.clone()).collect();
    let results = lease.rerank(query, documents).await?;

    let mut by_index: std::collections::HashMap<usize, f32> =
        results.into_iter().map(|r| (r.index, r.score)).collect();

    let mut reranked: Vec<SearchHit> = hits
        .into_iter()
        .enumerate()
        .map(|(idx, mut hit)| {
            if let Some(score) = by_index.remove(&idx) {
                hit.score = score;
            }
            hit
        })
        .collect();

    reranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(reranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::StoredObject;
    use serde_json::Value;
    use uuid::Uuid;

    #[tokio::test]
    async fn hybrid_search_merges_lexical_and_vector_hits() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc_id = Uuid::new_v4().to_string();
        let mut segment = Segment::new(
            doc_id,
            "Tokio uses cooperative scheduling for async tasks.".into(),
            "hash".into(),
            "text".into(),
            None,
            0,
            Value::Object(Default::default()),
        );
        segment.embedding = Some(vec![0.9, 0.1, 0.0]);
        db.store_item(segment).await.unwrap();

        let config = HybridSearchConfig::default();
        let hits = hybrid_search(&db, "tokio scheduling", vec![0.9, 0.1, 0.0], 10, &config, None)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert!(hits[0].segment.content.contains("Tokio"));
    }

    #[tokio::test]
    async fn hybrid_search_returns_empty_for_no_matches() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let config = HybridSearchConfig::default();
        let hits = hybrid_search(&db, "nothing here", vec![0.0, 0.0, 0.0], 10, &config, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
