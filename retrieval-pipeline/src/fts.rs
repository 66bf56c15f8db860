use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{graph_entity::GraphEntity, segment::Segment},
    },
};

use crate::scoring::Scored;

/// Runs the BM25 lexical search stage over segments, returning results in
/// rank order (best first) wrapped with their raw FTS score.
pub async fn search_segments(
    query: &str,
    take: usize,
    db: &SurrealDbClient,
) -> Result<Vec<Scored<Segment>>, AppError> {
    let hits = Segment::fts_search(query, take, db).await?;
    Ok(hits
        .into_iter()
        .map(|hit| Scored::new(hit.segment).with_fts_score(hit.score))
        .collect())
}

/// Same as [`search_segments`] but over the entity graph's name/description fields.
pub async fn search_entities(
    query: &str,
    take: usize,
    db: &SurrealDbClient,
) -> Result<Vec<Scored<GraphEntity>>, AppError> {
    let hits = GraphEntity::fts_search(query, take, db).await?;
    Ok(hits
        .into_iter()
        .map(|hit| Scored::new(hit.entity).with_fts_score(hit.score))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::StoredObject;
    use serde_json::Value;
    use uuid::Uuid;

    #[tokio::test]
    async fn search_segments_ranks_by_bm25_score() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc_id = Uuid::new_v4().to_string();
        let segment = Segment::new(
            doc_id,
            "Tokio uses cooperative scheduling for async tasks.".into(),
            "hash".into(),
            "text".into(),
            None,
            0,
            Value::Object(Default::default()),
        );
        db.store_item(segment).await.unwrap();

        let results = search_segments("tokio scheduling", 10, &db).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].scores.fts.is_some());
    }
}
