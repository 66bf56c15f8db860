use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{graph_entity::GraphEntity, segment::Segment},
    },
};

use crate::scoring::Scored;

/// Runs the HNSW vector search stage over segments, returning results in
/// rank order (best first) wrapped with their cosine similarity score.
/// `num_candidates` is the HNSW ef-search breadth (spec: `10 * top_k`).
pub async fn search_segments(
    query_embedding: Vec<f32>,
    take: usize,
    num_candidates: usize,
    db: &SurrealDbClient,
) -> Result<Vec<Scored<Segment>>, AppError> {
    let hits = Segment::vector_search(take, num_candidates, query_embedding, db).await?;
    Ok(hits
        .into_iter()
        .map(|hit| Scored::new(hit.segment).with_vector_score(hit.score))
        .collect())
}

/// Same as [`search_segments`] but over entity embeddings.
pub async fn search_entities(
    query_embedding: Vec<f32>,
    take: usize,
    db: &SurrealDbClient,
) -> Result<Vec<Scored<GraphEntity>>, AppError> {
    let hits = GraphEntity::vector_search(take, query_embedding, db).await?;
    Ok(hits
        .into_iter()
        .map(|hit| Scored::new(hit.entity).with_vector_score(hit.score))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::StoredObject;
    use serde_json::Value;
    use uuid::Uuid;

    #[tokio::test]
    async fn search_segments_finds_nearest_embedding() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc_id = Uuid::new_v4().to_string();
        let mut segment = Segment::new(
            doc_id,
            "content".into(),
            "hash".into(),
            "text".into(),
            None,
            0,
            Value::Object(Default::default()),
        );
        segment.embedding = Some(vec![0.9, 0.1, 0.0]);
        db.store_item(segment).await.unwrap();

        let results = search_segments(vec![0.9, 0.1, 0.0], 5, 50, &db).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].scores.vector.unwrap() > 0.9);
    }
}
