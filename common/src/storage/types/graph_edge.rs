use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(GraphEdge, "graph_edge", {
    source_entity_id: String,
    target_entity_id: String,
    relationship: String,
    fact: Option<String>,
    source_document_id: Option<String>,
    episode_id: Option<String>,
    valid_at: DateTime<Utc>,
    invalid_at: Option<DateTime<Utc>>
});

impl GraphEdge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_entity_id: String,
        target_entity_id: String,
        relationship: String,
        fact: Option<String>,
        source_document_id: Option<String>,
    ) -> Self {
        Self::with_episode(
            source_entity_id,
            target_entity_id,
            relationship,
            fact,
            source_document_id,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_episode(
        source_entity_id: String,
        target_entity_id: String,
        relationship: String,
        fact: Option<String>,
        source_document_id: Option<String>,
        episode_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_entity_id,
            target_entity_id,
            relationship,
            fact,
            source_document_id,
            episode_id,
            valid_at: now,
            invalid_at: None,
        }
    }

    /// Adds an edge for an episode (new fact), invalidating any existing edge it contradicts.
    pub async fn add_episode(edge: Self, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.store_item(edge).await
    }

    /// Marks an edge invalid as of now, without deleting it -- the bi-temporal history is kept.
    pub async fn invalidate(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('graph_edge', $id) SET invalid_at = $now, updated_at = $now")
            .bind(("id", id.to_owned()))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    /// Invalidates every currently-valid edge belonging to an episode, used
    /// when a document is re-ingested and its previous episode's facts must
    /// be superseded without erasing their history.
    pub async fn invalidate_by_episode(
        episode_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE graph_edge SET invalid_at = $now, updated_at = $now
                 WHERE episode_id = $episode_id AND invalid_at IS NONE",
            )
            .bind(("episode_id", episode_id.to_owned()))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    /// Edges touching `entity_id` that are currently valid (not yet invalidated).
    pub async fn neighborhood(
        entity_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let edges: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM graph_edge
                 WHERE (source_entity_id = $id OR target_entity_id = $id)
                 AND invalid_at IS NONE
                 ORDER BY valid_at DESC",
            )
            .bind(("id", entity_id.to_owned()))
            .await?
            .take(0)?;
        Ok(edges)
    }

    /// Full history (valid and invalidated) for a single entity.
    pub async fn entity_history(
        entity_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let edges: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM graph_edge
                 WHERE source_entity_id = $id OR target_entity_id = $id
                 ORDER BY valid_at ASC",
            )
            .bind(("id", entity_id.to_owned()))
            .await?
            .take(0)?;
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_neighborhood_excludes_invalidated_edges() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let edge = GraphEdge::new(
            "entity-a".into(),
            "entity-b".into(),
            "works_at".into(),
            Some("Alice works at Acme".into()),
            None,
        );
        let stored = GraphEdge::add_episode(edge, &db).await.unwrap();

        let neighbors = GraphEdge::neighborhood("entity-a", &db).await.unwrap();
        assert_eq!(neighbors.len(), 1);

        GraphEdge::invalidate(&stored.id, &db).await.unwrap();
        let neighbors = GraphEdge::neighborhood("entity-a", &db).await.unwrap();
        assert!(neighbors.is_empty());

        let history = GraphEdge::entity_history("entity-a", &db).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_episode_closes_only_matching_edges() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let episode_edge = GraphEdge::with_episode(
            "a".into(),
            "b".into(),
            "mentions".into(),
            None,
            None,
            Some("episode-1".into()),
        );
        let episode_edge = GraphEdge::add_episode(episode_edge, &db).await.unwrap();

        let other_edge = GraphEdge::with_episode(
            "c".into(),
            "d".into(),
            "mentions".into(),
            None,
            None,
            Some("episode-2".into()),
        );
        GraphEdge::add_episode(other_edge, &db).await.unwrap();

        GraphEdge::invalidate_by_episode("episode-1", &db).await.unwrap();

        let history = GraphEdge::entity_history("a", &db).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, episode_edge.id);
        assert!(history[0].invalid_at.is_some());

        let untouched = GraphEdge::entity_history("c", &db).await.unwrap();
        assert!(untouched[0].invalid_at.is_none());
    }
}
