use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(GraphEntity, "graph_entity", {
    name: String,
    entity_type: String,
    description: Option<String>,
    source_document_id: Option<String>,
    embedding: Option<Vec<f32>>
});

/// Search result carrying a fused or per-method relevance score alongside the entity.
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct GraphEntitySearchResult {
    pub entity: GraphEntity,
    pub score: f32,
}

impl GraphEntity {
    pub fn new(
        name: String,
        entity_type: String,
        description: Option<String>,
        source_document_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            entity_type,
            description,
            source_document_id,
            embedding: None,
        }
    }

    pub async fn find_by_name(name: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let entity: Option<Self> = db
            .client
            .query("SELECT * FROM graph_entity WHERE name = $name LIMIT 1")
            .bind(("name", name.to_owned()))
            .await?
            .take(0)?;
        Ok(entity)
    }

    pub async fn upsert_by_name(entity: Self, db: &SurrealDbClient) -> Result<Self, AppError> {
        if let Some(existing) = Self::find_by_name(&entity.name, db).await? {
            let merged: Option<Self> = db
                .client
                .query("UPDATE type::thing('graph_entity', $id) MERGE $entity RETURN AFTER")
                .bind(("id", existing.id))
                .bind(("entity", entity))
                .await?
                .take(0)?;
            merged.ok_or(AppError::Internal("graph entity merge failed".into()))
        } else {
            db.store_item(entity).await
        }
    }

    /// HNSW vector search restricted to entities whose embedding column is populated.
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<Vec<GraphEntitySearchResult>, AppError> {
        let sql = format!(
            r#"
            SELECT *,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM graph_entity
            WHERE embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take};
            "#,
            take = take
        );

        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(flatten)]
            entity: GraphEntity,
            score: f32,
        }

        let rows: Vec<Row> = db
            .client
            .query(sql)
            .bind(("embedding", query_embedding))
            .await
            .map_err(|e| AppError::Internal(format!("vector search failed: {e}")))?
            .take(0)?;

        Ok(rows
            .into_iter()
            .map(|r| GraphEntitySearchResult {
                entity: r.entity,
                score: r.score,
            })
            .collect())
    }

    /// BM25 full-text search over entity name and description.
    pub async fn fts_search(
        query: &str,
        take: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<GraphEntitySearchResult>, AppError> {
        let sql = format!(
            r#"
            SELECT *, search::score(1) AS score
            FROM graph_entity
            WHERE name @1@ $query OR description @1@ $query
            ORDER BY score DESC
            LIMIT {take};
            "#,
            take = take
        );

        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(flatten)]
            entity: GraphEntity,
            score: f32,
        }

        let rows: Vec<Row> = db
            .client
            .query(sql)
            .bind(("query", query.to_owned()))
            .await
            .map_err(|e| AppError::Internal(format!("fts search failed: {e}")))?
            .take(0)?;

        Ok(rows
            .into_iter()
            .map(|r| GraphEntitySearchResult {
                entity: r.entity,
                score: r.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_by_name_merges_existing() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let first = GraphEntity::new("Acme Corp".into(), "organization".into(), None, None);
        let created = GraphEntity::upsert_by_name(first, &db).await.unwrap();

        let second = GraphEntity::new(
            "Acme Corp".into(),
            "organization".into(),
            Some("updated description".into()),
            None,
        );
        let merged = GraphEntity::upsert_by_name(second, &db).await.unwrap();

        assert_eq!(merged.id, created.id);
        assert_eq!(merged.description.as_deref(), Some("updated description"));
    }

    #[tokio::test]
    async fn test_fts_search_matches_name_and_description() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let entity = GraphEntity::new(
            "Acme Corp".into(),
            "organization".into(),
            Some("widget manufacturer".into()),
            None,
        );
        db.store_item(entity).await.unwrap();

        let results = GraphEntity::fts_search("widget", 10, &db).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity.name, "Acme Corp");
    }
}
