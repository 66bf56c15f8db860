use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use serde_json::Value;
use uuid::Uuid;

stored_object!(ExtractedEntity, "extracted_entity", {
    document_id: String,
    segment_id: Option<String>,
    entity_type: String,
    entity_data: Value,
    confidence: f32,
    /// The snippet of source text the entity was grounded on, truncated to
    /// a few hundred characters -- carried alongside the structured fields
    /// so a caller can see why the extractor made this call.
    source_text: String
});

impl ExtractedEntity {
    pub fn new(
        document_id: String,
        segment_id: Option<String>,
        entity_type: String,
        entity_data: Value,
        confidence: f32,
        source_text: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            segment_id,
            entity_type,
            entity_data,
            confidence,
            source_text,
        }
    }

    pub async fn search(
        entity_type: Option<&str>,
        search_term: Option<&str>,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut clauses = Vec::new();
        if entity_type.is_some() {
            clauses.push("entity_type = $entity_type");
        }
        if search_term.is_some() {
            clauses.push("string::lowercase(<string> entity_data) CONTAINS string::lowercase($search_term)");
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT * FROM extracted_entity {where_clause} ORDER BY confidence DESC LIMIT {limit}"
        );

        let entities: Vec<Self> = db
            .client
            .query(sql)
            .bind(("entity_type", entity_type.map(str::to_owned)))
            .bind(("search_term", search_term.map(str::to_owned)))
            .await?
            .take(0)?;
        Ok(entities)
    }

    pub async fn count(db: &SurrealDbClient) -> Result<i64, AppError> {
        #[derive(serde::Deserialize)]
        struct Count {
            count: i64,
        }
        let count: Option<Count> = db
            .client
            .query("SELECT count() AS count FROM extracted_entity GROUP ALL")
            .await?
            .take(0)?;
        Ok(count.map(|c| c.count).unwrap_or(0))
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE extracted_entity WHERE document_id = $document_id")
            .bind(("document_id", document_id.to_owned()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_by_entity_type_orders_by_confidence() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc_id = Uuid::new_v4().to_string();
        for (name, confidence) in [("Acme Corp", 0.6), ("Globex", 0.9)] {
            let entity = ExtractedEntity::new(
                doc_id.clone(),
                None,
                "organization".into(),
                json!({ "name": name }),
                confidence,
                format!("{name} is mentioned in this document."),
            );
            db.store_item(entity).await.unwrap();
        }

        let results = ExtractedEntity::search(Some("organization"), None, 10, &db)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].confidence >= results[1].confidence);
    }
}
