#![allow(clippy::missing_docs_in_private_items, clippy::uninlined_format_args)]
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use serde_json::Value;
use uuid::Uuid;

stored_object!(Segment, "segment", {
    document_id: String,
    content: String,
    content_hash: String,
    segment_type: String,
    section_path: Option<String>,
    position: i64,
    #[serde(default = "default_version")]
    version: i64,
    #[serde(default)]
    metadata: Value,
    embedding: Option<Vec<f32>>
});

fn default_version() -> i64 {
    1
}

/// Search result carrying a fused or per-method relevance score alongside the segment.
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct SegmentSearchResult {
    pub segment: Segment,
    pub score: f32,
}

impl Segment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        content: String,
        content_hash: String,
        segment_type: String,
        section_path: Option<String>,
        position: i64,
        metadata: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            content,
            content_hash,
            segment_type,
            section_path,
            position,
            version: 1,
            metadata,
            embedding: None,
        }
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE segment WHERE document_id = $document_id")
            .bind(("document_id", document_id.to_owned()))
            .await?;
        Ok(())
    }

    /// Deletes every existing segment for a document and inserts the given
    /// set in its place, atomically. Callers carry forward the old `id` on
    /// any segment whose content hash is unchanged (see the diff engine) so
    /// this is a true replace, not a blind delete-then-insert from the
    /// consumer's point of view.
    pub async fn replace_for_document(
        document_id: &str,
        segments: Vec<Self>,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        let count = segments.len();
        let sql = "
            BEGIN TRANSACTION;
            DELETE segment WHERE document_id = $document_id;
            FOR $seg IN $segments {
                CREATE segment CONTENT $seg;
            };
            COMMIT TRANSACTION;
        ";
        db.client
            .query(sql)
            .bind(("document_id", document_id.to_owned()))
            .bind(("segments", segments))
            .await?;
        Ok(count)
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        db.get_item(id).await
    }

    pub async fn count(db: &SurrealDbClient) -> Result<i64, AppError> {
        #[derive(serde::Deserialize)]
        struct Count {
            count: i64,
        }
        let count: Option<Count> = db
            .client
            .query("SELECT count() AS count FROM segment GROUP ALL")
            .await?
            .take(0)?;
        Ok(count.map(|c| c.count).unwrap_or(0))
    }

    pub async fn list_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let segments: Vec<Self> = db
            .client
            .query("SELECT * FROM segment WHERE document_id = $document_id ORDER BY position ASC")
            .bind(("document_id", document_id.to_owned()))
            .await?
            .take(0)?;
        Ok(segments)
    }

    /// HNSW vector search restricted to segments whose embedding column is
    /// populated. `num_candidates` is the HNSW ef-search breadth; callers
    /// should pass a multiple of `take` (spec calls for `10 * top_k`) so the
    /// index explores enough of the graph to surface `take` true nearest
    /// neighbors rather than an approximation cut short.
    pub async fn vector_search(
        take: usize,
        num_candidates: usize,
        query_embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<Vec<SegmentSearchResult>, AppError> {
        let sql = format!(
            r#"
            SELECT *,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM segment
            WHERE embedding <|{take},{num_candidates}|> $embedding
            ORDER BY score DESC
            LIMIT {take};
            "#,
            take = take,
            num_candidates = num_candidates
        );

        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(flatten)]
            segment: Segment,
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
            .map(|r| SegmentSearchResult {
                segment: r.segment,
                score: r.score,
            })
            .collect())
    }

    /// BM25 full-text search over segment content.
    pub async fn fts_search(
        query: &str,
        take: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<SegmentSearchResult>, AppError> {
        let sql = format!(
            r#"
            SELECT *, search::score(1) AS score
            FROM segment
            WHERE content @1@ $query
            ORDER BY score DESC
            LIMIT {take};
            "#,
            take = take
        );

        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(flatten)]
            segment: Segment,
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
            .map(|r| SegmentSearchResult {
                segment: r.segment,
                score: r.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_by_document_orders_by_position() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc_id = Uuid::new_v4().to_string();
        for (pos, text) in [(1, "second"), (0, "first")] {
            let segment = Segment::new(
                doc_id.clone(),
                text.into(),
                format!("hash-{pos}"),
                "text".into(),
                None,
                pos,
                Value::Object(Default::default()),
            );
            db.store_item(segment).await.unwrap();
        }

        let segments = Segment::list_by_document(&doc_id, &db).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].content, "first");
        assert_eq!(segments[1].content, "second");
    }

    #[tokio::test]
    async fn test_replace_for_document_drops_old_and_inserts_new() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc_id = Uuid::new_v4().to_string();
        let stale = Segment::new(
            doc_id.clone(),
            "stale".into(),
            "hash-stale".into(),
            "text".into(),
            None,
            0,
            Value::Object(Default::default()),
        );
        db.store_item(stale).await.unwrap();

        let fresh = Segment::new(
            doc_id.clone(),
            "fresh".into(),
            "hash-fresh".into(),
            "text".into(),
            None,
            0,
            Value::Object(Default::default()),
        );
        let count = Segment::replace_for_document(&doc_id, vec![fresh], &db)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let segments = Segment::list_by_document(&doc_id, &db).await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].content, "fresh");
    }

    #[tokio::test]
    async fn test_get_and_count() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc_id = Uuid::new_v4().to_string();
        let segment = Segment::new(
            doc_id,
            "content".into(),
            "hash".into(),
            "text".into(),
            None,
            0,
            Value::Object(Default::default()),
        );
        db.store_item(segment.clone()).await.unwrap();

        let fetched = Segment::get(&segment.id, &db).await.unwrap();
        assert_eq!(fetched.unwrap().id, segment.id);
        assert_eq!(Segment::count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_document_id() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc_id = Uuid::new_v4().to_string();
        let segment = Segment::new(
            doc_id.clone(),
            "content".into(),
            "hash".into(),
            "text".into(),
            None,
            0,
            Value::Object(Default::default()),
        );
        db.store_item(segment).await.unwrap();

        Segment::delete_by_document_id(&doc_id, &db).await.unwrap();
        let remaining = Segment::list_by_document(&doc_id, &db).await.unwrap();
        assert!(remaining.is_empty());
    }
}
