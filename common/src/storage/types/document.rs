use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Active,
    Deleted,
}

stored_object!(Document, "document", {
    source_type: String,
    source_id: String,
    source_url: Option<String>,
    title: String,
    owner: Option<String>,
    project_id: Option<String>,
    content_hash: Option<String>,
    #[serde(default = "default_status")]
    status: DocumentStatus,
    last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    graph_synced: bool,
    #[serde(default)]
    graph_sync_retries: i64
});

fn default_status() -> DocumentStatus {
    DocumentStatus::Active
}

impl Document {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_type: String,
        source_id: String,
        source_url: Option<String>,
        title: String,
        owner: Option<String>,
        project_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_type,
            source_id,
            source_url,
            title,
            owner,
            project_id,
            content_hash: None,
            status: DocumentStatus::Active,
            last_synced_at: None,
            graph_synced: false,
            graph_sync_retries: 0,
        }
    }

    pub async fn find_by_source(
        source_type: &str,
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let doc: Option<Self> = db
            .client
            .query("SELECT * FROM document WHERE source_type = $source_type AND source_id = $source_id LIMIT 1")
            .bind(("source_type", source_type.to_owned()))
            .bind(("source_id", source_id.to_owned()))
            .await?
            .take(0)?;
        Ok(doc)
    }

    /// Looks a document up by `source_id` alone, for callers that don't carry
    /// the connector's `source_type` (e.g. a tool input from an LLM).
    pub async fn find_by_source_id(source_id: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let doc: Option<Self> = db
            .client
            .query("SELECT * FROM document WHERE source_id = $source_id LIMIT 1")
            .bind(("source_id", source_id.to_owned()))
            .await?
            .take(0)?;
        Ok(doc)
    }

    /// Case-insensitive substring match on title, first hit only -- used by
    /// tools that let a caller name a document loosely (e.g. "the onboarding doc").
    pub async fn find_by_title(title: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let doc: Option<Self> = db
            .client
            .query(
                "SELECT * FROM document
                    WHERE string::lowercase(title) CONTAINS string::lowercase($title)
                    LIMIT 1",
            )
            .bind(("title", title.to_owned()))
            .await?
            .take(0)?;
        Ok(doc)
    }

    /// Every document id whose title matches the given substring, case-insensitive.
    pub async fn find_ids_by_title(title: &str, db: &SurrealDbClient) -> Result<Vec<String>, AppError> {
        let docs: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM document
                    WHERE string::lowercase(title) CONTAINS string::lowercase($title)",
            )
            .bind(("title", title.to_owned()))
            .await?
            .take(0)?;
        Ok(docs.into_iter().map(|doc| doc.id).collect())
    }

    pub async fn upsert(document: Self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .client
            .query("UPDATE type::thing('document', $id) MERGE $doc RETURN AFTER")
            .bind(("id", document.id.clone()))
            .bind(("doc", document))
            .await?
            .take(0)?;
        updated.ok_or(AppError::Internal("document upsert failed".into()))
    }

    pub async fn mark_synced(
        id: &str,
        content_hash: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('document', $id) SET
                    content_hash = $hash,
                    last_synced_at = $now,
                    updated_at = $now",
            )
            .bind(("id", id.to_owned()))
            .bind(("hash", content_hash.to_owned()))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    pub async fn list_by_project(
        project_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let docs: Vec<Self> = db
            .client
            .query("SELECT * FROM document WHERE project_id = $project_id ORDER BY title ASC")
            .bind(("project_id", project_id.to_owned()))
            .await?
            .take(0)?;
        Ok(docs)
    }

    /// Keyset page ordered by `id`, strictly after `cursor` when given.
    pub async fn list_documents(
        cursor: Option<&str>,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let sql = if cursor.is_some() {
            format!("SELECT * FROM document WHERE id > $cursor ORDER BY id ASC LIMIT {limit}")
        } else {
            format!("SELECT * FROM document ORDER BY id ASC LIMIT {limit}")
        };
        let docs: Vec<Self> = db
            .client
            .query(sql)
            .bind(("cursor", cursor.map(str::to_owned)))
            .await?
            .take(0)?;
        Ok(docs)
    }

    pub async fn count(db: &SurrealDbClient) -> Result<i64, AppError> {
        #[derive(serde::Deserialize)]
        struct Count {
            count: i64,
        }
        let count: Option<Count> = db
            .client
            .query("SELECT count() AS count FROM document GROUP ALL")
            .await?
            .take(0)?;
        Ok(count.map(|c| c.count).unwrap_or(0))
    }

    /// Marks the document's graph-sync state after a successful best-effort
    /// graph post-commit step, resetting the retry counter.
    pub async fn mark_graph_synced(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('document', $id) SET
                    graph_synced = true,
                    graph_sync_retries = 0,
                    updated_at = $now",
            )
            .bind(("id", id.to_owned()))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    /// Documents whose graph sync has failed and not yet exhausted its retry
    /// budget, oldest-attempted first, for the background retry sweep to pick up.
    pub async fn list_graph_sync_retry_candidates(
        max_retries: i64,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let docs: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM document
                    WHERE graph_synced = false AND graph_sync_retries < $max_retries AND graph_sync_retries > 0
                    ORDER BY updated_at ASC
                    LIMIT $limit",
            )
            .bind(("max_retries", max_retries))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;
        Ok(docs)
    }

    /// Records a failed graph post-commit attempt, incrementing the retry counter.
    pub async fn mark_graph_sync_failed(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('document', $id) SET
                    graph_synced = false,
                    graph_sync_retries += 1,
                    updated_at = $now",
            )
            .bind(("id", id.to_owned()))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_by_source_after_upsert() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc = Document::new(
            "local_fs".into(),
            "/docs/readme.md".into(),
            None,
            "Readme".into(),
            None,
            None,
        );
        db.store_item(doc.clone()).await.unwrap();

        let found = Document::find_by_source("local_fs", "/docs/readme.md", &db)
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, doc.id);
    }

    #[tokio::test]
    async fn test_find_by_title_matches_case_insensitive_substring() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc = Document::new(
            "local_fs".into(),
            "/docs/onboarding.md".into(),
            None,
            "Employee Onboarding Guide".into(),
            None,
            None,
        );
        db.store_item(doc.clone()).await.unwrap();

        let found = Document::find_by_title("onboarding", &db).await.unwrap();
        assert_eq!(found.unwrap().id, doc.id);
    }

    #[tokio::test]
    async fn test_find_ids_by_title_returns_every_match() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        for title in ["Onboarding Guide", "Onboarding Checklist", "Unrelated Doc"] {
            let doc = Document::new(
                "local_fs".into(),
                format!("/docs/{title}.md"),
                None,
                title.into(),
                None,
                None,
            );
            db.store_item(doc).await.unwrap();
        }

        let ids = Document::find_ids_by_title("onboarding", &db).await.unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_synced_sets_hash() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let doc = Document::new(
            "local_fs".into(),
            "/docs/a.md".into(),
            None,
            "A".into(),
            None,
            None,
        );
        db.store_item(doc.clone()).await.unwrap();

        Document::mark_synced(&doc.id, "deadbeef", &db).await.unwrap();
        let updated: Document = db.get_item(&doc.id).await.unwrap().unwrap();
        assert_eq!(updated.content_hash.as_deref(), Some("deadbeef"));
        assert!(updated.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_candidates_exclude_exhausted_and_untried_documents() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let mut never_failed = Document::new("local_fs".into(), "/a.md".into(), None, "A".into(), None, None);
        never_failed.graph_sync_retries = 0;
        db.store_item(never_failed).await.unwrap();

        let mut retryable = Document::new("local_fs".into(), "/b.md".into(), None, "B".into(), None, None);
        retryable.graph_sync_retries = 2;
        db.store_item(retryable.clone()).await.unwrap();

        let mut exhausted = Document::new("local_fs".into(), "/c.md".into(), None, "C".into(), None, None);
        exhausted.graph_sync_retries = 5;
        db.store_item(exhausted).await.unwrap();

        let candidates = Document::list_graph_sync_retry_candidates(5, 10, &db).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, retryable.id);
    }
}
