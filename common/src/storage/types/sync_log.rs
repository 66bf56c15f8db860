use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use serde_json::Value;
use uuid::Uuid;

stored_object!(SyncLog, "sync_log", {
    document_id: Option<String>,
    action: String,
    segments_affected: Option<i64>,
    #[serde(default)]
    details: Value
});

impl SyncLog {
    pub fn new(
        document_id: Option<String>,
        action: String,
        segments_affected: Option<i64>,
        details: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            action,
            segments_affected,
            details,
        }
    }

    pub async fn record(entry: Self, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.store_item(entry).await
    }

    /// Most recent entries, optionally filtered to a single document, newest first.
    pub async fn recent(
        document_id: Option<&str>,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let sql = if document_id.is_some() {
            format!(
                "SELECT * FROM sync_log WHERE document_id = $document_id ORDER BY created_at DESC LIMIT {limit}"
            )
        } else {
            format!("SELECT * FROM sync_log ORDER BY created_at DESC LIMIT {limit}")
        };

        let logs: Vec<Self> = db
            .client
            .query(sql)
            .bind(("document_id", document_id.map(str::to_owned)))
            .await?
            .take(0)?;
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_orders_newest_first() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        for action in ["created", "updated"] {
            let entry = SyncLog::new(None, action.into(), None, Value::Null);
            SyncLog::record(entry, &db).await.unwrap();
        }

        let logs = SyncLog::recent(None, 20, &db).await.unwrap();
        assert_eq!(logs.len(), 2);
    }
}
