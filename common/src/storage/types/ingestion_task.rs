use futures::Stream;
use serde_json::Value;
use surrealdb::{opt::PatchOp, Notification};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestionTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

stored_object!(IngestionTask, "ingestion_task", {
    folder_path: String,
    #[serde(default)]
    status: IngestionTaskStatus,
    #[serde(default)]
    total_documents: i64,
    #[serde(default)]
    processed_documents: i64,
    #[serde(default)]
    succeeded: i64,
    #[serde(default)]
    skipped: i64,
    #[serde(default)]
    failed: i64,
    #[serde(default)]
    results: Vec<Value>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>
});

impl Default for IngestionTaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl IngestionTask {
    pub fn new(folder_path: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            folder_path,
            status: IngestionTaskStatus::Pending,
            total_documents: 0,
            processed_documents: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            results: Vec::new(),
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub async fn create(task: Self, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.store_item(task).await
    }

    pub async fn start(id: &str, total_documents: i64, db: &SurrealDbClient) -> Result<(), AppError> {
        let _task: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", IngestionTaskStatus::Running))
            .patch(PatchOp::replace("/total_documents", total_documents))
            .patch(PatchOp::replace(
                "/started_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }

    pub async fn record_document_result(
        id: &str,
        outcome: &str,
        result: Value,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let field = match outcome {
            "succeeded" => "succeeded",
            "skipped" => "skipped",
            _ => "failed",
        };
        db.client
            .query(format!(
                "UPDATE type::thing('ingestion_task', $id) SET
                    processed_documents += 1,
                    {field} += 1,
                    results += $result,
                    updated_at = $now"
            ))
            .bind(("id", id.to_owned()))
            .bind(("result", result))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    pub async fn complete(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _task: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", IngestionTaskStatus::Completed))
            .patch(PatchOp::replace(
                "/completed_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }

    pub async fn fail(id: &str, error: String, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('ingestion_task', $id) SET
                    status = 'failed',
                    error = $error,
                    completed_at = $now,
                    updated_at = $now",
            )
            .bind(("id", id.to_owned()))
            .bind(("error", error))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    pub async fn cancel(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('ingestion_task', $id) SET
                    status = 'cancelled',
                    completed_at = $now,
                    updated_at = $now
                WHERE status IN ['pending', 'running']",
            )
            .bind(("id", id.to_owned()))
            .bind(("now", surrealdb::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    /// Live query of task-status changes, used to stream ingestion progress over SSE.
    pub async fn listen_for_updates(
        db: &SurrealDbClient,
    ) -> Result<impl Stream<Item = Result<Notification<Self>, surrealdb::Error>>, surrealdb::Error>
    {
        db.listen::<Self>().await
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        db.get_item(id).await
    }

    /// Keyset page ordered by `id`, newest tasks first, strictly after
    /// `cursor` when given.
    pub async fn list(
        cursor: Option<&str>,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let sql = if cursor.is_some() {
            format!("SELECT * FROM ingestion_task WHERE id < $cursor ORDER BY id DESC LIMIT {limit}")
        } else {
            format!("SELECT * FROM ingestion_task ORDER BY id DESC LIMIT {limit}")
        };
        let tasks: Vec<Self> = db
            .client
            .query(sql)
            .bind(("cursor", cursor.map(str::to_owned)))
            .await?
            .take(0)?;
        Ok(tasks)
    }

    pub async fn count(db: &SurrealDbClient) -> Result<i64, AppError> {
        #[derive(serde::Deserialize)]
        struct Count {
            count: i64,
        }
        let count: Option<Count> = db
            .client
            .query("SELECT count() AS count FROM ingestion_task GROUP ALL")
            .await?
            .take(0)?;
        Ok(count.map(|c| c.count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_lifecycle() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let task = IngestionTask::new("/data/docs".into());
        let task = IngestionTask::create(task, &db).await.unwrap();

        IngestionTask::start(&task.id, 3, &db).await.unwrap();
        let running: IngestionTask = IngestionTask::get(&task.id, &db).await.unwrap().unwrap();
        assert_eq!(running.status, IngestionTaskStatus::Running);
        assert_eq!(running.total_documents, 3);

        IngestionTask::record_document_result(
            &task.id,
            "succeeded",
            serde_json::json!({"document": "a.md"}),
            &db,
        )
        .await
        .unwrap();

        IngestionTask::complete(&task.id, &db).await.unwrap();
        let completed = IngestionTask::get(&task.id, &db).await.unwrap().unwrap();
        assert_eq!(completed.status, IngestionTaskStatus::Completed);
        assert_eq!(completed.succeeded, 1);
        assert_eq!(completed.processed_documents, 1);
        assert!(completed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        for path in ["/data/a", "/data/b", "/data/c"] {
            IngestionTask::create(IngestionTask::new(path.into()), &db)
                .await
                .unwrap();
        }

        let count = IngestionTask::count(&db).await.unwrap();
        assert_eq!(count, 3);

        let page = IngestionTask::list(None, 2, &db).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_only_applies_while_unfinished() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let task = IngestionTask::create(IngestionTask::new("/data/docs".into()), &db)
            .await
            .unwrap();
        IngestionTask::cancel(&task.id, &db).await.unwrap();

        let cancelled = IngestionTask::get(&task.id, &db).await.unwrap().unwrap();
        assert_eq!(cancelled.status, IngestionTaskStatus::Cancelled);
    }
}
