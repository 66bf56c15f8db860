use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(Project, "project", {
    name: String,
    description: Option<String>
});

impl Project {
    pub fn new(name: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            description,
        }
    }

    pub async fn create(project: Self, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.store_item(project).await
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        db.get_item(id).await
    }

    pub async fn list(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let projects: Vec<Self> = db
            .client
            .query("SELECT * FROM project ORDER BY name ASC")
            .await?
            .take(0)?;
        Ok(projects)
    }
}
