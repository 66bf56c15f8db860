use crate::storage::types::deserialize_flexible_id;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, storage::types::StoredObject};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemSettings {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub registrations_enabled: bool,
    pub agent_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: u32,
}

impl StoredObject for SystemSettings {
    fn table_name() -> &'static str {
        "system_settings"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

impl SystemSettings {
    /// Creates the singleton `current` settings row if it doesn't exist yet. Idempotent.
    pub async fn ensure_initialized(db: &SurrealDbClient) -> Result<(), AppError> {
        if db.get_item::<Self>("current").await?.is_some() {
            return Ok(());
        }

        let defaults = Self {
            id: "current".to_string(),
            registrations_enabled: true,
            agent_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
        };
        db.client
            .query("CREATE type::thing('system_settings', 'current') CONTENT $settings")
            .bind(("settings", defaults))
            .await?;

        Ok(())
    }

    pub async fn get_current(db: &SurrealDbClient) -> Result<Self, AppError> {
        let settings: Option<Self> = db.get_item("current").await?;
        settings.ok_or(AppError::NotFound("System settings not found".into()))
    }

    pub async fn update(db: &SurrealDbClient, changes: Self) -> Result<Self, AppError> {
        // We need to use a direct query for the update with MERGE
        let updated: Option<Self> = db
            .client
            .query("UPDATE type::thing('system_settings', 'current') MERGE $changes RETURN AFTER")
            .bind(("changes", changes))
            .await?
            .take(0)?;

        updated.ok_or(AppError::Validation(
            "Something went wrong updating the settings".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_settings_initialization() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.apply_migrations()
            .await
            .expect("Failed to apply migrations");
        let settings = SystemSettings::get_current(&db)
            .await
            .expect("Failed to get system settings");

        assert_eq!(settings.id, "current");
        assert!(settings.registrations_enabled);
        assert!(!settings.agent_model.is_empty());
        assert!(settings.embedding_dimensions > 0);

        db.apply_migrations()
            .await
            .expect("Failed to apply migrations");
        let settings_again = SystemSettings::get_current(&db)
            .await
            .expect("Failed to get settings after initialization");

        assert_eq!(settings.id, settings_again.id);
    }

    #[tokio::test]
    async fn test_update_settings() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.apply_migrations()
            .await
            .expect("Failed to apply migrations");

        let mut updated_settings = SystemSettings::get_current(&db).await.unwrap();
        updated_settings.registrations_enabled = false;
        updated_settings.agent_model = "gpt-4".to_string();

        let result = SystemSettings::update(&db, updated_settings)
            .await
            .expect("Failed to update settings");

        assert!(!result.registrations_enabled);
        assert_eq!(result.agent_model, "gpt-4");

        let current = SystemSettings::get_current(&db)
            .await
            .expect("Failed to get current settings after update");
        assert!(!current.registrations_enabled);
        assert_eq!(current.agent_model, "gpt-4");
    }

    #[tokio::test]
    async fn test_get_current_nonexistent() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let result = SystemSettings::get_current(&db).await;

        assert!(result.is_err());
        match result {
            Err(AppError::NotFound(_)) => {}
            Err(e) => panic!("Expected NotFound error, got: {:?}", e),
            Ok(_) => panic!("Expected error but got Ok"),
        }
    }
}
