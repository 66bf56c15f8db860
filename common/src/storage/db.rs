use crate::error::AppError;
use crate::storage::indexes::ensure_runtime_indexes;

use super::types::{system_settings::SystemSettings, StoredObject};
use futures::Stream;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Notification, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Idempotent schema setup: user auth, default system settings, and the
    /// HNSW/FTS indexes the retriever depends on. Safe to call on every boot.
    pub async fn apply_migrations(&self) -> Result<(), AppError> {
        self.setup_auth().await.map_err(AppError::from)?;
        SystemSettings::ensure_initialized(self).await?;

        let dims = SystemSettings::get_current(self).await?.embedding_dimensions;
        ensure_runtime_indexes(self, dims as usize).await?;

        Ok(())
    }

    pub async fn setup_auth(&self) -> Result<(), Error> {
        self.client
            .query(
                "DEFINE TABLE user SCHEMALESS;
                DEFINE INDEX IF NOT EXISTS unique_email ON TABLE user FIELDS email UNIQUE;",
            )
            .await?;
        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Operation to store an object in SurrealDB, requires the struct to implement StoredObject
    pub async fn store_item<T>(&self, item: T) -> Result<T, AppError>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        let stored: Option<T> = self
            .client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await?;
        stored.ok_or_else(|| AppError::Internal("store_item returned no row".into()))
    }

    /// Operation to retrieve all objects from a certain table, requires the struct to implement StoredObject
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, AppError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.select(T::table_name()).await?)
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, AppError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.select((T::table_name(), id)).await?)
    }

    /// Operation to delete a single object by its ID, requires the struct to implement StoredObject
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, AppError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.delete((T::table_name(), id)).await?)
    }

    /// Operation to listen to a table for updates, requires the struct to implement StoredObject
    pub async fn listen<T>(
        &self,
    ) -> Result<impl Stream<Item = Result<Notification<T>, Error>>, Error>
    where
        T: for<'de> StoredObject + std::marker::Unpin,
    {
        self.client.select(T::table_name()).live().await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.apply_migrations()
            .await
            .expect("Failed to initialize schema");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert_eq!(stored, dummy);

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert!(all.contains(&dummy));

        let deleted = db
            .delete_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to delete");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("Failed fetch post delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn test_setup_auth() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.setup_auth().await.expect("Failed to setup auth");
    }
}
