use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(User, "user", {
    email: String,
    password: String,
    #[serde(default)]
    active: bool,
    api_key: Option<String>,
    admin: bool
});

impl User {
    pub async fn create_new(
        email: String,
        password: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let user: Option<User> = db
            .client
            .query(
                "LET $count = (SELECT count() FROM type::table($table))[0].count;
             CREATE type::thing('user', $id) SET
                email = $email,
                password = crypto::argon2::generate($password),
                admin = $count < 1,
                active = true,
                created_at = $created_at,
                updated_at = $updated_at",
            )
            .bind(("table", "user"))
            .bind(("id", id))
            .bind(("email", email))
            .bind(("password", password))
            .bind(("created_at", surrealdb::Datetime::from(now)))
            .bind(("updated_at", surrealdb::Datetime::from(now)))
            .await?
            .take(1)?;

        user.ok_or(AppError::Auth("User failed to create".into()))
    }

    pub async fn patch_password(
        email: &str,
        password: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE user
            SET password = crypto::argon2::generate($password)
            WHERE email = $email",
            )
            .bind(("email", email.to_owned()))
            .bind(("password", password.to_owned()))
            .await?;

        Ok(())
    }

    pub async fn authenticate(
        email: &str,
        password: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let user: Option<User> = db
            .client
            .query(
                "SELECT * FROM user
                WHERE email = $email
                AND active = true
                AND crypto::argon2::compare(password, $password)",
            )
            .bind(("email", email.to_owned()))
            .bind(("password", password.to_owned()))
            .await?
            .take(0)?;
        user.ok_or(AppError::Auth("User failed to authenticate".into()))
    }

    pub async fn find_by_email(
        email: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE email = $email LIMIT 1")
            .bind(("email", email.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE api_key = $api_key AND active = true LIMIT 1")
            .bind(("api_key", api_key.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    pub async fn set_api_key(id: &str, db: &SurrealDbClient) -> Result<String, AppError> {
        let api_key = format!("sk_{}", Uuid::new_v4().to_string().replace('-', ""));

        let user: Option<User> = db
            .client
            .query(
                "UPDATE type::thing('user', $id)
                SET api_key = $api_key
                RETURN AFTER",
            )
            .bind(("id", id.to_owned()))
            .bind(("api_key", api_key.clone()))
            .await?
            .take(0)?;

        if user.is_some() {
            Ok(api_key)
        } else {
            Err(AppError::NotFound("User not found".into()))
        }
    }

    pub async fn revoke_api_key(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let user: Option<User> = db
            .client
            .query(
                "UPDATE type::thing('user', $id)
                SET api_key = NONE
                RETURN AFTER",
            )
            .bind(("id", id.to_owned()))
            .await?
            .take(0)?;

        if user.is_some() {
            Ok(())
        } else {
            Err(AppError::NotFound("User not found".into()))
        }
    }

    pub async fn list(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let users: Vec<Self> = db
            .client
            .query("SELECT * FROM user ORDER BY email ASC")
            .await?
            .take(0)?;
        Ok(users)
    }

    /// Marks a user inactive. Deactivated users fail both password and API-key auth.
    pub async fn deactivate(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let user: Option<User> = db
            .client
            .query("UPDATE type::thing('user', $id) SET active = false RETURN AFTER")
            .bind(("id", id.to_owned()))
            .await?
            .take(0)?;

        if user.is_some() {
            Ok(())
        } else {
            Err(AppError::NotFound("User not found".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations().await.expect("migrations failed");
        db
    }

    #[tokio::test]
    async fn test_user_creation_first_user_is_admin() {
        let db = test_db().await;
        let user = User::create_new("a@example.com".into(), "pw123456".into(), &db)
            .await
            .unwrap();
        assert!(user.admin);
        assert!(user.active);
    }

    #[tokio::test]
    async fn test_user_authentication() {
        let db = test_db().await;
        User::create_new("a@example.com".into(), "pw123456".into(), &db)
            .await
            .unwrap();

        let authed = User::authenticate("a@example.com", "pw123456", &db)
            .await
            .unwrap();
        assert_eq!(authed.email, "a@example.com");

        assert!(User::authenticate("a@example.com", "wrong", &db)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_api_key_management() {
        let db = test_db().await;
        let user = User::create_new("a@example.com".into(), "pw123456".into(), &db)
            .await
            .unwrap();

        let key = User::set_api_key(&user.id, &db).await.unwrap();
        let found = User::find_by_api_key(&key, &db).await.unwrap();
        assert!(found.is_some());

        User::revoke_api_key(&user.id, &db).await.unwrap();
        let found = User::find_by_api_key(&key, &db).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_list_returns_every_user_ordered_by_email() {
        let db = test_db().await;
        User::create_new("b@example.com".into(), "pw123456".into(), &db).await.unwrap();
        User::create_new("a@example.com".into(), "pw123456".into(), &db).await.unwrap();

        let users = User::list(&db).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].email, "a@example.com");
        assert_eq!(users[1].email, "b@example.com");
    }

    #[tokio::test]
    async fn test_deactivated_user_cannot_authenticate() {
        let db = test_db().await;
        let user = User::create_new("a@example.com".into(), "pw123456".into(), &db)
            .await
            .unwrap();
        User::deactivate(&user.id, &db).await.unwrap();

        assert!(User::authenticate("a@example.com", "pw123456", &db)
            .await
            .is_err());
    }
}
