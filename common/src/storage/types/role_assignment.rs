use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

stored_object!(RoleAssignment, "role_assignment", {
    user_id: String,
    project_id: Option<String>,
    role: Role
});

impl RoleAssignment {
    /// `project_id == None` grants the role across every project.
    pub async fn assign(
        user_id: &str,
        project_id: Option<&str>,
        role: Role,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let assignment: Option<RoleAssignment> = db
            .client
            .query(
                "CREATE type::thing('role_assignment', $id) SET
                    user_id = $user_id,
                    project_id = $project_id,
                    role = $role,
                    created_at = $created_at,
                    updated_at = $updated_at",
            )
            .bind(("id", id))
            .bind(("user_id", user_id.to_owned()))
            .bind(("project_id", project_id.map(str::to_owned)))
            .bind(("role", role))
            .bind(("created_at", surrealdb::Datetime::from(now)))
            .bind(("updated_at", surrealdb::Datetime::from(now)))
            .await?
            .take(0)?;

        assignment.ok_or(AppError::Internal("Failed to create role assignment".into()))
    }

    pub async fn revoke(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let deleted: Option<RoleAssignment> = db.client.delete(("role_assignment", id)).await?;
        deleted
            .map(|_| ())
            .ok_or(AppError::NotFound("Role assignment not found".into()))
    }

    /// Revokes a user's role for a specific project. `project_id = None`
    /// targets the cross-project assignment, not every project-scoped one.
    pub async fn revoke_for_user_project(
        user_id: &str,
        project_id: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let deleted: Vec<RoleAssignment> = db
            .client
            .query("DELETE role_assignment WHERE user_id = $user_id AND project_id = $project_id RETURN BEFORE")
            .bind(("user_id", user_id.to_owned()))
            .bind(("project_id", project_id.map(str::to_owned)))
            .await?
            .take(0)?;
        if deleted.is_empty() {
            return Err(AppError::NotFound("Role assignment not found".into()));
        }
        Ok(())
    }

    pub async fn for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let roles: Vec<RoleAssignment> = db
            .client
            .query("SELECT * FROM role_assignment WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_owned()))
            .await?
            .take(0)?;
        Ok(roles)
    }

    /// Highest-privilege role the user holds for a project, falling back to a
    /// cross-project assignment (`project_id = NONE`) if no project-scoped one exists.
    pub async fn effective_role(
        user_id: &str,
        project_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Role>, AppError> {
        let assignments = Self::for_user(user_id, db).await?;
        let best = assignments
            .into_iter()
            .filter(|a| a.project_id.as_deref() == Some(project_id) || a.project_id.is_none())
            .map(|a| a.role)
            .max_by_key(|r| match r {
                Role::Viewer => 0,
                Role::Editor => 1,
                Role::Admin => 2,
            });
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assign_and_revoke() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let assignment = RoleAssignment::assign("user-1", Some("proj-1"), Role::Editor, &db)
            .await
            .unwrap();
        assert_eq!(assignment.role, Role::Editor);

        let role = RoleAssignment::effective_role("user-1", "proj-1", &db)
            .await
            .unwrap();
        assert_eq!(role, Some(Role::Editor));

        RoleAssignment::revoke(&assignment.id, &db).await.unwrap();
        let role = RoleAssignment::effective_role("user-1", "proj-1", &db)
            .await
            .unwrap();
        assert_eq!(role, None);
    }

    #[tokio::test]
    async fn test_revoke_for_user_project() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        RoleAssignment::assign("user-1", Some("proj-1"), Role::Viewer, &db)
            .await
            .unwrap();

        RoleAssignment::revoke_for_user_project("user-1", Some("proj-1"), &db)
            .await
            .unwrap();

        let role = RoleAssignment::effective_role("user-1", "proj-1", &db)
            .await
            .unwrap();
        assert_eq!(role, None);
    }

    #[tokio::test]
    async fn test_cross_project_assignment_applies_everywhere() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        RoleAssignment::assign("user-1", None, Role::Admin, &db)
            .await
            .unwrap();

        let role = RoleAssignment::effective_role("user-1", "any-project", &db)
            .await
            .unwrap();
        assert_eq!(role, Some(Role::Admin));
    }
}
