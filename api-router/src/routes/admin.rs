use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use common::{
    error::AppError,
    storage::types::{
        role_assignment::{Role, RoleAssignment},
        user::User,
    },
};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub active: bool,
    pub admin: bool,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self { id: user.id, email: user.email, active: user.active, admin: user.admin }
    }
}

/// `GET /admin/users`.
pub async fn list_users(State(state): State<ApiState>) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let users = User::list(&state.db).await?;
    Ok(Json(users.into_iter().map(UserSummary::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub summary: UserSummary,
    pub roles: Vec<RoleAssignment>,
}

/// `GET /admin/users/{id}`.
pub async fn get_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<UserDetail>, ApiError> {
    let user: Option<User> = state.db.get_item(&id).await?;
    let user = user.ok_or_else(|| AppError::NotFound(format!("user not found: {id}")))?;
    let roles = RoleAssignment::for_user(&user.id, &state.db).await?;

    Ok(Json(UserDetail { summary: user.into(), roles }))
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: String,
    pub project_id: Option<String>,
    pub role: Role,
}

/// `POST /admin/roles`.
pub async fn assign_role(
    State(state): State<ApiState>,
    Json(request): Json<AssignRoleRequest>,
) -> Result<Json<RoleAssignment>, ApiError> {
    let assignment = RoleAssignment::assign(
        &request.user_id,
        request.project_id.as_deref(),
        request.role,
        &state.db,
    )
    .await?;
    Ok(Json(assignment))
}

/// `DELETE /admin/roles/{user_id}/{project_id}`. `project_id` of the literal
/// string `_` targets the cross-project assignment, since axum path segments
/// can't be empty/optional.
pub async fn revoke_role(
    State(state): State<ApiState>,
    Path((user_id, project_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let project_id = if project_id == "_" { None } else { Some(project_id.as_str()) };
    RoleAssignment::revoke_for_user_project(&user_id, project_id, &state.db).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /admin/users/{id}/deactivate`.
pub async fn deactivate_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    User::deactivate(&id, &state.db).await?;
    Ok(StatusCode::NO_CONTENT)
}
