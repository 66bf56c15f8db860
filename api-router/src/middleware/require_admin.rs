use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use common::{
    error::AppError,
    storage::types::{role_assignment::RoleAssignment, user::User},
};

use crate::{api_state::ApiState, error::ApiError};

/// Gates the `/admin/*` surface: requires a valid API key (regardless of
/// `auth_required`, since admin endpoints manage users and roles) and an
/// admin-level role assignment in at least one project.
pub async fn require_admin(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = extract_api_key(&request)
        .ok_or_else(|| AppError::Auth("missing API key".to_string()))?;

    let user = User::find_by_api_key(&api_key, &state.db)
        .await?
        .ok_or_else(|| AppError::Auth("invalid API key".to_string()))?;

    if !user.admin {
        let roles = RoleAssignment::for_user(&user.id, &state.db).await?;
        let has_admin_role = roles
            .iter()
            .any(|assignment| matches!(assignment.role, common::storage::types::role_assignment::Role::Admin));
        if !has_admin_role {
            return Err(ApiError::from(AppError::Forbidden("admin role required".to_string())));
        }
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn extract_api_key(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        })
        .map(String::from)
}
