use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Router,
};
use middleware::{correlation_id::correlation_id, require_admin::require_admin};
use middleware_api_auth::api_auth;
use routes::{
    admin::{assign_role, deactivate_user, get_user, list_users, revoke_role},
    chat::{chat, chat_stream},
    documents::{get_document, list_documents},
    health::health,
    ingest::{cancel_task, get_task, ingest_folder, list_tasks},
    liveness::live,
    readiness::ready,
    search::search,
    segments::get_segment,
    stats::stats,
};

pub mod api_state;
pub mod error;
mod middleware;
mod middleware_api_auth;
pub mod pagination;
mod routes;

/// Top-level router: probes are public, the knowledge/chat surface requires
/// an API key whenever `config.auth_required` is set, and `/admin/*` always
/// requires one regardless of that toggle. `correlation_id` wraps the whole
/// thing so every request -- including ones rejected by auth -- gets a
/// correlation id on its log lines and response.
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/health", get(health));

    let protected = Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/search", post(search))
        .route("/documents", get(list_documents))
        .route("/documents/{id}", get(get_document))
        .route("/segments/{id}", get(get_segment))
        .route("/stats", get(stats))
        .route("/ingest/folder", post(ingest_folder))
        .route("/ingest/tasks", get(list_tasks))
        .route("/ingest/tasks/{id}", get(get_task))
        .route("/ingest/tasks/{id}/cancel", post(cancel_task))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    let admin = Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/{id}", get(get_user))
        .route("/admin/users/{id}/deactivate", patch(deactivate_user))
        .route("/admin/roles", post(assign_role))
        .route("/admin/roles/{user_id}/{project_id}", delete(revoke_role))
        .route_layer(from_fn_with_state(app_state.clone(), require_admin));

    public
        .merge(protected)
        .merge(admin)
        .route_layer(from_fn(correlation_id))
}
