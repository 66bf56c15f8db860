use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::get_config,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Periodically re-attempts best-effort graph sync for documents that
/// previously failed, until each exhausts `graph_sync_max_retries`. Runs for
/// the lifetime of the process; failures just get logged and retried next tick.
fn spawn_graph_sync_retry_sweep(state: &ApiState) {
    let db = state.db.clone();
    let openai_client = state.openai_client.clone();
    let max_retries = state.config.graph_sync_max_retries;
    let interval = std::time::Duration::from_secs(state.config.graph_sync_retry_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match ingestion_pipeline::retry_pending_graph_syncs(&db, &openai_client, max_retries, 50).await {
                Ok(synced) if synced > 0 => info!(synced, "graph sync retry sweep completed"),
                Ok(_) => {}
                Err(err) => error!(error = %err, "graph sync retry sweep failed"),
            }
        }
    });
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    config.validate()?;

    let storage = StorageManager::new(&config).await?;
    let api_state = ApiState::new(&config, storage).await?;
    spawn_graph_sync_retry_sweep(&api_state);

    let app: Router = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use common::{
        storage::types::system_settings::SystemSettings,
        utils::config::{AppConfig, StorageKind},
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    fn smoke_test_config(namespace: &str, database: &str, data_dir: &Path) -> AppConfig {
        AppConfig {
            openai_api_key: "test-key".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: namespace.into(),
            surrealdb_database: database.into(),
            data_dir: data_dir.to_string_lossy().into_owned(),
            http_port: 0,
            storage: StorageKind::Local,
            ..Default::default()
        }
    }

    async fn build_test_app() -> (Router, std::path::PathBuf) {
        let namespace = "test_ns";
        let database = format!("test_db_{}", Uuid::new_v4());
        let data_dir = std::env::temp_dir().join(format!("crate_smoke_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&data_dir).await.expect("create temp data dir");

        let config = smoke_test_config(namespace, &database, &data_dir);
        let storage = StorageManager::new(&config).await.expect("storage manager");
        let api_state = ApiState::new(&config, storage).await.expect("api state");

        let app: Router = Router::new().nest("/api/v1", api_routes_v1(&api_state)).with_state(api_state);

        (app, data_dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_startup_with_in_memory_surrealdb() {
        let (app, data_dir) = build_test_app().await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/live").body(Body::empty()).expect("request"))
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .oneshot(Request::builder().uri("/api/v1/ready").body(Body::empty()).expect("request"))
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);

        tokio::fs::remove_dir_all(&data_dir).await.ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn health_reports_healthy_against_in_memory_surrealdb() {
        let (app, data_dir) = build_test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).expect("request"))
            .await
            .expect("health response");
        assert_eq!(response.status(), StatusCode::OK);

        tokio::fs::remove_dir_all(&data_dir).await.ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unauthenticated_chat_is_rejected_when_auth_required() {
        let namespace = "test_ns_auth";
        let database = format!("test_db_{}", Uuid::new_v4());
        let data_dir = std::env::temp_dir().join(format!("crate_smoke_auth_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&data_dir).await.expect("create temp data dir");

        let mut config = smoke_test_config(namespace, &database, &data_dir);
        config.auth_required = true;
        config.jwt_secret = Some("x".repeat(40));

        let storage = StorageManager::new(&config).await.expect("storage manager");
        let api_state = ApiState::new(&config, storage).await.expect("api state");
        let _settings = SystemSettings::get_current(&api_state.db).await.expect("settings");

        let app: Router = Router::new().nest("/api/v1", api_routes_v1(&api_state)).with_state(api_state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":"hello"}"#))
                    .expect("chat request"),
            )
            .await
            .expect("chat response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        tokio::fs::remove_dir_all(&data_dir).await.ok();
    }
}
