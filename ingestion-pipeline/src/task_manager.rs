use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingestion_task::IngestionTask},
    utils::{cache::Cache, embedding::Embedder},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::{
    connectors::Connector,
    pipeline::{IngestionConfig, IngestionOutcome, IngestionPipeline},
};

/// Runs a folder-level ingestion job to completion: lists the connector's
/// entries, ingests each one in turn, and keeps the `IngestionTask` row's
/// counters current so a caller polling `IngestionTask::get` (or subscribed
/// via `listen_for_updates`) sees live progress. Multiple tasks may run
/// concurrently against the same database -- each owns its own connector,
/// pipeline, and per-document transactions -- so this takes no global lock.
/// Intended to be driven from its own `tokio::spawn`'d task; swallows its
/// own errors into the task row rather than propagating them, since there is
/// no caller left awaiting a `Result` once the job has been handed off.
#[instrument(skip_all, fields(task_id = %task_id, folder_path = %folder_path))]
pub async fn run_task(
    task_id: String,
    folder_path: String,
    connector: Box<dyn Connector>,
    db: Arc<SurrealDbClient>,
    embedder: Arc<Embedder>,
    openai_client: Arc<Client<OpenAIConfig>>,
    pipeline_config: Arc<IngestionConfig>,
    search_cache: Option<Arc<dyn Cache<String> + Send + Sync>>,
    cancel: CancellationToken,
) {
    let result = run_task_inner(
        &task_id,
        connector.as_ref(),
        &db,
        &embedder,
        &openai_client,
        &pipeline_config,
        search_cache.as_deref(),
        &cancel,
    )
    .await;

    if let Err(err) = result {
        error!(error = %err, "ingestion task failed");
        if let Err(mark_err) = IngestionTask::fail(&task_id, err.to_string(), &db).await {
            error!(error = %mark_err, "failed to mark ingestion task as failed");
        }
    }
}

async fn run_task_inner(
    task_id: &str,
    connector: &dyn Connector,
    db: &SurrealDbClient,
    embedder: &Embedder,
    openai_client: &Client<OpenAIConfig>,
    pipeline_config: &IngestionConfig,
    search_cache: Option<&(dyn Cache<String> + Send + Sync)>,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let entries = connector
        .list()
        .await
        .map_err(|err| AppError::Internal(format!("failed to list connector entries: {err}")))?;

    IngestionTask::start(task_id, entries.len() as i64, db).await?;
    info!(total = entries.len(), "ingestion task started");

    let pipeline = IngestionPipeline::new(db, embedder, openai_client, pipeline_config, search_cache);

    for entry in entries {
        if cancel.is_cancelled() {
            warn!("ingestion task cancelled before completion");
            IngestionTask::cancel(task_id, db).await?;
            return Ok(());
        }

        let source_id = entry.source_id.clone();
        match pipeline.ingest_entry(connector, entry).await {
            Ok(IngestionOutcome::Ingested {
                document_id,
                added,
                removed,
                unchanged,
            }) => {
                IngestionTask::record_document_result(
                    task_id,
                    "succeeded",
                    json!({
                        "source_id": source_id,
                        "document_id": document_id,
                        "added": added,
                        "removed": removed,
                        "unchanged": unchanged,
                    }),
                    db,
                )
                .await?;
            }
            Ok(IngestionOutcome::Skipped { document_id }) => {
                IngestionTask::record_document_result(
                    task_id,
                    "skipped",
                    json!({ "source_id": source_id, "document_id": document_id }),
                    db,
                )
                .await?;
            }
            Err(err) => {
                warn!(source_id = %source_id, error = %err, "document ingestion failed");
                IngestionTask::record_document_result(
                    task_id,
                    "failed",
                    json!({ "source_id": source_id, "error": err.to_string() }),
                    db,
                )
                .await?;
            }
        }
    }

    IngestionTask::complete(task_id, db).await?;
    info!("ingestion task completed");
    Ok(())
}
