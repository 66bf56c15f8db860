pub mod config;
pub mod context;
mod stages;
pub mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use stages::retry_pending_graph_syncs;

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{cache::Cache, embedding::Embedder},
};
use tracing::{info, instrument};

use crate::connectors::{Connector, ConnectorEntry};

use self::{context::PipelineContext, state::ready};

/// Outcome of driving one connector entry through the ingestion pipeline.
#[derive(Debug, Clone)]
pub enum IngestionOutcome {
    Ingested {
        document_id: String,
        added: usize,
        removed: usize,
        unchanged: usize,
    },
    Skipped {
        document_id: String,
    },
}

/// Drives a single document through the 12-step ingestion state machine.
/// Stateless across calls -- every field is a borrow, so one instance can be
/// shared across concurrently ingested documents within a task.
pub struct IngestionPipeline<'a> {
    db: &'a SurrealDbClient,
    embedder: &'a Embedder,
    openai_client: &'a Client<OpenAIConfig>,
    pipeline_config: &'a IngestionConfig,
    search_cache: Option<&'a (dyn Cache<String> + Send + Sync)>,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(
        db: &'a SurrealDbClient,
        embedder: &'a Embedder,
        openai_client: &'a Client<OpenAIConfig>,
        pipeline_config: &'a IngestionConfig,
        search_cache: Option<&'a (dyn Cache<String> + Send + Sync)>,
    ) -> Self {
        Self {
            db,
            embedder,
            openai_client,
            pipeline_config,
            search_cache,
        }
    }

    #[instrument(skip_all, fields(source_type = %connector.source_type(), source_id = %entry.source_id))]
    pub async fn ingest_entry(
        &self,
        connector: &dyn Connector,
        entry: ConnectorEntry,
    ) -> Result<IngestionOutcome, AppError> {
        let mut ctx = PipelineContext::new(
            connector.source_type().to_string(),
            entry.source_id,
            self.db,
            self.pipeline_config,
            self.embedder,
            self.openai_client,
        );

        let machine = ready();
        let machine = stages::fetch(machine, &mut ctx, connector)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = stages::check_hash(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        if stages::is_unchanged(&ctx).map_err(|err| ctx.abort(err))? {
            stages::skip(machine).map_err(|err| ctx.abort(err))?;
            let document_id = ctx
                .existing_document()
                .expect("is_unchanged only returns true when an existing document was found")
                .id
                .clone();
            info!(document_id = %document_id, "document unchanged since last sync, skipping");
            return Ok(IngestionOutcome::Skipped { document_id });
        }

        let machine = stages::parse(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = stages::chunk(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = stages::diff(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = stages::embed(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = stages::commit(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = stages::index(machine).map_err(|err| ctx.abort(err))?;
        let machine = stages::sync_graph(machine, &mut ctx, self.openai_client)
            .await
            .map_err(|err| ctx.abort(err))?;
        let _machine = stages::extract_entities(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        if let Some(cache) = self.search_cache {
            cache.invalidate_all().await;
        }

        let (added, removed, unchanged) = ctx.diff_counts().unwrap_or((0, 0, 0));
        let document_id = ctx.document_id().map_err(|err| ctx.abort(err))?.to_string();
        info!(
            document_id = %document_id,
            added,
            removed,
            unchanged,
            "ingestion pipeline finished"
        );

        Ok(IngestionOutcome::Ingested {
            document_id,
            added,
            removed,
            unchanged,
        })
    }
}
