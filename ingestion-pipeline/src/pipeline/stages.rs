use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::types::{
        document::Document, extracted_entity::ExtractedEntity, segment::Segment, sync_log::SyncLog,
        system_settings::SystemSettings,
    },
    utils::fingerprint::hash_bytes,
};
use serde_json::json;
use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use crate::{
    chunking::Chunker, connectors::Connector, diff::diff_chunks, entity_extraction, parsing::parse_document,
};

use super::{
    context::PipelineContext,
    state::{
        Chunked, Committed, Diffed, Embedded, EntitiesExtracted, Fetched, GraphSynced, HashChecked,
        Indexed, IngestionMachine, Parsed, Ready, Skipped,
    },
};

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::Internal(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}

#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn fetch(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
    connector: &dyn Connector,
) -> Result<IngestionMachine<(), Fetched>, AppError> {
    let fetched = connector
        .fetch(&ctx.source_id)
        .await
        .map_err(|err| AppError::Internal(format!("connector fetch failed: {err}")))?;
    let new_hash = hash_bytes(&fetched.content);
    ctx.set_fetched(fetched, new_hash);

    machine
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))
}

#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn check_hash(
    machine: IngestionMachine<(), Fetched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), HashChecked>, AppError> {
    let existing = Document::find_by_source(&ctx.source_type, &ctx.source_id, ctx.db).await?;
    ctx.set_existing_document(existing);

    machine
        .check_hash()
        .map_err(|(_, guard)| map_guard_error("check_hash", &guard))
}

/// True when the fetched content hash matches the stored document's --
/// driving a `HashChecked -> Skipped` transition rather than re-parsing and
/// re-embedding content that hasn't changed since the last sync.
pub fn is_unchanged(ctx: &PipelineContext<'_>) -> Result<bool, AppError> {
    let new_hash = ctx.new_hash()?;
    Ok(ctx
        .existing_document()
        .and_then(|doc| doc.content_hash.as_deref())
        .is_some_and(|hash| hash == new_hash))
}

pub fn skip(
    machine: IngestionMachine<(), HashChecked>,
) -> Result<IngestionMachine<(), Skipped>, AppError> {
    machine
        .skip()
        .map_err(|(_, guard)| map_guard_error("skip", &guard))
}

#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn parse(
    machine: IngestionMachine<(), HashChecked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Parsed>, AppError> {
    let fetched = ctx.fetched()?;
    let parsed = parse_document(
        &fetched.content,
        &fetched.content_type,
        ctx.openai_client,
        &ctx.pipeline_config.pdf_ingest_mode,
        &ctx.pipeline_config.vision_model,
    )
    .await?;
    ctx.set_parsed(parsed);

    machine
        .parse()
        .map_err(|(_, guard)| map_guard_error("parse", &guard))
}

#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn chunk(
    machine: IngestionMachine<(), Parsed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let parsed = ctx.take_parsed()?;
    let tuning = &ctx.pipeline_config.tuning;
    let chunker = Chunker::new(tuning.chunk_min_tokens, tuning.chunk_max_tokens);
    let chunks = chunker.chunk(&parsed)?;
    debug!(chunk_count = chunks.len(), "document chunked");
    ctx.set_chunks(chunks);

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn diff(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Diffed>, AppError> {
    let fetched = ctx.fetched()?;
    let document = match ctx.existing_document() {
        Some(existing) => {
            let mut updated = existing.clone();
            updated.title = fetched.title.clone();
            updated.source_url = fetched.source_url.clone();
            updated.owner = fetched.owner.clone();
            updated
        }
        None => Document::new(
            ctx.source_type.clone(),
            ctx.source_id.clone(),
            fetched.source_url.clone(),
            fetched.title.clone(),
            fetched.owner.clone(),
            None,
        ),
    };
    let document = Document::upsert(document, ctx.db).await?;
    ctx.set_document_id(document.id.clone());

    let existing_segments = Segment::list_by_document(&document.id, ctx.db).await?;
    let chunks = ctx.take_chunks()?;
    let chunk_diff = diff_chunks(&existing_segments, chunks);
    let counts = (
        chunk_diff.added.len(),
        chunk_diff.removed.len(),
        chunk_diff.unchanged.len(),
    );
    debug!(
        added = counts.0,
        removed = counts.1,
        unchanged = counts.2,
        "chunk diff computed"
    );
    ctx.set_diff_counts(counts);
    ctx.set_diff(chunk_diff);

    machine
        .diff()
        .map_err(|(_, guard)| map_guard_error("diff", &guard))
}

#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn embed(
    machine: IngestionMachine<(), Diffed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let chunk_diff = ctx.take_diff()?;
    let settings = SystemSettings::get_current(ctx.db).await?;

    let texts: Vec<String> = chunk_diff
        .added
        .iter()
        .map(|added| added.content.clone())
        .collect();
    let embeddings = if texts.is_empty() {
        Vec::new()
    } else {
        ctx.embedder
            .embed_batch(&texts, &settings.embedding_model, settings.embedding_dimensions)
            .await?
    };

    let document_id = ctx.document_id()?.to_string();
    let mut segments = Vec::with_capacity(chunk_diff.added.len() + chunk_diff.unchanged.len());
    for (added, embedding) in chunk_diff.added.into_iter().zip(embeddings) {
        let mut segment = Segment::new(
            document_id.clone(),
            added.content,
            added.content_hash,
            added.segment_type,
            added.section_path,
            added.position,
            json!({}),
        );
        segment.embedding = Some(embedding);
        segments.push(segment);
    }
    for carried in chunk_diff.unchanged {
        let mut segment = carried.previous;
        segment.position = carried.chunk.position;
        segments.push(segment);
    }
    segments.sort_by_key(|segment| segment.position);

    ctx.set_embedded_segments(segments);

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn commit(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Committed>, AppError> {
    let segments = ctx.take_embedded_segments()?;
    let document_id = ctx.document_id()?.to_string();
    let written = Segment::replace_for_document(&document_id, segments, ctx.db).await?;

    let new_hash = ctx.new_hash()?.to_string();
    Document::mark_synced(&document_id, &new_hash, ctx.db).await?;

    let (added, removed, unchanged) = ctx.diff_counts().unwrap_or((0, 0, 0));
    SyncLog::record(
        SyncLog::new(
            Some(document_id),
            "synced".into(),
            Some(written as i64),
            json!({ "added": added, "removed": removed, "unchanged": unchanged }),
        ),
        ctx.db,
    )
    .await?;

    machine
        .commit()
        .map_err(|(_, guard)| map_guard_error("commit", &guard))
}

/// A no-op transition: SurrealDB's unified store means writing the segment
/// row in `commit` already updated the HNSW/BM25 indexes, so there is no
/// separate index write to perform here. The state exists because spec.md's
/// step list names it explicitly.
pub fn index(
    machine: IngestionMachine<(), Committed>,
) -> Result<IngestionMachine<(), Indexed>, AppError> {
    machine
        .index()
        .map_err(|(_, guard)| map_guard_error("index", &guard))
}

#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn sync_graph(
    machine: IngestionMachine<(), Indexed>,
    ctx: &mut PipelineContext<'_>,
    openai_client: &Client<OpenAIConfig>,
) -> Result<IngestionMachine<(), GraphSynced>, AppError> {
    if ctx.pipeline_config.graph_context_enabled {
        let document_id = ctx.document_id()?.to_string();
        match run_graph_sync(ctx.db, &document_id, openai_client).await {
            Ok(()) => {
                Document::mark_graph_synced(&document_id, ctx.db).await?;
            }
            Err(err) => {
                warn!(
                    document_id = %document_id,
                    error = %err,
                    "best-effort graph sync failed, will retry on next ingest"
                );
                Document::mark_graph_sync_failed(&document_id, ctx.db).await?;
            }
        }
    }

    machine
        .sync_graph()
        .map_err(|(_, guard)| map_guard_error("sync_graph", &guard))
}

async fn run_graph_sync(
    db: &common::storage::db::SurrealDbClient,
    document_id: &str,
    openai_client: &Client<OpenAIConfig>,
) -> Result<(), AppError> {
    let segments = Segment::list_by_document(document_id, db).await?;
    for segment in segments {
        retrieval_pipeline::graph::add_episode(
            &segment.id,
            &segment.content,
            segment.created_at,
            None,
            document_id,
            &[],
            openai_client,
            db,
        )
        .await?;
    }
    Ok(())
}

/// Re-attempts best-effort graph sync for documents that previously failed
/// and haven't exhausted `max_retries`, driven by a periodic background
/// sweep rather than the per-document ingest path. Returns how many
/// documents were successfully synced this pass.
#[instrument(skip_all)]
pub async fn retry_pending_graph_syncs(
    db: &common::storage::db::SurrealDbClient,
    openai_client: &Client<OpenAIConfig>,
    max_retries: i64,
    limit: usize,
) -> Result<usize, AppError> {
    let candidates = Document::list_graph_sync_retry_candidates(max_retries, limit, db).await?;
    let mut synced = 0;
    for document in candidates {
        match run_graph_sync(db, &document.id, openai_client).await {
            Ok(()) => {
                Document::mark_graph_synced(&document.id, db).await?;
                synced += 1;
            }
            Err(err) => {
                warn!(
                    document_id = %document.id,
                    error = %err,
                    "graph sync retry sweep failed again"
                );
                Document::mark_graph_sync_failed(&document.id, db).await?;
            }
        }
    }
    Ok(synced)
}

/// Best-effort structured-entity extraction over a document's committed
/// segments -- mirrors `sync_graph`'s failure handling (log + move on,
/// never abort the pipeline) since a document with no extractable business
/// entities is the common case, not an error.
#[instrument(skip_all, fields(source_type = %ctx.source_type, source_id = %ctx.source_id))]
pub async fn extract_entities(
    machine: IngestionMachine<(), GraphSynced>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), EntitiesExtracted>, AppError> {
    if ctx.pipeline_config.entity_extraction_enabled {
        let document_id = ctx.document_id()?.to_string();
        if let Err(err) = run_entity_extraction(ctx, &document_id).await {
            warn!(
                document_id = %document_id,
                error = %err,
                "best-effort entity extraction failed, will retry on next ingest"
            );
        }
    }

    machine
        .extract_entities()
        .map_err(|(_, guard)| map_guard_error("extract_entities", &guard))
}

async fn run_entity_extraction(ctx: &PipelineContext<'_>, document_id: &str) -> Result<(), AppError> {
    let settings = SystemSettings::get_current(ctx.db).await?;
    let segments = Segment::list_by_document(document_id, ctx.db).await?;

    ExtractedEntity::delete_by_document_id(document_id, ctx.db).await?;

    for segment in segments {
        let extracted = entity_extraction::extract_from_text(ctx.openai_client, &settings.agent_model, &segment.content).await?;
        for raw in extracted {
            let entity = ExtractedEntity::new(
                document_id.to_string(),
                Some(segment.id.clone()),
                raw.entity_type,
                raw.entity_data,
                raw.confidence,
                entity_extraction::source_text_preview(&segment.content),
            );
            ctx.db.store_item(entity).await?;
        }
    }
    Ok(())
}
