use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document::Document, segment::Segment},
    },
    utils::embedding::Embedder,
};
use tracing::error;

use crate::{
    chunking::Chunk, connectors::FetchedDocument, diff::ChunkDiff, parsing::ParsedDocument,
};

use super::config::IngestionConfig;

/// Per-document scratch state threaded through the pipeline's stage
/// functions. Each stage reads what it needs via `take_*`/accessor methods
/// and stores its own output back onto the context before returning the
/// advanced state machine.
pub struct PipelineContext<'a> {
    pub source_type: String,
    pub source_id: String,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub embedder: &'a Embedder,
    pub openai_client: &'a Client<OpenAIConfig>,

    fetched: Option<FetchedDocument>,
    new_hash: Option<String>,
    existing_document: Option<Document>,
    parsed: Option<ParsedDocument>,
    chunks: Option<Vec<Chunk>>,
    diff: Option<ChunkDiff>,
    diff_counts: Option<(usize, usize, usize)>,
    embedded_segments: Option<Vec<Segment>>,
    document_id: Option<String>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        source_type: String,
        source_id: String,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        embedder: &'a Embedder,
        openai_client: &'a Client<OpenAIConfig>,
    ) -> Self {
        Self {
            source_type,
            source_id,
            db,
            pipeline_config,
            embedder,
            openai_client,
            fetched: None,
            new_hash: None,
            existing_document: None,
            parsed: None,
            chunks: None,
            diff: None,
            diff_counts: None,
            embedded_segments: None,
            document_id: None,
        }
    }

    pub fn set_fetched(&mut self, fetched: FetchedDocument, new_hash: String) {
        self.fetched = Some(fetched);
        self.new_hash = Some(new_hash);
    }

    pub fn fetched(&self) -> Result<&FetchedDocument, AppError> {
        self.fetched
            .as_ref()
            .ok_or_else(|| AppError::Internal("fetched document expected to be available".into()))
    }

    pub fn new_hash(&self) -> Result<&str, AppError> {
        self.new_hash
            .as_deref()
            .ok_or_else(|| AppError::Internal("content hash expected to be available".into()))
    }

    pub fn set_existing_document(&mut self, document: Option<Document>) {
        self.existing_document = document;
    }

    pub fn existing_document(&self) -> Option<&Document> {
        self.existing_document.as_ref()
    }

    pub fn set_parsed(&mut self, parsed: ParsedDocument) {
        self.parsed = Some(parsed);
    }

    pub fn take_parsed(&mut self) -> Result<ParsedDocument, AppError> {
        self.parsed
            .take()
            .ok_or_else(|| AppError::Internal("parsed document expected to be available".into()))
    }

    pub fn set_chunks(&mut self, chunks: Vec<Chunk>) {
        self.chunks = Some(chunks);
    }

    pub fn take_chunks(&mut self) -> Result<Vec<Chunk>, AppError> {
        self.chunks
            .take()
            .ok_or_else(|| AppError::Internal("chunks expected to be available".into()))
    }

    pub fn set_diff(&mut self, diff: ChunkDiff) {
        self.diff = Some(diff);
    }

    pub fn take_diff(&mut self) -> Result<ChunkDiff, AppError> {
        self.diff
            .take()
            .ok_or_else(|| AppError::Internal("chunk diff expected to be available".into()))
    }

    /// Records `(added, removed, unchanged)` chunk counts for the diff, for
    /// later use in the sync log and the pipeline's reported outcome -- kept
    /// separate from `diff` itself since `take_diff` consumes the struct.
    pub fn set_diff_counts(&mut self, counts: (usize, usize, usize)) {
        self.diff_counts = Some(counts);
    }

    pub fn diff_counts(&self) -> Option<(usize, usize, usize)> {
        self.diff_counts
    }

    pub fn set_embedded_segments(&mut self, segments: Vec<Segment>) {
        self.embedded_segments = Some(segments);
    }

    pub fn take_embedded_segments(&mut self) -> Result<Vec<Segment>, AppError> {
        self.embedded_segments
            .take()
            .ok_or_else(|| AppError::Internal("embedded segments expected to be available".into()))
    }

    pub fn set_document_id(&mut self, id: String) {
        self.document_id = Some(id);
    }

    pub fn document_id(&self) -> Result<&str, AppError> {
        self.document_id
            .as_deref()
            .ok_or_else(|| AppError::Internal("document id expected to be available".into()))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            source_type = %self.source_type,
            source_id = %self.source_id,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
