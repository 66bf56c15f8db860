#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub chunk_min_tokens: usize,
    pub chunk_max_tokens: usize,
    pub graph_store_attempts: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            chunk_min_tokens: 500,
            chunk_max_tokens: 2_000,
            graph_store_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    pub graph_context_enabled: bool,
    /// Governs whether the PDF parser may fall back to vision-model transcription.
    pub pdf_ingest_mode: PdfIngestMode,
    /// Vision-capable model used for PDF-page and image transcription.
    pub vision_model: String,
    /// Governs whether ingestion runs a best-effort structured-entity
    /// extraction pass over each document's segments after commit.
    pub entity_extraction_enabled: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            graph_context_enabled: false,
            pdf_ingest_mode: PdfIngestMode::LlmFirst,
            vision_model: "gpt-4o-mini".to_string(),
            entity_extraction_enabled: false,
        }
    }
}

pub use common::utils::config::PdfIngestMode;
