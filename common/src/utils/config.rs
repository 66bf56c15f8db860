use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Known-insecure JWT secrets rejected outright when `auth_required` is set.
const JWT_SECRET_DENYLIST: &[&str] = &[
    "secret",
    "changeme",
    "your-256-bit-secret",
    "supersecretkey",
    "insecure",
];

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Controls whether `PdfParser` may fall back to rendering pages and
/// transcribing them with a vision-capable model when the embedded text
/// layer is missing or low quality.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PdfIngestMode {
    /// Only ever use the embedded text layer; fail rather than call a vision model.
    Classic,
    /// Fall back to vision-model transcription when the text layer looks unusable.
    LlmFirst,
}

fn default_pdf_ingest_mode() -> PdfIngestMode {
    PdfIngestMode::LlmFirst
}

fn default_vision_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Immutable settings constructed once at startup from the environment. Every
/// field here is either validated at construction time or carries a default
/// safe enough to run with out of the box.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    /// Governs `PdfParser`'s vision-model fallback.
    #[serde(default = "default_pdf_ingest_mode")]
    pub pdf_ingest_mode: PdfIngestMode,
    /// Vision-capable model used for PDF-page and image transcription.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Filesystem prefix every folder-ingest path must resolve under.
    #[serde(default = "default_ingest_root")]
    pub ingest_root: String,
    #[serde(default = "default_chunk_size_tokens")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: u32,
    #[serde(default = "default_rank_constant")]
    pub rank_constant: u32,
    #[serde(default)]
    pub rerank_enabled: bool,
    pub reranking_pool_size: Option<usize>,
    pub fastembed_cache_dir: Option<String>,
    pub fastembed_show_download_progress: Option<bool>,
    pub fastembed_max_length: Option<usize>,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default)]
    pub auth_required: bool,
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub graph_context_enabled: bool,
    #[serde(default = "default_cache_search_ttl_secs")]
    pub cache_search_ttl_secs: u64,
    #[serde(default = "default_cache_session_ttl_secs")]
    pub cache_session_ttl_secs: u64,

    /// How many best-effort graph-sync attempts a document gets before the
    /// retry sweep gives up on it.
    #[serde(default = "default_graph_sync_max_retries")]
    pub graph_sync_max_retries: i64,
    /// How often the background sweep re-attempts documents whose graph
    /// sync previously failed.
    #[serde(default = "default_graph_sync_retry_interval_secs")]
    pub graph_sync_retry_interval_secs: u64,

    /// Governs whether ingestion runs a post-commit entity-extraction pass.
    #[serde(default)]
    pub entity_extraction_enabled: bool,

    /// Directory of tabular files (CSV/Parquet/JSON) registered into the SQL sandbox at startup.
    #[serde(default = "default_sql_sandbox_dir")]
    pub sql_sandbox_dir: String,

    #[serde(default = "default_ingest_max_files")]
    pub ingest_max_files: usize,
    #[serde(default = "default_ingest_max_content_bytes")]
    pub ingest_max_content_bytes: usize,
    #[serde(default = "default_ingest_max_context_bytes")]
    pub ingest_max_context_bytes: usize,
    #[serde(default = "default_ingest_max_category_bytes")]
    pub ingest_max_category_bytes: usize,
    #[serde(default = "default_ingest_max_body_bytes")]
    pub ingest_max_body_bytes: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ingest_root() -> String {
    "./data/ingest".to_string()
}

fn default_chunk_size_tokens() -> usize {
    512
}

fn default_embedding_dims() -> u32 {
    1536
}

fn default_rank_constant() -> u32 {
    60
}

fn default_max_rows() -> usize {
    10_000
}

fn default_cache_search_ttl_secs() -> u64 {
    60
}

fn default_cache_session_ttl_secs() -> u64 {
    3600
}

fn default_graph_sync_max_retries() -> i64 {
    5
}

fn default_graph_sync_retry_interval_secs() -> u64 {
    300
}

fn default_sql_sandbox_dir() -> String {
    "./data/tables".to_string()
}

fn default_ingest_max_files() -> usize {
    10_000
}

fn default_ingest_max_content_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_ingest_max_context_bytes() -> usize {
    8 * 1024
}

fn default_ingest_max_category_bytes() -> usize {
    256
}

fn default_ingest_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("auth_required is set but jwt_secret is missing")]
    MissingJwtSecret,
    #[error("jwt_secret must be at least 32 characters")]
    JwtSecretTooShort,
    #[error("jwt_secret matches a known-insecure default value")]
    JwtSecretDenylisted,
    #[error("embedding_dims must be nonzero")]
    ZeroEmbeddingDims,
}

impl AppConfig {
    /// Fail-fast invariant checks run once at startup, never per-request.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.embedding_dims == 0 {
            return Err(ConfigValidationError::ZeroEmbeddingDims);
        }

        if self.auth_required {
            let secret = self
                .jwt_secret
                .as_deref()
                .ok_or(ConfigValidationError::MissingJwtSecret)?;

            if JWT_SECRET_DENYLIST
                .iter()
                .any(|denied| denied.eq_ignore_ascii_case(secret))
            {
                return Err(ConfigValidationError::JwtSecretDenylisted);
            }

            if secret.len() < 32 {
                return Err(ConfigValidationError::JwtSecretTooShort);
            }
        }

        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: "test-key".to_string(),
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            data_dir: default_data_dir(),
            http_port: 8080,
            openai_base_url: default_base_url(),
            storage: default_storage_kind(),
            pdf_ingest_mode: default_pdf_ingest_mode(),
            vision_model: default_vision_model(),
            ingest_root: default_ingest_root(),
            chunk_size_tokens: default_chunk_size_tokens(),
            embedding_dims: default_embedding_dims(),
            rank_constant: default_rank_constant(),
            rerank_enabled: false,
            reranking_pool_size: None,
            fastembed_cache_dir: None,
            fastembed_show_download_progress: None,
            fastembed_max_length: None,
            max_rows: default_max_rows(),
            auth_required: false,
            jwt_secret: None,
            graph_context_enabled: false,
            cache_search_ttl_secs: default_cache_search_ttl_secs(),
            cache_session_ttl_secs: default_cache_session_ttl_secs(),
            graph_sync_max_retries: default_graph_sync_max_retries(),
            graph_sync_retry_interval_secs: default_graph_sync_retry_interval_secs(),
            entity_extraction_enabled: false,
            sql_sandbox_dir: default_sql_sandbox_dir(),
            ingest_max_files: default_ingest_max_files(),
            ingest_max_content_bytes: default_ingest_max_content_bytes(),
            ingest_max_context_bytes: default_ingest_max_context_bytes(),
            ingest_max_category_bytes: default_ingest_max_category_bytes(),
            ingest_max_body_bytes: default_ingest_max_body_bytes(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_jwt_secret_when_required() {
        let config = AppConfig {
            auth_required: true,
            jwt_secret: None,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingJwtSecret)
        ));
    }

    #[test]
    fn validate_rejects_short_jwt_secret() {
        let config = AppConfig {
            auth_required: true,
            jwt_secret: Some("too-short".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::JwtSecretTooShort)
        ));
    }

    #[test]
    fn validate_rejects_denylisted_jwt_secret_even_if_long_enough() {
        let config = AppConfig {
            auth_required: true,
            jwt_secret: Some("your-256-bit-secret".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::JwtSecretDenylisted)
        ));
    }

    #[test]
    fn validate_accepts_strong_secret() {
        let config = AppConfig {
            auth_required: true,
            jwt_secret: Some("x".repeat(40)),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_embedding_dims() {
        let config = AppConfig {
            embedding_dims: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::ZeroEmbeddingDims)
        ));
    }
}
