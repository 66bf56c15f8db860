use std::{collections::HashMap, sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use common::{
    error::AppError,
    sql_sandbox::SqlSandbox,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{
        cache::{Cache, TtlCache},
        config::AppConfig,
        embedding::Embedder,
    },
};
use ingestion_pipeline::IngestionConfig;
use retrieval_pipeline::{reranking::RerankerPool, HybridSearchConfig};

/// Cancellation handles for in-flight ingestion tasks, keyed by task id, so
/// the cancel endpoint can signal a task this process actually spawned.
pub type TaskCancellations = Arc<Mutex<HashMap<String, CancellationToken>>>;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub openai_client: Client<OpenAIConfig>,
    pub embedder: Arc<Embedder>,
    pub hybrid_config: Arc<HybridSearchConfig>,
    pub reranker_pool: Option<Arc<RerankerPool>>,
    pub sql_sandbox: Option<Arc<SqlSandbox>>,
    pub ingestion_config: Arc<IngestionConfig>,
    pub search_cache: Arc<dyn Cache<String> + Send + Sync>,
    pub session_cache: Arc<dyn Cache<String> + Send + Sync>,
    pub task_cancellations: TaskCancellations,
}

impl ApiState {
    pub async fn new(config: &AppConfig, storage: StorageManager) -> Result<Self, AppError> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        surreal_db_client.apply_migrations().await?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url);
        let openai_client = Client::with_config(openai_config);
        let embedder = Arc::new(Embedder::new(openai_client.clone()));

        let hybrid_config = Arc::new(HybridSearchConfig {
            rank_constant: f64::from(config.rank_constant),
            graph_context_enabled: config.graph_context_enabled,
            ..HybridSearchConfig::default()
        });

        let reranker_pool = RerankerPool::maybe_from_config(config)?;

        let sql_sandbox = Some(Arc::new(SqlSandbox::new(
            config.sql_sandbox_dir.clone(),
            config.max_rows,
        )));

        let ingestion_config = Arc::new(IngestionConfig {
            graph_context_enabled: config.graph_context_enabled,
            pdf_ingest_mode: config.pdf_ingest_mode.clone(),
            vision_model: config.vision_model.clone(),
            entity_extraction_enabled: config.entity_extraction_enabled,
            ..IngestionConfig::default()
        });

        let search_cache: Arc<dyn Cache<String> + Send + Sync> = Arc::new(TtlCache::<String>::new(
            Duration::from_secs(config.cache_search_ttl_secs),
            10_000,
        ));
        let session_cache: Arc<dyn Cache<String> + Send + Sync> = Arc::new(TtlCache::<String>::new(
            Duration::from_secs(config.cache_session_ttl_secs),
            10_000,
        ));

        Ok(Self {
            db: surreal_db_client,
            config: config.clone(),
            storage,
            openai_client,
            embedder,
            hybrid_config,
            reranker_pool,
            sql_sandbox,
            ingestion_config,
            search_cache,
            session_cache,
            task_cancellations: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}
