use std::num::NonZeroUsize;
use std::sync::Arc;

use async_openai::types::CreateEmbeddingRequestArgs;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, warn};

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::system_settings::SystemSettings},
    utils::fingerprint::hash_chunk,
};

/// Texts are submitted to the embedding provider in batches of at most this
/// many inputs per request.
const EMBED_BATCH_SIZE: usize = 64;
const RETRY_ATTEMPTS: usize = 3;
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Per-process cache of content-hash -> embedding vector, guarded for
/// concurrent access by callers sharing one `Embedder`.
pub struct EmbeddingCache {
    inner: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    async fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.inner.lock().await.get(key).cloned()
    }

    async fn put(&self, key: String, value: Vec<f32>) {
        self.inner.lock().await.put(key, value);
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// Wraps the OpenAI embeddings API with retry and an LRU cache keyed by
/// content hash, per §4.4/§5 ("embedder cache is per-process and guarded for
/// concurrent access").
#[derive(Clone)]
pub struct Embedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    cache: Arc<EmbeddingCache>,
}

impl Embedder {
    pub fn new(client: async_openai::Client<async_openai::config::OpenAIConfig>) -> Self {
        Self {
            client,
            cache: Arc::new(EmbeddingCache::default()),
        }
    }

    /// Embeds a single text, consulting the process-wide cache first.
    pub async fn embed(
        &self,
        input: &str,
        model: &str,
        dimensions: u32,
    ) -> Result<Vec<f32>, AppError> {
        let key = cache_key(input, model, dimensions);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let embedding = embed_with_retry(&self.client, &[input.to_string()], model, dimensions)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::TransientUpstream("no embedding data received".into()))?;

        self.cache.put(key, embedding.clone()).await;
        Ok(embedding)
    }

    /// Embeds many texts, batching requests at `EMBED_BATCH_SIZE` and
    /// skipping any input already present in the cache.
    pub async fn embed_batch(
        &self,
        inputs: &[String],
        model: &str,
        dimensions: u32,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(inputs.len());
        let mut misses: Vec<(usize, String)> = Vec::new();

        for (idx, input) in inputs.iter().enumerate() {
            let key = cache_key(input, model, dimensions);
            if let Some(cached) = self.cache.get(&key).await {
                results.push(Some(cached));
            } else {
                results.push(None);
                misses.push((idx, input.clone()));
            }
        }

        for chunk in misses.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            let embeddings = embed_with_retry(&self.client, &texts, model, dimensions).await?;

            for ((idx, text), embedding) in chunk.iter().zip(embeddings.into_iter()) {
                let key = cache_key(text, model, dimensions);
                self.cache.put(key, embedding.clone()).await;
                results[*idx] = Some(embedding);
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                value.ok_or_else(|| {
                    AppError::Internal(format!("missing embedding for input index {idx}"))
                })
            })
            .collect()
    }
}

fn cache_key(input: &str, model: &str, dimensions: u32) -> String {
    format!("{model}:{dimensions}:{}", hash_chunk(input))
}

async fn embed_with_retry(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    inputs: &[String],
    model: &str,
    dimensions: u32,
) -> Result<Vec<Vec<f32>>, AppError> {
    let strategy = ExponentialBackoff::from_millis(100)
        .max_delay(std::time::Duration::from_secs(5))
        .map(jitter)
        .take(RETRY_ATTEMPTS);

    Retry::spawn(strategy, || async {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .dimensions(dimensions)
            .input(inputs.to_vec())
            .build()?;

        let response = client.embeddings().create(request).await?;
        if response.data.is_empty() {
            warn!("embedding request returned no data");
        }
        Ok::<_, AppError>(
            response
                .data
                .into_iter()
                .map(|datum| datum.embedding)
                .collect(),
        )
    })
    .await
}

/// Generates an embedding using the model/dimensions configured in system settings.
pub async fn generate_embedding(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    db: &SurrealDbClient,
) -> Result<Vec<f32>, AppError> {
    let settings = SystemSettings::get_current(db).await?;
    let embedder = Embedder::new(client.clone());
    embedder
        .embed(input, &settings.embedding_model, settings.embedding_dimensions)
        .await
}

/// Generates an embedding using a specific model and dimension, bypassing
/// settings lookup -- used by the re-embedding maintenance path where the
/// target model/dims are already known.
pub async fn generate_embedding_with_params(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let embedding = embed_with_retry(client, &[input.to_string()], model, dimensions)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::TransientUpstream("no embedding data received".into()))?;

    debug!(dimensions = embedding.len(), "generated embedding");
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hits_avoid_recomputation() {
        let cache = EmbeddingCache::new(8);
        let key = cache_key("hello", "m", 4);
        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), vec![1.0, 2.0, 3.0, 4.0]).await;
        assert_eq!(cache.get(&key).await, Some(vec![1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn cache_key_is_stable_for_same_input() {
        assert_eq!(cache_key("a", "m", 8), cache_key("a", "m", 8));
    }

    #[test]
    fn cache_key_differs_across_models() {
        assert_ne!(cache_key("a", "m1", 8), cache_key("a", "m2", 8));
    }
}
