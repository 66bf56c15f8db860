use std::collections::{HashMap, HashSet};

use async_openai::{config::OpenAIConfig, Client};
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{graph_edge::GraphEdge, graph_entity::GraphEntity},
    },
};
use tracing::debug;
use uuid::Uuid;

use crate::extraction;

/// Entities whose `source_document_id` matches the given document -- the
/// graph-expansion stage's seed set for a retrieved segment.
pub async fn entities_mentioned_in_document(
    document_id: &str,
    db: &SurrealDbClient,
) -> Result<Vec<GraphEntity>, AppError> {
    let entities: Vec<GraphEntity> = db
        .client
        .query("SELECT * FROM graph_entity WHERE source_document_id = $document_id")
        .bind(("document_id", document_id.to_owned()))
        .await?
        .take(0)?;
    Ok(entities)
}

/// Augments a set of seed entities with their currently-valid graph neighbors,
/// one hop out, per §4.13's optional graph-expansion stage. Deduplicates
/// against the seed set and caps the total neighbor count returned.
pub async fn expand_context(
    seed_entity_ids: &[String],
    neighbor_limit: usize,
    db: &SurrealDbClient,
) -> Result<Vec<GraphEntity>, AppError> {
    let seen: HashSet<&str> = seed_entity_ids.iter().map(String::as_str).collect();
    let mut neighbor_ids: Vec<String> = Vec::new();
    let mut visited: HashSet<String> = seen.iter().map(|s| (*s).to_owned()).collect();

    for seed_id in seed_entity_ids {
        let edges = GraphEdge::neighborhood(seed_id, db).await?;
        for edge in edges {
            let neighbor_id = if edge.source_entity_id == *seed_id {
                edge.target_entity_id
            } else {
                edge.source_entity_id
            };
            if visited.insert(neighbor_id.clone()) {
                neighbor_ids.push(neighbor_id);
            }
            if neighbor_ids.len() >= neighbor_limit {
                break;
            }
        }
        if neighbor_ids.len() >= neighbor_limit {
            break;
        }
    }

    let mut neighbors = Vec::with_capacity(neighbor_ids.len());
    for id in neighbor_ids {
        if let Some(entity) = db.get_item::<GraphEntity>(&id).await? {
            neighbors.push(entity);
        }
    }
    Ok(neighbors)
}

/// Full bi-temporal edge history for an entity (the `get_change_history`
/// agent tool's graph-side counterpart, `§4.14.1`).
pub async fn entity_relationship_history(
    entity_id: &str,
    db: &SurrealDbClient,
) -> Result<Vec<GraphEdge>, AppError> {
    GraphEdge::entity_history(entity_id, db).await
}

/// Outcome of mining one episode's worth of text into the graph: the minted
/// episode id, every entity touched (new or merged-by-name), and the edges
/// created for it.
#[derive(Debug, Clone)]
pub struct EpisodeResult {
    pub episode_id: String,
    pub entities: Vec<GraphEntity>,
    pub edges: Vec<GraphEdge>,
}

/// Runs LLM-backed entity/relationship extraction over a chunk's text and
/// folds the result into the graph: entities are upserted by name so the
/// same person or org mentioned across documents converges onto one row,
/// and edges are tagged with a fresh episode id so a later re-ingestion can
/// retract exactly this episode's facts via `remove_episode` without
/// touching facts contributed by other episodes.
pub async fn add_episode(
    chunk_id: &str,
    text: &str,
    reference_time: DateTime<Utc>,
    group_id: Option<&str>,
    source_document_id: &str,
    entity_types: &[String],
    openai_client: &Client<OpenAIConfig>,
    db: &SurrealDbClient,
) -> Result<EpisodeResult, AppError> {
    let episode_id = Uuid::new_v4().to_string();
    debug!(chunk_id, group_id, episode_id = %episode_id, "mining episode for graph entities");

    let extraction = extraction::extract_entities(openai_client, text, entity_types).await?;

    let mut by_name: HashMap<String, GraphEntity> = HashMap::new();
    for extracted in extraction.entities {
        let entity = GraphEntity::new(
            extracted.name.clone(),
            extracted.entity_type,
            Some(extracted.description),
            Some(source_document_id.to_string()),
        );
        let stored = GraphEntity::upsert_by_name(entity, db).await?;
        by_name.insert(extracted.name, stored);
    }

    let mut edges = Vec::with_capacity(extraction.relations.len());
    for relation in extraction.relations {
        let (Some(source), Some(target)) =
            (by_name.get(&relation.source), by_name.get(&relation.target))
        else {
            debug!(
                source = %relation.source,
                target = %relation.target,
                "skipping relation referencing an entity the extraction step didn't return"
            );
            continue;
        };

        let mut edge = GraphEdge::with_episode(
            source.id.clone(),
            target.id.clone(),
            relation.relationship,
            Some(relation.fact),
            Some(source_document_id.to_string()),
            Some(episode_id.clone()),
        );
        edge.valid_at = reference_time;
        edges.push(GraphEdge::add_episode(edge, db).await?);
    }

    Ok(EpisodeResult {
        episode_id,
        entities: by_name.into_values().collect(),
        edges,
    })
}

/// Retracts every edge an episode contributed, without deleting the
/// entities it touched -- they may still be referenced by other episodes.
pub async fn remove_episode(episode_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
    GraphEdge::invalidate_by_episode(episode_id, db).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::StoredObject;
    use uuid::Uuid;

    #[tokio::test]
    async fn expand_context_follows_one_hop_and_dedupes_seeds() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let central = GraphEntity::new("Acme".into(), "organization".into(), None, None);
        let central = db.store_item(central).await.unwrap();
        let neighbor = GraphEntity::new("Alice".into(), "person".into(), None, None);
        let neighbor = db.store_item(neighbor).await.unwrap();

        let edge = GraphEdge::new(
            central.id.clone(),
            neighbor.id.clone(),
            "employs".into(),
            Some("Acme employs Alice".into()),
            None,
        );
        GraphEdge::add_episode(edge, &db).await.unwrap();

        let expanded = expand_context(&[central.id.clone()], 10, &db).await.unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].id, neighbor.id);
    }

    #[tokio::test]
    async fn entity_relationship_history_includes_invalidated_edges() {
        let db = SurrealDbClient::memory("test", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();

        let edge = GraphEdge::new("a".into(), "b".into(), "works_at".into(), None, None);
        let stored = GraphEdge::add_episode(edge, &db).await.unwrap();
        GraphEdge::invalidate(&stored.id, &db).await.unwrap();

        let history = entity_relationship_history("a", &db).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].invalid_at.is_some());
    }
}
