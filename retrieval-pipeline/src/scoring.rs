use std::cmp::Ordering;
use std::collections::HashMap;

use common::storage::types::StoredObject;

/// Holds optional subscores gathered from different retrieval signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scores {
    pub fts: Option<f32>,
    pub vector: Option<f32>,
    pub graph: Option<f32>,
}

/// Generic wrapper combining an item with its accumulated retrieval scores.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub item: T,
    pub scores: Scores,
    pub fused: f32,
}

impl<T> Scored<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            scores: Scores::default(),
            fused: 0.0,
        }
    }

    pub const fn with_vector_score(mut self, score: f32) -> Self {
        self.scores.vector = Some(score);
        self
    }

    pub const fn with_fts_score(mut self, score: f32) -> Self {
        self.scores.fts = Some(score);
        self
    }

    pub const fn with_graph_score(mut self, score: f32) -> Self {
        self.scores.graph = Some(score);
        self
    }

    pub const fn update_fused(&mut self, fused: f32) {
        self.fused = fused;
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Reciprocal Rank Fusion: `score(d) = sum(1 / (rank_constant + rank(d)))` over
/// every ranked list `d` appears in, 1-based ranks. Per-list order is the only
/// input that matters -- raw scores across lexical/vector signals are not
/// comparable, so RRF fuses by rank instead of by magnitude.
pub fn reciprocal_rank_fusion(ranked_lists: &[Vec<String>], rank_constant: f64) -> HashMap<String, f64> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for list in ranked_lists {
        for (idx, id) in list.iter().enumerate() {
            let rank = (idx + 1) as f64;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (rank_constant + rank);
        }
    }
    scores
}

/// Merges fused RRF scores into `Scored<T>` and sorts by descending fused
/// score, tie-broken by ascending vector rank then item id, per the hybrid
/// retriever's determinism requirement.
pub fn apply_rrf<T>(
    mut candidates: HashMap<String, Scored<T>>,
    vector_ranked: &[String],
    fts_ranked: &[String],
    rank_constant: f64,
) -> Vec<Scored<T>>
where
    T: StoredObject,
{
    let fused = reciprocal_rank_fusion(&[vector_ranked.to_vec(), fts_ranked.to_vec()], rank_constant);
    let vector_rank: HashMap<&str, usize> = vector_ranked
        .iter()
        .enumerate()
        .map(|(idx, id)| (id.as_str(), idx))
        .collect();

    for (id, scored) in candidates.iter_mut() {
        scored.fused = fused.get(id).copied().unwrap_or(0.0) as f32;
    }

    let mut items: Vec<Scored<T>> = candidates.into_values().collect();
    items.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let rank_a = vector_rank.get(a.item.get_id()).copied().unwrap_or(usize::MAX);
                let rank_b = vector_rank.get(b.item.get_id()).copied().unwrap_or(usize::MAX);
                rank_a.cmp(&rank_b)
            })
            .then_with(|| a.item.get_id().cmp(b.item.get_id()))
    });
    items
}

pub fn merge_scored_by_id<T>(target: &mut HashMap<String, Scored<T>>, incoming: Vec<Scored<T>>)
where
    T: StoredObject + Clone,
{
    for scored in incoming {
        let id = scored.item.get_id().to_owned();
        target
            .entry(id)
            .and_modify(|existing| {
                if let Some(score) = scored.scores.vector {
                    existing.scores.vector = Some(score);
                }
                if let Some(score) = scored.scores.fts {
                    existing.scores.fts = Some(score);
                }
                if let Some(score) = scored.scores.graph {
                    existing.scores.graph = Some(score);
                }
            })
            .or_insert_with(|| Scored {
                item: scored.item.clone(),
                scores: scored.scores,
                fused: scored.fused,
            });
    }
}

pub fn sort_by_fused_desc<T>(items: &mut [Scored<T>])
where
    T: StoredObject,
{
    items.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.get_id().cmp(b.item.get_id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_favors_documents_ranked_well_in_both_lists() {
        let lexical = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let vector = vec!["C".to_string(), "B".to_string(), "D".to_string()];

        let scores = reciprocal_rank_fusion(&[vector, lexical], 60.0);

        let mut ranked: Vec<(&String, &f64)> = scores.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap());
        let order: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();

        assert_eq!(order, vec!["C", "B", "A", "D"]);
    }

    #[test]
    fn rrf_is_monotonic_in_rank() {
        let list = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let scores = reciprocal_rank_fusion(&[list], 60.0);
        assert!(scores["A"] > scores["B"]);
        assert!(scores["B"] > scores["C"]);
    }

    #[test]
    fn rrf_of_empty_lists_is_empty() {
        let scores = reciprocal_rank_fusion(&[], 60.0);
        assert!(scores.is_empty());
    }
}
