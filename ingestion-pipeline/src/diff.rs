use std::collections::HashMap;

use common::storage::types::segment::Segment;

use crate::chunking::Chunk;

/// A new chunk paired with the previous segment it replaces in place, when
/// an unchanged-hash match exists -- lets the rel store carry forward the
/// old `id`/`metadata` instead of minting a new row.
#[derive(Debug, Clone)]
pub struct CarriedChunk {
    pub chunk: Chunk,
    pub previous: Segment,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkDiff {
    pub added: Vec<Chunk>,
    pub removed: Vec<Segment>,
    pub unchanged: Vec<CarriedChunk>,
}

/// Diffs a document's previously stored segments against the chunker's
/// fresh output, keyed on `content_hash`. Ordering of `added`/`unchanged`
/// follows the new chunk list; `removed` follows the old segment list.
pub fn diff_chunks(existing: &[Segment], chunks: Vec<Chunk>) -> ChunkDiff {
    let mut by_hash: HashMap<&str, &Segment> = HashMap::new();
    for segment in existing {
        by_hash.insert(segment.content_hash.as_str(), segment);
    }

    let mut matched_hashes: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut added = Vec::new();
    let mut unchanged = Vec::new();

    for chunk in chunks {
        if let Some(previous) = by_hash.get(chunk.content_hash.as_str()) {
            matched_hashes.insert(chunk.content_hash.as_str());
            unchanged.push(CarriedChunk {
                chunk,
                previous: (*previous).clone(),
            });
        } else {
            added.push(chunk);
        }
    }

    let removed = existing
        .iter()
        .filter(|segment| !matched_hashes.contains(segment.content_hash.as_str()))
        .cloned()
        .collect();

    ChunkDiff {
        added,
        removed,
        unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use uuid::Uuid;

    fn segment(doc_id: &str, hash: &str, position: i64) -> Segment {
        Segment::new(
            doc_id.to_string(),
            format!("content-{hash}"),
            hash.to_string(),
            "text".to_string(),
            None,
            position,
            Value::Object(Default::default()),
        )
    }

    fn chunk(hash: &str, position: i64) -> Chunk {
        Chunk {
            content: format!("content-{hash}"),
            content_hash: hash.to_string(),
            section_path: None,
            segment_type: "text".to_string(),
            position,
        }
    }

    #[test]
    fn diff_partitions_added_removed_and_unchanged() {
        let doc_id = Uuid::new_v4().to_string();
        let existing = vec![segment(&doc_id, "stay", 0), segment(&doc_id, "drop", 1)];
        let chunks = vec![chunk("stay", 0), chunk("new", 1)];

        let diff = diff_chunks(&existing, chunks);

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].content_hash, "new");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].content_hash, "drop");
        assert_eq!(diff.unchanged.len(), 1);
        assert_eq!(diff.unchanged[0].chunk.content_hash, "stay");
    }

    #[test]
    fn diff_of_identical_sets_has_nothing_added_or_removed() {
        let doc_id = Uuid::new_v4().to_string();
        let existing = vec![segment(&doc_id, "a", 0), segment(&doc_id, "b", 1)];
        let chunks = vec![chunk("a", 0), chunk("b", 1)];

        let diff = diff_chunks(&existing, chunks);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.unchanged.len(), 2);
    }

    #[test]
    fn diff_of_empty_existing_has_everything_added() {
        let chunks = vec![chunk("a", 0)];
        let diff = diff_chunks(&[], chunks);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.removed.is_empty());
        assert!(diff.unchanged.is_empty());
    }
}
