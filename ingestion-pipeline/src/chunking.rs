use std::sync::OnceLock;

use common::{error::AppError, utils::fingerprint::hash_chunk};
use text_splitter::{ChunkCapacity, ChunkConfig, MarkdownSplitter};

use crate::parsing::ParsedDocument;

/// One chunker output unit. `position` is dense and 0-based over the
/// surviving (non-whitespace-only) chunks of a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub content_hash: String,
    pub section_path: Option<String>,
    pub segment_type: String,
    pub position: i64,
}

struct HeadingMarker {
    offset: usize,
    path: String,
}

/// Token-bounded markdown chunker. Delegates the actual split points to
/// `text-splitter`'s markdown-aware splitter (so it already avoids cutting
/// mid-sentence/mid-block) and layers section-path and segment-type tagging
/// on top by re-scanning the source for heading and table/code markers.
pub struct Chunker {
    min_tokens: usize,
    max_tokens: usize,
}

impl Chunker {
    pub fn new(min_tokens: usize, max_tokens: usize) -> Self {
        Self {
            min_tokens,
            max_tokens,
        }
    }

    pub fn chunk(&self, parsed: &ParsedDocument) -> Result<Vec<Chunk>, AppError> {
        if parsed.markdown_body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tokenizer = tokenizer()?;
        let capacity = ChunkCapacity::new(self.min_tokens)
            .with_max(self.max_tokens)
            .map_err(|e| AppError::Validation(format!("invalid chunk token bounds: {e}")))?;
        let config = ChunkConfig::new(capacity).with_sizer(tokenizer);
        let splitter = MarkdownSplitter::new(config);

        let markers = heading_markers(&parsed.markdown_body);

        let mut chunks = Vec::new();
        let mut position = 0_i64;
        for (offset, text) in splitter.chunk_indices(&parsed.markdown_body) {
            if text.trim().is_empty() {
                continue;
            }

            let content = text.to_string();
            chunks.push(Chunk {
                content_hash: hash_chunk(&content),
                section_path: section_path_at(&markers, offset),
                segment_type: classify_segment(&content).to_string(),
                content,
                position,
            });
            position = position
                .checked_add(1)
                .ok_or_else(|| AppError::Internal("chunk position overflow".into()))?;
        }

        Ok(chunks)
    }
}

fn tokenizer() -> Result<&'static tokenizers::Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<tokenizers::Tokenizer, String>> = OnceLock::new();

    match TOKENIZER.get_or_init(|| {
        tokenizers::Tokenizer::from_pretrained("bert-base-cased", None)
            .map_err(|e| format!("failed to initialize tokenizer: {e}"))
    }) {
        Ok(tokenizer) => Ok(tokenizer),
        Err(err) => Err(AppError::Internal(err.clone())),
    }
}

/// Scans for ATX-style (`#`...`######`) heading lines, tracking the
/// innermost heading stack active at each byte offset.
fn heading_markers(markdown: &str) -> Vec<HeadingMarker> {
    let mut markers = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut offset = 0_usize;

    for line in markdown.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n').trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level > 0 && level <= 6 && trimmed.as_bytes().get(level) == Some(&b' ') {
            let heading_text = trimmed[level..].trim().to_string();
            stack.retain(|(existing_level, _)| *existing_level < level);
            stack.push((level, heading_text));
            let path = stack
                .iter()
                .map(|(_, text)| text.as_str())
                .collect::<Vec<_>>()
                .join(" > ");
            markers.push(HeadingMarker { offset, path });
        }
        offset += line.len();
    }

    markers
}

fn section_path_at(markers: &[HeadingMarker], offset: usize) -> Option<String> {
    markers
        .iter()
        .rev()
        .find(|marker| marker.offset <= offset)
        .map(|marker| marker.path.clone())
}

/// A chunk counts as a table segment when it contains a markdown table
/// separator row (e.g. `| --- | --- |`); a code segment when it contains a
/// fenced code block; otherwise it's prose.
fn classify_segment(content: &str) -> &'static str {
    let has_table_separator = content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed.starts_with('|')
            && trimmed
                .trim_matches('|')
                .split('|')
                .all(|cell| !cell.trim().is_empty() && cell.trim().chars().all(|c| c == '-' || c == ':'))
    });
    if has_table_separator {
        return "table";
    }
    if content.contains("```") {
        return "code";
    }
    "text"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(markdown: &str) -> ParsedDocument {
        ParsedDocument {
            markdown_body: markdown.to_string(),
            images: Vec::new(),
            tables: Vec::new(),
            heading_hierarchy: Vec::new(),
        }
    }

    #[test]
    fn chunk_assigns_dense_positions() {
        let chunker = Chunker::new(5, 50);
        let doc = parsed("# Intro\n\nSome short prose about tokio scheduling.\n\n# Details\n\nMore prose about async tasks and cooperative yielding.");
        let chunks = chunker.chunk(&doc).unwrap();
        assert!(!chunks.is_empty());
        for (idx, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, idx as i64);
        }
    }

    #[test]
    fn chunk_tags_section_path_from_nearest_heading() {
        let chunker = Chunker::new(1, 1000);
        let doc = parsed("# Top\n\n## Sub\n\nBody under Sub heading.");
        let chunks = chunker.chunk(&doc).unwrap();
        assert!(chunks
            .iter()
            .any(|c| c.section_path.as_deref() == Some("Top > Sub")));
    }

    #[test]
    fn chunk_classifies_table_segment() {
        let chunker = Chunker::new(1, 1000);
        let doc = parsed("# Report\n\n| a | b |\n| --- | --- |\n| 1 | 2 |\n");
        let chunks = chunker.chunk(&doc).unwrap();
        assert!(chunks.iter().any(|c| c.segment_type == "table"));
    }

    #[test]
    fn chunk_of_empty_document_is_empty() {
        let chunker = Chunker::new(5, 50);
        let doc = parsed("   \n\n  ");
        assert!(chunker.chunk(&doc).unwrap().is_empty());
    }

    #[test]
    fn classify_segment_detects_code_block() {
        assert_eq!(classify_segment("prose\n```rust\nfn x() {}\n```"), "code");
    }
}
