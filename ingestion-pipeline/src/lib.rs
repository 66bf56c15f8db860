#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunking;
pub mod connectors;
pub mod diff;
pub mod entity_extraction;
pub mod parsing;
pub mod pipeline;
pub mod task_manager;

pub use pipeline::{
    retry_pending_graph_syncs, IngestionConfig, IngestionOutcome, IngestionPipeline, IngestionTuning,
};
