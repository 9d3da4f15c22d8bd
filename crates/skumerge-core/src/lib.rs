//! Product catalog deduplication.
//!
//! Records sharing a canonical identifier are merged; records without one
//! are blocked by brand and title prefix and fuzzy-matched by title inside
//! each block. Every cluster becomes one canonical record.

pub mod blocking;
pub mod cluster;
pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod similarity;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use cluster::{Cluster, ClusterIndex, build_clusters};
pub use config::{ColumnConfig, MatchingConfig, PipelineConfig, SkumergeConfig};
pub use error::{DedupError, ExitCode, Result};
pub use merge::{PartialRecord, merge_records};
pub use models::*;
pub use normalize::{CanonicalId, clean_text, fold_list_item, normalize_id};
pub use pipeline::{
    BlockMatcher, Deduplicator, MemorySource, RecordSink, RecordSource, RunSummary, TitleMatcher,
    VecSink,
};
pub use similarity::{SimilarityMetric, SimilarityScorer, are_similar, similarity_score};
pub use storage::{ParquetSink, ParquetSource, export_csv};
