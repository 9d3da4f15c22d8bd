use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::blocking::DEFAULT_PREFIX_LENGTH;
use crate::error::{DedupError, Result};
use crate::similarity::{SimilarityMetric, SimilarityScorer};

/// Root configuration, loaded from `~/.config/skumerge/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkumergeConfig {
    pub matching: MatchingConfig,
    pub pipeline: PipelineConfig,
    pub columns: ColumnConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Fuzzy-match acceptance cutoff on a 0–100 scale. Higher means fewer,
    /// more precise merges.
    pub similarity_threshold: f64,
    /// Number of cleaned title characters in the blocking key.
    pub blocking_prefix_length: usize,
    pub metric: SimilarityMetric,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rows per ingestion chunk (and per output batch).
    pub chunk_size: usize,
    /// Threads in the block-matching pool.
    pub worker_count: usize,
    /// Extra attempts for a block whose matching fails.
    pub block_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    /// Columns that together form the product identifier, in order.
    pub identifier: Vec<String>,
    pub brand: String,
    /// Candidate title columns; the first non-blank one wins per record.
    pub title: Vec<String>,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 90.0,
            blocking_prefix_length: DEFAULT_PREFIX_LENGTH,
            metric: SimilarityMetric::TokenSet,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50_000,
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            block_retries: 1,
        }
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            identifier: vec!["product_identifier".to_string()],
            brand: "brand".to_string(),
            title: vec![
                "product_title".to_string(),
                "product_name".to_string(),
                "name".to_string(),
                "title".to_string(),
            ],
        }
    }
}

impl MatchingConfig {
    pub fn scorer(&self) -> SimilarityScorer {
        SimilarityScorer::new(self.metric, self.similarity_threshold)
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl SkumergeConfig {
    /// Standard config file path: `~/.config/skumerge/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SKUMERGE_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("skumerge")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values outside the documented ranges.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.matching.similarity_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(DedupError::InvalidConfig(format!(
                "similarity_threshold must be within [0, 100], got {threshold}"
            )));
        }
        if self.matching.blocking_prefix_length == 0 {
            return Err(DedupError::InvalidConfig(
                "blocking_prefix_length must be greater than 0".to_string(),
            ));
        }
        if self.pipeline.chunk_size == 0 {
            return Err(DedupError::InvalidConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.pipeline.worker_count == 0 {
            return Err(DedupError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.columns.identifier.is_empty() || self.columns.title.is_empty() {
            return Err(DedupError::InvalidConfig(
                "at least one identifier column and one title column are required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = SkumergeConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.matching.similarity_threshold, 90.0);
        assert_eq!(cfg.matching.blocking_prefix_length, 3);
        assert!(cfg.pipeline.worker_count >= 1);
        assert_eq!(cfg.columns.brand, "brand");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = SkumergeConfig::default();
        cfg.matching.metric = SimilarityMetric::TokenSort;
        cfg.pipeline.chunk_size = 128;
        cfg.save_to(&path).unwrap();

        let loaded = SkumergeConfig::load_from(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[matching]\nsimilarity_threshold = 75.0\nmetric = \"levenshtein\"\n").unwrap();

        let loaded = SkumergeConfig::load_from(&path).unwrap();
        assert_eq!(loaded.matching.similarity_threshold, 75.0);
        assert_eq!(loaded.matching.metric, SimilarityMetric::Levenshtein);
        assert_eq!(loaded.matching.blocking_prefix_length, 3);
        assert_eq!(loaded.columns, ColumnConfig::default());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let cfg = SkumergeConfig::load_from(Path::new("/tmp/nonexistent_skumerge_config.toml")).unwrap();
        assert_eq!(cfg.matching, MatchingConfig::default());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut cfg = SkumergeConfig::default();
        cfg.matching.similarity_threshold = 101.0;
        assert!(matches!(cfg.validate(), Err(DedupError::InvalidConfig(_))));

        let mut cfg = SkumergeConfig::default();
        cfg.pipeline.chunk_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SkumergeConfig::default();
        cfg.pipeline.worker_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SkumergeConfig::default();
        cfg.matching.blocking_prefix_length = 0;
        assert!(cfg.validate().is_err());
    }
}
