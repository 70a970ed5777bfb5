use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub hashing: HashingConfig,

    #[serde(default)]
    pub faces: FaceConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub albums: AlbumConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Maximum Hamming distance (bits) at which two perceptual hashes are
    /// reported as a possible duplicate. Advisory only; never blocks ingestion.
    #[serde(default = "default_near_duplicate_threshold")]
    pub near_duplicate_threshold: u32,
}

fn default_near_duplicate_threshold() -> u32 {
    10
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: default_near_duplicate_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceConfig {
    /// Minimum cosine similarity for a face to join an existing person cluster.
    #[serde(default = "default_face_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Two clusters scoring within this margin of each other count as tied;
    /// the tie goes to the cluster with more members.
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f32,
}

fn default_face_similarity_threshold() -> f32 {
    0.6
}

fn default_tie_epsilon() -> f32 {
    1e-4
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_face_similarity_threshold(),
            tie_epsilon: default_tie_epsilon(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Vector dimensionality. Deployment-wide; every stored vector and every
    /// query must match it.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_dimension() -> usize {
    512
}

fn default_embedding_model() -> String {
    "perceptual".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_embedding_dimension(),
            model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumConfig {
    /// Radius in kilometers for grouping photos into one location album.
    #[serde(default = "default_location_radius_km")]
    pub location_radius_km: f64,

    /// A person cluster needs at least this many faces before it gets an album.
    #[serde(default = "default_min_person_album_faces")]
    pub min_person_album_faces: usize,
}

fn default_location_radius_km() -> f64 {
    1.0
}

fn default_min_person_album_faces() -> usize {
    2
}

impl Default for AlbumConfig {
    fn default() -> Self {
        Self {
            location_radius_km: default_location_radius_km(),
            min_person_album_faces: default_min_person_album_faces(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts for recoverable (storage/timeout) failures before the record
    /// keeps its stage and reports the last error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff; attempt n waits base * 2^n.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Deadline for a single storage call.
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_storage_timeout_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            storage_timeout_ms: default_storage_timeout_ms(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pixvault")
        .join("pixvault.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            hashing: HashingConfig::default(),
            faces: FaceConfig::default(),
            embedding: EmbeddingConfig::default(),
            albums: AlbumConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pixvault")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.hashing.near_duplicate_threshold, 10);
        assert!((config.faces.similarity_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.embedding.dimension, 512);
        assert!((config.albums.location_radius_km - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.embedding.dimension, config.embedding.dimension);
        assert_eq!(parsed.retry.max_attempts, config.retry.max_attempts);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = toml::from_str("[faces]\nsimilarity_threshold = 0.7\n").unwrap();
        assert!((parsed.faces.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(parsed.hashing.near_duplicate_threshold, 10);
    }
}
