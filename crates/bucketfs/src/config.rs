use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{Error, Result};

fn default_cache_size() -> usize {
    32
}

fn default_extent_size() -> i64 {
    1024 * 1024
}

fn default_logging() -> String {
    "production".to_string()
}

/// Mount configuration. The front-end loads this from YAML and hands it
/// to [`crate::session::Session`] by value.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Target bucket name.
    pub bucket: String,

    /// Bucket region.
    #[serde(default)]
    pub region: String,

    /// Custom endpoint for MinIO and other S3-compatible stores. When
    /// set, plain HTTP is allowed.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Static credentials.
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,

    /// Stream-cipher password; also the root-key input, so every
    /// password owns its own filesystem namespace in the bucket.
    pub password: String,

    /// Enable the encryption stage of the codec pipeline.
    #[serde(default)]
    pub encryption: bool,

    /// Enable the compression stage of the codec pipeline.
    #[serde(default)]
    pub compression: bool,

    /// Blob cache capacity in entries. Zero disables the cache.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Extent size in bytes for newly created files. Immutable for the
    /// life of each file once set.
    #[serde(default = "default_extent_size")]
    pub extent_size: i64,

    /// "development" or "production".
    #[serde(default = "default_logging")]
    pub logging: String,

    /// Optional log sink path; stdout when unset.
    #[serde(default)]
    pub log_output_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: String::new(),
            endpoint: None,
            access_key: String::new(),
            secret_key: String::new(),
            password: String::new(),
            encryption: false,
            compression: false,
            cache_size: default_cache_size(),
            extent_size: default_extent_size(),
            logging: default_logging(),
            log_output_path: None,
        }
    }
}

impl Config {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).context("failed to parse YAML config")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::InvalidArgument("bucket must be set"));
        }
        if self.password.is_empty() {
            return Err(Error::InvalidArgument("password must be set"));
        }
        if self.extent_size <= 0 {
            return Err(Error::InvalidArgument("extent_size must be positive"));
        }
        Ok(())
    }
}
