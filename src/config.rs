use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::genealogy::DEFAULT_NO_PARENT_SENTINEL;
use crate::snippet::DEFAULT_SNIPPET_CAPACITY;
use crate::table::HeaderMap;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache capacity must be at least 1")]
    ZeroCapacity,
}

/// Session settings for loading and viewing a dataset.
///
/// Every field is optional in the JSON file; missing ones take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Column names of the special attributes.
    pub headers: HeaderMap,
    /// Maximum number of cached snippets and segmentations.
    pub cache_capacity: usize,
    /// Root of `{frame}-{trackId}.json` segmentation payloads. An `http(s)`
    /// URL or a local directory.
    pub segmentations_base_url: Option<String>,
    /// Generations below a founder shown in aggregate views.
    pub max_lineage_depth: Option<usize>,
    /// Parent id meaning "no parent".
    pub no_parent_sentinel: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            headers: HeaderMap::default(),
            cache_capacity: DEFAULT_SNIPPET_CAPACITY,
            segmentations_base_url: None,
            max_lineage_depth: None,
            no_parent_sentinel: DEFAULT_NO_PARENT_SENTINEL.to_string(),
        }
    }
}

impl ViewerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    pub fn segmentations_are_remote(&self) -> bool {
        self.segmentations_base_url
            .as_deref()
            .is_some_and(|u| u.starts_with("http://") || u.starts_with("https://"))
    }
}
