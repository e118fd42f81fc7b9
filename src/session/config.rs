use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Depth, GraphError, Result};

/// Deepest bounded traversal a session accepts by default, in hops.
pub const DEFAULT_MAX_DEPTH: u32 = 1 << 15;

/// Session tuning, usually read from a TOML file.
///
/// ```toml
/// max_depth = 64
/// default_load_depth = { bounded = 2 }
/// default_save_depth = "unbounded"
/// log_statements = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest bounded depth a load or save may request.
    pub max_depth: u32,
    /// Depth used by [`Session::load`](super::Session::load).
    pub default_load_depth: Depth,
    /// Depth used by [`Session::save`](super::Session::save).
    pub default_save_depth: Depth,
    /// Log every statement text at `info` level.
    pub log_statements: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            default_load_depth: Depth::Bounded(1),
            default_save_depth: Depth::Unbounded,
            log_statements: false,
        }
    }
}

#[derive(Debug, Error)]
enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("max_depth must be positive")]
    ZeroMaxDepth,
}

impl From<ConfigError> for GraphError {
    fn from(err: ConfigError) -> Self {
        GraphError::Config(err.to_string())
    }
}

impl SessionConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?)
    }

    fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(ConfigError::ZeroMaxDepth.into());
        }
        Ok(())
    }

    /// Rejects bounded depths above [`SessionConfig::max_depth`].
    pub fn check_depth(&self, depth: Depth) -> Result<()> {
        match depth {
            Depth::Bounded(hops) if hops > self.max_depth => Err(GraphError::Consistency(format!(
                "depth {hops} exceeds the maximum of {}",
                self.max_depth
            ))),
            _ => Ok(()),
        }
    }
}
