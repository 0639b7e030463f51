//! Configuration file model.
//!
//! ```yaml
//! common:
//!   excludePaths: [metadata.managedFields]
//! resources:
//!   - group: ""
//!     version: v1
//!     resource: pods
//!     namespaces: [default]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{FilterSpec, ResourceIdentity};

const DEFAULT_RESYNC_SECONDS: u64 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
    #[serde(flatten)]
    pub filter: FilterSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub common: FilterSpec,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Period of full cache redelivery; 0 disables it.
    #[serde(default = "default_resync_seconds")]
    pub resync_seconds: u64,
}

fn default_resync_seconds() -> u64 {
    DEFAULT_RESYNC_SECONDS
}

impl Default for Config {
    fn default() -> Self {
        Self { common: FilterSpec::default(), resources: Vec::new(), resync_seconds: DEFAULT_RESYNC_SECONDS }
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_seconds > 0).then(|| Duration::from_secs(self.resync_seconds))
    }

    /// Identity and effective filter for every configured resource, in file order.
    pub fn watched_resources(&self) -> Vec<(ResourceIdentity, FilterSpec)> {
        self.resources
            .iter()
            .map(|r| {
                (
                    ResourceIdentity::new(&r.group, &r.version, &r.resource),
                    FilterSpec::merged(&self.common, &r.filter),
                )
            })
            .collect()
    }
}
