//! workspace configuration
//!
//! Read from `addons.config.yml` at the workspace root. The file is optional and every
//! key has a default:
//!
//! ```yaml
//! imports:
//!   mode: strict            # or lenient
//!   allow:
//!     - shared-network-*    # exports of stacks managed elsewhere
//! exports:
//!   require_namespace: true # export names must start with <app>-<env>-
//!   environment:            # outputs of the generated environment stack
//!     - VpcId
//! ```
use crate::exports::ImportPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "addons.config.yml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComposeConfig {
    pub imports: ImportPolicy,
    pub exports: ExportPolicy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportPolicy {
    pub require_namespace: bool,
    /// Export name suffixes of the generated environment stack
    pub environment: Vec<String>,
}

fn default_environment_exports() -> Vec<String> {
    [
        "VpcId",
        "PublicSubnets",
        "PrivateSubnets",
        "ClusterId",
        "EnvironmentSecurityGroup",
        "ServiceDiscoveryNamespaceID",
        "PublicLoadBalancerDNSName",
        "InternalLoadBalancerDNSName",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ExportPolicy {
    fn default() -> Self {
        Self {
            require_namespace: true,
            environment: default_environment_exports(),
        }
    }
}

impl ComposeConfig {
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        // an empty file deserializes as unit, not as an empty mapping
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Load the workspace configuration, falling back to defaults when absent
    pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
        let path = workspace.join(CONFIG_FILE);
        if !path.is_file() {
            tracing::debug!(path=%path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        tracing::info!(path=%path.display(), "loading configuration");
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Malformed { path, source })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration {}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
