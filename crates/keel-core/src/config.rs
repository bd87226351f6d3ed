//! keel.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeelConfig {
    #[serde(default)]
    pub deploy: DeploySection,
}

/// `[deploy]` — defaults for `keel compile` / `keel plan`.
///
/// Every key is optional here; flags and environment variables override
/// whatever is set, and required values are checked after merging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploySection {
    pub workdir: Option<PathBuf>,
    pub probe: Option<String>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    pub max_retries: Option<u32>,
    pub interval_secs: Option<u64>,
    pub pin_digests: Option<bool>,
    pub retain: Option<usize>,
}

impl KeelConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: KeelConfig = toml::from_str(&content)?;

        // Fragment paths are relative to the config file, not the cwd.
        if let Some(base) = path.parent() {
            for file in &mut config.deploy.files {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
