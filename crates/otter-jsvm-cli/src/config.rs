//! Configuration file parsing for jsvm.toml.

use otter_jsvm::{InitOptions, MicrotaskPolicy, VmOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Process-wide engine flags
    #[serde(default)]
    pub init: InitOptions,

    /// Heap and queue limits for every VM the host creates
    #[serde(default)]
    pub vm: VmOptions,

    /// Event loop settings
    #[serde(default)]
    pub host: HostConfig,
}

/// Host event loop configuration.
#[derive(Debug, Deserialize)]
pub struct HostConfig {
    /// Run microtasks only at explicit checkpoints
    #[serde(default)]
    pub explicit_microtasks: bool,

    /// Upper bound on tasks pumped after a script (0 = unbounded)
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            explicit_microtasks: false,
            max_tasks: default_max_tasks(),
        }
    }
}

impl HostConfig {
    pub fn microtask_policy(&self) -> MicrotaskPolicy {
        if self.explicit_microtasks {
            MicrotaskPolicy::Explicit
        } else {
            MicrotaskPolicy::Auto
        }
    }
}

fn default_max_tasks() -> usize {
    10_000
}

/// Load configuration from a file or search for a default config file.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        Some(path) => anyhow::bail!("Config file not found: {}", path.display()),
        None => Ok(Config::default()),
    }
}

/// Search for a configuration file in the current directory and its parents.
fn find_config_file() -> Option<PathBuf> {
    const CONFIG_NAMES: &[&str] = &["jsvm.toml", ".jsvmrc.toml"];

    let cwd = std::env::current_dir().ok()?;
    let mut dir = Some(cwd.as_path());
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}
