//! Run command - execute a script file.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::config::Config;
use crate::host::{CodeCache, Host};

#[derive(Args)]
pub struct RunCommand {
    /// File to execute
    pub entry: PathBuf,

    /// Compile with the code cache in this file when it exists
    #[arg(long, value_name = "FILE")]
    pub code_cache: Option<PathBuf>,

    /// Write the compiled script to the --code-cache file
    #[arg(long, requires = "code_cache")]
    pub write_code_cache: bool,

    /// Start from a snapshot written by `jsvm snapshot`
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Snapshot context to restore
    #[arg(long, default_value_t = 0, requires = "snapshot")]
    pub context: usize,
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let source = std::fs::read_to_string(&self.entry)
            .with_context(|| format!("failed to read {}", self.entry.display()))?;
        let blob = self
            .snapshot
            .as_ref()
            .map(|path| {
                std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
            })
            .transpose()?;

        let mut host = Host::new(config, blob)?;
        let env = host.create_env(self.context)?;
        let resource = self.entry.display().to_string();
        let cache = self.code_cache.as_deref().map(|path| CodeCache {
            path,
            write: self.write_code_cache,
        });

        let value = host.execute(env, &source, &resource, cache)?;
        if value != "undefined" {
            println!("{value}");
        }

        host.shutdown()
    }
}
