//! Snapshot command - capture the globals left behind by a set of scripts.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::config::Config;
use crate::host::Host;

#[derive(Args)]
pub struct SnapshotCommand {
    /// Scripts to run; each gets its own Env and becomes one context
    #[arg(required = true)]
    pub scripts: Vec<PathBuf>,

    /// Where to write the snapshot
    #[arg(long, short = 'o', default_value = "snapshot.bin")]
    pub output: PathBuf,
}

impl SnapshotCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let mut host = Host::new(config, None)?;

        let mut envs = Vec::with_capacity(self.scripts.len());
        for script in &self.scripts {
            let source = std::fs::read_to_string(script)
                .with_context(|| format!("failed to read {}", script.display()))?;
            let env = host.create_env(0)?;
            host.execute(env, &source, &script.display().to_string(), None)?;
            envs.push(env);
        }

        let blob = host.snapshot(&envs)?;
        std::fs::write(&self.output, &blob)
            .with_context(|| format!("failed to write {}", self.output.display()))?;
        println!(
            "Wrote {} ({} contexts, {} bytes)",
            self.output.display(),
            envs.len(),
            blob.len()
        );

        host.shutdown()
    }
}
