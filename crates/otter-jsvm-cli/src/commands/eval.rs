//! Eval command - evaluate source from the command line.

use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::host::Host;

#[derive(Args)]
pub struct EvalCommand {
    /// Source to evaluate; each one runs in the same Env, in order
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Don't print completion values
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

impl EvalCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let mut host = Host::new(config, None)?;
        let env = host.create_env(0)?;

        for (index, source) in self.sources.iter().enumerate() {
            let resource = format!("<eval:{}>", index + 1);
            let value = host.execute(env, source, &resource, None)?;
            if !self.quiet {
                println!("{value}");
            }
        }

        host.shutdown()
    }
}
