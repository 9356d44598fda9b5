use std::time::Duration;

use anyhow::{Context, Result};

use telco_systest::config::SystestConfig;
use telco_systest::remote;

use crate::cli::ExecAction;

pub async fn run(config: &SystestConfig, action: ExecAction, limit: Duration) -> Result<()> {
    let output = match action {
        ExecAction::Shell { command } => remote::run_shell(&command, limit).await?,
        ExecAction::Ssh { command } => {
            let target = config
                .ssh
                .as_ref()
                .context("no ssh host configured (set the `ssh` section of the config file)")?
                .target()?;
            remote::ssh_exec(&target, &command, limit).await?
        }
        ExecAction::Node { node, command } => {
            remote::debug_node_exec(&node, &command, limit).await?
        }
    };

    print!("{output}");
    Ok(())
}
