mod cli;
mod commands;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use telco_systest::config::SystestConfig;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = SystestConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Version => commands::version::run(),
        Commands::Check => commands::check::run(&config).await?,
        Commands::Stability { action } => commands::stability::run(&config, action).await?,
        Commands::Ocloud { action } => commands::ocloud::run(&config, action).await?,
        Commands::Wait { target, timeout_secs } => {
            commands::wait::run(&config, target, Duration::from_secs(timeout_secs)).await?
        }
        Commands::Exec { action, timeout_secs } => {
            commands::exec::run(&config, action, Duration::from_secs(timeout_secs)).await?
        }
        Commands::Report { action } => commands::report::run(&config, action).await?,
        Commands::Crd { action } => commands::crd::run(action)?,
    }

    Ok(())
}
