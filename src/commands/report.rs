use anyhow::Result;

use telco_systest::config::SystestConfig;
use telco_systest::report;

use crate::cli::ReportAction;

pub async fn run(config: &SystestConfig, action: ReportAction) -> Result<()> {
    match action {
        ReportAction::Dump { label } => {
            if config.report.namespaces.is_empty() {
                anyhow::bail!("report.namespaces is empty; nothing to dump");
            }
            let client = super::connect(config).await?;
            let dir = report::dump_namespaces(&client, &config.report, &label).await?;
            println!("Failure dump written to {}", dir.display());
            Ok(())
        }
    }
}
