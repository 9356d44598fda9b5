use anyhow::Result;
use tracing::{info, warn};

use telco_systest::config::SystestConfig;
use telco_systest::ocloud;
use telco_systest::report;
use telco_systest::teardown::TeardownReport;

use crate::cli::OcloudAction;

pub async fn run(config: &SystestConfig, action: OcloudAction) -> Result<()> {
    match action {
        OcloudAction::VerifyProvisioning { request } => verify_provisioning(config, &request).await,
        OcloudAction::Deprovision { requests } => deprovision(config, &requests).await,
    }
}

async fn verify_provisioning(config: &SystestConfig, request: &str) -> Result<()> {
    let client = super::connect(config).await?;

    println!("Waiting for ProvisioningRequest {request}...\n");
    let result = ocloud::verify_provisioning(&client, &config.ocloud, request).await;

    let cluster = match result {
        Ok(c) => c,
        Err(e) => {
            dump_on_failure(&client, config, &format!("provisioning-{request}")).await;
            return Err(e);
        }
    };

    println!("  Cluster ..................... {}", cluster.cluster_name);
    println!(
        "  Node allocation ............. {}",
        cluster.node_allocation_request.as_deref().unwrap_or("-")
    );
    println!("  Allocated nodes ............. {}", cluster.allocated_nodes.join(", "));
    println!("\nProvisioning verified.");
    Ok(())
}

async fn deprovision(config: &SystestConfig, requests: &[String]) -> Result<()> {
    let client = super::connect(config).await?;

    println!("Deprovisioning {} cluster(s)...\n", requests.len());
    let results = ocloud::deprovision_clusters(&client, &config.ocloud, requests).await;

    let mut failed = 0;
    for (request, result) in results {
        match result {
            Ok(report) if report.is_success() => {
                print_report(&request, &report);
                info!(request = %request, "deprovision_complete");
            }
            Ok(report) => {
                failed += 1;
                print_report(&request, &report);
                if let Err(e) = report.into_result() {
                    warn!(request = %request, error = %e, "deprovision_incomplete");
                }
            }
            Err(e) => {
                failed += 1;
                println!("  {request}: FAIL ({e:#})");
            }
        }
    }

    if failed > 0 {
        dump_on_failure(&client, config, "deprovision").await;
        anyhow::bail!("{failed} of {} deprovisioning flow(s) failed", requests.len());
    }
    println!("\nAll clusters deprovisioned.");
    Ok(())
}

fn print_report(request: &str, report: &TeardownReport) {
    println!("  {request}");
    for outcome in &report.outcomes {
        let status = match &outcome.result {
            Ok(()) => "DELETED".to_string(),
            Err(e) => format!("PRESENT ({e})"),
        };
        println!(
            "    {:<60} {:<8} {:>6.1}s",
            outcome.target.to_string(),
            status,
            outcome.elapsed.as_secs_f64()
        );
    }
}

async fn dump_on_failure(client: &kube::Client, config: &SystestConfig, label: &str) {
    if config.report.namespaces.is_empty() {
        return;
    }
    match report::dump_namespaces(client, &config.report, label).await {
        Ok(dir) => println!("\n  Failure dump written to {}", dir.display()),
        Err(e) => warn!(error = %e, "failure_dump_failed"),
    }
}
