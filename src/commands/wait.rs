use std::time::Duration;

use anyhow::Result;

use telco_systest::cluster;
use telco_systest::config::SystestConfig;

use crate::cli::WaitTarget;

pub async fn run(config: &SystestConfig, target: WaitTarget, timeout: Duration) -> Result<()> {
    let client = super::connect(config).await?;

    match target {
        WaitTarget::Namespace { name, absent } => {
            cluster::wait_for_namespace(&client, &name, !absent, timeout).await?;
            let state = if absent { "DELETED" } else { "PRESENT" };
            println!("  Namespace {name} ............ {state}");
        }
        WaitTarget::Deployment { namespace, name } => {
            cluster::wait_for_deployment_ready(&client, &namespace, &name, timeout).await?;
            println!("  Deployment {namespace}/{name} ... READY");
        }
        WaitTarget::NodeReady { node } => {
            cluster::wait_for_node_ready(&client, &node, timeout).await?;
            println!("  Node {node} ................. READY");
        }
        WaitTarget::NodeReboot { node, boot_id } => {
            let previous = match boot_id {
                Some(id) => id,
                None => cluster::current_boot_id(&client, &node).await?,
            };
            println!("  Previous boot ID ............ {previous}");
            cluster::wait_for_node_reboot(&client, &node, &previous, timeout).await?;
            println!("  Node {node} ................. REBOOTED");
        }
        WaitTarget::ClusterOperators => {
            cluster::wait_for_cluster_operators_stable(&client, timeout).await?;
            println!("  ClusterOperators ............ STABLE");
        }
        WaitTarget::Mcp { pool } => {
            cluster::wait_for_mcp_updated(&client, &pool, timeout).await?;
            println!("  MachineConfigPool {pool} .... UPDATED");
        }
    }

    Ok(())
}
