use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::core::DynamicObject;
use kube::Api;

use telco_systest::cluster;
use telco_systest::config::SystestConfig;
use telco_systest::crd::ProvisioningRequest;

pub async fn run(config: &SystestConfig) -> anyhow::Result<()> {
    println!("Running cluster connectivity checks...\n");

    print!("  Kubeconfig .................. ");
    let client = match super::connect(config).await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {e:#}");
        }
    };

    print!("  Cluster connection .......... ");
    let version = match client.apiserver_version().await {
        Ok(v) => {
            println!("OK (v{}.{})", v.major, v.minor);
            v
        }
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {e}");
            println!("  Hint:  Is the cluster reachable? Check with: oc whoami --show-server\n");
            anyhow::bail!("cluster connection failed");
        }
    };

    print!("  List pods permission ........ ");
    let pods: Api<Pod> = Api::all(client.clone());
    match pods.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  List nodes permission ....... ");
    let nodes: Api<Node> = Api::all(client.clone());
    match nodes.list(&ListParams::default()).await {
        Ok(list) => {
            let ready = list.items.iter().filter(|n| cluster::node_is_ready(n)).count();
            println!("OK ({} nodes, {} ready)", list.items.len(), ready);
        }
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  ClusterOperators ............ ");
    let operators: Api<DynamicObject> =
        Api::all_with(client.clone(), &cluster::cluster_operator_resource());
    match operators.list(&ListParams::default()).await {
        Ok(list) => {
            let stable = list
                .items
                .iter()
                .filter(|co| cluster::cluster_operator_is_stable(co))
                .count();
            println!("OK ({stable}/{} stable)", list.items.len());
        }
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  ProvisioningRequests ........ ");
    let requests: Api<ProvisioningRequest> = Api::all(client.clone());
    match requests.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("UNAVAILABLE ({e})"),
    }

    println!("\n  Kubernetes version: {}.{}", version.major, version.minor);
    println!("\nAll checks completed.");
    Ok(())
}
