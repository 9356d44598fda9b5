use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use kube::api::DeleteParams;
use kube::{Api, Client};
use tracing::{info, warn};

use crate::cluster;
use crate::config::OcloudConfig;
use crate::crd::{
    ClusterInstance, NodeAllocationRequest, PHASE_FAILED, PHASE_FULFILLED, ProvisioningRequest,
};
use crate::teardown::{self, KubePresence, ResourceKind, TeardownReport, TeardownTarget};
use crate::wait::{self, FixedInterval, PollError};

const PROVISION_POLL_INTERVAL: Duration = Duration::from_secs(15);
const POST_PROVISION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/* ============================= TYPES ============================= */

/// What a fulfilled ProvisioningRequest resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedCluster {
    pub request: String,
    pub cluster_name: String,
    pub node_allocation_request: Option<String>,
    pub allocated_nodes: Vec<String>,
}

/* ============================= PROVISIONING ============================= */

/// Poll outcome for a request phase: done, failed for good, or keep waiting.
pub fn check_phase(pr: &ProvisioningRequest) -> Result<bool, PollError> {
    match pr.phase() {
        Some(PHASE_FULFILLED) => Ok(true),
        Some(PHASE_FAILED) => {
            let details = pr
                .status
                .as_ref()
                .and_then(|s| s.provisioning_status.as_ref())
                .and_then(|p| p.provisioning_details.clone())
                .unwrap_or_default();
            Err(PollError::fatal(anyhow::anyhow!(
                "provisioning request {} failed: {details}",
                kube::ResourceExt::name_any(pr)
            )))
        }
        _ => Ok(false),
    }
}

async fn wait_for_fulfilled(
    api: &Api<ProvisioningRequest>,
    name: &str,
    timeout: Duration,
) -> anyhow::Result<ProvisioningRequest> {
    let description = format!("provisioning request {name} to be fulfilled");
    wait::poll_for(
        &description,
        timeout,
        FixedInterval(PROVISION_POLL_INTERVAL),
        || {
            let api = api.clone();
            async move {
                let pr = api.get(name).await?;
                Ok(check_phase(&pr)?.then_some(pr))
            }
        },
    )
    .await
}

async fn wait_for_cluster_instance(client: &Client, cluster: &str) -> anyhow::Result<()> {
    let api: Api<ClusterInstance> = Api::namespaced(client.clone(), cluster);
    let description = format!("cluster instance {cluster} to be provisioned");
    wait::poll_until(
        &description,
        POST_PROVISION_TIMEOUT,
        FixedInterval(PROVISION_POLL_INTERVAL),
        || {
            let api = api.clone();
            async move {
                let ci = api.get(cluster).await?;
                Ok(ci.is_provisioned())
            }
        },
    )
    .await
}

async fn wait_for_node_allocation(
    client: &Client,
    namespace: &str,
    nar: &str,
) -> anyhow::Result<Vec<String>> {
    let api: Api<NodeAllocationRequest> = Api::namespaced(client.clone(), namespace);
    let description = format!("node allocation request {nar} to be fulfilled");
    wait::poll_for(
        &description,
        POST_PROVISION_TIMEOUT,
        FixedInterval(PROVISION_POLL_INTERVAL),
        || {
            let api = api.clone();
            async move {
                let req = api.get(nar).await?;
                Ok(req.is_fulfilled().then(|| req.allocated_node_names()))
            }
        },
    )
    .await
}

/// Wait for `pr_name` to be fulfilled, then confirm the cluster instance,
/// the node allocation and the cluster namespace together.
pub async fn verify_provisioning(
    client: &Client,
    cfg: &OcloudConfig,
    pr_name: &str,
) -> anyhow::Result<ProvisionedCluster> {
    let api: Api<ProvisioningRequest> = Api::all(client.clone());
    let pr = wait_for_fulfilled(&api, pr_name, cfg.provision_timeout()).await?;

    let cluster_name = pr
        .cluster_name()
        .with_context(|| {
            format!("provisioning request {pr_name} is fulfilled but names no cluster")
        })?
        .to_string();
    let nar = pr.node_allocation_request_id().map(str::to_string);

    info!(request = %pr_name, cluster = %cluster_name, "provisioning_fulfilled");

    let nodes = async {
        match &nar {
            Some(id) => wait_for_node_allocation(client, &cfg.hardware_namespace, id).await,
            None => Ok(Vec::new()),
        }
    };

    let ((), allocated_nodes, ()) = tokio::try_join!(
        wait_for_cluster_instance(client, &cluster_name),
        nodes,
        cluster::wait_for_namespace(client, &cluster_name, true, POST_PROVISION_TIMEOUT),
    )?;

    Ok(ProvisionedCluster {
        request: pr_name.to_string(),
        cluster_name,
        node_allocation_request: nar,
        allocated_nodes,
    })
}

/* ============================= DEPROVISIONING ============================= */

/// Everything that must disappear once a ProvisioningRequest is deleted.
pub fn teardown_targets(cfg: &OcloudConfig, cluster: &ProvisionedCluster) -> Vec<TeardownTarget> {
    let timing = |t: TeardownTarget| t.with_timing(cfg.teardown_timeout(), cfg.teardown_interval());

    let mut targets = vec![timing(TeardownTarget::new(
        ResourceKind::ProvisioningRequest,
        &cluster.request,
    ))];

    if let Some(nar) = &cluster.node_allocation_request {
        targets.push(timing(
            TeardownTarget::new(ResourceKind::NodeAllocationRequest, nar)
                .in_namespace(&cfg.hardware_namespace),
        ));
    }

    targets.extend(cluster.allocated_nodes.iter().map(|node| {
        timing(
            TeardownTarget::new(ResourceKind::AllocatedNode, node)
                .in_namespace(&cfg.hardware_namespace),
        )
    }));

    targets.push(timing(
        TeardownTarget::new(ResourceKind::ClusterInstance, &cluster.cluster_name)
            .in_namespace(&cluster.cluster_name),
    ));
    targets.push(timing(TeardownTarget::new(
        ResourceKind::Namespace,
        &cluster.cluster_name,
    )));

    targets
}

async fn describe_request(
    client: &Client,
    cfg: &OcloudConfig,
    pr_name: &str,
) -> anyhow::Result<ProvisionedCluster> {
    let api: Api<ProvisioningRequest> = Api::all(client.clone());
    let pr = api
        .get(pr_name)
        .await
        .with_context(|| format!("Failed to read provisioning request {pr_name}"))?;

    let cluster_name = pr
        .cluster_name()
        .with_context(|| format!("provisioning request {pr_name} names no cluster"))?
        .to_string();
    let nar = pr.node_allocation_request_id().map(str::to_string);

    let allocated_nodes = match &nar {
        Some(id) => {
            let nars: Api<NodeAllocationRequest> =
                Api::namespaced(client.clone(), &cfg.hardware_namespace);
            nars.get_opt(id)
                .await
                .with_context(|| format!("Failed to read node allocation request {id}"))?
                .map(|n| n.allocated_node_names())
                .unwrap_or_default()
        }
        None => Vec::new(),
    };

    Ok(ProvisionedCluster {
        request: pr_name.to_string(),
        cluster_name,
        node_allocation_request: nar,
        allocated_nodes,
    })
}

/// Delete `pr_name` and wait for every dependent resource to go away.
pub async fn deprovision_cluster(
    client: &Client,
    cfg: &OcloudConfig,
    pr_name: &str,
) -> anyhow::Result<TeardownReport> {
    let cluster = describe_request(client, cfg, pr_name).await?;

    let api: Api<ProvisioningRequest> = Api::all(client.clone());
    match api.delete(pr_name, &DeleteParams::default()).await {
        Ok(_) => info!(
            request = %pr_name,
            cluster = %cluster.cluster_name,
            "provisioning_request_deleted"
        ),
        Err(e) if wait::is_not_found(&e) => {
            warn!(request = %pr_name, "provisioning_request_already_gone")
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to delete provisioning request {pr_name}"));
        }
    }

    let targets = teardown_targets(cfg, &cluster);
    let presence = Arc::new(KubePresence::new(client.clone()));
    Ok(teardown::verify_all_absent(presence, targets).await)
}

/// Deprovision several clusters at once. Results keep the input order.
pub async fn deprovision_clusters(
    client: &Client,
    cfg: &OcloudConfig,
    pr_names: &[String],
) -> Vec<(String, anyhow::Result<TeardownReport>)> {
    let flows = pr_names
        .iter()
        .map(|name| async move { (name.clone(), deprovision_cluster(client, cfg, name).await) });
    join_all(flows).await
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ProvisioningRequestSpec, ProvisioningRequestStatus, ProvisioningStatus};

    fn request(phase: Option<&str>, details: Option<&str>) -> ProvisioningRequest {
        let mut pr = ProvisioningRequest::new(
            "sno-1",
            ProvisioningRequestSpec {
                template_name: "sno-ran-du".to_string(),
                template_version: "v4-18-1".to_string(),
                ..Default::default()
            },
        );
        pr.status = Some(ProvisioningRequestStatus {
            provisioning_status: Some(ProvisioningStatus {
                provisioning_phase: phase.map(String::from),
                provisioning_details: details.map(String::from),
            }),
            ..Default::default()
        });
        pr
    }

    fn provisioned() -> ProvisionedCluster {
        ProvisionedCluster {
            request: "pr-sno-1".to_string(),
            cluster_name: "sno-1".to_string(),
            node_allocation_request: Some("nar-123".to_string()),
            allocated_nodes: vec!["node-a".to_string(), "node-b".to_string()],
        }
    }

    #[test]
    fn test_check_phase_fulfilled() {
        assert!(check_phase(&request(Some("fulfilled"), None)).unwrap());
    }

    #[test]
    fn test_check_phase_pending() {
        assert!(!check_phase(&request(Some("progressing"), None)).unwrap());
        assert!(!check_phase(&request(None, None)).unwrap());
    }

    #[test]
    fn test_check_phase_failed_is_fatal() {
        let err = check_phase(&request(Some("failed"), Some("bmh unavailable"))).unwrap_err();
        assert!(matches!(err, PollError::Fatal(_)));
        assert!(err.to_string().contains("bmh unavailable"));
    }

    #[test]
    fn test_teardown_targets_full_set() {
        let cfg = OcloudConfig::default();
        let targets = teardown_targets(&cfg, &provisioned());

        let kinds: Vec<_> = targets.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::ProvisioningRequest,
                ResourceKind::NodeAllocationRequest,
                ResourceKind::AllocatedNode,
                ResourceKind::AllocatedNode,
                ResourceKind::ClusterInstance,
                ResourceKind::Namespace,
            ]
        );
        assert_eq!(targets[1].namespace.as_deref(), Some("oran-hwmgr-plugin"));
        assert_eq!(targets[4].namespace.as_deref(), Some("sno-1"));
        assert!(targets[5].namespace.is_none());
        assert!(targets.iter().all(|t| t.timeout == cfg.teardown_timeout()));
        assert!(targets.iter().all(|t| t.interval == Duration::from_secs(1)));
    }

    #[test]
    fn test_teardown_targets_without_allocation() {
        let cluster = ProvisionedCluster {
            node_allocation_request: None,
            allocated_nodes: vec![],
            ..provisioned()
        };
        let targets = teardown_targets(&OcloudConfig::default(), &cluster);
        assert_eq!(targets.len(), 3);
    }
}
