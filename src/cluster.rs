use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::ListParams;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use tracing::info;

use crate::crd::{ResourceCondition, condition_is_true, find_condition};
use crate::wait::{self, FixedInterval, PollError};

/* ============================= OPENSHIFT RESOURCES ============================= */

pub fn cluster_operator_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterOperator"),
        "clusteroperators",
    )
}

pub fn machine_config_pool_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("machineconfiguration.openshift.io", "v1", "MachineConfigPool"),
        "machineconfigpools",
    )
}

/// Conditions under `.status.conditions` of an untyped object.
pub fn dynamic_conditions(obj: &DynamicObject) -> Vec<ResourceCondition> {
    obj.data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| serde_json::from_value(c.clone()).ok())
        .unwrap_or_default()
}

/// True when the condition exists and its status is `"False"`. A missing
/// condition is not settled.
fn condition_is_false(conditions: &[ResourceCondition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == "False")
}

/* ============================= READINESS CHECKS ============================= */

pub fn deployment_is_ready(deploy: &Deployment) -> bool {
    let desired = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = &deploy.status else {
        return false;
    };

    let generation_seen = match (deploy.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        (None, _) => true,
        (Some(_), None) => false,
    };

    generation_seen
        && status.ready_replicas.unwrap_or(0) == desired
        && status.updated_replicas.unwrap_or(0) == desired
        && status.unavailable_replicas.unwrap_or(0) == 0
}

pub fn statefulset_is_ready(sts: &StatefulSet) -> bool {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = &sts.status else {
        return false;
    };

    status.ready_replicas.unwrap_or(0) == desired
        && status.current_replicas.unwrap_or(0) == desired
        && status.replicas == desired
}

pub fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };

    if status.phase.as_deref() == Some("Succeeded") {
        return true;
    }

    status.phase.as_deref() == Some("Running")
        && status
            .conditions
            .as_ref()
            .is_some_and(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

pub fn node_boot_id(node: &Node) -> Option<String> {
    node.status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|i| i.boot_id.clone())
        .filter(|id| !id.is_empty())
}

pub fn cluster_operator_is_stable(obj: &DynamicObject) -> bool {
    let conds = dynamic_conditions(obj);
    condition_is_true(&conds, "Available")
        && condition_is_false(&conds, "Progressing")
        && condition_is_false(&conds, "Degraded")
}

pub fn mcp_is_updated(obj: &DynamicObject) -> bool {
    let conds = dynamic_conditions(obj);
    condition_is_true(&conds, "Updated")
        && condition_is_false(&conds, "Updating")
        && condition_is_false(&conds, "Degraded")
}

/* ============================= WAITERS ============================= */

/// Wait until a namespace exists (`present`) or is fully gone.
pub async fn wait_for_namespace(
    client: &Client,
    name: &str,
    present: bool,
    timeout: Duration,
) -> anyhow::Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let what = if present { "to exist" } else { "to be deleted" };

    wait::poll_until(
        &format!("namespace {name} {what}"),
        timeout,
        FixedInterval(wait::DEFAULT_POLL_INTERVAL),
        || {
            let api = api.clone();
            async move {
                let found = api.get_opt(name).await.map_err(PollError::from_kube)?;
                Ok(found.is_some() == present)
            }
        },
    )
    .await
}

pub async fn wait_for_deployment_ready(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);

    wait::poll_until(
        &format!("deployment {namespace}/{name} to be ready"),
        timeout,
        FixedInterval(wait::DEFAULT_POLL_INTERVAL),
        || {
            let api = api.clone();
            async move {
                let deploy = api.get(name).await.map_err(PollError::from_kube)?;
                Ok(deployment_is_ready(&deploy))
            }
        },
    )
    .await?;

    info!(namespace, deployment = name, "deployment_ready");
    Ok(())
}

pub async fn wait_for_statefulset_ready(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);

    wait::poll_until(
        &format!("statefulset {namespace}/{name} to be ready"),
        timeout,
        FixedInterval(wait::DEFAULT_POLL_INTERVAL),
        || {
            let api = api.clone();
            async move {
                let sts = api.get(name).await.map_err(PollError::from_kube)?;
                Ok(statefulset_is_ready(&sts))
            }
        },
    )
    .await
}

/// Wait until at least one pod matches `selector` and all matching pods are ready.
pub async fn wait_for_pods_ready(
    client: &Client,
    namespace: &str,
    selector: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(selector);

    wait::poll_until(
        &format!("pods {selector} in {namespace} to be ready"),
        timeout,
        FixedInterval(wait::DEFAULT_POLL_INTERVAL),
        || {
            let api = api.clone();
            let params = params.clone();
            async move {
                let pods = api.list(&params).await.map_err(PollError::from_kube)?;
                Ok(!pods.items.is_empty() && pods.items.iter().all(pod_is_ready))
            }
        },
    )
    .await
}

pub async fn wait_for_node_ready(
    client: &Client,
    node: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let api: Api<Node> = Api::all(client.clone());

    wait::poll_until(
        &format!("node {node} to be Ready"),
        timeout,
        FixedInterval(wait::DEFAULT_POLL_INTERVAL),
        || {
            let api = api.clone();
            async move {
                let n = api.get(node).await.map_err(PollError::from_kube)?;
                Ok(node_is_ready(&n))
            }
        },
    )
    .await
}

/// Wait for `node` to come back Ready with a boot ID other than `previous_boot_id`.
///
/// Capture the ID with [`current_boot_id`] before triggering the reboot.
pub async fn wait_for_node_reboot(
    client: &Client,
    node: &str,
    previous_boot_id: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let api: Api<Node> = Api::all(client.clone());

    wait::poll_until(
        &format!("node {node} to reboot"),
        timeout,
        FixedInterval(Duration::from_secs(5)),
        || {
            let api = api.clone();
            async move {
                // The API server itself may be down on SNO while the node reboots.
                let n = api.get(node).await.map_err(PollError::transient)?;
                let rebooted = node_boot_id(&n).is_some_and(|id| id != previous_boot_id);
                Ok(rebooted && node_is_ready(&n))
            }
        },
    )
    .await?;

    info!(node, "node_rebooted");
    Ok(())
}

/// Current boot ID of a node, for use with [`wait_for_node_reboot`].
pub async fn current_boot_id(client: &Client, node: &str) -> anyhow::Result<String> {
    let api: Api<Node> = Api::all(client.clone());
    let n = api.get(node).await?;
    node_boot_id(&n).ok_or_else(|| anyhow::anyhow!("node {node} reports no boot ID"))
}

pub async fn wait_for_cluster_operators_stable(
    client: &Client,
    timeout: Duration,
) -> anyhow::Result<()> {
    let api: Api<DynamicObject> = Api::all_with(client.clone(), &cluster_operator_resource());

    wait::poll_until(
        "cluster operators to be Available and not Progressing/Degraded",
        timeout,
        FixedInterval(Duration::from_secs(10)),
        || {
            let api = api.clone();
            async move {
                let ops = api.list(&ListParams::default()).await.map_err(PollError::from_kube)?;
                Ok(!ops.items.is_empty() && ops.items.iter().all(cluster_operator_is_stable))
            }
        },
    )
    .await
}

pub async fn wait_for_mcp_updated(
    client: &Client,
    pool: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let api: Api<DynamicObject> = Api::all_with(client.clone(), &machine_config_pool_resource());

    wait::poll_until(
        &format!("machine config pool {pool} to be updated"),
        timeout,
        FixedInterval(Duration::from_secs(10)),
        || {
            let api = api.clone();
            async move {
                let mcp = api.get(pool).await.map_err(PollError::from_kube)?;
                Ok(mcp_is_updated(&mcp))
            }
        },
    )
    .await
}

/* ============================= TESTS ============================= */
