use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, ResourceExt};
use tokio::sync::Mutex;

use crate::remote::{self, DEFAULT_COMMAND_TIMEOUT};
use crate::stability::Sample;

/* ============================= CONSTANTS ============================= */

pub const TUNED_NAMESPACE: &str = "openshift-cluster-node-tuning-operator";
const TUNED_SELECTOR: &str = "openshift-app=tuned";

const PTP_DAEMON_SELECTOR: &str = "app=linuxptp-daemon";
const PTP_DAEMON_CONTAINER: &str = "linuxptp-daemon-container";
const PMC_PORT_DATA_SET: &[&str] = &["pmc", "-u", "-b", "0", "GET PORT_DATA_SET"];

/* ============================= POD RESTARTS ============================= */

/// Pod name to the sum of its container restart counts.
pub fn restart_sample(pods: &[Pod]) -> Sample {
    pods.iter()
        .map(|pod| {
            let restarts: i32 = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .map(|cs| cs.iter().map(|c| c.restart_count).sum())
                .unwrap_or(0);
            (pod.name_any(), restarts.to_string())
        })
        .collect()
}

pub async fn pod_restarts(client: &Client, namespace: &str) -> anyhow::Result<Sample> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pods = api.list(&ListParams::default()).await?;
    Ok(restart_sample(&pods.items))
}

pub async fn tuned_restarts(client: &Client) -> anyhow::Result<Sample> {
    let api: Api<Pod> = Api::namespaced(client.clone(), TUNED_NAMESPACE);
    let pods = api.list(&ListParams::default().labels(TUNED_SELECTOR)).await?;
    Ok(restart_sample(&pods.items))
}

/* ============================= POLICY COMPLIANCE ============================= */

pub fn policy_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("policy.open-cluster-management.io", "v1", "Policy"),
        "policies",
    )
}

/// Policy name to `status.compliant`, `Unknown` when not yet reported.
pub fn policy_sample(policies: &[DynamicObject]) -> Sample {
    policies
        .iter()
        .map(|p| {
            let state = p
                .data
                .get("status")
                .and_then(|s| s.get("compliant"))
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");
            (p.name_any(), state.to_string())
        })
        .collect()
}

/// Compliance state of every policy in `namespace`.
///
/// When several tasks share one listing client, pass the same `lock` to all
/// of them so the list calls are serialized.
pub async fn policy_compliance(
    client: &Client,
    namespace: &str,
    lock: Option<&Mutex<()>>,
) -> anyhow::Result<Sample> {
    let _guard = match lock {
        Some(m) => Some(m.lock().await),
        None => None,
    };

    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &policy_resource());
    let policies = api.list(&ListParams::default()).await?;
    Ok(policy_sample(&policies.items))
}

/* ============================= PTP ============================= */

/// Port states from `pmc GET PORT_DATA_SET` output, in report order.
pub fn parse_pmc_port_states(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("portState"), Some(state)) => Some(state.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Daemon pod name to its port states joined with `/`.
pub async fn ptp_clock_state(client: &Client, namespace: &str) -> anyhow::Result<Sample> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pods = api.list(&ListParams::default().labels(PTP_DAEMON_SELECTOR)).await?;

    let mut sample = Sample::new();
    for pod in &pods.items {
        let name = pod.name_any();
        let state = match remote::pod_exec(
            client,
            namespace,
            &name,
            Some(PTP_DAEMON_CONTAINER),
            PMC_PORT_DATA_SET,
            DEFAULT_COMMAND_TIMEOUT,
        )
        .await
        {
            Ok(out) => {
                let states = parse_pmc_port_states(&out);
                if states.is_empty() {
                    "NO_PORTS".to_string()
                } else {
                    states.join("/")
                }
            }
            Err(e) => {
                tracing::warn!(pod = %name, error = %e, "pmc_query_failed");
                "UNREACHABLE".to_string()
            }
        };
        sample.insert(name, state);
    }

    Ok(sample)
}

/* ============================= TESTS ============================= */
