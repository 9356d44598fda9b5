use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::{
    ContainerStatus, Node, NodeCondition, NodeStatus, NodeSystemInfo, Pod, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use telco_systest::crd::{
    ClusterDetails, NodeAllocationRequestRef, ProvisioningExtensions, ProvisioningRequest,
    ProvisioningRequestSpec, ProvisioningRequestStatus, ProvisioningStatus,
};
use telco_systest::stability::Sample;
use telco_systest::teardown::{PresenceCheck, TeardownTarget};
use telco_systest::wait::PollError;

#[allow(dead_code)]
pub fn make_test_pod(name: &str, namespace: &str, restarts: &[i32]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(
                restarts
                    .iter()
                    .enumerate()
                    .map(|(i, r)| ContainerStatus {
                        name: format!("container-{i}"),
                        restart_count: *r,
                        ready: true,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn make_test_node(name: &str, ready: bool, boot_id: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            node_info: Some(NodeSystemInfo {
                boot_id: boot_id.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A ProvisioningRequest with the status fields the O-Cloud manager fills in.
#[allow(dead_code)]
pub fn make_provisioning_request(
    name: &str,
    phase: &str,
    cluster: Option<&str>,
    nar: Option<&str>,
) -> ProvisioningRequest {
    let mut pr = ProvisioningRequest::new(
        name,
        ProvisioningRequestSpec {
            template_name: "sno-ran-du".to_string(),
            template_version: "v4-18-1".to_string(),
            ..Default::default()
        },
    );
    pr.status = Some(ProvisioningRequestStatus {
        provisioning_status: Some(ProvisioningStatus {
            provisioning_phase: Some(phase.to_string()),
            provisioning_details: None,
        }),
        extensions: Some(ProvisioningExtensions {
            cluster_details: cluster.map(|c| ClusterDetails { name: c.to_string() }),
            node_allocation_request_ref: nar.map(|n| NodeAllocationRequestRef {
                node_allocation_request_id: n.to_string(),
            }),
        }),
        ..Default::default()
    });
    pr
}

#[allow(dead_code)]
pub fn make_sample(pairs: &[(&str, &str)]) -> Sample {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Fake presence check: a resource named in `gone_after` disappears after that many
/// checks; anything else is reported absent immediately.
#[allow(dead_code)]
pub struct FakePresence {
    gone_after: HashMap<String, Option<u32>>,
    calls: Mutex<HashMap<String, u32>>,
}

#[allow(dead_code)]
impl FakePresence {
    pub fn new(entries: &[(&str, Option<u32>)]) -> Self {
        Self {
            gone_after: entries
                .iter()
                .map(|(name, after)| (name.to_string(), *after))
                .collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl PresenceCheck for FakePresence {
    fn exists<'a>(&'a self, target: &'a TeardownTarget) -> BoxFuture<'a, Result<bool, PollError>> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(target.name.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let exists = match self.gone_after.get(&target.name) {
            Some(Some(after)) => n < *after,
            Some(None) => true,
            None => false,
        };
        Box::pin(async move { Ok(exists) })
    }
}
