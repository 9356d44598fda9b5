use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::crd::{AllocatedNode, ClusterInstance, NodeAllocationRequest, ProvisioningRequest};
use crate::wait::{self, FixedInterval, PollError};

/* ============================= TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    ProvisioningRequest,
    NodeAllocationRequest,
    AllocatedNode,
    ClusterInstance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::ProvisioningRequest => "ProvisioningRequest",
            ResourceKind::NodeAllocationRequest => "NodeAllocationRequest",
            ResourceKind::AllocatedNode => "AllocatedNode",
            ResourceKind::ClusterInstance => "ClusterInstance",
        };
        f.write_str(s)
    }
}

/// A resource that must go from present to absent within its own window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownTarget {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: Option<String>,
    pub timeout: Duration,
    pub interval: Duration,
}

impl TeardownTarget {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
            timeout: wait::DEFAULT_TEARDOWN_TIMEOUT,
            interval: wait::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_timing(mut self, timeout: Duration, interval: Duration) -> Self {
        self.timeout = timeout;
        self.interval = interval;
        self
    }
}

impl fmt::Display for TeardownTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TeardownOutcome {
    pub target: TeardownTarget,
    pub result: Result<(), String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// One entry per target, in the order the targets were given.
    pub outcomes: Vec<TeardownOutcome>,
}

impl TeardownReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> Vec<&TeardownOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err()).collect()
    }

    /// Error listing every resource that was not confirmed gone.
    pub fn into_result(self) -> anyhow::Result<()> {
        let failures: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| format!("{}: {}", o.target, e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "{} resource(s) still present after teardown:\n  {}",
                failures.len(),
                failures.join("\n  ")
            )
        }
    }
}

/* ========================== PRESENCE CHECK ========================== */

/// Answers whether a target still exists.
pub trait PresenceCheck: Send + Sync + 'static {
    fn exists<'a>(&'a self, target: &'a TeardownTarget) -> BoxFuture<'a, Result<bool, PollError>>;
}

/// Presence check backed by the cluster API.
#[derive(Clone)]
pub struct KubePresence {
    client: Client,
}

impl KubePresence {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, target: &TeardownTarget) -> Result<Api<K>, PollError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        let ns = target.namespace.as_deref().ok_or_else(|| {
            PollError::fatal(anyhow::anyhow!("{target} needs a namespace"))
        })?;
        Ok(Api::namespaced(self.client.clone(), ns))
    }
}

async fn exists_in<K>(api: Api<K>, name: &str) -> Result<bool, PollError>
where
    K: Clone + DeserializeOwned + fmt::Debug,
{
    api.get_opt(name)
        .await
        .map(|obj| obj.is_some())
        .map_err(PollError::from_kube)
}

impl PresenceCheck for KubePresence {
    fn exists<'a>(&'a self, target: &'a TeardownTarget) -> BoxFuture<'a, Result<bool, PollError>> {
        async move {
            let name = target.name.as_str();
            match target.kind {
                ResourceKind::Namespace => {
                    exists_in(Api::<Namespace>::all(self.client.clone()), name).await
                }
                ResourceKind::ProvisioningRequest => {
                    exists_in(Api::<ProvisioningRequest>::all(self.client.clone()), name).await
                }
                ResourceKind::NodeAllocationRequest => {
                    exists_in(self.namespaced::<NodeAllocationRequest>(target)?, name).await
                }
                ResourceKind::AllocatedNode => {
                    exists_in(self.namespaced::<AllocatedNode>(target)?, name).await
                }
                ResourceKind::ClusterInstance => {
                    exists_in(self.namespaced::<ClusterInstance>(target)?, name).await
                }
            }
        }
        .boxed()
    }
}

/* ============================= ORCHESTRATION ============================= */

async fn verify_absent<P: PresenceCheck>(
    presence: &P,
    target: &TeardownTarget,
) -> anyhow::Result<()> {
    let description = format!("{target} to be deleted");
    wait::poll_until(
        &description,
        target.timeout,
        FixedInterval(target.interval),
        || {
            let fut = presence.exists(target);
            async move { fut.await.map(|exists| !exists) }
        },
    )
    .await
}

/// Wait for every target to disappear, each in its own task.
///
/// Returns only after every task has either confirmed absence or exhausted
/// its timeout. Targets are independent; a failing or panicking check does
/// not cut the others short.
pub async fn verify_all_absent<P: PresenceCheck>(
    presence: Arc<P>,
    targets: Vec<TeardownTarget>,
) -> TeardownReport {
    info!(targets = targets.len(), "teardown_verification_start");

    let mut tasks = JoinSet::new();
    for (idx, target) in targets.iter().cloned().enumerate() {
        let presence = presence.clone();
        tasks.spawn(async move {
            let started = Instant::now();
            let result = AssertUnwindSafe(verify_absent(presence.as_ref(), &target))
                .catch_unwind()
                .await;

            let result = match result {
                Ok(Ok(())) => {
                    info!(target = %target, "resource_deleted");
                    Ok(())
                }
                Ok(Err(e)) => {
                    warn!(target = %target, error = %e, "resource_still_present");
                    Err(format!("{e:#}"))
                }
                Err(_) => {
                    warn!(target = %target, "teardown_check_panicked");
                    Err("verification task panicked".to_string())
                }
            };

            (
                idx,
                TeardownOutcome {
                    target,
                    result,
                    elapsed: started.elapsed(),
                },
            )
        });
    }

    let mut slots: Vec<Option<TeardownOutcome>> = vec![None; targets.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, outcome)) => slots[idx] = Some(outcome),
            Err(e) => warn!(error = %e, "teardown_task_join_error"),
        }
    }

    let outcomes = slots
        .into_iter()
        .zip(targets)
        .map(|(slot, target)| {
            slot.unwrap_or_else(|| TeardownOutcome {
                target,
                result: Err("verification task did not complete".to_string()),
                elapsed: Duration::ZERO,
            })
        })
        .collect();

    let report = TeardownReport { outcomes };
    info!(
        success = report.is_success(),
        failures = report.failures().len(),
        "teardown_verification_done"
    );
    report
}

/* ============================= TESTS ============================= */
