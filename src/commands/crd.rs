use anyhow::Result;
use kube::CustomResourceExt;

use telco_systest::crd::{
    AllocatedNode, ClusterInstance, NodeAllocationRequest, ProvisioningRequest,
};

use crate::cli::CrdAction;

pub fn run(action: CrdAction) -> Result<()> {
    match action {
        CrdAction::Generate => generate(),
    }
}

/// Print the O-Cloud CRDs as one multi-document YAML stream, for seeding a
/// test cluster with `kubectl apply -f`.
fn generate() -> Result<()> {
    let crds = [
        ProvisioningRequest::crd(),
        NodeAllocationRequest::crd(),
        AllocatedNode::crd(),
        ClusterInstance::crd(),
    ];

    for crd in &crds {
        let yaml = serde_yaml::to_string(crd)?;
        println!("---\n{yaml}");
    }
    Ok(())
}
