use kube::CustomResource;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};

/* ============================= SHARED ============================= */

/// Status condition as reported by the O-Cloud and SiteConfig controllers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Look up a condition by type.
pub fn find_condition<'a>(
    conditions: &'a [ResourceCondition],
    type_: &str,
) -> Option<&'a ResourceCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when the condition exists and its status is `"True"`.
pub fn condition_is_true(conditions: &[ResourceCondition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == "True")
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut obj = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    obj.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(obj)
}

/* ============================= PROVISIONING REQUEST ============================= */

/// ProvisioningRequest asks the O-Cloud manager for a cluster built from a
/// cluster template.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clcm.openshift.io",
    version = "v1alpha1",
    kind = "ProvisioningRequest",
    plural = "provisioningrequests",
    status = "ProvisioningRequestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub template_name: String,

    pub template_version: String,

    /// Free-form parameters validated by the template's schema.
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub template_parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequestStatus {
    #[serde(default)]
    pub conditions: Vec<ResourceCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_status: Option<ProvisioningStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ProvisioningExtensions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningStatus {
    /// One of `pending`, `progressing`, `fulfilled`, `failed`, `deleting`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_details: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_details: Option<ClusterDetails>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_allocation_request_ref: Option<NodeAllocationRequestRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetails {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestRef {
    #[serde(rename = "nodeAllocationRequestID")]
    pub node_allocation_request_id: String,
}

pub const PHASE_FULFILLED: &str = "fulfilled";
pub const PHASE_FAILED: &str = "failed";

impl ProvisioningRequest {
    pub fn phase(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .provisioning_status
            .as_ref()?
            .provisioning_phase
            .as_deref()
    }

    /// Name of the cluster this request produced, once known.
    pub fn cluster_name(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .extensions
            .as_ref()?
            .cluster_details
            .as_ref()
            .map(|d| d.name.as_str())
    }

    pub fn node_allocation_request_id(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .extensions
            .as_ref()?
            .node_allocation_request_ref
            .as_ref()
            .map(|r| r.node_allocation_request_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/* ============================= NODE ALLOCATION ============================= */

/// Hardware request created by the O-Cloud manager on behalf of a
/// ProvisioningRequest.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "plugins.clcm.openshift.io",
    version = "v1alpha1",
    kind = "NodeAllocationRequest",
    plural = "nodeallocationrequests",
    status = "NodeAllocationRequestStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestStatus {
    #[serde(default)]
    pub conditions: Vec<ResourceCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<NodeAllocationProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationProperties {
    /// Names of the AllocatedNode objects backing this request.
    #[serde(default)]
    pub node_names: Vec<String>,
}

impl NodeAllocationRequest {
    pub fn allocated_node_names(&self) -> Vec<String> {
        self.status
            .as_ref()
            .and_then(|s| s.properties.as_ref())
            .map(|p| p.node_names.clone())
            .unwrap_or_default()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| condition_is_true(&s.conditions, "Provisioned"))
    }
}

/// A bare-metal node handed to a NodeAllocationRequest.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "plugins.clcm.openshift.io",
    version = "v1alpha1",
    kind = "AllocatedNode",
    plural = "allocatednodes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedNodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_allocation_request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

/* ============================= CLUSTER INSTANCE ============================= */

/// SiteConfig ClusterInstance rendered for the provisioned cluster.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "siteconfig.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ClusterInstance",
    plural = "clusterinstances",
    status = "ClusterInstanceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInstanceSpec {
    #[serde(default)]
    pub cluster_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_domain: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInstanceStatus {
    #[serde(default)]
    pub conditions: Vec<ResourceCondition>,
}

impl ClusterInstance {
    pub fn is_provisioned(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| condition_is_true(&s.conditions, "Provisioned"))
    }
}

/* ============================= TESTS ============================= */
