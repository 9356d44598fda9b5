use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "telco-systest")]
#[command(about = "System-test helpers for telco OpenShift clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and permissions
    Check,

    /// Sample cluster state over time and compare the samples
    Stability {
        #[command(subcommand)]
        action: StabilityAction,
    },

    /// O-Cloud provisioning and teardown flows
    Ocloud {
        #[command(subcommand)]
        action: OcloudAction,
    },

    /// Wait for a cluster condition
    Wait {
        #[command(subcommand)]
        target: WaitTarget,
        /// Give up after this many seconds
        #[arg(long, global = true, default_value_t = 600)]
        timeout_secs: u64,
    },

    /// Run a command locally, over SSH or on a node
    Exec {
        #[command(subcommand)]
        action: ExecAction,
        /// Give up after this many seconds
        #[arg(long, global = true, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Failure dumps
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Print the O-Cloud CRDs used by this tool
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },
}

#[derive(Subcommand)]
pub enum StabilityAction {
    /// Run the soak with the configured samplers, then verify every log
    Run,

    /// Verify existing stability logs
    Verify {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum OcloudAction {
    /// Wait for a ProvisioningRequest and everything it creates
    VerifyProvisioning { request: String },

    /// Delete ProvisioningRequests and wait for their resources to be gone
    Deprovision {
        #[arg(required = true)]
        requests: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum WaitTarget {
    /// Wait for a namespace to exist (or be deleted with --absent)
    Namespace {
        name: String,
        #[arg(long)]
        absent: bool,
    },

    /// Wait for a deployment to be fully rolled out
    Deployment { namespace: String, name: String },

    /// Wait for a node to report Ready
    NodeReady { node: String },

    /// Wait for a node to come back with a new boot ID
    NodeReboot {
        node: String,
        /// Boot ID before the reboot; read from the node when omitted
        #[arg(long)]
        boot_id: Option<String>,
    },

    /// Wait for every ClusterOperator to be available and settled
    ClusterOperators,

    /// Wait for a MachineConfigPool to finish updating
    Mcp { pool: String },
}

#[derive(Subcommand)]
pub enum ExecAction {
    /// Run a command with bash -c
    Shell { command: String },

    /// Run a command on the configured SSH host
    Ssh { command: String },

    /// Run a command on a node through oc debug
    Node { node: String, command: String },
}

#[derive(Subcommand)]
pub enum ReportAction {
    /// Dump pods and events of the configured namespaces
    Dump {
        #[arg(long, default_value = "manual")]
        label: String,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML to stdout
    Generate,
}
