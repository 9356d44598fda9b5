pub mod check;
pub mod crd;
pub mod exec;
pub mod ocloud;
pub mod report;
pub mod stability;
pub mod version;
pub mod wait;

use anyhow::Context;
use kube::config::KubeConfigOptions;
use kube::{Client, Config};

use telco_systest::config::SystestConfig;

/// Client for the configured kubeconfig context, or the current one.
pub async fn connect(config: &SystestConfig) -> anyhow::Result<Client> {
    let Some(context) = &config.kube_context else {
        return Client::try_default()
            .await
            .context("Failed to connect to Kubernetes cluster. Is your kubeconfig valid?");
    };

    let options = KubeConfigOptions {
        context: Some(context.clone()),
        ..Default::default()
    };
    let kube_config = Config::from_kubeconfig(&options)
        .await
        .with_context(|| format!("Failed to load kubeconfig context {context}"))?;
    Client::try_from(kube_config).context("Failed to build Kubernetes client")
}
