use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::ListParams;
use kube::{Api, Client};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ReportConfig;

/// Directory for one dump: `<base>/<label>-<timestamp>`.
///
/// Characters outside `[A-Za-z0-9._-]` in the label are replaced with `_`.
pub fn dump_dir(base: &Path, label: &str, timestamp: &str) -> PathBuf {
    let clean: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    base.join(format!("{clean}-{timestamp}"))
}

/// Serialize `items` as one YAML document into `path`.
pub fn write_yaml<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(items)?;
    fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write pods and events of every configured namespace under a new dump
/// directory. A namespace that cannot be listed is skipped.
pub async fn dump_namespaces(client: &Client, cfg: &ReportConfig, label: &str) -> Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let dir = dump_dir(&cfg.dir, label, &timestamp);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

    for ns in &cfg.namespaces {
        if let Err(e) = dump_namespace(client, &dir, ns).await {
            warn!(namespace = %ns, error = %e, "namespace_dump_failed");
        }
    }

    info!(dir = %dir.display(), namespaces = cfg.namespaces.len(), "report_written");
    Ok(dir)
}

async fn dump_namespace(client: &Client, dir: &Path, namespace: &str) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod_list = pods
        .list(&ListParams::default())
        .await
        .with_context(|| format!("Failed to list pods in {namespace}"))?;
    write_yaml(&dir.join(namespace).join("pods.yaml"), &pod_list.items)?;

    let events: Api<Event> = Api::namespaced(client.clone(), namespace);
    let event_list = events
        .list(&ListParams::default())
        .await
        .with_context(|| format!("Failed to list events in {namespace}"))?;
    write_yaml(&dir.join(namespace).join("events.yaml"), &event_list.items)?;

    Ok(())
}
