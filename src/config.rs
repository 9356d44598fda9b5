use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::remote::{SshAuth, SshTarget};

/* ============================= DEFAULTS ============================= */

const DEFAULT_OUTPUT_DIR: &str = "/tmp/reports";
const DEFAULT_SOAK_DURATION_SECS: u64 = 15 * 60;
const DEFAULT_SOAK_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_PTP_NAMESPACE: &str = "openshift-ptp";
const DEFAULT_POLICY_NAMESPACE: &str = "ztp-install";
const DEFAULT_HARDWARE_NAMESPACE: &str = "oran-hwmgr-plugin";
const DEFAULT_TEARDOWN_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_TEARDOWN_INTERVAL_SECS: u64 = 1;
const DEFAULT_PROVISION_TIMEOUT_SECS: u64 = 90 * 60;

const ENV_PREFIX: &str = "SYSTEST_";

/* ============================= TYPES ============================= */

/// Process-wide settings, built once in `main` and passed down explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SystestConfig {
    /// Kubeconfig context; `None` uses the current context.
    pub kube_context: Option<String>,
    pub stability: StabilityConfig,
    pub ocloud: OcloudConfig,
    pub ssh: Option<SshConfig>,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StabilityConfig {
    pub output_dir: PathBuf,
    pub duration_secs: u64,
    pub interval_secs: u64,
    /// Namespaces whose pod restarts are sampled.
    pub namespaces: Vec<String>,
    pub collect_policies: bool,
    pub policy_namespace: String,
    pub collect_ptp: bool,
    pub ptp_namespace: String,
    pub collect_tuned: bool,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            duration_secs: DEFAULT_SOAK_DURATION_SECS,
            interval_secs: DEFAULT_SOAK_INTERVAL_SECS,
            namespaces: vec![
                "openshift-etcd".to_string(),
                "openshift-apiserver".to_string(),
            ],
            collect_policies: false,
            policy_namespace: DEFAULT_POLICY_NAMESPACE.to_string(),
            collect_ptp: false,
            ptp_namespace: DEFAULT_PTP_NAMESPACE.to_string(),
            collect_tuned: true,
        }
    }
}

impl StabilityConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct OcloudConfig {
    /// Namespace holding NodeAllocationRequests and AllocatedNodes.
    pub hardware_namespace: String,
    pub teardown_timeout_secs: u64,
    pub teardown_interval_secs: u64,
    pub provision_timeout_secs: u64,
}

impl Default for OcloudConfig {
    fn default() -> Self {
        Self {
            hardware_namespace: DEFAULT_HARDWARE_NAMESPACE.to_string(),
            teardown_timeout_secs: DEFAULT_TEARDOWN_TIMEOUT_SECS,
            teardown_interval_secs: DEFAULT_TEARDOWN_INTERVAL_SECS,
            provision_timeout_secs: DEFAULT_PROVISION_TIMEOUT_SECS,
        }
    }
}

impl OcloudConfig {
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }

    pub fn teardown_interval(&self) -> Duration {
        Duration::from_secs(self.teardown_interval_secs)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl SshConfig {
    /// Key auth wins when both a key and a password are configured.
    pub fn target(&self) -> Result<SshTarget> {
        let auth = match (&self.key_path, &self.password) {
            (Some(key), _) => SshAuth::Key(key.clone()),
            (None, Some(pw)) => SshAuth::Password(pw.clone()),
            (None, None) => {
                anyhow::bail!("ssh host {} has neither key_path nor password", self.host)
            }
        };

        Ok(SshTarget {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            auth,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ReportConfig {
    pub dir: PathBuf,
    /// Namespaces dumped when a run fails.
    pub namespaces: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_OUTPUT_DIR).join("failure-dumps"),
            namespaces: Vec::new(),
        }
    }
}

/* ============================= LOADING ============================= */

impl SystestConfig {
    /// Defaults, then the YAML file (if any), then `SYSTEST_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("KUBE_CONTEXT") {
            self.kube_context = Some(v);
        }
        if let Some(v) = var("STABILITY_OUTPUT_DIR") {
            self.stability.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var("STABILITY_DURATION_SECS") {
            self.stability.duration_secs = parse_secs("STABILITY_DURATION_SECS", &v)?;
        }
        if let Some(v) = var("STABILITY_INTERVAL_SECS") {
            self.stability.interval_secs = parse_secs("STABILITY_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("STABILITY_NAMESPACES") {
            self.stability.namespaces = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("HARDWARE_NAMESPACE") {
            self.ocloud.hardware_namespace = v;
        }
        if let Some(v) = var("TEARDOWN_TIMEOUT_SECS") {
            self.ocloud.teardown_timeout_secs = parse_secs("TEARDOWN_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("REPORT_DIR") {
            self.report.dir = PathBuf::from(v);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.stability;
        if s.interval_secs == 0 {
            anyhow::bail!("stability.interval_secs must be greater than zero");
        }
        if s.interval_secs > s.duration_secs {
            anyhow::bail!(
                "stability.interval_secs ({}) exceeds stability.duration_secs ({})",
                s.interval_secs,
                s.duration_secs
            );
        }
        if self.ocloud.teardown_interval_secs == 0 {
            anyhow::bail!("ocloud.teardown_interval_secs must be greater than zero");
        }
        Ok(())
    }
}

fn parse_secs(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{ENV_PREFIX}{name} must be a number of seconds, got {value:?}"))
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SystestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ocloud.teardown_timeout(), Duration::from_secs(1800));
        assert_eq!(config.ocloud.teardown_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config = SystestConfig::from_yaml("").unwrap();
        assert_eq!(config.stability.interval_secs, DEFAULT_SOAK_INTERVAL_SECS);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
stability:
  duration_secs: 3600
  namespaces: [openshift-ptp, openshift-sriov-network-operator]
ocloud:
  hardware_namespace: custom-hwmgr
"#;
        let config = SystestConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.stability.duration_secs, 3600);
        assert_eq!(config.stability.interval_secs, DEFAULT_SOAK_INTERVAL_SECS);
        assert_eq!(config.stability.namespaces.len(), 2);
        assert_eq!(config.ocloud.hardware_namespace, "custom-hwmgr");
        assert_eq!(config.ocloud.teardown_timeout_secs, DEFAULT_TEARDOWN_TIMEOUT_SECS);
    }

    #[test]
    fn test_env_overrides_yaml() {
        let mut config = SystestConfig::from_yaml("kube_context: hub\n").unwrap();
        config
            .apply_env(env(&[
                ("SYSTEST_KUBE_CONTEXT", "spoke"),
                ("SYSTEST_STABILITY_NAMESPACES", "a, b,,c"),
                ("SYSTEST_STABILITY_INTERVAL_SECS", "30"),
            ]))
            .unwrap();

        assert_eq!(config.kube_context.as_deref(), Some("spoke"));
        assert_eq!(config.stability.namespaces, vec!["a", "b", "c"]);
        assert_eq!(config.stability.interval_secs, 30);
    }

    #[test]
    fn test_env_bad_number_is_error() {
        let mut config = SystestConfig::default();
        let err = config
            .apply_env(env(&[("SYSTEST_TEARDOWN_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("SYSTEST_TEARDOWN_TIMEOUT_SECS"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = SystestConfig::default();
        config.stability.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_interval_longer_than_duration() {
        let mut config = SystestConfig::default();
        config.stability.duration_secs = 60;
        config.stability.interval_secs = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ssh_target_prefers_key() {
        let ssh = SshConfig {
            host: "secgw.example.com".to_string(),
            port: 22,
            user: "core".to_string(),
            key_path: Some(PathBuf::from("/root/.ssh/id_rsa")),
            password: Some("secret".to_string()),
        };
        let target = ssh.target().unwrap();
        assert!(matches!(target.auth, SshAuth::Key(_)));
    }

    #[test]
    fn test_ssh_target_without_credentials_is_error() {
        let ssh = SshConfig {
            host: "hv".to_string(),
            port: 22,
            user: "root".to_string(),
            key_path: None,
            password: None,
        };
        assert!(ssh.target().is_err());
    }

    #[test]
    fn test_ssh_port_defaults_to_22() {
        let yaml = "ssh:\n  host: hv\n  user: root\n  password: pw\n";
        let config = SystestConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.ssh.unwrap().port, 22);
    }
}
