use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use kube::Client;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::StabilityConfig;
use crate::samplers;
use crate::stability::{self, Sample, StabilityVerdict};

/* ============================= JOBS ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    PodRestarts,
    PolicyCompliance,
    TunedRestarts,
    PtpClockState,
}

impl SamplerKind {
    /// Short name used in log file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplerKind::PodRestarts => "pod_restarts",
            SamplerKind::PolicyCompliance => "policies",
            SamplerKind::TunedRestarts => "tuned_restarts",
            SamplerKind::PtpClockState => "ptp",
        }
    }
}

/// One sampler bound to its own log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleJob {
    pub kind: SamplerKind,
    pub namespace: Option<String>,
    pub path: PathBuf,
}

impl SampleJob {
    fn new(cfg: &StabilityConfig, kind: SamplerKind, namespace: Option<&str>) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            path: stability::log_path(&cfg.output_dir, kind.as_str(), namespace),
        }
    }
}

/// Every enabled sampler for this configuration.
pub fn plan_jobs(cfg: &StabilityConfig) -> Vec<SampleJob> {
    let mut jobs: Vec<SampleJob> = cfg
        .namespaces
        .iter()
        .map(|ns| SampleJob::new(cfg, SamplerKind::PodRestarts, Some(ns)))
        .collect();

    if cfg.collect_policies {
        jobs.push(SampleJob::new(
            cfg,
            SamplerKind::PolicyCompliance,
            Some(&cfg.policy_namespace),
        ));
    }
    if cfg.collect_tuned {
        jobs.push(SampleJob::new(cfg, SamplerKind::TunedRestarts, None));
    }
    if cfg.collect_ptp {
        jobs.push(SampleJob::new(cfg, SamplerKind::PtpClockState, Some(&cfg.ptp_namespace)));
    }

    jobs
}

/* ============================= SAMPLER SEAM ============================= */

pub trait SampleSource: Send + Sync {
    fn sample<'a>(&'a self, job: &'a SampleJob) -> BoxFuture<'a, anyhow::Result<Sample>>;
}

/// Samples taken from the live cluster.
pub struct ClusterSource {
    client: Client,
    policy_lock: Mutex<()>,
}

impl ClusterSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy_lock: Mutex::new(()),
        }
    }
}

impl SampleSource for ClusterSource {
    fn sample<'a>(&'a self, job: &'a SampleJob) -> BoxFuture<'a, anyhow::Result<Sample>> {
        Box::pin(async move {
            let ns = job.namespace.as_deref().unwrap_or_default();
            match job.kind {
                SamplerKind::PodRestarts => samplers::pod_restarts(&self.client, ns).await,
                SamplerKind::PolicyCompliance => {
                    samplers::policy_compliance(&self.client, ns, Some(&self.policy_lock)).await
                }
                SamplerKind::TunedRestarts => samplers::tuned_restarts(&self.client).await,
                SamplerKind::PtpClockState => samplers::ptp_clock_state(&self.client, ns).await,
            }
        })
    }
}

/* ============================= REPORT ============================= */

#[derive(Debug)]
pub struct SoakFileResult {
    pub job: SampleJob,
    /// Verification outcome, `Err` when the file could not be read or parsed.
    pub verdict: Result<StabilityVerdict, String>,
}

#[derive(Debug, Default)]
pub struct SoakReport {
    pub rounds: u32,
    pub failed_samples: u32,
    pub interrupted: bool,
    pub files: Vec<SoakFileResult>,
}

impl SoakReport {
    pub fn is_stable(&self) -> bool {
        self.files
            .iter()
            .all(|f| matches!(f.verdict, Ok(StabilityVerdict::Stable)))
    }

    pub fn into_result(self) -> anyhow::Result<()> {
        let problems: Vec<String> = self
            .files
            .iter()
            .filter_map(|f| match &f.verdict {
                Ok(StabilityVerdict::Stable) => None,
                Ok(StabilityVerdict::Changed(change)) => {
                    Some(format!("{}: {}", f.job.path.display(), change))
                }
                Err(e) => Some(format!("{}: {}", f.job.path.display(), e)),
            })
            .collect();

        if problems.is_empty() {
            return Ok(());
        }
        anyhow::bail!("stability check failed:\n  {}", problems.join("\n  "))
    }
}

/* ============================= RUNNER ============================= */

/// Take one sample per job and append it. Returns the number of failures.
pub async fn sample_round<S: SampleSource>(source: &S, jobs: &[SampleJob]) -> u32 {
    let mut failures = 0;

    for job in jobs {
        let written = match source.sample(job).await {
            Ok(sample) => stability::write_sample(&job.path, &sample),
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => info!(
                kind = job.kind.as_str(),
                path = %job.path.display(),
                "sample_written"
            ),
            Err(e) => {
                failures += 1;
                warn!(
                    kind = job.kind.as_str(),
                    namespace = job.namespace.as_deref().unwrap_or("-"),
                    error = %e,
                    "sample_failed"
                );
            }
        }
    }

    failures
}

/// Sample every `interval` until `duration` elapses or `shutdown` resolves,
/// then verify every log file.
///
/// Logs left by an earlier run are rotated to `.prev` first, so each verdict
/// covers only this run's samples.
pub async fn run_soak_with<S, F>(
    source: &S,
    jobs: Vec<SampleJob>,
    duration: Duration,
    interval: Duration,
    shutdown: F,
) -> SoakReport
where
    S: SampleSource,
    F: Future<Output = ()>,
{
    let mut report = SoakReport::default();

    let mut unrotated: HashMap<PathBuf, String> = HashMap::new();
    for job in &jobs {
        match stability::rotate_log(&job.path) {
            Ok(Some(prev)) => {
                info!(path = %job.path.display(), prev = %prev.display(), "log_rotated")
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %job.path.display(), error = %e, "log_rotation_failed");
                unrotated.insert(job.path.clone(), format!("{e:#}"));
            }
        }
    }

    let deadline = Instant::now() + duration;
    tokio::pin!(shutdown);

    loop {
        report.failed_samples += sample_round(source, &jobs).await;
        report.rounds += 1;

        let next = Instant::now() + interval;
        if next > deadline {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(next) => {}
            _ = &mut shutdown => {
                warn!(rounds = report.rounds, "soak_interrupted");
                report.interrupted = true;
                break;
            }
        }
    }

    for job in jobs {
        let verdict = match unrotated.remove(&job.path) {
            Some(e) => Err(format!("previous run's log could not be rotated: {e}")),
            None => stability::verify_log(&job.path).map_err(|e| format!("{e:#}")),
        };
        match &verdict {
            Ok(StabilityVerdict::Stable) => info!(path = %job.path.display(), "log_stable"),
            Ok(StabilityVerdict::Changed(c)) => {
                warn!(path = %job.path.display(), key = %c.key, "log_changed")
            }
            Err(e) => warn!(path = %job.path.display(), error = %e, "log_unreadable"),
        }
        report.files.push(SoakFileResult { job, verdict });
    }

    report
}

/// Soak the live cluster with the configured samplers. Ctrl+C ends sampling early.
pub async fn run_soak(client: Client, cfg: &StabilityConfig) -> SoakReport {
    let jobs = plan_jobs(cfg);
    info!(
        jobs = jobs.len(),
        duration_secs = cfg.duration_secs,
        interval_secs = cfg.interval_secs,
        "soak_started"
    );

    let source = ClusterSource::new(client);
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    run_soak_with(&source, jobs, cfg.duration(), cfg.interval(), shutdown).await
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        calls: AtomicU32,
        change_at: Option<u32>,
        fail_at: Option<u32>,
    }

    impl Scripted {
        fn new(change_at: Option<u32>, fail_at: Option<u32>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                change_at,
                fail_at,
            }
        }
    }

    impl SampleSource for Scripted {
        fn sample<'a>(&'a self, _job: &'a SampleJob) -> BoxFuture<'a, anyhow::Result<Sample>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if self.fail_at == Some(n) {
                    anyhow::bail!("api unavailable");
                }
                let restarts = if self.change_at.is_some_and(|c| n >= c) { "1" } else { "0" };
                let mut s = Sample::new();
                s.insert("etcd-sno".to_string(), restarts.to_string());
                Ok(s)
            })
        }
    }

    fn cfg(dir: &std::path::Path) -> StabilityConfig {
        StabilityConfig {
            output_dir: dir.to_path_buf(),
            namespaces: vec!["openshift-etcd".to_string()],
            collect_tuned: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_jobs_defaults() {
        let c = StabilityConfig::default();
        let jobs = plan_jobs(&c);
        let kinds: Vec<_> = jobs.iter().map(|j| j.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SamplerKind::PodRestarts,
                SamplerKind::PodRestarts,
                SamplerKind::TunedRestarts
            ]
        );
        assert!(jobs[0].path.ends_with("stability_pod_restarts_openshift-etcd.log"));
        assert!(jobs[2].path.ends_with("stability_tuned_restarts.log"));
    }

    #[test]
    fn test_plan_jobs_optional_samplers() {
        let c = StabilityConfig {
            namespaces: vec![],
            collect_policies: true,
            collect_ptp: true,
            collect_tuned: false,
            ..Default::default()
        };
        let jobs = plan_jobs(&c);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].namespace.as_deref(), Some("ztp-install"));
        assert!(jobs[1].path.ends_with("stability_ptp_openshift-ptp.log"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soak_stable_run() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let source = Scripted::new(None, None);

        let report = run_soak_with(
            &source,
            plan_jobs(&c),
            Duration::from_secs(20),
            Duration::from_secs(5),
            std::future::pending(),
        )
        .await;

        assert_eq!(report.rounds, 5);
        assert_eq!(report.failed_samples, 0);
        assert!(!report.interrupted);
        assert!(report.is_stable());
        assert!(report.into_result().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soak_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let source = Scripted::new(Some(3), None);

        let report = run_soak_with(
            &source,
            plan_jobs(&c),
            Duration::from_secs(20),
            Duration::from_secs(5),
            std::future::pending(),
        )
        .await;

        assert!(!report.is_stable());
        let change = report.files[0]
            .verdict
            .as_ref()
            .unwrap()
            .change()
            .cloned()
            .unwrap();
        assert_eq!(change.line, 3);
        assert_eq!(change.before, "0");
        assert_eq!(change.after, "1");
        assert!(report.into_result().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soak_failed_sample_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let source = Scripted::new(None, Some(2));

        let report = run_soak_with(
            &source,
            plan_jobs(&c),
            Duration::from_secs(10),
            Duration::from_secs(5),
            std::future::pending(),
        )
        .await;

        assert_eq!(report.rounds, 3);
        assert_eq!(report.failed_samples, 1);
        assert!(report.is_stable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_in_same_dir_judged_on_its_own_samples() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());

        let first = run_soak_with(
            &Scripted::new(None, None),
            plan_jobs(&c),
            Duration::from_secs(10),
            Duration::from_secs(5),
            std::future::pending(),
        )
        .await;
        assert!(first.is_stable());

        // Restart count moved between runs; constant within the second run.
        let second = run_soak_with(
            &Scripted::new(Some(1), None),
            plan_jobs(&c),
            Duration::from_secs(10),
            Duration::from_secs(5),
            std::future::pending(),
        )
        .await;
        assert!(second.is_stable(), "{:?}", second.files[0].verdict);

        let path = &second.files[0].job.path;
        let current = std::fs::read_to_string(path).unwrap();
        assert_eq!(current.lines().count(), 3);
        assert!(current.lines().all(|l| l.ends_with(",1")));

        let prev = std::fs::read_to_string(format!("{}.prev", path.display())).unwrap();
        assert_eq!(prev.lines().count(), 3);
        assert!(prev.lines().all(|l| l.ends_with(",0")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soak_shutdown_still_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let c = cfg(dir.path());
        let source = Scripted::new(None, None);

        let report = run_soak_with(
            &source,
            plan_jobs(&c),
            Duration::from_secs(3600),
            Duration::from_secs(60),
            tokio::time::sleep(Duration::from_secs(150)),
        )
        .await;

        assert!(report.interrupted);
        assert_eq!(report.rounds, 3);
        assert_eq!(report.files.len(), 1);
        assert!(report.is_stable());
    }
}
