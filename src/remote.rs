use std::path::{Path, PathBuf};
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/* ============================= CONFIG ============================= */

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const SSH_CONNECT_TIMEOUT_SECS: u32 = 10;

/// `ssh` reserves this exit code for its own failures.
const SSH_ERROR_EXIT: i32 = 255;

/// `sshpass` exit code for a rejected password.
const SSHPASS_BAD_PASSWORD_EXIT: i32 = 5;

/* ============================= ERRORS ============================= */

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("cannot connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("authentication to {host} failed: {message}")]
    Auth { host: String, message: String },

    #[error("command exited with status {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pod exec failed: {0}")]
    Kube(#[from] kube::Error),
}

/// Output of a remote command, sendable across tasks.
pub type SshCommandResult = Result<String, RemoteError>;

/* ============================= TARGETS ============================= */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
    Key(PathBuf),
    Password(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
}

impl SshTarget {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Program, arguments and extra environment for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    fn args<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(items.into_iter().map(Into::into));
        self
    }
}

struct CommandOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/* ============================= COMMAND BUILDING ============================= */

fn common_ssh_options(tool: &str, target: &SshTarget) -> Vec<String> {
    let port_flag = if tool == "scp" { "-P" } else { "-p" };
    let mut opts = vec![
        port_flag.to_string(),
        target.port.to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_SECS}"),
    ];

    match &target.auth {
        SshAuth::Key(path) => {
            opts.extend([
                "-i".to_string(),
                path.display().to_string(),
                "-o".to_string(),
                "BatchMode=yes".to_string(),
            ]);
        }
        SshAuth::Password(_) => {
            opts.extend([
                "-o".to_string(),
                "PubkeyAuthentication=no".to_string(),
            ]);
        }
    }

    opts
}

/// Wrap `tool` in `sshpass` when the target uses password auth.
///
/// The password travels through `SSHPASS` rather than argv.
fn wrap_auth(tool: &str, target: &SshTarget) -> CommandSpec {
    match &target.auth {
        SshAuth::Key(_) => CommandSpec::new(tool),
        SshAuth::Password(pw) => {
            let mut spec = CommandSpec::new("sshpass").arg("-e").arg(tool);
            spec.env.push(("SSHPASS".to_string(), pw.clone()));
            spec
        }
    }
}

pub fn ssh_command(target: &SshTarget, command: &str) -> CommandSpec {
    wrap_auth("ssh", target)
        .args(common_ssh_options("ssh", target))
        .arg(target.destination())
        .arg(command)
}

pub fn scp_to_command(target: &SshTarget, local: &Path, remote: &str) -> CommandSpec {
    wrap_auth("scp", target)
        .args(common_ssh_options("scp", target))
        .arg(local.display().to_string())
        .arg(format!("{}:{}", target.destination(), remote))
}

pub fn scp_from_command(target: &SshTarget, remote: &str, local: &Path) -> CommandSpec {
    wrap_auth("scp", target)
        .args(common_ssh_options("scp", target))
        .arg(format!("{}:{}", target.destination(), remote))
        .arg(local.display().to_string())
}

pub fn debug_node_command(node: &str, command: &str) -> CommandSpec {
    CommandSpec::new("oc")
        .arg("debug")
        .arg(format!("node/{node}"))
        .args(["--", "chroot", "/host", "bash", "-c"])
        .arg(command)
}

/* ============================= FAILURE CLASSIFICATION ============================= */

/// Turn a non-zero ssh/scp exit into connection, auth or command failure.
pub fn classify_ssh_failure(host: &str, code: Option<i32>, stderr: &str) -> RemoteError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();

    if code == Some(SSHPASS_BAD_PASSWORD_EXIT) {
        return RemoteError::Auth {
            host: host.to_string(),
            message,
        };
    }

    if code == Some(SSH_ERROR_EXIT) {
        let auth_markers = [
            "permission denied",
            "authentication failed",
            "no such identity",
            "identity file",
            "too many authentication failures",
        ];
        if auth_markers.iter().any(|m| lower.contains(m)) {
            return RemoteError::Auth {
                host: host.to_string(),
                message,
            };
        }
        return RemoteError::Connect {
            host: host.to_string(),
            message,
        };
    }

    RemoteError::CommandFailed {
        code,
        stderr: message,
    }
}

fn check_key(target: &SshTarget) -> Result<(), RemoteError> {
    if let SshAuth::Key(path) = &target.auth
        && !path.exists()
    {
        return Err(RemoteError::Auth {
            host: target.host.clone(),
            message: format!("private key {} not found", path.display()),
        });
    }
    Ok(())
}

/* ============================= EXECUTION ============================= */

async fn run(spec: &CommandSpec, limit: Duration) -> Result<CommandOutput, RemoteError> {
    debug!(program = %spec.program, args = ?spec.args, "command_start");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).kill_on_drop(true);
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    let output = match timeout(limit, cmd.output()).await {
        Ok(result) => result.map_err(|source| RemoteError::Spawn {
            program: spec.program.clone(),
            source,
        })?,
        Err(_) => return Err(RemoteError::Timeout(limit)),
    };

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run `command` through `bash -c` on the local host.
pub async fn run_shell(command: &str, limit: Duration) -> Result<String, RemoteError> {
    let spec = CommandSpec::new("bash").arg("-c").arg(command);
    let out = run(&spec, limit).await?;

    if out.code == Some(0) {
        Ok(out.stdout)
    } else {
        Err(RemoteError::CommandFailed {
            code: out.code,
            stderr: out.stderr.trim().to_string(),
        })
    }
}

async fn run_ssh_tool(target: &SshTarget, spec: CommandSpec, limit: Duration) -> SshCommandResult {
    check_key(target)?;

    let out = run(&spec, limit).await?;
    if out.code == Some(0) {
        Ok(out.stdout)
    } else {
        let err = classify_ssh_failure(&target.host, out.code, &out.stderr);
        warn!(host = %target.host, error = %err, "remote_command_failed");
        Err(err)
    }
}

pub async fn ssh_exec(target: &SshTarget, command: &str, limit: Duration) -> SshCommandResult {
    run_ssh_tool(target, ssh_command(target, command), limit).await
}

pub async fn scp_to(
    target: &SshTarget,
    local: &Path,
    remote: &str,
    limit: Duration,
) -> Result<(), RemoteError> {
    run_ssh_tool(target, scp_to_command(target, local, remote), limit)
        .await
        .map(|_| ())
}

pub async fn scp_from(
    target: &SshTarget,
    remote: &str,
    local: &Path,
    limit: Duration,
) -> Result<(), RemoteError> {
    run_ssh_tool(target, scp_from_command(target, remote, local), limit)
        .await
        .map(|_| ())
}

/// Start `command` on `target` in its own task; the result arrives on the receiver.
pub fn spawn_ssh(
    target: SshTarget,
    command: String,
    limit: Duration,
) -> oneshot::Receiver<SshCommandResult> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = ssh_exec(&target, &command, limit).await;
        let _ = tx.send(result);
    });
    rx
}

/// Results of a server/client command pair.
#[derive(Debug)]
pub struct PairResult {
    pub server: SshCommandResult,
    pub client: SshCommandResult,
}

/// Run a server command, give it `startup_delay` to bind, then run the client.
///
/// Used for throughput checks (iperf3 `-s -1` on one side, `-c` on the other).
/// Both results are always collected.
pub async fn run_server_client_pair(
    server: &SshTarget,
    server_cmd: &str,
    client: &SshTarget,
    client_cmd: &str,
    startup_delay: Duration,
    limit: Duration,
) -> PairResult {
    info!(server = %server.host, client = %client.host, "server_client_pair_start");

    let server_rx = spawn_ssh(server.clone(), server_cmd.to_string(), limit);
    sleep(startup_delay).await;
    let client_rx = spawn_ssh(client.clone(), client_cmd.to_string(), limit);

    let client_result = client_rx
        .await
        .unwrap_or_else(|_| Err(RemoteError::Timeout(limit)));
    let server_result = server_rx
        .await
        .unwrap_or_else(|_| Err(RemoteError::Timeout(limit)));

    PairResult {
        server: server_result,
        client: client_result,
    }
}

/// Run `command` on a node through a transient `oc debug` pod.
pub async fn debug_node_exec(
    node: &str,
    command: &str,
    limit: Duration,
) -> Result<String, RemoteError> {
    let out = run(&debug_node_command(node, command), limit).await?;
    if out.code == Some(0) {
        Ok(out.stdout)
    } else {
        Err(RemoteError::CommandFailed {
            code: out.code,
            stderr: out.stderr.trim().to_string(),
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut r) = reader
        && let Err(e) = r.read_to_string(&mut buf).await
    {
        debug!(error = %e, "exec_stream_read_error");
    }
    buf
}

/// Execute `argv` inside a running container and return its stdout.
pub async fn pod_exec(
    client: &Client,
    namespace: &str,
    pod: &str,
    container: Option<&str>,
    argv: &[&str],
    limit: Duration,
) -> Result<String, RemoteError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);

    let mut params = AttachParams::default().stdout(true).stderr(true).stdin(false);
    if let Some(c) = container {
        params = params.container(c);
    }

    let exec = async {
        let mut attached = pods.exec(pod, argv.to_vec(), &params).await?;

        let status = attached.take_status();
        let out_stream = attached.stdout();
        let err_stream = attached.stderr();
        let (stdout, stderr) = tokio::join!(read_all(out_stream), read_all(err_stream));

        let status = match status {
            Some(fut) => fut.await,
            None => None,
        };
        if let Err(e) = attached.join().await {
            debug!(pod, error = %e, "exec_join_error");
        }

        match status {
            Some(s) if s.status.as_deref() != Some("Success") => Err(RemoteError::CommandFailed {
                code: None,
                stderr: if stderr.trim().is_empty() {
                    s.message.unwrap_or_default()
                } else {
                    stderr.trim().to_string()
                },
            }),
            _ => Ok(stdout),
        }
    };

    match timeout(limit, exec).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    }
}

/* ============================= TESTS ============================= */
