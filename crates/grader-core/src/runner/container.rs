//! Sandbox runtime invocation
//!
//! Builds the container command line (or the local shell fallback) and runs
//! it with a wall-clock budget. The runtime client is started in its own
//! process group; on timeout the whole group is killed and, for container
//! runtimes, the named container is force-removed.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::config::{Mount, SandboxRuntime, TesterConfig};
use crate::error::{GradeError, GradeResult};

/// Grace period for draining pipes after a kill
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for `<program> rm -f` after a timeout
const REMOVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything needed to launch one sandboxed run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub runtime: SandboxRuntime,
    /// Container name (also used as a log key)
    pub name: String,
    pub image: String,
    /// Host directory holding the staged source tree
    pub code_dir: PathBuf,
    pub container_mount: String,
    /// Host working directory inside `code_dir`, if detected
    pub working_dir: Option<PathBuf>,
    /// Host path of the shared data, mounted read-only
    pub data_path: Option<PathBuf>,
    pub data_mount: String,
    pub mounts: Vec<Mount>,
    pub run_cmd: String,
    pub timeout: Duration,
}

impl Invocation {
    pub fn from_config(
        config: &TesterConfig,
        name: impl Into<String>,
        code_dir: impl Into<PathBuf>,
        working_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            runtime: config.runtime.clone(),
            name: name.into(),
            image: config.image.clone().unwrap_or_default(),
            code_dir: code_dir.into(),
            container_mount: config.container_mount.clone(),
            working_dir,
            data_path: config.data_path.clone(),
            data_mount: config.data_mount.clone(),
            mounts: config.mounts.clone(),
            run_cmd: config.run_cmd.clone().unwrap_or_default(),
            timeout: config.time_budget(),
        }
    }

    /// Working directory as seen from inside the container
    pub fn container_workdir(&self) -> String {
        let relative = self
            .working_dir
            .as_deref()
            .and_then(|wd| wd.strip_prefix(&self.code_dir).ok());

        let mut workdir = self.container_mount.trim_end_matches('/').to_string();
        if let Some(relative) = relative {
            for component in relative.components() {
                if let Component::Normal(part) = component {
                    workdir.push('/');
                    workdir.push_str(&part.to_string_lossy());
                }
            }
        }
        if workdir.is_empty() {
            workdir.push('/');
        }
        workdir
    }

    /// Program and arguments of the command line
    pub fn command_line(&self) -> (String, Vec<String>) {
        match &self.runtime {
            SandboxRuntime::Container { program, shell } => {
                let mut args = vec![
                    "run".to_string(),
                    "--rm".to_string(),
                    "--name".to_string(),
                    self.name.clone(),
                    "-w".to_string(),
                    self.container_workdir(),
                    "-v".to_string(),
                    format!("{}:{}", host_path(&self.code_dir), self.container_mount),
                ];
                if let Some(data) = &self.data_path {
                    args.push("-v".to_string());
                    args.push(format!("{}:{}:ro", host_path(data), self.data_mount));
                }
                for mount in &self.mounts {
                    args.push("-v".to_string());
                    args.push(mount.volume_arg());
                }
                args.extend([
                    self.image.clone(),
                    shell.clone(),
                    "-c".to_string(),
                    self.run_cmd.clone(),
                ]);
                (program.clone(), args)
            }
            SandboxRuntime::Local { shell } => {
                (shell.clone(), vec!["-c".to_string(), self.run_cmd.clone()])
            }
        }
    }

    fn build_command(&self) -> Command {
        let (program, args) = self.command_line();
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let SandboxRuntime::Local { .. } = self.runtime {
            cmd.current_dir(self.working_dir.as_deref().unwrap_or(&self.code_dir))
                .env("GRADER_CODE_DIR", &self.code_dir);
            if let Some(data) = &self.data_path {
                cmd.env("GRADER_DATA_DIR", data);
            }
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// Absolute host path for a bind mount
fn host_path(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Captured outcome of one invocation
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Exit code; `None` on timeout or signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Output captured by a pipe reader, readable even if the reader is aborted
type SharedBuffer = Arc<Mutex<Vec<u8>>>;

fn spawn_reader<R>(reader: Option<R>) -> (SharedBuffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = SharedBuffer::default();
    let sink = buffer.clone();
    let task = tokio::spawn(async move {
        let Some(mut reader) = reader else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buffer, task)
}

/// Wait for a reader to hit EOF, keeping whatever it read before the budget ran out
async fn drain(buffer: SharedBuffer, mut task: JoinHandle<()>) -> String {
    if timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
        task.abort();
        tracing::debug!("Pipe still open after drain budget, keeping partial output");
    }
    let bytes = buffer.lock().await;
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Run an invocation to completion or until its budget expires
pub async fn run(invocation: &Invocation) -> GradeResult<RunOutput> {
    let start = Instant::now();
    let mut cmd = invocation.build_command();
    let runtime_name = cmd.as_std().get_program().to_string_lossy().into_owned();

    tracing::debug!(name = %invocation.name, program = %runtime_name, "Starting sandbox");
    let mut child = cmd.spawn().map_err(|source| GradeError::SandboxSpawn {
        runtime: runtime_name,
        source,
    })?;
    let pid = child.id();

    let (stdout_buf, stdout_task) = spawn_reader(child.stdout.take());
    let (stderr_buf, stderr_task) = spawn_reader(child.stderr.take());

    let (exit_code, timed_out) = match timeout(invocation.timeout, child.wait()).await {
        Ok(Ok(status)) => {
            // Background processes left by the run hold the pipes open
            kill_group(pid);
            (status.code(), false)
        }
        Ok(Err(e)) => return Err(GradeError::SandboxWait(e)),
        Err(_) => {
            tracing::warn!(
                name = %invocation.name,
                timeout_secs = invocation.timeout.as_secs(),
                "Sandbox timed out, killing process group"
            );
            kill_group(pid);
            let _ = child.kill().await;
            let _ = child.wait().await;
            if let SandboxRuntime::Container { program, .. } = &invocation.runtime {
                remove_container(program, &invocation.name).await;
            }
            (None, true)
        }
    };

    let stdout = drain(stdout_buf, stdout_task).await;
    let stderr = drain(stderr_buf, stderr_task).await;

    Ok(RunOutput {
        exit_code,
        stdout,
        stderr,
        timed_out,
        duration: start.elapsed(),
    })
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

async fn remove_container(program: &str, name: &str) {
    let result = timeout(
        REMOVE_TIMEOUT,
        Command::new(program)
            .args(["rm", "-f", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await;
    match result {
        Ok(Ok(status)) if status.success() => {
            tracing::debug!(name, "Removed timed-out container");
        }
        Ok(Ok(status)) => tracing::debug!(name, ?status, "Container already gone"),
        Ok(Err(e)) => tracing::warn!(name, error = %e, "Failed to remove container"),
        Err(_) => tracing::warn!(name, "Container removal timed out"),
    }
}
