//! Subprocess execution for gates
//!
//! Each process runs with piped output, a per-gate timeout and (on Unix)
//! its own process group. Abandoning the wait, by timeout or because the
//! owning task was aborted, kills the whole group.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::util::command_label;

/// Per-stream capture limit
const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

/// Exit status shells use for "command not found"
const SHELL_NOT_FOUND: i32 = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Read exit status 127 as "command not found"
    pub status_127_not_found: bool,
}

impl ProcessSpec {
    /// Build from a full argv; `None` when it is empty.
    pub fn from_argv(argv: &[String], cwd: impl AsRef<Path>) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.as_ref().to_path_buf(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            status_127_not_found: true,
        })
    }

    pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Operator scripts may exit 127 on their own; their status is kept.
    pub fn status_127_not_found(mut self, enabled: bool) -> Self {
        self.status_127_not_found = enabled;
        self
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn label(&self) -> String {
        command_label(&self.argv())
    }
}

/// A process that ran to completion (any exit status)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Both streams, stdout first.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// A process that could not be run to completion
#[derive(Debug, Error)]
pub enum LaunchFailure {
    #[error("command not found: {program}")]
    NotFound { program: String },
    #[error("command timed out after {}s: {command}", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchFailure {
    /// Failures that make the next fallback command worth trying
    pub fn is_not_found(&self) -> bool {
        matches!(self, LaunchFailure::NotFound { .. })
    }
}

/// Run `spec` to completion or until its timeout elapses.
pub async fn run_process(spec: &ProcessSpec) -> Result<ProcessOutcome, LaunchFailure> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            LaunchFailure::NotFound {
                program: spec.program.clone(),
            }
        } else {
            LaunchFailure::Spawn {
                program: spec.program.clone(),
                source,
            }
        }
    })?;

    #[cfg(unix)]
    let mut group = ProcessGroupGuard::new(child.id());

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let waited = tokio::time::timeout(spec.timeout, async {
        tokio::join!(read_capped(stdout), read_capped(stderr), child.wait())
    })
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    let (stdout, stderr, status) = match waited {
        Ok(parts) => parts,
        Err(_) => {
            tracing::warn!(
                command = %spec.label(),
                timeout_secs = spec.timeout.as_secs(),
                "gate process timed out, killing"
            );
            #[cfg(unix)]
            group.kill();
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(LaunchFailure::TimedOut {
                command: spec.label(),
                timeout: spec.timeout,
            });
        }
    };

    let status = status.map_err(|source| LaunchFailure::Wait {
        program: spec.program.clone(),
        source,
    })?;
    #[cfg(unix)]
    group.disarm();

    let exit_code = status.code().unwrap_or(crate::output::PROCESS_FAILURE_EXIT_CODE);
    if exit_code == SHELL_NOT_FOUND && spec.status_127_not_found {
        tracing::debug!(program = %spec.program, "exit status 127, treating as not found");
        return Err(LaunchFailure::NotFound {
            program: spec.program.clone(),
        });
    }

    Ok(ProcessOutcome {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        duration_ms,
    })
}

async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
                // keep draining so the child never blocks on a full pipe
            }
        }
    }
    buf
}

/// Kills the child's process group unless disarmed.
///
/// Dropping the guard without disarming (the owning future was aborted
/// mid-wait) terminates every process the gate started.
#[cfg(unix)]
struct ProcessGroupGuard {
    pgid: Option<libc::pid_t>,
}

#[cfg(unix)]
impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| libc::pid_t::try_from(pid).ok()),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            // SAFETY: killpg only sends a signal; the group was created for this child.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

#[cfg(unix)]
impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if self.pgid.is_some() {
            tracing::debug!(pgid = ?self.pgid, "abandoned gate process, killing group");
        }
        self.kill();
    }
}
