//! Worker process launching.
//!
//! The supervisor only needs the worker's three stdio streams and a way to
//! learn when it exits. [`WorkerLauncher`] is the seam: [`CommandLauncher`]
//! spawns a real process, tests plug in in-memory pipes.
//!
//! # Important
//!
//! - **stdin**: one JSON call per line
//! - **stdout**: one JSON response per line, nothing else is parsed
//! - **stderr**: diagnostics, forwarded to `tracing`, never parsed

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::error::{Result, SimulatorError};

/// Boxed future, as used by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed worker stdin.
pub type WorkerStdin = Box<dyn AsyncWrite + Send + Unpin>;

/// Boxed worker stdout/stderr.
pub type WorkerOutput = Box<dyn AsyncRead + Send + Unpin>;

/// How a worker instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code, `None` if terminated by a signal or unknown.
    pub code: Option<i32>,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated without exit code"),
        }
    }
}

/// The I/O endpoints of one launched worker instance.
pub struct WorkerIo {
    pub stdin: WorkerStdin,
    pub stdout: WorkerOutput,
    pub stderr: Option<WorkerOutput>,
    /// Resolves once the worker has exited.
    pub exit: BoxFuture<'static, WorkerExit>,
    /// Sending on (or dropping) this asks the launcher to kill the worker.
    pub kill: oneshot::Sender<()>,
}

/// Starts worker instances.
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Launch a fresh worker. Called from within a Tokio runtime.
    fn launch(&self) -> Result<WorkerIo>;
}

/// Launches the worker as a child process.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }
}

impl WorkerLauncher for CommandLauncher {
    fn launch(&self) -> Result<WorkerIo> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            SimulatorError::Spawn(format!("{}: {}", self.program.to_string_lossy(), e))
        })?;

        let missing = |name: &str| SimulatorError::Spawn(format!("worker {} was not piped", name));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take();

        tracing::info!(
            program = %self.program.to_string_lossy(),
            pid = child.id(),
            "Spawned simulator worker"
        );

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let exit = Box::pin(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Explicit kill, or the owner went away.
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(error = %e, "Failed to signal simulator worker");
                    }
                    child.wait().await
                }
            };
            match status {
                Ok(status) => WorkerExit {
                    code: status.code(),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to wait for simulator worker");
                    WorkerExit { code: None }
                }
            }
        });

        Ok(WorkerIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as WorkerOutput),
            exit,
            kill: kill_tx,
        })
    }
}
