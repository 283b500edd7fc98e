//! Child process handles
//!
//! A [`ProcessHandle`] is the supervisor's only grip on a launched process:
//! its pid, its merged stdout/stderr as lines, an exit notification and a
//! kill request. Test doubles build handles from plain channels with
//! [`ProcessHandle::new`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::config::{expand_placeholders, CommandConfig};

/// Lines buffered between the pipe readers and the consumer
const OUTPUT_BUFFER: usize = 1024;

/// How long to wait for the process to disappear after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, absent when killed by a signal or unknown
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "no exit code (killed by signal)"),
        }
    }
}

/// A fully resolved command line
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl SpawnSpec {
    /// Expand a configured command template
    pub fn from_template(
        command: &CommandConfig,
        vars: &[(&str, &str)],
        working_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            program: expand_placeholders(&command.command, vars),
            args: command
                .args
                .iter()
                .map(|arg| expand_placeholders(arg, vars))
                .collect(),
            env: command
                .env
                .iter()
                .map(|(k, v)| (k.clone(), expand_placeholders(v, vars)))
                .collect(),
            working_dir,
        }
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Handle to a launched process
pub struct ProcessHandle {
    pid: Option<u32>,
    output: Mutex<Option<mpsc::Receiver<String>>>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: mpsc::Sender<()>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("exit", &*self.exit.borrow())
            .finish()
    }
}

impl ProcessHandle {
    /// Assemble a handle from its parts.
    ///
    /// `exit` must eventually carry `Some` once the process is gone, and a
    /// message on the receiving end of `kill` must end the process.
    pub fn new(
        pid: Option<u32>,
        output: mpsc::Receiver<String>,
        exit: watch::Receiver<Option<ExitInfo>>,
        kill: mpsc::Sender<()>,
    ) -> Self {
        Self {
            pid,
            output: Mutex::new(Some(output)),
            exit,
            kill,
        }
    }

    /// Spawn a child in its own process group with piped output
    pub fn spawn(spec: &SpawnSpec) -> std::io::Result<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        // Own process group so signals reach the whole tree (launchers fork workers)
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let pid = child.id();
        debug!(pid = ?pid, program = %spec.program, "spawned process");

        let (line_tx, line_rx) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Some(()) = kill_rx.recv() => {
                    force_kill(&mut child, pid);
                    child.wait().await
                }
            };
            let info = match status {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    warn!(pid = ?pid, error = %e, "waiting on child failed");
                    ExitInfo::default()
                }
            };
            debug!(pid = ?pid, exit = %info, "process exited");
            let _ = exit_tx.send(Some(info));
        });

        Ok(Self::new(pid, line_rx, exit_rx, kill_tx))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the output line stream; only the first caller gets it
    pub fn take_output(&self) -> Option<mpsc::Receiver<String>> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Exit information, if the process has ended
    pub fn exit_status(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// Wait for the process to end
    pub async fn wait(&self) -> ExitInfo {
        let mut exit = self.exit.clone();
        let result = exit.wait_for(Option::is_some).await.map(|info| *info);
        match result {
            Ok(info) => info.unwrap_or_default(),
            // Exit sender gone without a report: the watcher is dead, so is the child
            Err(_) => self.exit_status().unwrap_or_default(),
        }
    }

    /// Stop the process.
    ///
    /// With a non-zero `grace` the process group gets SIGTERM first and is
    /// killed only if it outlives the grace period; a zero grace kills
    /// immediately. Returns `None` if the process could not be confirmed dead.
    pub async fn terminate(&self, grace: Duration) -> Option<ExitInfo> {
        if let Some(info) = self.exit_status() {
            return Some(info);
        }

        if !grace.is_zero() {
            self.signal_terminate();
            if let Ok(info) = timeout(grace, self.wait()).await {
                return Some(info);
            }
            warn!(pid = ?self.pid, "graceful shutdown timed out, forcing kill");
        }

        let _ = self.kill.try_send(());
        match timeout(KILL_WAIT, self.wait()).await {
            Ok(info) => Some(info),
            Err(_) => {
                error!(pid = ?self.pid, "process did not exit after kill");
                None
            }
        }
    }

    fn signal_terminate(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, error = %e, "failed to send SIGTERM");
            } else {
                debug!(pid, "sent SIGTERM to process group");
            }
        }
    }
}

fn force_kill(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "SIGKILL to process group failed");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed");
    }
}

/// Forward lines from a pipe, decoding lossily.
///
/// Keeps draining after the receiver is gone so the child never blocks on a
/// full pipe.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut open = true;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                if open {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    open = tx.send(line).await.is_ok();
                }
            }
            Err(e) => {
                debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}
