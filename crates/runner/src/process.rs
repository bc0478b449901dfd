//! Target process management - launching, draining output and stopping

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use scenetest_common::SentinelChannel;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Lines kept per stream before the oldest are dropped
pub const DEFAULT_OUTPUT_LINES: usize = 10_000;

const EXIT_POLL: Duration = Duration::from_millis(100);

/// Program and arguments used to start a target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl TargetCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command line for log messages
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Bounded line buffer fed by a pipe reader
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<BufferState>>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct BufferState {
    lines: VecDeque<String>,
    dropped: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferState::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut state = self.inner.lock();
        if state.lines.len() == self.capacity {
            state.lines.pop_front();
            state.dropped += 1;
        }
        state.lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.inner.lock().lines.iter().cloned().collect()
    }

    pub fn dropped(&self) -> usize {
        self.inner.lock().dropped
    }
}

/// Everything a target wrote while it ran
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Oldest lines discarded once a buffer was full
    pub dropped_lines: usize,
}

/// Handle to a running target process
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    command: String,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
    exit: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Spawn the target with both output pipes drained in the background
    pub fn launch(command: &TargetCommand, cwd: &Path) -> HarnessResult<Self> {
        let shown = command.display();
        info!("Launching {} in {}", shown, cwd.display());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| HarnessError::Launch {
            command: shown.clone(),
            reason: e.to_string(),
        })?;

        let stdout = OutputBuffer::new(DEFAULT_OUTPUT_LINES);
        let stderr = OutputBuffer::new(DEFAULT_OUTPUT_LINES);
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(pipe, stdout.clone()));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(pipe, stderr.clone()));
        }

        let pid = child.id();
        debug!("Target started (pid: {:?})", pid);

        Ok(Self {
            child,
            pid,
            command: shown,
            stdout,
            stderr,
            readers,
            exit: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Non-blocking liveness check
    pub fn is_running(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("{} exited with {}", self.command, status);
                self.exit = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Could not query {}: {}", self.command, e);
                false
            }
        }
    }

    /// Ask the target to stop
    pub fn signal_stop(&mut self) -> HarnessResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        info!("Requesting stop of {} (pid: {:?})", self.command, self.pid);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                    .map_err(std::io::Error::from)?;
            }
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()?;
        }

        Ok(())
    }

    /// Force-terminate the target
    pub fn kill(&mut self) -> HarnessResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        warn!("Killing {} (pid: {:?})", self.command, self.pid);
        self.child.start_kill()?;
        dismiss_crash_dialog();
        Ok(())
    }

    /// Poll until the target exits or `limit` passes. True if it exited.
    pub async fn wait_for_exit(&mut self, limit: Duration, poll: Duration) -> bool {
        let start = Instant::now();
        loop {
            if !self.is_running() {
                return true;
            }
            let elapsed = start.elapsed();
            if elapsed >= limit {
                return false;
            }
            sleep(poll.min(limit - elapsed)).await;
        }
    }

    /// Wait (bounded by `grace` per stream) for the readers to hit EOF and
    /// return what was captured
    pub async fn collect_output(&mut self, grace: Duration) -> CapturedOutput {
        for mut reader in std::mem::take(&mut self.readers) {
            if tokio::time::timeout(grace, &mut reader).await.is_err() {
                warn!(
                    "Output of {} still open after exit, giving up on the rest",
                    self.command
                );
                reader.abort();
            }
        }

        CapturedOutput {
            stdout: self.stdout.lines(),
            stderr: self.stderr.lines(),
            dropped_lines: self.stdout.dropped() + self.stderr.dropped(),
        }
    }

    /// Readiness probe
    ///
    /// Launches the target and polls every `startup_tick`, at most
    /// `multiplier` times, until the sentinel appears or the process dies.
    /// Succeeds iff the process is still running at the end. The probe
    /// process is always torn down before returning.
    pub async fn test_launch(
        command: &TargetCommand,
        cwd: &Path,
        startup_tick: Duration,
        shutdown_wait: Duration,
        multiplier: u32,
        sentinel: &SentinelChannel,
    ) -> bool {
        if let Err(e) = sentinel.clear() {
            warn!("Could not clear sentinel {}: {}", sentinel.path().display(), e);
        }

        let mut handle = match Self::launch(command, cwd) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Startup probe failed: {}", e);
                return false;
            }
        };

        for attempt in 1..=multiplier.max(1) {
            sleep(startup_tick).await;
            if sentinel.is_signalled() {
                debug!("Sentinel seen after {} tick(s)", attempt);
                break;
            }
            if !handle.is_running() {
                debug!("Target died after {} tick(s)", attempt);
                break;
            }
        }

        let started = handle.is_running();
        if started {
            if let Err(e) = handle.kill() {
                warn!("Could not kill probe process: {}", e);
            }
            if !handle.wait_for_exit(shutdown_wait, EXIT_POLL).await {
                warn!("Probe process did not exit within {:?}", shutdown_wait);
            }
        } else {
            warn!(
                "{} did not stay up (exit: {:?})",
                handle.command,
                handle.exit_status()
            );
        }
        started
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        let _ = self.kill();
    }
}

fn spawn_reader<R>(pipe: R, buffer: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw);
                    buffer.push(line.trim_end_matches(['\n', '\r']).to_string());
                }
                Err(e) => {
                    debug!("Pipe reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

/// Best effort: a crashed target may leave an error-reporting dialog that
/// keeps the process tree alive.
#[cfg(windows)]
fn dismiss_crash_dialog() {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/IM", "WerFault.exe"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(windows))]
fn dismiss_crash_dialog() {}
