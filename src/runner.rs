use crate::cmd;
use crate::config::DownloaderConfig;
use crate::events::Reporter;
use crate::{EngineError, Result};
use serde::Serialize;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Marker yt-dlp puts on its download status lines.
pub const PROGRESS_MARKER: &str = "[download]";

/// Extracts the percentage from a `[download]  42.5% of ...` line.
///
/// Returns `None` for anything else, including lines that carry the marker and
/// a `%` but no parseable number right before it.
pub fn parse_progress(line: &str) -> Option<f32> {
    if !line.contains(PROGRESS_MARKER) {
        return None;
    }
    let (before, _) = line.split_once('%')?;
    let token = before.split_whitespace().last()?;
    let percent: f32 = token.parse().ok()?;
    if percent.is_finite() && (0.0..=100.0).contains(&percent) {
        Some(percent)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Nothing is running (never started, or already cleared).
    NoProcess,
    /// A graceful stop was requested now or earlier.
    Requested,
    /// The graceful request failed, so the process was killed.
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Exit code 0.
    Succeeded,
    /// Launch or read error, or a non-zero exit the process reached on its own.
    Failed,
    /// Non-zero exit after this process was asked to stop.
    Canceled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug, Default)]
struct SlotState {
    child: Option<Child>,
    graceful_sent: bool,
    /// Set once a live process in the slot was signalled or killed.
    stop_requested: bool,
}

/// Holds the process of the job that is currently running, if any.
///
/// The runner is the only writer: it installs the child on launch and clears
/// it when the returned guard drops. Anyone else may only ask for termination,
/// which is a no-op once the slot is empty.
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().child.is_some()
    }

    /// Ask the process to exit. Repeated calls for the same process do not
    /// re-signal it; use [`ProcessSlot::kill`] to escalate.
    pub fn terminate(&self) -> TerminateOutcome {
        let mut state = self.lock();
        let already_sent = state.graceful_sent;
        let Some(child) = state.child.as_mut() else {
            return TerminateOutcome::NoProcess;
        };
        if already_sent {
            return TerminateOutcome::Requested;
        }
        if matches!(child.try_wait(), Ok(Some(_))) {
            return TerminateOutcome::NoProcess;
        }
        let outcome = if request_graceful_exit(child) {
            TerminateOutcome::Requested
        } else {
            force_kill(child);
            TerminateOutcome::Killed
        };
        state.graceful_sent = true;
        state.stop_requested = true;
        outcome
    }

    /// Unconditional kill. Returns `false` when nothing was running.
    pub fn kill(&self) -> bool {
        let mut state = self.lock();
        let Some(child) = state.child.as_mut() else {
            return false;
        };
        if !matches!(child.try_wait(), Ok(Some(_))) {
            force_kill(child);
            state.stop_requested = true;
        }
        true
    }

    fn install(&self, child: Child) -> ActiveProcess<'_> {
        let mut state = self.lock();
        state.child = Some(child);
        state.graceful_sent = false;
        state.stop_requested = false;
        ActiveProcess { slot: self }
    }

    fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    fn try_wait(&self) -> std::io::Result<Option<ExitStatus>> {
        match self.lock().child.as_mut() {
            Some(child) => child.try_wait(),
            None => Err(std::io::Error::other("process handle already released")),
        }
    }

    fn release(&self) {
        let child = {
            let mut state = self.lock();
            state.graceful_sent = false;
            state.stop_requested = false;
            state.child.take()
        };
        if let Some(mut child) = child {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                force_kill(&mut child);
            }
            let _ = child.wait();
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panic while holding the lock leaves the state usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the slot (killing and reaping the process if it is still alive) on
/// every exit path of a run.
struct ActiveProcess<'a> {
    slot: &'a ProcessSlot,
}

impl Drop for ActiveProcess<'_> {
    fn drop(&mut self) {
        self.slot.release();
    }
}

fn request_graceful_exit(child: &Child) -> bool {
    let Some(mut signal) = graceful_signal_command(child.id()) else {
        return false;
    };
    signal
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(unix)]
fn graceful_signal_command(pid: u32) -> Option<Command> {
    let mut signal = cmd::command("kill");
    signal.args(["-TERM", &pid.to_string()]);
    Some(signal)
}

#[cfg(windows)]
fn graceful_signal_command(pid: u32) -> Option<Command> {
    let mut signal = cmd::command("taskkill");
    signal.args(["/PID", &pid.to_string(), "/T"]);
    Some(signal)
}

#[cfg(not(any(unix, windows)))]
fn graceful_signal_command(_pid: u32) -> Option<Command> {
    None
}

fn force_kill(child: &mut Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        let _ = cmd::command("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    let _ = child.kill();
}

enum StreamLine {
    Line(String),
    Failed(std::io::Error),
}

/// Forwards complete lines from the shared output pipe into a channel. The
/// reader thread is detached; it ends when every write end is closed or the
/// receiver is dropped.
fn spawn_line_reader(reader: impl Read + Send + 'static) -> mpsc::Receiver<StreamLine> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || pump_lines(reader, tx));
    rx
}

fn pump_lines(stream: impl Read, tx: mpsc::Sender<StreamLine>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(StreamLine::Line(line)).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = tx.send(StreamLine::Failed(err));
                return;
            }
        }
    }
}

/// Runs one yt-dlp invocation at a time and reports its output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    poll_interval: Duration,
    terminate_grace: Duration,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>, config: &DownloaderConfig) -> Self {
        Self {
            program: program.into(),
            poll_interval: config.poll_interval(),
            terminate_grace: config.terminate_grace(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs the tool to completion.
    ///
    /// Never fails: launch and read errors become a log line and
    /// [`RunOutcome::Failed`]. A cancellation observed mid-run stops reading
    /// and terminates the process, escalating to a kill after the grace period.
    pub fn run(
        &self,
        args: &[String],
        cancel: &CancelToken,
        slot: &ProcessSlot,
        reporter: &Reporter,
    ) -> RunOutcome {
        reporter.log(
            "command",
            "info",
            format!(
                "Running command: {}",
                cmd::display_command_line(&self.program, args)
            ),
        );
        reporter.reset_progress();

        match self.run_inner(args, cancel, slot, reporter) {
            Ok(outcome) => outcome,
            Err(err) => {
                reporter.log("exception", "error", format!("[EXCEPTION] {err}"));
                RunOutcome::Failed
            }
        }
    }

    fn run_inner(
        &self,
        args: &[String],
        cancel: &CancelToken,
        slot: &ProcessSlot,
        reporter: &Reporter,
    ) -> Result<RunOutcome> {
        // stdout and stderr share one pipe so lines keep the order they were
        // written in.
        let (reader, writer) = std::io::pipe()?;
        let err_writer = writer.try_clone()?;
        let mut command = cmd::command(&self.program);
        command.args(args).stdout(writer).stderr(err_writer);

        let spawned = command.spawn();
        // The parent's write ends live in `command`; EOF needs them closed.
        drop(command);
        let child = spawned.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::ExternalToolMissing {
                tool: self.program.to_string_lossy().to_string(),
            },
            _ => EngineError::Io(e),
        })?;
        let lines = spawn_line_reader(reader);
        let _active = slot.install(child);

        loop {
            match lines.recv_timeout(self.poll_interval) {
                Ok(StreamLine::Line(line)) => {
                    if let Some(percent) = parse_progress(&line) {
                        reporter.progress(percent);
                    }
                    reporter.output(&line);
                    if cancel.is_canceled() {
                        break;
                    }
                }
                Ok(StreamLine::Failed(err)) => return Err(EngineError::Io(err)),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_canceled() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(lines);

        let status = self.wait_for_exit(slot, cancel)?;
        Ok(if status.code() == Some(0) {
            RunOutcome::Succeeded
        } else if slot.stop_requested() {
            RunOutcome::Canceled
        } else {
            RunOutcome::Failed
        })
    }

    fn wait_for_exit(&self, slot: &ProcessSlot, cancel: &CancelToken) -> Result<ExitStatus> {
        let mut kill_deadline: Option<Instant> = None;
        let mut killed = false;
        loop {
            if let Some(status) = slot.try_wait()? {
                return Ok(status);
            }

            if cancel.is_canceled() && kill_deadline.is_none() {
                kill_deadline = Some(Instant::now() + self.terminate_grace);
                if slot.terminate() == TerminateOutcome::Killed {
                    killed = true;
                }
            }
            if let Some(deadline) = kill_deadline {
                if !killed && Instant::now() >= deadline {
                    slot.kill();
                    killed = true;
                }
            }

            thread::sleep(self.poll_interval.min(Duration::from_millis(50)));
        }
    }
}
