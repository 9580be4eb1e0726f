//! Bounded execution of probe commands.
//!
//! A probe runs `sh -c` in its own process group inside the scratch
//! directory, with combined stdout/stderr captured through one pipe. Stdin
//! stays open and silent, so utilities that prompt for input block until the
//! timeout and are then terminated.
use crate::util::truncate_bytes;
use anyhow::{Context, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::marker::PhantomData;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_PROBE_OUTPUT_BYTES: usize = 64 * 1024;
/// Exit code reported when the child could not be reaped.
pub const UNREAPED_EXIT_CODE: i32 = -1;

const TERMINATE_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK_BYTES: usize = 4096;
/// How long a reaped probe's reader thread may take to see end-of-file.
const READER_JOIN_GRACE: Duration = Duration::from_millis(200);

/// Observed behavior of one probe invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub output: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ProbeResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// The probe shell could not be started at all.
///
/// Unlike anything a utility does once running, this is not specific to
/// one utility, so callers stop the whole run on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpawnError {
    pub command: String,
}

impl fmt::Display for ShellSpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "start probe shell for `{}`", self.command)
    }
}

/// Everything needed to start a probe process.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSpec<'a> {
    pub command: &'a str,
    pub cwd: &'a Path,
    pub env: &'a BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum ReadOutcome {
    /// Output reached end-of-file and the child exited.
    Eof,
    TimedOut,
    Failed(io::Error),
}

/// Platform process handling behind the executor.
pub trait ProbeProcess: Sized {
    fn start(spec: &ProbeSpec<'_>) -> Result<Self>;

    /// Process group that `terminate` signals.
    fn process_group(&self) -> i32;

    /// Append output (capped at [`MAX_PROBE_OUTPUT_BYTES`]) until EOF or
    /// until `timeout` elapses.
    fn read_until_timeout_or_eof(&mut self, timeout: Duration, output: &mut Vec<u8>)
        -> ReadOutcome;

    fn terminate(&mut self);

    /// Block until the child is collected and return its exit code.
    fn reap(&mut self) -> i32;
}

/// Process group of the probe currently running, shared with whoever may
/// need to stop it from another thread.
#[derive(Debug, Clone, Default)]
pub struct ActiveProbe(Arc<AtomicI32>);

impl ActiveProbe {
    fn set(&self, pgid: i32) {
        self.0.store(pgid, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    pub fn process_group(&self) -> Option<i32> {
        let pgid = self.0.load(Ordering::SeqCst);
        (pgid > 0).then_some(pgid)
    }

    /// Send `SIGTERM` to the running probe, if any.
    pub fn terminate(&self) -> bool {
        match self.process_group() {
            Some(pgid) => signal_group(pgid, Signal::SIGTERM),
            None => false,
        }
    }
}

/// Runs probe commands with a bounded wait.
pub struct Executor<P: ProbeProcess = ShellProcess> {
    scratch_dir: PathBuf,
    timeout: Duration,
    env: BTreeMap<String, String>,
    active: ActiveProbe,
    _process: PhantomData<fn() -> P>,
}

impl Executor<ShellProcess> {
    pub fn new(scratch_dir: PathBuf, timeout: Duration, env: BTreeMap<String, String>) -> Self {
        Self::with_process(scratch_dir, timeout, env)
    }
}

impl<P: ProbeProcess> Executor<P> {
    pub fn with_process(
        scratch_dir: PathBuf,
        timeout: Duration,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            scratch_dir,
            timeout,
            env,
            active: ActiveProbe::default(),
            _process: PhantomData,
        }
    }

    /// Publish probe process groups through `active` instead of a private slot.
    pub fn with_active_probe(mut self, active: ActiveProbe) -> Self {
        self.active = active;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn active_probe(&self) -> ActiveProbe {
        self.active.clone()
    }

    /// Run `command` and return its combined output and exit status.
    ///
    /// Errors only when the probe cannot be started at all, with a
    /// [`ShellSpawnError`] in the chain; hangs and failures of the command
    /// itself are part of the result.
    pub fn execute(&self, command: &str) -> Result<ProbeResult> {
        let start = Instant::now();
        let spec = ProbeSpec {
            command,
            cwd: &self.scratch_dir,
            env: &self.env,
        };
        let mut process = P::start(&spec).map_err(|err| {
            err.context(ShellSpawnError {
                command: command.to_string(),
            })
        })?;
        self.active.set(process.process_group());

        let mut output = Vec::new();
        let timed_out = match process.read_until_timeout_or_eof(self.timeout, &mut output) {
            ReadOutcome::Eof => false,
            ReadOutcome::TimedOut => {
                tracing::debug!(command, "probe timed out, terminating");
                process.terminate();
                true
            }
            ReadOutcome::Failed(err) => {
                tracing::warn!(command, error = %err, "probe read failed, terminating");
                process.terminate();
                false
            }
        };
        let exit_code = process.reap();
        self.active.clear();
        drop(process);

        let elapsed_ms = start.elapsed().as_millis();
        tracing::debug!(
            command,
            exit_code,
            timed_out,
            elapsed_ms,
            output_bytes = output.len(),
            "probe complete"
        );

        Ok(ProbeResult {
            output: truncate_bytes(&output, MAX_PROBE_OUTPUT_BYTES),
            exit_code,
            timed_out,
        })
    }
}

/// `sh -c` child in its own process group.
///
/// The reader thread ends once every holder of the pipe's write end is gone.
/// A descendant that moved to another process group or session survives
/// `terminate` and may keep the pipe open; the reader is then left detached
/// and exits when that descendant closes its output.
pub struct ShellProcess {
    child: Child,
    pgid: i32,
    _stdin: Option<ChildStdin>,
    chunks: Receiver<io::Result<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
    status: Option<ExitStatus>,
}

impl ProbeProcess for ShellProcess {
    fn start(spec: &ProbeSpec<'_>) -> Result<Self> {
        let script = format!("exec 2>&1\n{}", spec.command);
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .current_dir(spec.cwd)
            .envs(spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .context("spawn /bin/sh")?;

        let stdout = child
            .stdout
            .take()
            .context("probe stdout pipe missing")?;
        let stdin = child.stdin.take();
        let pgid = i32::try_from(child.id()).context("probe pid out of range")?;

        let (tx, chunks) = mpsc::channel();
        let reader = thread::spawn(move || {
            let mut pipe = stdout;
            let mut buf = [0u8; READ_CHUNK_BYTES];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            pgid,
            _stdin: stdin,
            chunks,
            reader: Some(reader),
            status: None,
        })
    }

    fn process_group(&self) -> i32 {
        self.pgid
    }

    fn read_until_timeout_or_eof(
        &mut self,
        timeout: Duration,
        output: &mut Vec<u8>,
    ) -> ReadOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ReadOutcome::TimedOut;
            }
            match self.chunks.recv_timeout(remaining) {
                Ok(Ok(chunk)) => append_capped(output, &chunk),
                Ok(Err(err)) => return ReadOutcome::Failed(err),
                Err(RecvTimeoutError::Timeout) => return ReadOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // The pipe can close before the shell exits.
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.status = Some(status);
                    return ReadOutcome::Eof;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Ok(None) => return ReadOutcome::TimedOut,
                Err(err) => return ReadOutcome::Failed(err),
            }
        }
    }

    fn terminate(&mut self) {
        // Some utilities ignore SIGINT; SIGTERM is what they honor.
        signal_group(self.pgid, Signal::SIGTERM);
        let deadline = Instant::now() + TERMINATE_GRACE;
        while self.status.is_none() && Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(status)) => self.status = Some(status),
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
        if group_alive(self.pgid) {
            signal_group(self.pgid, Signal::SIGKILL);
        }
    }

    fn reap(&mut self) -> i32 {
        if let Some(status) = self.status {
            return exit_code(status);
        }
        loop {
            match self.child.wait() {
                Ok(status) => {
                    self.status = Some(status);
                    return exit_code(status);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(pid = self.pgid, error = %err, "failed to reap probe");
                    return UNREAPED_EXIT_CODE;
                }
            }
        }
    }
}

impl ShellProcess {
    /// Join the reader if it finishes within [`READER_JOIN_GRACE`].
    fn release_reader(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        let deadline = Instant::now() + READER_JOIN_GRACE;
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
        if reader.is_finished() {
            if reader.join().is_err() {
                tracing::warn!(pgid = self.pgid, "output reader panicked");
            }
        } else {
            tracing::debug!(
                pgid = self.pgid,
                "output pipe still held by a detached descendant, not waiting for reader"
            );
        }
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            signal_group(self.pgid, Signal::SIGKILL);
            let _ = self.child.wait();
        }
        self.release_reader();
    }
}

fn append_capped(output: &mut Vec<u8>, chunk: &[u8]) {
    let room = MAX_PROBE_OUTPUT_BYTES.saturating_sub(output.len());
    output.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => UNREAPED_EXIT_CODE,
    }
}

pub(crate) fn signal_group(pgid: i32, signal: impl Into<Option<Signal>>) -> bool {
    if pgid <= 0 {
        return false;
    }
    killpg(Pid::from_raw(pgid), signal).is_ok()
}

fn group_alive(pgid: i32) -> bool {
    signal_group(pgid, None::<Signal>)
}
