//! Process lifecycle
//!
//! Spawns the child described by a [`SpawnSpec`], pumps its stderr, and runs
//! a watcher task that reaps it. The watcher reports `Exit` as soon as the
//! process is reaped and `Close` once every output stream has also reached
//! EOF.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::exit::{ExitInfo, Signal};
use super::stream::pump_chunks;
use crate::config::SpawnSpec;
use crate::{Error, Result};

/// Which termination notification an event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exit,
    Close,
}

/// Something observed on one child process
#[derive(Debug)]
pub enum EventKind<U> {
    Stdout(U),
    Stderr(Bytes),
    Exit(ExitInfo),
    Close(ExitInfo),
    /// A termination callback postponed until after teardown
    Deferred(Termination, ExitInfo),
}

/// An event tagged with the process instance it came from
#[derive(Debug)]
pub struct Event<U> {
    pub origin: Arc<Lifecycle>,
    pub kind: EventKind<U>,
}

impl<U> Event<U> {
    pub fn new(origin: Arc<Lifecycle>, kind: EventKind<U>) -> Self {
        Self { origin, kind }
    }
}

pub type EventSink<U> = mpsc::UnboundedSender<Event<U>>;

/// Liveness state of one child process
///
/// Flags only ever move one way: alive to dead, unobserved to terminated,
/// reader open to closed.
#[derive(Debug)]
pub struct Lifecycle {
    pid: u32,
    alive: AtomicBool,
    terminated: AtomicBool,
    reader_open: AtomicBool,
}

impl Lifecycle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            alive: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            reader_open: AtomicBool::new(true),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The OS process has not been reaped yet
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Alive and no exit/close event has been observed
    pub fn is_running(&self) -> bool {
        self.is_alive() && !self.terminated.load(Ordering::SeqCst)
    }

    pub fn reader_open(&self) -> bool {
        self.reader_open.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn observe_termination(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn close_reader(&self) {
        self.reader_open.store(false, Ordering::SeqCst);
    }
}

/// Owns exactly one child process
pub struct ProcessSupervisor {
    lifecycle: Arc<Lifecycle>,
    kill_tx: mpsc::UnboundedSender<Signal>,
}

impl ProcessSupervisor {
    /// Spawn the child and start watching it
    ///
    /// `spawn_stdout` receives the child's stdout and returns the reader task;
    /// the close event waits for that task to finish. The child's stdin is
    /// handed back to the caller.
    pub fn start<U, F>(
        spec: &SpawnSpec,
        sink: EventSink<U>,
        spawn_stdout: F,
    ) -> Result<(Self, ChildStdin)>
    where
        U: Send + 'static,
        F: FnOnce(ChildStdout, Arc<Lifecycle>, EventSink<U>) -> JoinHandle<()>,
    {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(spec.options.stderr.stdio())
            .kill_on_drop(true);

        if spec.options.clear_env {
            command.env_clear();
        }
        command.envs(&spec.options.env);
        if let Some(cwd) = &spec.options.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            command: spec.command.clone(),
            source,
        })?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Other("Spawned process has no PID".to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Other("Failed to capture stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other("Failed to capture stdout".to_string()))?;

        let lifecycle = Arc::new(Lifecycle::new(pid));

        let mut readers = vec![spawn_stdout(stdout, lifecycle.clone(), sink.clone())];
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_stderr_reader(
                stderr,
                lifecycle.clone(),
                sink.clone(),
                spec.with_logging,
            ));
        }

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        tokio::spawn(watch(
            child,
            lifecycle.clone(),
            kill_rx,
            readers,
            sink,
            spec.with_logging,
        ));

        debug!(pid = %pid, "Spawned {} {:?}", spec.command, spec.args);

        Ok((Self { lifecycle, kill_tx }, stdin))
    }

    pub fn pid(&self) -> u32 {
        self.lifecycle.pid()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Ask the watcher to signal the child
    ///
    /// Returns false without doing anything once the process is dead.
    /// Delivery is only confirmed by the exit/close events.
    pub fn kill(&self, signal: Signal) -> bool {
        if !self.lifecycle.is_alive() {
            return false;
        }
        self.kill_tx.send(signal).is_ok()
    }
}

fn spawn_stderr_reader<U: Send + 'static>(
    stderr: ChildStderr,
    origin: Arc<Lifecycle>,
    sink: EventSink<U>,
    with_logging: bool,
) -> JoinHandle<()> {
    let pid = origin.pid();
    tokio::spawn(pump_chunks(stderr, pid, "stderr", move |chunk| {
        if with_logging {
            error!(pid = %pid, "stderr: {}", String::from_utf8_lossy(&chunk));
        }
        sink.send(Event::new(origin.clone(), EventKind::Stderr(chunk)))
            .is_ok()
    }))
}

/// Reap the child, relaying kill requests until it is gone
async fn watch<U>(
    mut child: Child,
    origin: Arc<Lifecycle>,
    mut kill_rx: mpsc::UnboundedReceiver<Signal>,
    readers: Vec<JoinHandle<()>>,
    sink: EventSink<U>,
    with_logging: bool,
) {
    let pid = origin.pid();

    let status = loop {
        let signal = tokio::select! {
            status = child.wait() => break status,
            Some(signal) = kill_rx.recv() => signal,
        };
        deliver_signal(&mut child, pid, signal);
    };

    origin.mark_dead();

    let info = match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            warn!(pid = %pid, error = %e, "Failed to reap process");
            ExitInfo::unknown()
        }
    };

    if with_logging && info.is_abnormal() {
        error!(
            pid = %pid,
            "Process exited with (code, signal): ({:?}, {:?})",
            info.code, info.signal
        );
    }
    let _ = sink.send(Event::new(origin.clone(), EventKind::Exit(info.clone())));

    // Close waits for every output stream to drain
    for reader in readers {
        let _ = reader.await;
    }

    if with_logging && info.is_abnormal() {
        error!(
            pid = %pid,
            "Process closed with (code, signal): ({:?}, {:?})",
            info.code, info.signal
        );
    }
    debug!(pid = %pid, ?info, "Process closed");
    let _ = sink.send(Event::new(origin, EventKind::Close(info)));
}

#[cfg(unix)]
fn deliver_signal(_child: &mut Child, pid: u32, signal: Signal) {
    use nix::unistd::Pid;

    debug!(pid = %pid, "Sending {}", signal.as_str());
    if let Err(e) = nix::sys::signal::kill(Pid::from_raw(pid as i32), signal) {
        warn!(pid = %pid, error = %e, "Failed to send {}", signal.as_str());
    }
}

#[cfg(not(unix))]
fn deliver_signal(child: &mut Child, pid: u32, signal: Signal) {
    debug!(pid = %pid, "Terminating process ({})", signal.as_str());
    if let Err(e) = child.start_kill() {
        warn!(pid = %pid, error = %e, "Failed to kill process");
    }
}
