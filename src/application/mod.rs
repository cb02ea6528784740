//! Restartable application handle
//!
//! An [`Application`] runs one child process at a time and hides restarts
//! from its callers: handlers registered once keep receiving events from
//! every process started afterwards.
//!
//! Must be created inside a Tokio runtime; delivery happens on a task
//! spawned per application.

mod dispatch;
mod slots;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use self::slots::CallbackSlots;
use crate::config::SpawnSpec;
use crate::protocol::{Adapter, ByteProtocol, LineProtocol, Protocol};
use crate::supervisor::{EventSink, ExitInfo, Signal, Termination};
use crate::{Error, Result};

/// Application speaking the line protocol
///
/// The stdout reader is closed as soon as the child's exit is observed, so a
/// complete line written right before exiting can be lost if reaping wins
/// the race with the read. Children whose last lines matter should close
/// stdout before exiting, or report results through stderr.
pub type LineApplication = Application<LineProtocol>;

/// Application speaking the byte protocol
pub type ByteApplication = Application<ByteProtocol>;

/// Whether an application currently has a live, unterminated child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotRunning,
    Running,
}

/// Handle to a supervised child process
///
/// Cloning is cheap and every clone drives the same child. When the last
/// clone is dropped the child is killed. Handlers that capture a clone keep
/// the application alive until the child is killed explicitly.
pub struct Application<P: Protocol> {
    inner: Arc<Inner<P>>,
}

impl<P: Protocol> Clone for Application<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<P: Protocol> {
    spec: SpawnSpec,
    slots: Arc<CallbackSlots<P::Unit>>,
    current: Mutex<Option<Adapter<P>>>,
    sink: EventSink<P::Unit>,
}

impl<P: Protocol> Application<P> {
    /// Start the dispatcher and the first child process
    ///
    /// Fails when the child cannot be spawned. On a multi-threaded runtime,
    /// handlers registered after this returns can miss the first events;
    /// use [`Application::builder`] to register them up front.
    pub fn spawn(spec: SpawnSpec) -> Result<Self> {
        Self::builder(spec).spawn()
    }

    /// Collect handlers before the first child is started
    pub fn builder(spec: SpawnSpec) -> ApplicationBuilder<P> {
        ApplicationBuilder {
            spec,
            slots: CallbackSlots::default(),
        }
    }

    fn start(spec: SpawnSpec, slots: CallbackSlots<P::Unit>) -> Result<Self> {
        let (sink, events) = mpsc::unbounded_channel();
        let slots = Arc::new(slots);
        tokio::spawn(dispatch::run::<P>(events, sink.downgrade(), slots.clone()));

        let app = Self {
            inner: Arc::new(Inner {
                spec,
                slots,
                current: Mutex::new(None),
                sink,
            }),
        };
        app.ensure_is_running()?;
        Ok(app)
    }

    pub fn spec(&self) -> &SpawnSpec {
        &self.inner.spec
    }

    /// Start a fresh child unless one is running
    ///
    /// Safe to call from inside an exit or close handler.
    pub fn ensure_is_running(&self) -> Result<()> {
        let mut current = self.inner.current.lock();
        if current
            .as_ref()
            .is_some_and(|adapter| adapter.supervisor().is_running())
        {
            return Ok(());
        }

        let adapter = Adapter::<P>::start(&self.inner.spec, self.inner.sink.clone())?;
        let pid = adapter.supervisor().pid();
        match current.replace(adapter) {
            Some(previous) => debug!(
                pid = %pid,
                previous = %previous.supervisor().pid(),
                "Application restarted"
            ),
            None => debug!(pid = %pid, "Application started"),
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .current
            .lock()
            .as_ref()
            .is_some_and(|adapter| adapter.supervisor().is_running())
    }

    pub fn run_state(&self) -> RunState {
        if self.is_running() {
            RunState::Running
        } else {
            RunState::NotRunning
        }
    }

    /// OS process id of the current (possibly already dead) child
    pub fn pid(&self) -> Option<u32> {
        self.inner
            .current
            .lock()
            .as_ref()
            .map(|adapter| adapter.supervisor().pid())
    }

    /// Write to the child's stdin without waiting
    ///
    /// Fails with [`Error::NotRunning`] when no child is running and with
    /// [`Error::Backpressure`] when the stdin queue is full. Nothing is
    /// buffered beyond the queue.
    pub fn stdin(&self, data: &P::Input) -> Result<()> {
        let current = self.inner.current.lock();
        match current.as_ref() {
            Some(adapter) if adapter.supervisor().is_running() => adapter.write(data),
            _ => {
                warn!("Could not write to the stdin of the application: not running");
                Err(Error::NotRunning)
            }
        }
    }

    /// Send EOF to the current child once queued writes are flushed
    pub fn close_stdin(&self) {
        if let Some(adapter) = self.inner.current.lock().as_mut() {
            adapter.close_stdin();
        }
    }

    /// Signal the current child; false if nothing is running
    pub fn kill(&self, signal: Signal) -> bool {
        let current = self.inner.current.lock();
        match current.as_ref() {
            Some(adapter) if adapter.supervisor().is_running() => {
                adapter.supervisor().kill(signal)
            }
            _ => false,
        }
    }

    /// `kill(SIGTERM)`
    pub fn terminate(&self) -> bool {
        self.kill(Signal::SIGTERM)
    }

    /// Called for every stdout unit
    pub fn on_stdout<F>(&self, handler: F)
    where
        F: Fn(P::Unit) + Send + Sync + 'static,
    {
        self.inner.slots.set_stdout(Arc::new(handler));
    }

    /// Called for every stderr chunk, undecoded
    pub fn on_stderr<F>(&self, handler: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.inner.slots.set_stderr(Arc::new(handler));
    }

    /// Called when a child exits, before its streams are necessarily closed
    pub fn on_exit<F>(&self, handler: F)
    where
        F: Fn(ExitInfo) + Send + Sync + 'static,
    {
        self.inner
            .slots
            .set_termination(Termination::Exit, Arc::new(handler));
    }

    /// Called once a child has exited and all its streams are closed
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn(ExitInfo) + Send + Sync + 'static,
    {
        self.inner
            .slots
            .set_termination(Termination::Close, Arc::new(handler));
    }
}

/// Registers handlers before an [`Application`] starts its first child
///
/// ```no_run
/// # async fn demo() -> stdio_app::Result<()> {
/// use stdio_app::{LineApplication, SpawnSpec};
///
/// let app = LineApplication::builder(SpawnSpec::new("sh").args(["-c", "echo hi"]))
///     .on_stdout(|line| println!("{line}"))
///     .on_close(|info| eprintln!("{:?}", info))
///     .spawn()?;
/// # Ok(())
/// # }
/// ```
pub struct ApplicationBuilder<P: Protocol> {
    spec: SpawnSpec,
    slots: CallbackSlots<P::Unit>,
}

impl<P: Protocol> ApplicationBuilder<P> {
    pub fn on_stdout<F>(self, handler: F) -> Self
    where
        F: Fn(P::Unit) + Send + Sync + 'static,
    {
        self.slots.set_stdout(Arc::new(handler));
        self
    }

    pub fn on_stderr<F>(self, handler: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.slots.set_stderr(Arc::new(handler));
        self
    }

    pub fn on_exit<F>(self, handler: F) -> Self
    where
        F: Fn(ExitInfo) + Send + Sync + 'static,
    {
        self.slots
            .set_termination(Termination::Exit, Arc::new(handler));
        self
    }

    pub fn on_close<F>(self, handler: F) -> Self
    where
        F: Fn(ExitInfo) + Send + Sync + 'static,
    {
        self.slots
            .set_termination(Termination::Close, Arc::new(handler));
        self
    }

    /// Start the dispatcher and the first child with the collected handlers
    pub fn spawn(self) -> Result<Application<P>> {
        Application::start(self.spec, self.slots)
    }
}

impl<P: Protocol> Drop for Inner<P> {
    fn drop(&mut self) {
        if let Some(adapter) = self.current.get_mut().take() {
            if adapter.supervisor().kill(Signal::SIGKILL) {
                debug!(pid = %adapter.supervisor().pid(), "Application dropped, killing child");
            }
        }
    }
}
