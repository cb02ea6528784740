//! Stdout framing and stdin writes
//!
//! A [`Protocol`] decides how the child's stdout is cut into units and how
//! stdin writes are framed. Both variants share the process supervisor; only
//! the framing differs.

mod byte;
mod line;

pub use byte::ByteProtocol;
pub use line::LineProtocol;

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SpawnSpec;
use crate::supervisor::{EventSink, Lifecycle, ProcessSupervisor};
use crate::{Error, Result};

mod sealed {
    pub trait Sealed {}
}

/// Framing of a child's standard streams
pub trait Protocol: sealed::Sealed + Send + Sync + 'static {
    /// One stdout notification
    type Unit: Send + 'static;

    /// What callers hand to `stdin`
    type Input: ?Sized;

    const NAME: &'static str;

    /// On termination the stdout reader is closed and the exit/close
    /// callback runs on a later turn of the dispatcher instead of inline.
    const DEFERS_TERMINATION: bool;

    /// Bytes written to stdin for one `stdin` call
    fn frame(input: &Self::Input) -> Bytes;

    /// Start the task that turns stdout into units
    fn spawn_reader<R>(
        stdout: R,
        origin: Arc<Lifecycle>,
        sink: EventSink<Self::Unit>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static;
}

/// A supervised process plus its framed stdin
pub(crate) struct Adapter<P: Protocol> {
    supervisor: ProcessSupervisor,
    stdin_tx: Option<mpsc::Sender<Bytes>>,
    _protocol: PhantomData<fn() -> P>,
}

impl<P: Protocol> Adapter<P> {
    pub fn start(spec: &SpawnSpec, sink: EventSink<P::Unit>) -> Result<Self> {
        let (supervisor, stdin) =
            ProcessSupervisor::start(spec, sink, P::spawn_reader::<ChildStdout>)?;

        let (stdin_tx, stdin_rx) = mpsc::channel(spec.stdin_capacity.max(1));
        spawn_stdin_writer(stdin, stdin_rx, supervisor.pid());

        debug!(pid = %supervisor.pid(), protocol = P::NAME, "Adapter started");

        Ok(Self {
            supervisor,
            stdin_tx: Some(stdin_tx),
            _protocol: PhantomData,
        })
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Queue one framed write without waiting for the OS
    ///
    /// A full queue is refused rather than buffered further.
    pub fn write(&self, data: &P::Input) -> Result<()> {
        let pid = self.supervisor.pid();
        let stdin_tx = self.stdin_tx.as_ref().ok_or(Error::StdinClosed)?;

        match stdin_tx.try_send(P::frame(data)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                warn!(
                    pid = %pid,
                    "Could not write {} bytes to the stdin of the application: buffer full",
                    frame.len()
                );
                Err(Error::Backpressure)
            }
            Err(TrySendError::Closed(frame)) => {
                warn!(
                    pid = %pid,
                    "Could not write {} bytes to the stdin of the application: stdin closed",
                    frame.len()
                );
                Err(Error::StdinClosed)
            }
        }
    }

    /// Close the child's stdin once queued writes are flushed
    pub fn close_stdin(&mut self) {
        if self.stdin_tx.take().is_some() {
            debug!(pid = %self.supervisor.pid(), "Closing stdin");
        }
    }
}

fn spawn_stdin_writer(mut stdin: ChildStdin, mut frames: mpsc::Receiver<Bytes>, pid: u32) {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = stdin.write_all(&frame).await {
                warn!(pid = %pid, error = %e, "Failed to write to stdin");
                break;
            }
            if let Err(e) = stdin.flush().await {
                warn!(pid = %pid, error = %e, "Failed to flush stdin");
                break;
            }
        }
        debug!(pid = %pid, "stdin writer task exiting");
    });
}
