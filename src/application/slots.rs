//! Handler table shared across restarts
//!
//! Handlers are looked up when an event is delivered, never captured by a
//! process instance, so a handler set once keeps working for every child the
//! application starts afterwards.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::supervisor::{ExitInfo, Termination};

pub(crate) type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// At most one handler per event kind; the last assignment wins
pub(crate) struct CallbackSlots<U> {
    stdout: RwLock<Option<Handler<U>>>,
    stderr: RwLock<Option<Handler<Bytes>>>,
    exit: RwLock<Option<Handler<ExitInfo>>>,
    close: RwLock<Option<Handler<ExitInfo>>>,
}

impl<U> Default for CallbackSlots<U> {
    fn default() -> Self {
        Self {
            stdout: RwLock::new(None),
            stderr: RwLock::new(None),
            exit: RwLock::new(None),
            close: RwLock::new(None),
        }
    }
}

impl<U> CallbackSlots<U> {
    pub fn set_stdout(&self, handler: Handler<U>) {
        *self.stdout.write() = Some(handler);
    }

    pub fn set_stderr(&self, handler: Handler<Bytes>) {
        *self.stderr.write() = Some(handler);
    }

    pub fn set_termination(&self, which: Termination, handler: Handler<ExitInfo>) {
        let slot = match which {
            Termination::Exit => &self.exit,
            Termination::Close => &self.close,
        };
        *slot.write() = Some(handler);
    }

    // Getters clone the handler out so no lock is held while it runs.

    pub fn stdout(&self) -> Option<Handler<U>> {
        self.stdout.read().clone()
    }

    pub fn stderr(&self) -> Option<Handler<Bytes>> {
        self.stderr.read().clone()
    }

    pub fn termination(&self, which: Termination) -> Option<Handler<ExitInfo>> {
        match which {
            Termination::Exit => self.exit.read().clone(),
            Termination::Close => self.close.read().clone(),
        }
    }
}
