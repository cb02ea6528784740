//! Child process supervision
//!
//! Spawns one child at a time, watches it for termination, and reports its
//! stderr output and exit/close events into an event queue owned by the
//! application.

mod exit;
mod process;
mod stream;

pub use exit::{ExitInfo, Signal};
pub use process::{Event, EventKind, EventSink, Lifecycle, ProcessSupervisor, Termination};
pub use stream::pump_chunks;
