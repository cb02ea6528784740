//! stdio-app - supervise a child process behind a restartable stdio channel
//!
//! The child is treated as a long-lived application: callers push input to
//! its stdin, receive its output through handlers, and learn when it exits.
//! A dead child is replaced on the next [`Application::ensure_is_running`]
//! without re-registering any handler.
//!
//! Two framings are available over the child's stdout:
//! - [`LineApplication`]: one `String` per `\n`-terminated line
//! - [`ByteApplication`]: raw chunks exactly as the OS delivers them
//!
//! ```no_run
//! # async fn demo() -> stdio_app::Result<()> {
//! use stdio_app::{LineApplication, SpawnSpec};
//!
//! let app = LineApplication::builder(SpawnSpec::new("cat"))
//!     .on_stdout(|line| println!("child said {line}"))
//!     .on_close(|info| eprintln!("child closed with {:?}", info))
//!     .spawn()?;
//! app.stdin(r#"{"key":"value"}"#)?;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod config;
pub mod protocol;

mod error;
mod supervisor;
mod utils;

pub use application::{
    Application, ApplicationBuilder, ByteApplication, LineApplication, RunState,
};
pub use bytes::Bytes;
pub use config::{SpawnOptions, SpawnSpec, StderrMode};
pub use error::{Error, Result};
pub use protocol::{ByteProtocol, LineProtocol, Protocol};
pub use supervisor::{ExitInfo, Signal};

/// Spawn `spec` as a line-protocol application
pub fn spawn_line_by_line(spec: SpawnSpec) -> Result<LineApplication> {
    LineApplication::spawn(spec)
}

/// Spawn `spec` as a byte-protocol application
pub fn spawn_byte_by_byte(spec: SpawnSpec) -> Result<ByteApplication> {
    ByteApplication::spawn(spec)
}
