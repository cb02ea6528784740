//! Raw byte framing: stdout chunks are forwarded exactly as the OS delivers
//! them and stdin writes go out verbatim.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use super::{sealed, Protocol};
use crate::supervisor::{pump_chunks, Event, EventKind, EventSink, Lifecycle};

/// Byte-by-byte protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteProtocol;

impl sealed::Sealed for ByteProtocol {}

impl Protocol for ByteProtocol {
    type Unit = Bytes;
    type Input = [u8];

    const NAME: &'static str = "byte";
    const DEFERS_TERMINATION: bool = false;

    fn frame(input: &[u8]) -> Bytes {
        Bytes::copy_from_slice(input)
    }

    fn spawn_reader<R>(stdout: R, origin: Arc<Lifecycle>, sink: EventSink<Bytes>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pid = origin.pid();
        tokio::spawn(pump_chunks(stdout, pid, "stdout", move |chunk| {
            sink.send(Event::new(origin.clone(), EventKind::Stdout(chunk)))
                .is_ok()
        }))
    }
}
