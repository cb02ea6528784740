//! Line-delimited framing
//!
//! One stdout unit per `\n`-terminated line, delimiter stripped. Output that
//! is still unterminated when the stream ends is discarded.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{sealed, Protocol};
use crate::supervisor::{Event, EventKind, EventSink, Lifecycle};

pub const DELIMITER: u8 = b'\n';

/// Line-by-line protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProtocol;

impl sealed::Sealed for LineProtocol {}

impl Protocol for LineProtocol {
    type Unit = String;
    type Input = str;

    const NAME: &'static str = "line";
    const DEFERS_TERMINATION: bool = true;

    fn frame(input: &str) -> Bytes {
        let mut frame = Vec::with_capacity(input.len() + 1);
        frame.extend_from_slice(input.as_bytes());
        frame.push(DELIMITER);
        Bytes::from(frame)
    }

    fn spawn_reader<R>(stdout: R, origin: Arc<Lifecycle>, sink: EventSink<String>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let pid = origin.pid();
            let mut reader = BufReader::new(stdout);
            let mut buf: Vec<u8> = Vec::with_capacity(1024);

            loop {
                buf.clear();
                match reader.read_until(DELIMITER, &mut buf).await {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        if buf.last() != Some(&DELIMITER) {
                            debug!(pid = %pid, "Dropping {} bytes of unterminated output", buf.len());
                            break;
                        }
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }

                        // Keep draining after teardown so the child never blocks on a full pipe
                        if !origin.reader_open() {
                            continue;
                        }

                        let line = String::from_utf8_lossy(&buf).into_owned();
                        if sink
                            .send(Event::new(origin.clone(), EventKind::Stdout(line)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(pid = %pid, error = %e, "line reader exiting due to read error");
                        break;
                    }
                }
            }

            debug!(pid = %pid, "line reader task exiting");
        })
    }
}
