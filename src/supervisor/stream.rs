//! Raw chunk pumping from child output streams.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Read size for one OS chunk
const CHUNK_SIZE: usize = 8 * 1024;

/// Forward every chunk read from `stream` until EOF, a read error, or
/// `deliver` returning false.
pub async fn pump_chunks<R>(
    mut stream: R,
    pid: u32,
    stream_type: &'static str,
    mut deliver: impl FnMut(Bytes) -> bool,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);

    loop {
        buf.reserve(CHUNK_SIZE);
        match stream.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if !deliver(buf.split().freeze()) {
                    debug!(pid = %pid, %stream_type, "receiver gone, stopping reader");
                    break;
                }
            }
            Err(e) => {
                debug!(pid = %pid, %stream_type, error = %e, "stream reader exiting due to read error");
                break;
            }
        }
    }

    debug!(pid = %pid, %stream_type, "stream reader task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pumps_everything() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            pump_chunks(reader, 0, "test", |chunk| {
                seen.extend_from_slice(&chunk);
                true
            })
            .await;
            seen
        });

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"abc").await.unwrap();
        writer.write_all(b"defgh").await.unwrap();
        drop(writer);

        assert_eq!(handle.await.unwrap(), b"abcdefgh".to_vec());
    }

    #[tokio::test]
    async fn test_stops_when_rejected() {
        let mut calls = 0;
        pump_chunks(&b"data"[..], 0, "test", |_| {
            calls += 1;
            false
        })
        .await;
        assert_eq!(calls, 1);
    }
}
