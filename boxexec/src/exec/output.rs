//! Attached output forwarding.
//!
//! Without a TTY, every chunk is wrapped in an 8-byte header
//! `[stream, 0, 0, 0, len_be_u32]` so the client can demultiplex stdout from
//! stderr. With a TTY the bytes are passed through untouched.

use super::exec_handle::{ExecHandle, OutputStream};
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use std::io;
use tokio::sync::mpsc;
use tracing::debug;

/// Frames buffered between the process pipes and the HTTP body.
const OUTPUT_BUFFER: usize = 64;

/// Stream identifier carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StdStream {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

/// Frame one chunk of output.
pub fn encode_frame(stream: StdStream, payload: &[u8], tty: bool) -> Bytes {
    if tty {
        return Bytes::copy_from_slice(payload);
    }
    let mut frame = BytesMut::with_capacity(8 + payload.len());
    frame.put_u8(stream as u8);
    frame.put_bytes(0, 3);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

/// Forward the handle's output streams into a single channel of frames.
///
/// The channel closes once both streams reach EOF. If the receiver goes away
/// the pipes are still drained so the process never blocks on a full pipe.
pub(crate) fn forward(handle: &mut ExecHandle, tty: bool) -> mpsc::Receiver<io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);

    if let Some(stdout) = handle.stdout() {
        tokio::spawn(pump(stdout, StdStream::Stdout, tty, tx.clone()));
    }
    if let Some(stderr) = handle.stderr() {
        tokio::spawn(pump(stderr, StdStream::Stderr, tty, tx));
    }

    rx
}

async fn pump(
    mut output: OutputStream,
    stream: StdStream,
    tty: bool,
    tx: mpsc::Sender<io::Result<Bytes>>,
) {
    let mut attached = true;
    while let Some(chunk) = output.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(?stream, error = %e, "Output read failed");
                break;
            }
        };
        if !attached || chunk.is_empty() {
            continue;
        }
        if tx.send(Ok(encode_frame(stream, &chunk, tty))).await.is_err() {
            debug!(?stream, "Output receiver gone, draining");
            attached = false;
        }
    }
}
