//! Bounded in-process byte pipe between an archive codec and a store.
//!
//! The writer half is closed when it is dropped. A writer that is dropped
//! without [`PipeWriter::finish`] poisons the pipe: once the buffered bytes are
//! drained the reader fails with [`io::ErrorKind::BrokenPipe`] instead of
//! reporting a clean end of stream, so a truncated archive is never mistaken
//! for a complete one. Dropping the reader makes pending and future writes
//! fail with `BrokenPipe`, which unblocks a producer whose consumer gave up.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Default number of bytes buffered between the two ends.
pub const DEFAULT_PIPE_CAPACITY: usize = 256 * 1024;

/// Create a pipe buffering at most `capacity` bytes.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (write_half, read_half) = tokio::io::duplex(capacity);
    let poisoned = Arc::new(AtomicBool::new(false));
    (
        PipeWriter {
            inner: write_half,
            poisoned: poisoned.clone(),
            finished: false,
        },
        PipeReader {
            inner: read_half,
            poisoned,
        },
    )
}

#[derive(Debug)]
pub struct PipeWriter {
    inner: DuplexStream,
    poisoned: Arc<AtomicBool>,
    finished: bool,
}

impl PipeWriter {
    /// Close the pipe, signalling a complete stream to the reader.
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        // Runs before `inner` is dropped, so the flag is visible by the time
        // the reader observes the close.
        if !self.finished {
            self.poisoned.store(true, Ordering::Release);
        }
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    /// Flushes only; the pipe closes when the writer is finished or dropped.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }
}

#[derive(Debug)]
pub struct PipeReader {
    inner: DuplexStream,
    poisoned: Arc<AtomicBool>,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(()))
                if buf.filled().len() == before
                    && buf.remaining() > 0
                    && this.poisoned.load(Ordering::Acquire) =>
            {
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "pipe writer closed before the stream was complete",
                )))
            }
            other => other,
        }
    }
}
