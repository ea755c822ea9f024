//! Connection decorator applying a transform pair
//!
//! Reads are decoded in place after the inner read fills the buffer. Writes
//! are encoded into an owned buffer first, since the caller's slice is
//! borrowed immutably, and drained to the inner stream on later polls.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::StreamTransform;

/// Upper bound on bytes accepted by a single `poll_write`
const MAX_PENDING: usize = 16 * 1024;

pub struct TransformStream<S> {
    inner: S,
    decoder: Box<dyn StreamTransform>,
    encoder: Box<dyn StreamTransform>,
    /// Encoded bytes not yet accepted by `inner`
    pending: BytesMut,
}

impl<S> TransformStream<S> {
    pub fn new(
        inner: S,
        decoder: Box<dyn StreamTransform>,
        encoder: Box<dyn StreamTransform>,
    ) -> Self {
        Self {
            inner,
            decoder,
            encoder,
            pending: BytesMut::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Unwrap the connection. Encoded bytes still pending are discarded.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncWrite + Unpin> TransformStream<S> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "transport accepted zero bytes",
                )));
            }
            self.pending.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TransformStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.decoder.apply(&mut buf.filled_mut()[before..]);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TransformStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let n = buf.len().min(MAX_PENDING);
        this.pending.extend_from_slice(&buf[..n]);
        this.encoder.apply(&mut this.pending[..]);

        // the bytes now belong to us; a stalled drain resumes on the next poll
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
