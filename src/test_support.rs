//! Test-only socket double, adapted from the teacher crate's
//! `parser/tests/socket.rs`: an in-memory byte vector behind
//! `AsyncRead`/`AsyncWrite`, fixed to track the read cursor correctly (the
//! original computed `remaining` against the buffer's total length instead
//! of what was left past `position`, so a second `poll_read` call would
//! under- or over-read).

use std::cmp::min;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub struct MockSocket {
    data: Vec<u8>,
    position: usize,
    written: Vec<u8>,
}

impl MockSocket {
    pub fn new(buf: &[u8]) -> Self {
        MockSocket { data: buf.to_vec(), position: 0, written: Vec::new() }
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl AsyncWrite for MockSocket {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let inner = self.get_mut();
        inner.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for MockSocket {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let inner = self.get_mut();
        let available = inner.data.len() - inner.position;
        let n = min(buf.remaining(), available);
        buf.put_slice(&inner.data[inner.position..inner.position + n]);
        inner.position += n;
        Poll::Ready(Ok(()))
    }
}
