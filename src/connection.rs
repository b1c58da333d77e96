//! Drives a [`FrameDispatcher`] off a live `AsyncRead` connection: fill the
//! dispatcher's writable tail, hand the read bytes to it, and let it
//! deliver whatever complete frames that produced.
//!
//! Mirrors the teacher crate's `fill_internal`/`process_socket` shape: read
//! into a buffer slice, extend the write cursor by what came back, treat a
//! zero-byte read as connection close.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::dispatch::{FrameCallbacks, FrameDispatcher};

/// Runs `dispatcher` against `socket` until the peer closes the connection,
/// a header turns out malformed, or a callback asks to abort.
pub async fn drive<S, C>(socket: &mut S, dispatcher: &mut FrameDispatcher<C>) -> std::io::Result<()>
where
    S: AsyncRead + Unpin,
    C: FrameCallbacks,
{
    loop {
        let tail = dispatcher
            .acquire_write_region()
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        let n = socket.read(tail).await?;
        if n == 0 {
            return Ok(());
        }
        dispatcher.commit_read(n);

        if !dispatcher.dispatch_available().await {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::dispatch::ErrorCode;
    use crate::protocol::{caret, umbrella, FrameDescriptor};
    use crate::test_support::MockSocket;
    use async_trait::async_trait;
    use byteorder::{BigEndian, ByteOrder};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Counting {
        delivered: usize,
    }

    struct CountingCallbacks(Arc<Mutex<Counting>>);

    #[async_trait]
    impl FrameCallbacks for CountingCallbacks {
        async fn on_umbrella_message(&mut self, _frame: FrameDescriptor, _bytes: &[u8]) -> bool {
            self.0.lock().unwrap().delivered += 1;
            true
        }

        async fn on_caret_message(&mut self, _frame: FrameDescriptor, _bytes: &[u8]) -> bool {
            self.0.lock().unwrap().delivered += 1;
            true
        }

        async fn on_ascii(&mut self, _pending: &[u8]) -> usize {
            0
        }

        fn parse_error(&mut self, _code: ErrorCode, _detail: &str) {}
    }

    fn umbrella_frame(body: &[u8]) -> Vec<u8> {
        let header_size = umbrella::MIN_HEADER_SIZE as u16;
        let mut buf = vec![0u8; header_size as usize + body.len()];
        buf[0] = umbrella::MAGIC;
        buf[1] = umbrella::VERSION;
        BigEndian::write_u16(&mut buf[2..4], header_size);
        BigEndian::write_u32(&mut buf[4..8], body.len() as u32);
        BigEndian::write_u32(&mut buf[8..12], 1);
        BigEndian::write_u64(&mut buf[12..20], 1);
        buf[20] = 0;
        buf[header_size as usize..].copy_from_slice(body);
        buf
    }

    #[tokio::test]
    async fn drives_dispatcher_to_completion_over_a_mock_socket() {
        let mut combined = umbrella_frame(b"one");
        combined.extend(umbrella_frame(b"two"));
        let mut socket = MockSocket::new(&combined);

        let state = Arc::new(Mutex::new(Counting::default()));
        let mut dispatcher = FrameDispatcher::new(ProxyConfig::default(), CountingCallbacks(state.clone()));

        drive(&mut socket, &mut dispatcher).await.unwrap();

        assert_eq!(state.lock().unwrap().delivered, 2);
    }

    #[tokio::test]
    async fn unrelated_magic_does_not_panic_the_drive_loop() {
        let mut socket = MockSocket::new(&[caret::MAGIC; 1]);
        let state = Arc::new(Mutex::new(Counting::default()));
        let mut dispatcher = FrameDispatcher::new(ProxyConfig::default(), CountingCallbacks(state));

        drive(&mut socket, &mut dispatcher).await.unwrap();
    }
}
