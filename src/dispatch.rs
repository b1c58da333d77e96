//! Frame dispatcher: the state machine that turns a growing byte buffer
//! into a sequence of callback invocations, one per complete frame.
//!
//! `SCAN_HEADER -> HAVE_HEADER -> (GROW_IF_NEEDED -> WAIT_MORE) | DELIVER`,
//! looping back to `SCAN_HEADER` after every delivered frame so that two
//! frames arriving in a single read are both dispatched before the next
//! socket read. A callback returning `false` aborts the connection.

use async_trait::async_trait;

use crate::buffer::secure::SecurePool;
use crate::buffer::{BufferError, ReadBuffer};
use crate::config::ProxyConfig;
use crate::parser_state::ParserState;
use crate::protocol::{caret, umbrella, FrameDescriptor, ParseResult, Protocol};

/// A machine-readable reason to report through [`FrameCallbacks::parse_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The peer sent bytes this core could not make sense of.
    RemoteError,
}

/// Sized below which a large frame is read into the ordinary growable
/// buffer rather than promoted into a secure, do-not-dump chunk.
const SECURE_ALLOCATION_THRESHOLD: usize = 16 * 1024;

/// Callbacks the frame dispatcher drives as it delivers frames.
///
/// `on_umbrella_message`/`on_caret_message` receive the complete frame
/// (header bytes followed by body bytes) and return `false` to abort the
/// connection, mirroring the teacher crate's channel-task `run()` loops
/// that exit on a closed channel rather than panicking.
#[async_trait]
pub trait FrameCallbacks: Send {
    async fn on_umbrella_message(&mut self, frame: FrameDescriptor, bytes: &[u8]) -> bool;
    async fn on_caret_message(&mut self, frame: FrameDescriptor, bytes: &[u8]) -> bool;
    /// The classic text protocol has no frame boundary this core knows
    /// about; the entire pending region is handed to an external
    /// sub-parser exactly once per `read_available` call, which returns how
    /// many bytes from the front of `pending` it fully processed (zero if it
    /// saw no complete command). The dispatcher retires exactly that many
    /// bytes via `consume_front`, the same way the binary arms retire a
    /// delivered frame.
    async fn on_ascii(&mut self, pending: &[u8]) -> usize;
    fn parse_error(&mut self, code: ErrorCode, detail: &str);
}

/// Drives [`FrameCallbacks`] over the bytes accumulated in a [`ReadBuffer`].
pub struct FrameDispatcher<C> {
    buffer: ReadBuffer,
    state: ParserState,
    callbacks: C,
    config: ProxyConfig,
}

impl<C: FrameCallbacks> FrameDispatcher<C> {
    pub fn new(config: ProxyConfig, callbacks: C) -> Self {
        let buffer = ReadBuffer::new(config.min_buffer_size);
        Self { buffer, state: ParserState::new(), callbacks, config }
    }

    /// A writable tail the connection's socket read should fill, applying
    /// the buffer's grow/compact/reset policy first.
    pub fn acquire_write_region(&mut self) -> Result<&mut [u8], BufferError> {
        self.buffer.acquire_write_region()
    }

    /// Call after filling the slice from [`Self::acquire_write_region`] with
    /// `n` bytes read from the socket.
    pub fn commit_read(&mut self, n: usize) {
        self.buffer.commit_write(n);
    }

    /// Scans and delivers as many complete frames as the pending region
    /// currently holds. Returns `true` to keep reading from the socket,
    /// `false` if detection failed or a callback asked to abort the
    /// connection — either way, every failure path has already reported
    /// itself through [`FrameCallbacks::parse_error`] before returning.
    pub async fn dispatch_available(&mut self) -> bool {
        loop {
            if !self.state.is_detected() {
                if self.buffer.pending_len() == 0 {
                    return true;
                }
                let first_byte = self.buffer.pending()[0];
                if let Err(err) = self.state.observe_first_byte(first_byte) {
                    self.callbacks.parse_error(ErrorCode::RemoteError, &err.to_string());
                    return false;
                }
            }

            match self.state.protocol() {
                Protocol::Ascii => {
                    let consumed = self.callbacks.on_ascii(self.buffer.pending()).await;
                    if consumed > 0 {
                        self.buffer.consume_front(consumed);
                        self.state.record_delivered_frame();
                        self.buffer.maybe_shrink(
                            self.state.messages_parsed_since_adjust(),
                            self.config.max_buffer_size,
                            self.config.adjust_interval,
                        );
                    }
                    return true;
                }
                Protocol::Umbrella | Protocol::Caret => {
                    match self.scan_header() {
                        ParseResult::NotEnoughData => return true,
                        ParseResult::Malformed => {
                            let proto = match self.state.protocol() {
                                Protocol::Umbrella => "umbrella",
                                Protocol::Caret => "caret",
                                _ => unreachable!(),
                            };
                            self.callbacks.parse_error(
                                ErrorCode::RemoteError,
                                &format!("Error parsing {proto} header"),
                            );
                            return false;
                        }
                        ParseResult::Ok(descriptor) => {
                            if !self.deliver_or_wait(descriptor).await {
                                return false;
                            }
                        }
                    }
                }
                Protocol::Unknown => unreachable!("is_detected() guarantees a known protocol"),
            }
        }
    }

    fn scan_header(&self) -> ParseResult {
        let pending = self.buffer.pending();
        match self.state.protocol() {
            Protocol::Umbrella => umbrella::parse(pending),
            Protocol::Caret => caret::parse(pending),
            _ => unreachable!("scan_header only runs for binary protocols"),
        }
    }

    /// Having a complete header, either delivers the frame (if the body has
    /// fully arrived) or grows the buffer and signals the caller to keep
    /// reading. Returns `false` if buffer growth failed or the callback
    /// aborted the connection.
    async fn deliver_or_wait(&mut self, descriptor: FrameDescriptor) -> bool {
        let frame_size = descriptor.frame_size() as usize;

        if self.buffer.pending_len() < frame_size {
            let pool = if self.config.use_secure_allocator && frame_size > SECURE_ALLOCATION_THRESHOLD {
                Some(())
            } else {
                None
            };
            let grown = match pool {
                Some(()) => SecurePool::with_current(frame_size, |pool| {
                    self.buffer.ensure_capacity_for_frame(frame_size, Some(pool))
                }),
                None => self.buffer.ensure_capacity_for_frame(frame_size, None),
            };
            if grown.is_err() {
                self.callbacks.parse_error(ErrorCode::RemoteError, "buffer growth failed");
                return false;
            }
            return true;
        }

        let accepted = {
            let frame_bytes = &self.buffer.pending()[..frame_size];
            match self.state.protocol() {
                Protocol::Umbrella => self.callbacks.on_umbrella_message(descriptor, frame_bytes).await,
                Protocol::Caret => self.callbacks.on_caret_message(descriptor, frame_bytes).await,
                _ => unreachable!(),
            }
        };

        if !accepted {
            return false;
        }

        self.buffer.consume_front(frame_size);
        self.state.record_delivered_frame();
        self.buffer.maybe_shrink(
            self.state.messages_parsed_since_adjust(),
            self.config.max_buffer_size,
            self.config.adjust_interval,
        );

        true
    }
}
