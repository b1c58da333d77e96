//! Growable, zero-copy connection read buffer.
//!
//! Consumed-prefix / pending-middle / writable-tail regions tracked with a
//! `read_pos`/`write_pos` pair, in the double-buffered-reader style; this
//! version adds the growth, shrink and secure-allocation policy the frame
//! dispatcher drives it with.

pub mod secure;

use std::fmt;

use secure::{SecureBuffer, SecurePool};

/// Errors surfaced by buffer growth.
#[derive(Debug)]
pub enum BufferError {
    /// The requested capacity would overflow `usize` or the allocator
    /// itself refused the request.
    AllocationFailed,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::AllocationFailed => write!(f, "buffer allocation failed"),
        }
    }
}

impl std::error::Error for BufferError {}

enum Storage {
    Plain(Box<[u8]>),
    Secure(SecureBuffer),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Plain(data) => data,
            Storage::Secure(buf) => buf.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Plain(data) => data,
            Storage::Secure(buf) => buf.as_mut_slice(),
        }
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// A single connection's read buffer: a consumed prefix, a pending region
/// awaiting delivery, and a writable tail.
///
/// Invariants: `read_pos <= write_pos <= capacity`; `pending()` never moves
/// except when [`ReadBuffer::acquire_write_region`] compacts it to reclaim
/// the consumed prefix.
pub struct ReadBuffer {
    storage: Storage,
    read_pos: usize,
    write_pos: usize,
    target_size: usize,
}

impl ReadBuffer {
    /// Creates a buffer with `target_size` bytes of initial capacity.
    pub fn new(target_size: usize) -> Self {
        Self {
            storage: Storage::Plain(vec![0u8; target_size].into_boxed_slice()),
            read_pos: 0,
            write_pos: 0,
            target_size,
        }
    }

    /// Total allocated capacity.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes written but not yet consumed.
    pub fn pending_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Unwritten capacity at the tail.
    pub fn tail_capacity(&self) -> usize {
        self.capacity() - self.write_pos
    }

    /// The buffer's configured resting size: what it grows toward and what
    /// it shrinks back down to.
    pub fn target_size(&self) -> usize {
        self.target_size
    }

    /// The pending region: bytes available for the dispatcher to scan or
    /// deliver.
    pub fn pending(&self) -> &[u8] {
        &self.storage.as_slice()[self.read_pos..self.write_pos]
    }

    /// Prepares a writable tail region of at least one byte, applying
    /// exactly one of three adjustments in priority order: reset empty
    /// cursors to zero, compact the consumed prefix away, or grow.
    pub fn acquire_write_region(&mut self) -> Result<&mut [u8], BufferError> {
        if self.pending_len() == 0 && self.capacity() > 0 {
            self.read_pos = 0;
            self.write_pos = 0;
        } else if self.read_pos > 0 {
            self.compact();
        } else {
            self.grow(self.target_size)?;
        }

        if self.tail_capacity() == 0 {
            self.grow(self.target_size.max(1))?;
        }

        Ok(&mut self.storage.as_mut_slice()[self.write_pos..])
    }

    /// Marks `n` freshly written bytes as pending.
    pub fn commit_write(&mut self, n: usize) {
        assert!(self.write_pos + n <= self.capacity(), "commit_write past tail capacity");
        self.write_pos += n;
    }

    /// Marks `n` pending bytes as delivered; does not move memory.
    pub fn consume_front(&mut self, n: usize) {
        assert!(self.read_pos + n <= self.write_pos, "consume_front past pending region");
        self.read_pos += n;
    }

    /// Shifts the pending region to offset zero, reclaiming the consumed
    /// prefix as writable tail space.
    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let pending = self.pending_len();
        self.storage.as_mut_slice().copy_within(self.read_pos..self.write_pos, 0);
        self.read_pos = 0;
        self.write_pos = pending;
    }

    /// Grows capacity by at least `additional` bytes, preserving the
    /// pending region at offset zero.
    pub fn grow(&mut self, additional: usize) -> Result<(), BufferError> {
        let new_cap = self.capacity().checked_add(additional).ok_or(BufferError::AllocationFailed)?;
        let pending = self.pending_len();
        let mut new_data = vec![0u8; new_cap].into_boxed_slice();
        new_data[..pending].copy_from_slice(self.pending());
        self.storage = Storage::Plain(new_data);
        self.read_pos = 0;
        self.write_pos = pending;
        Ok(())
    }

    /// Ensures the buffer can hold `frame_size` pending bytes without a
    /// further resize, growing (or, when `pool` is given, transferring into
    /// a secure chunk) if the current pending-plus-tail capacity falls
    /// short. Raises `target_size` to at least `frame_size` either way.
    ///
    /// A secure-allocator failure is not fatal: it is logged and the buffer
    /// falls back to an ordinary `grow` instead, so the frame is still
    /// delivered through the normal path.
    pub fn ensure_capacity_for_frame(
        &mut self,
        frame_size: usize,
        pool: Option<&SecurePool>,
    ) -> Result<(), BufferError> {
        if self.pending_len() + self.tail_capacity() < frame_size {
            let need_plain_grow = match pool {
                Some(pool) => match self.promote_to_secure(frame_size, pool) {
                    Ok(()) => false,
                    Err(err) => {
                        tracing::warn!(
                            frame_size,
                            error = %err,
                            "secure allocator failed, falling back to plain buffer growth"
                        );
                        true
                    }
                },
                None => true,
            };
            if need_plain_grow {
                let additional = frame_size - self.pending_len();
                self.grow(additional)?;
            }
        }
        self.target_size = self.target_size.max(frame_size);
        Ok(())
    }

    /// Transfers the pending bytes into a freshly acquired secure buffer
    /// sized to `frame_size`, handing ownership of the new region (and its
    /// eventual deallocation) to the pool. Fails without touching `self` if
    /// the pool cannot satisfy the request.
    fn promote_to_secure(&mut self, frame_size: usize, pool: &SecurePool) -> Result<(), BufferError> {
        let mut secure = pool.acquire(frame_size)?;
        let pending = self.pending_len();
        secure.as_mut_slice()[..pending].copy_from_slice(self.pending());
        self.storage = Storage::Secure(secure);
        self.read_pos = 0;
        self.write_pos = pending;
        Ok(())
    }

    /// Applies the shrink policy: once `messages_parsed_since_adjust` has
    /// reached `adjust_interval` and the buffer is both idle (no pending
    /// bytes) and oversized (`capacity > max_buffer_size`), reallocates down
    /// to `min(target_size, max_buffer_size)` and resets the counter.
    ///
    /// Returns `true` if a shrink happened, so callers can log it.
    pub fn maybe_shrink(
        &mut self,
        messages_parsed_since_adjust: &mut u64,
        max_buffer_size: usize,
        adjust_interval: u64,
    ) -> bool {
        if *messages_parsed_since_adjust < adjust_interval {
            return false;
        }
        if self.capacity() <= max_buffer_size || self.pending_len() != 0 {
            *messages_parsed_since_adjust = 0;
            return false;
        }
        let new_size = self.target_size.min(max_buffer_size);
        self.storage = Storage::Plain(vec![0u8; new_size].into_boxed_slice());
        self.read_pos = 0;
        self.write_pos = 0;
        *messages_parsed_since_adjust = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_has_no_pending_bytes() {
        let buf = ReadBuffer::new(64);
        assert_eq!(buf.pending_len(), 0);
        assert_eq!(buf.capacity(), 64);
    }

    #[test]
    fn commit_and_consume_track_pending_region() {
        let mut buf = ReadBuffer::new(16);
        {
            let tail = buf.acquire_write_region().unwrap();
            tail[..4].copy_from_slice(b"abcd");
        }
        buf.commit_write(4);
        assert_eq!(buf.pending(), b"abcd");
        buf.consume_front(2);
        assert_eq!(buf.pending(), b"cd");
    }

    #[test]
    fn acquire_write_region_resets_when_drained() {
        let mut buf = ReadBuffer::new(8);
        buf.commit_write(8);
        buf.consume_front(8);
        let tail_len_before = buf.tail_capacity();
        assert_eq!(tail_len_before, 0);
        let tail = buf.acquire_write_region().unwrap();
        assert_eq!(tail.len(), 8);
    }

    #[test]
    fn acquire_write_region_compacts_consumed_prefix() {
        let mut buf = ReadBuffer::new(8);
        buf.commit_write(8);
        buf.consume_front(4);
        let tail = buf.acquire_write_region().unwrap();
        assert_eq!(tail.len(), 4);
        assert_eq!(buf.pending_len(), 4);
    }

    #[test]
    fn acquire_write_region_grows_when_full_and_unconsumed() {
        let mut buf = ReadBuffer::new(8);
        buf.commit_write(8);
        let tail = buf.acquire_write_region().unwrap();
        assert!(tail.len() >= 1);
        assert!(buf.capacity() > 8);
    }

    #[test]
    fn ensure_capacity_for_frame_grows_and_raises_target() {
        let mut buf = ReadBuffer::new(8);
        buf.ensure_capacity_for_frame(64, None).unwrap();
        assert!(buf.tail_capacity() >= 64);
        assert_eq!(buf.target_size(), 64);
    }

    #[test]
    fn shrink_fires_once_per_interval() {
        let mut buf = ReadBuffer::new(8);
        buf.grow(10 * 1024 * 1024).unwrap();
        let mut counter = 10_000u64;
        assert!(buf.maybe_shrink(&mut counter, 1024, 10_000));
        assert_eq!(counter, 0);
        assert!(buf.capacity() <= 1024);
    }

    #[test]
    fn shrink_does_not_fire_with_pending_bytes() {
        let mut buf = ReadBuffer::new(8);
        buf.grow(10 * 1024 * 1024).unwrap();
        buf.commit_write(1);
        let mut counter = 10_000u64;
        assert!(!buf.maybe_shrink(&mut counter, 1024, 10_000));
        assert!(buf.capacity() > 1024);
    }

    #[test]
    fn promote_to_secure_preserves_pending_bytes() {
        let mut buf = ReadBuffer::new(8);
        {
            let tail = buf.acquire_write_region().unwrap();
            tail[..3].copy_from_slice(b"xyz");
        }
        buf.commit_write(3);
        SecurePool::with_current(128, |pool| {
            buf.ensure_capacity_for_frame(128, Some(pool)).unwrap();
        });
        assert_eq!(buf.pending(), b"xyz");
    }

    #[test]
    fn secure_allocation_failure_falls_back_to_plain_growth() {
        let mut buf = ReadBuffer::new(8);
        {
            let tail = buf.acquire_write_region().unwrap();
            tail[..3].copy_from_slice(b"xyz");
        }
        buf.commit_write(3);
        let oversized = secure::MAX_SECURE_CHUNK_BYTES + 1;
        SecurePool::with_current(128, |pool| {
            buf.ensure_capacity_for_frame(oversized, Some(pool)).unwrap();
        });
        assert!(matches!(buf.storage, Storage::Plain(_)));
        assert_eq!(buf.pending(), b"xyz");
        assert!(buf.tail_capacity() + buf.pending_len() >= oversized);
    }
}
