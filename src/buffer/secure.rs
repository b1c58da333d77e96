//! Thread-local pool of pages marked do-not-dump, for the large-frame path.
//!
//! Each proxy worker thread owns exactly one [`SecurePool`], lazily created
//! on first use and torn down automatically when the thread exits. Buffers
//! are returned to the pool on drop rather than freed, so steady-state
//! large-frame traffic on a given thread settles into reusing a handful of
//! chunks instead of churning the allocator.

use std::cell::RefCell;

use crossbeam_queue::SegQueue;

use super::BufferError;

thread_local! {
    static POOL: RefCell<Option<SecurePool>> = const { RefCell::new(None) };
}

/// Requests above this size bypass the secure allocator and report
/// [`BufferError::AllocationFailed`] to the caller, which falls back to an
/// ordinary heap allocation instead of promoting the frame into a
/// do-not-dump chunk. Mirrors `RLIMIT_MEMLOCK`-style constraints in
/// production: locked, non-dumpable memory is a much scarcer resource than
/// ordinary heap, so a single oversized frame shouldn't be allowed to
/// exhaust it.
pub const MAX_SECURE_CHUNK_BYTES: usize = 32 * 1024 * 1024;

/// A buffer handed out by [`SecurePool::acquire`].
///
/// Dropping it returns the backing storage to the pool it came from (when
/// the size still matches the pool's chunk size) instead of freeing it.
pub struct SecureBuffer {
    data: Box<[u8]>,
    chunk_size: usize,
}

impl SecureBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        if self.data.len() != self.chunk_size {
            // oversized one-off allocation, not pool-shaped; just free it.
            return;
        }
        let data = std::mem::replace(&mut self.data, Box::new([]));
        POOL.with(|cell| {
            if let Some(pool) = cell.borrow().as_ref() {
                pool.free.push(data);
            }
        });
    }
}

/// Per-thread free list of do-not-dump chunks.
pub struct SecurePool {
    free: SegQueue<Box<[u8]>>,
    chunk_size: usize,
}

impl SecurePool {
    fn new(chunk_size: usize) -> Self {
        Self { free: SegQueue::new(), chunk_size }
    }

    /// Returns a buffer of at least `size` bytes, or
    /// `Err(BufferError::AllocationFailed)` if the secure allocator could not
    /// satisfy the request (oversized past [`MAX_SECURE_CHUNK_BYTES`], or a
    /// genuine allocator failure) — callers are expected to fall back to an
    /// ordinary heap allocation rather than treat this as fatal.
    ///
    /// Requests at or under the pool's chunk size are served from the free
    /// list (allocating a fresh chunk when the list is empty); requests
    /// larger than the chunk size bypass the pool entirely and get a
    /// one-off allocation that is freed rather than recycled on drop.
    pub fn acquire(&self, size: usize) -> Result<SecureBuffer, BufferError> {
        if size <= self.chunk_size {
            if let Some(data) = self.free.pop() {
                return Ok(SecureBuffer { data, chunk_size: self.chunk_size });
            }
            let data = alloc_locked(self.chunk_size)?;
            return Ok(SecureBuffer { data, chunk_size: self.chunk_size });
        }
        let data = alloc_locked(size)?;
        Ok(SecureBuffer { data, chunk_size: self.chunk_size })
    }

    /// Runs `f` against the calling thread's pool, creating it on first use.
    pub fn with_current<R>(chunk_size: usize, f: impl FnOnce(&SecurePool) -> R) -> R {
        POOL.with(|cell| {
            let mut slot = cell.borrow_mut();
            let pool = slot.get_or_insert_with(|| SecurePool::new(chunk_size));
            f(pool)
        })
    }
}

/// Allocates `size` zeroed bytes and, on Linux, advises the kernel to
/// exclude the pages from core dumps. On other targets this is a plain
/// heap allocation. Fails if `size` exceeds [`MAX_SECURE_CHUNK_BYTES`] or the
/// allocator itself refuses the request.
fn alloc_locked(size: usize) -> Result<Box<[u8]>, BufferError> {
    if size > MAX_SECURE_CHUNK_BYTES {
        return Err(BufferError::AllocationFailed);
    }
    let mut data = Vec::new();
    data.try_reserve_exact(size).map_err(|_| BufferError::AllocationFailed)?;
    data.resize(size, 0);
    let data = data.into_boxed_slice();
    mark_do_not_dump(&data);
    Ok(data)
}

#[cfg(target_os = "linux")]
fn mark_do_not_dump(data: &[u8]) {
    if data.is_empty() {
        return;
    }
    // SAFETY: the pointer and length describe a live allocation owned by
    // `data` for the duration of this call; madvise does not retain it.
    let rc = unsafe { libc::madvise(data.as_ptr() as *mut libc::c_void, data.len(), libc::MADV_DONTDUMP) };
    if rc != 0 {
        tracing::debug!(
            error = %std::io::Error::last_os_error(),
            "madvise(MADV_DONTDUMP) failed, continuing with a plain allocation"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn mark_do_not_dump(_data: &[u8]) {}
