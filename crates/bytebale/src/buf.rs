// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::alloc::{self, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

/// A raw zero-initialized allocation shared by every buffer sliced out of it.
///
/// The chunk only owns the memory; which byte ranges are readable or writable
/// at any moment is governed by the pool, which guarantees that live [`Buf`]
/// instances and parked tier slots always cover pairwise disjoint ranges of
/// the same chunk.
pub(crate) struct Chunk {
    ptr: NonNull<u8>,
    cap: usize,
}

// SAFETY: The raw capacity is only ever accessed through `Buf` instances,
// which cover disjoint ranges and require `&mut` for mutation. The pointer
// itself is never re-targeted after allocation.
unsafe impl Send for Chunk {}
// SAFETY: See above.
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Allocates a zero-initialized chunk of the given capacity.
    ///
    /// A capacity of zero produces a dangling, non-owning chunk.
    pub(crate) fn allocate(cap: usize) -> Arc<Self> {
        if cap == 0 {
            return Arc::new(Self {
                ptr: NonNull::dangling(),
                cap: 0,
            });
        }

        let layout = Layout::array::<u8>(cap).expect("buffer capacity overflows a Layout");

        // SAFETY: `layout` has non-zero size because `cap > 0`.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };

        let Some(ptr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };

        Arc::new(Self { ptr, cap })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.cap
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if self.cap == 0 {
            return;
        }

        // SAFETY: The pointer was produced by `alloc_zeroed` with this exact
        // layout and has not been deallocated before (we own it exclusively).
        unsafe {
            alloc::dealloc(
                self.ptr.as_ptr(),
                Layout::array::<u8>(self.cap).expect("layout was valid at allocation time"),
            );
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk").field("cap", &self.cap).finish()
    }
}

/// A contiguous mutable byte region obtained from a [`SizedPool`][crate::SizedPool].
///
/// A buffer has a length and an apparent capacity, with `len <= capacity`.
/// The bytes are always initialized: fresh allocations are zeroed and reused
/// buffers retain their previous contents.
///
/// Dropping a buffer without returning it to the pool releases the memory
/// (once no other slice of the same underlying allocation survives); no
/// cleanup call is required.
pub struct Buf {
    chunk: Arc<Chunk>,
    offset: usize,
    len: usize,
    cap: usize,
}

impl Buf {
    /// Invariant: `offset + cap <= chunk.capacity()` and no other live `Buf`
    /// or parked tier slot overlaps `[offset, offset + cap)`.
    pub(crate) fn from_parts(chunk: Arc<Chunk>, offset: usize, len: usize, cap: usize) -> Self {
        debug_assert!(len <= cap);
        debug_assert!(offset + cap <= chunk.capacity());
        Self {
            chunk,
            offset,
            len,
            cap,
        }
    }

    /// Deconstructs the buffer into its chunk and the `(offset, cap)` range
    /// it covered. The length is discarded.
    pub(crate) fn into_parts(self) -> (Arc<Chunk>, usize, usize) {
        (self.chunk, self.offset, self.cap)
    }

    /// Returns the number of initialized bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the apparent capacity of the buffer.
    ///
    /// For a split prefix this is the prefix size, not the capacity of the
    /// underlying allocation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Sets the length of the buffer within its capacity.
    ///
    /// This is always safe: every byte up to the capacity is initialized.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the capacity.
    pub fn set_len(&mut self, len: usize) {
        assert!(
            len <= self.cap,
            "length {len} exceeds buffer capacity {}",
            self.cap
        );
        self.len = len;
    }

    /// Shortens the buffer to `len` bytes; no-op if already shorter.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Returns a raw pointer to the first byte of the buffer.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        // SAFETY: `offset` is within the chunk by the range invariant.
        unsafe { self.chunk.base().add(self.offset) }
    }

    /// Returns the buffer contents as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: The range invariant guarantees `[offset, offset + len)` is
        // in bounds and disjoint from every other live buffer; the memory is
        // initialized (zeroed at allocation). Shared access through `&self`
        // cannot race with mutation, which requires `&mut self`.
        unsafe { std::slice::from_raw_parts(self.chunk.base().add(self.offset), self.len) }
    }

    /// Returns the buffer contents as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: As in `as_slice`, plus `&mut self` guarantees exclusive
        // access to this buffer's range.
        unsafe { std::slice::from_raw_parts_mut(self.chunk.base().add(self.offset), self.len) }
    }

}

impl Deref for Buf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl AsRef<[u8]> for Buf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("len", &self.len)
            .field("cap", &self.cap)
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(Buf: Send, Sync);

    #[test]
    fn fresh_buffer_is_zeroed() {
        let buf = Buf::from_parts(Chunk::allocate(64), 0, 64, 64);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn writes_are_visible_through_reads() {
        let mut buf = Buf::from_parts(Chunk::allocate(16), 0, 16, 16);
        buf[..4].copy_from_slice(b"abcd");
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn disjoint_slices_of_one_chunk() {
        let chunk = Chunk::allocate(32);
        let mut front = Buf::from_parts(Arc::clone(&chunk), 0, 16, 16);
        let mut tail = Buf::from_parts(chunk, 16, 16, 16);

        front.as_mut_slice().fill(1);
        tail.as_mut_slice().fill(2);

        assert!(front.iter().all(|&b| b == 1));
        assert!(tail.iter().all(|&b| b == 2));
        assert_eq!(tail.as_ptr() as usize, front.as_ptr() as usize + 16);
    }

    #[test]
    fn set_len_within_capacity() {
        let mut buf = Buf::from_parts(Chunk::allocate(8), 0, 0, 8);
        assert!(buf.is_empty());
        buf.set_len(8);
        assert_eq!(buf.len(), 8);
        buf.truncate(3);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    #[should_panic(expected = "exceeds buffer capacity")]
    fn set_len_beyond_capacity_panics() {
        let mut buf = Buf::from_parts(Chunk::allocate(8), 0, 0, 8);
        buf.set_len(9);
    }

    #[test]
    fn zero_capacity_buffer() {
        let buf = Buf::from_parts(Chunk::allocate(0), 0, 0, 0);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.as_slice(), &[] as &[u8]);
    }
}
