//! Byte window over the managed physical range.
//!
//! Byte 0 of the arena is the first managed frame. In the kernel the
//! window is the physical-memory mapping set up by the bootloader; in
//! hosted builds it is a page-aligned heap buffer the arena owns.
//!
//! All frame-level accessors are `unsafe`: the arena does not know who
//! owns a frame, the pool and its callers do.

use alloc::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use core::ptr::{self, NonNull};

use crate::config::PAGE_SIZE;

/// Raw memory backing the frame pool.
pub struct Arena {
    base: NonNull<u8>,
    len: usize,
    owned: bool,
}

// The arena is only a window; exclusivity of each frame is upheld by the
// free-list lock (free frames) and by share counts (allocated frames).
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate a zeroed, page-aligned buffer of `len` bytes.
    ///
    /// Returns `None` if `len` cannot form a valid layout.
    pub fn hosted(len: usize) -> Option<Self> {
        if len == 0 {
            return Some(Arena {
                base: NonNull::dangling(),
                len: 0,
                owned: false,
            });
        }
        let layout = Layout::from_size_align(len, PAGE_SIZE).ok()?;
        let raw = unsafe { alloc_zeroed(layout) };
        let base = match NonNull::new(raw) {
            Some(base) => base,
            None => handle_alloc_error(layout),
        };
        Some(Arena {
            base,
            len,
            owned: true,
        })
    }

    /// Wrap an existing mapping of the managed range.
    ///
    /// # Safety
    /// `base..base + len` must be mapped, writable, used by nothing but
    /// the pool built on top of this arena, and valid for the arena's
    /// whole lifetime.
    pub unsafe fn from_raw(base: NonNull<u8>, len: usize) -> Self {
        Arena {
            base,
            len,
            owned: false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to the first byte of frame `index`.
    pub(crate) fn frame_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!((index + 1) * PAGE_SIZE <= self.len);
        unsafe { self.base.as_ptr().add(index * PAGE_SIZE) }
    }

    /// # Safety
    /// The caller must own frame `index` exclusively.
    pub(crate) unsafe fn fill(&self, index: usize, byte: u8) {
        ptr::write_bytes(self.frame_ptr(index), byte, PAGE_SIZE);
    }

    /// # Safety
    /// `dst` must be owned exclusively and `src` must not be written
    /// concurrently. `src != dst`.
    pub(crate) unsafe fn copy(&self, src: usize, dst: usize) {
        ptr::copy_nonoverlapping(self.frame_ptr(src), self.frame_ptr(dst), PAGE_SIZE);
    }

    /// Free-list link stored in the first word of a free frame.
    ///
    /// # Safety
    /// Frame `index` must be on the free list and the free-list lock held.
    pub(crate) unsafe fn read_link(&self, index: usize) -> u64 {
        (self.frame_ptr(index) as *const u64).read_unaligned()
    }

    /// # Safety
    /// Same as [`Arena::read_link`].
    pub(crate) unsafe fn write_link(&self, index: usize, link: u64) {
        (self.frame_ptr(index) as *mut u64).write_unaligned(link);
    }

    /// # Safety
    /// No one may write frame `index` for the lifetime of the slice.
    pub(crate) unsafe fn bytes(&self, index: usize) -> &[u8] {
        core::slice::from_raw_parts(self.frame_ptr(index), PAGE_SIZE)
    }

    /// # Safety
    /// The caller must own frame `index` exclusively for the lifetime
    /// of the slice.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self, index: usize) -> &mut [u8] {
        core::slice::from_raw_parts_mut(self.frame_ptr(index), PAGE_SIZE)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if self.owned {
            // Layout was validated in `hosted`.
            unsafe {
                dealloc(
                    self.base.as_ptr(),
                    Layout::from_size_align_unchecked(self.len, PAGE_SIZE),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::const_assert!(core::mem::size_of::<u64>() <= PAGE_SIZE);

    #[test]
    fn hosted_arena_is_zeroed_and_page_aligned() {
        let arena = Arena::hosted(2 * PAGE_SIZE).unwrap();
        assert_eq!(arena.len(), 2 * PAGE_SIZE);
        assert_eq!(arena.frame_ptr(0) as usize % PAGE_SIZE, 0);
        unsafe {
            assert!(arena.bytes(1).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn fill_copy_and_link() {
        let arena = Arena::hosted(2 * PAGE_SIZE).unwrap();
        unsafe {
            arena.fill(0, 0xAB);
            arena.copy(0, 1);
            assert!(arena.bytes(1).iter().all(|&b| b == 0xAB));

            arena.write_link(1, 7);
            assert_eq!(arena.read_link(1), 7);
            assert!(arena.bytes(0).iter().all(|&b| b == 0xAB));
        }
    }
}
