//! Per-frame share counts.
//!
//! A count is the number of live mappings pointing at a frame. It is 0
//! exactly while the frame sits on the free list. Copy-on-write uses the
//! count to decide between writing in place (sole owner) and duplicating
//! the frame first (shared).
//!
//! The table has a fixed capacity, indexed from a base address. Addresses
//! outside it are not tracked: `increment` ignores them, everything else
//! reports them.

use alloc::boxed::Box;
use alloc::vec;
use spin::Mutex;
use x86_64::PhysAddr;

use super::frame::Frame;
use super::frame_allocator::FramePool;
use super::MemError;
use crate::config::PAGE_SIZE;

/// What a writer must do before mutating a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDecision {
    /// The caller is the last owner; write in place.
    NoCopyNeeded,
    /// Other mappings remain; the caller's share was dropped and it must
    /// write to a private duplicate.
    CopyNeeded,
}

/// Result of dropping one share during `free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    /// Other owners remain.
    Shared(u32),
    /// That was the last share; the frame goes back to the free list.
    Last,
    /// The count was already zero.
    AlreadyFree,
}

/// Fixed-capacity share-count table.
pub struct ReferenceTable {
    base: u64,
    capacity: usize,
    counts: Mutex<Box<[u32]>>,
}

impl ReferenceTable {
    /// Table tracking `capacity` frames starting at `base`.
    pub fn new(base: PhysAddr, capacity: usize) -> Self {
        ReferenceTable {
            base: base.as_u64(),
            capacity,
            counts: Mutex::new(vec![0u32; capacity].into_boxed_slice()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Table slot for `frame`, if it is tracked.
    pub fn index_of(&self, frame: Frame) -> Option<usize> {
        let addr = frame.start_address().as_u64();
        if addr < self.base {
            return None;
        }
        let index = ((addr - self.base) / PAGE_SIZE as u64) as usize;
        if index >= self.capacity {
            return None;
        }
        Some(index)
    }

    /// Current share count of `frame`, if it is tracked.
    pub fn count(&self, frame: Frame) -> Option<u32> {
        let index = self.index_of(frame)?;
        Some(self.count_at(index))
    }

    /// Add one share. Untracked frames are ignored.
    pub fn increment(&self, frame: Frame) {
        match self.index_of(frame) {
            Some(index) => self.counts.lock()[index] += 1,
            None => log::trace!("increment of untracked {} ignored", frame),
        }
    }

    /// Decide whether a writer may mutate `frame` in place.
    ///
    /// With a count of at most 1 nothing changes and the caller may write
    /// in place. Otherwise the caller's share is dropped here and it must
    /// write to a copy.
    pub fn decrement_and_check(&self, frame: Frame) -> Result<CopyDecision, MemError> {
        let index = self.index_of(frame).ok_or(MemError::Untracked)?;
        let mut counts = self.counts.lock();
        if counts[index] <= 1 {
            return Ok(CopyDecision::NoCopyNeeded);
        }
        counts[index] -= 1;
        Ok(CopyDecision::CopyNeeded)
    }

    /// Overwrite the count of a tracked frame. Used by the pool when it
    /// hands a frame out.
    pub(crate) fn set_count(&self, frame: Frame, count: u32) {
        if let Some(index) = self.index_of(frame) {
            self.set_count_at(index, count);
        }
    }

    pub(crate) fn count_at(&self, index: usize) -> u32 {
        self.counts.lock()[index]
    }

    pub(crate) fn set_count_at(&self, index: usize, count: u32) {
        self.counts.lock()[index] = count;
    }

    /// Drop one share of slot `index`.
    pub(crate) fn release_at(&self, index: usize) -> Release {
        let mut counts = self.counts.lock();
        match counts[index] {
            0 => Release::AlreadyFree,
            1 => {
                counts[index] = 0;
                Release::Last
            }
            n => {
                counts[index] = n - 1;
                Release::Shared(n - 1)
            }
        }
    }
}

// ─── Copy-before-write helpers ──────────────────────────────────

impl FramePool {
    /// Allocate a new frame holding a byte-for-byte copy of `frame`.
    ///
    /// Returns `None` if `frame` is not managed by this pool or if the
    /// pool is exhausted; nothing is changed in either case.
    pub fn copy_frame(&self, frame: Frame) -> Option<Frame> {
        let src = self.index_of(frame).ok()?;
        let copy = self.allocate()?;
        let dst = self.index_of(copy).ok()?;
        // The caller keeps `frame` mapped read-only, so no one writes it
        // while we copy; `copy` is ours alone until it is returned.
        unsafe { self.arena().copy(src, dst) };
        self.note_copy();
        Some(copy)
    }

    /// Frame a writer of `frame` should write to.
    ///
    /// The same frame if the writer is its last owner, otherwise a fresh
    /// copy. `None` if a copy was needed but could not be made; the
    /// writer's share of `frame` is then left as it was.
    pub fn resolve_write(&self, frame: Frame) -> Option<Frame> {
        match self.refs().decrement_and_check(frame) {
            Ok(CopyDecision::NoCopyNeeded) => Some(frame),
            Ok(CopyDecision::CopyNeeded) => match self.copy_frame(frame) {
                Some(copy) => Some(copy),
                None => {
                    self.refs().increment(frame);
                    None
                }
            },
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ReferenceTable {
        ReferenceTable::new(PhysAddr::new(0x10_0000), 4)
    }

    fn frame(n: u64) -> Frame {
        Frame::at(PhysAddr::new(0x10_0000 + n * PAGE_SIZE as u64))
    }

    #[test]
    fn index_translation_is_bounds_checked() {
        let refs = table();
        assert_eq!(refs.index_of(frame(0)), Some(0));
        assert_eq!(refs.index_of(frame(3)), Some(3));
        assert_eq!(refs.index_of(frame(4)), None);
        assert_eq!(refs.index_of(Frame::at(PhysAddr::new(0x1000))), None);
    }

    #[test]
    fn increment_k_then_check_k_plus_one() {
        let refs = table();
        refs.set_count_at(1, 1);
        for _ in 0..3 {
            refs.increment(frame(1));
        }
        assert_eq!(refs.count(frame(1)), Some(4));
        for _ in 0..3 {
            assert_eq!(refs.decrement_and_check(frame(1)), Ok(CopyDecision::CopyNeeded));
        }
        assert_eq!(refs.decrement_and_check(frame(1)), Ok(CopyDecision::NoCopyNeeded));
        // The sole owner's share is not consumed by the check.
        assert_eq!(refs.count(frame(1)), Some(1));
    }

    #[test]
    fn untracked_frames() {
        let refs = table();
        refs.increment(frame(9));
        assert_eq!(refs.count(frame(9)), None);
        assert_eq!(refs.decrement_and_check(frame(9)), Err(MemError::Untracked));
    }

    #[test]
    fn release_counts_down_to_free() {
        let refs = table();
        refs.set_count_at(2, 2);
        assert_eq!(refs.release_at(2), Release::Shared(1));
        assert_eq!(refs.release_at(2), Release::Last);
        assert_eq!(refs.release_at(2), Release::AlreadyFree);
        assert_eq!(refs.count_at(2), 0);
    }
}
