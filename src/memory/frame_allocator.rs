//! Physical frame pool.
//!
//! Every whole frame of the managed range is either on the free list
//! (share count 0) or allocated (share count >= 1). The free list is an
//! index chain threaded through the free frames themselves: the first
//! word of a free frame holds the index of the next one.
//!
//! Two spin locks guard the shared state, one for the free list and one
//! inside the reference table. No path holds both at once.

use alloc::vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;
use x86_64::PhysAddr;

use super::arena::Arena;
use super::fatal;
use super::frame::Frame;
use super::refcount::{ReferenceTable, Release};
use super::FatalError;
use crate::config::{ConfigError, PoolConfig, ALLOC_POISON, FREE_POISON, PAGE_SIZE};

/// Link value marking the end of the free list.
const NO_LINK: u64 = u64::MAX;

fn encode_link(next: Option<usize>) -> u64 {
    next.map_or(NO_LINK, |index| index as u64)
}

struct FreeList {
    head: Option<usize>,
    len: usize,
}

/// Counters kept for diagnostics only.
struct Counters {
    allocations: AtomicU64,
    frees: AtomicU64,
    exhausted: AtomicU64,
    copies: AtomicU64,
}

/// Snapshot of pool activity since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Frames handed out by `allocate`.
    pub allocations: u64,
    /// Frames returned to the free list.
    pub frees: u64,
    /// `allocate` calls that found the pool empty.
    pub exhausted: u64,
    /// Frames duplicated for copy-on-write.
    pub copies: u64,
}

/// Result of a successful consistency scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolAudit {
    pub total: usize,
    pub free: usize,
    pub allocated: usize,
}

/// Inconsistency found by [`FramePool::audit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditError {
    /// A free-list link points outside the pool.
    LinkOutOfRange { index: usize, link: u64 },
    /// The free list visits a frame twice.
    Cycle { index: usize },
    /// The recorded free count disagrees with the list.
    LengthMismatch { recorded: usize, walked: usize },
    /// A frame on the free list has owners.
    FreeFrameShared { frame: Frame, count: u32 },
    /// A frame off the free list has no owner.
    AllocatedFrameUnowned { frame: Frame },
}

impl core::fmt::Display for AuditError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            AuditError::LinkOutOfRange { index, link } => {
                write!(f, "frame {} links to {:#x}", index, link)
            }
            AuditError::Cycle { index } => write!(f, "free list loops at frame {}", index),
            AuditError::LengthMismatch { recorded, walked } => {
                write!(f, "free list holds {} frames, recorded {}", walked, recorded)
            }
            AuditError::FreeFrameShared { frame, count } => {
                write!(f, "free {} has share count {}", frame, count)
            }
            AuditError::AllocatedFrameUnowned { frame } => {
                write!(f, "allocated {} has share count 0", frame)
            }
        }
    }
}

/// Allocator for the frames of one managed range.
pub struct FramePool {
    first: PhysAddr,
    frames: usize,
    arena: Arena,
    free_list: Mutex<FreeList>,
    refs: ReferenceTable,
    counters: Counters,
}

impl FramePool {
    /// Build a pool over `config`'s range, backed by `arena`, with every
    /// whole frame free.
    pub fn initialize(config: PoolConfig, arena: Arena) -> Result<Self, ConfigError> {
        config.validate()?;
        let expected = config.arena_len();
        if arena.len() < expected {
            return Err(ConfigError::ArenaSizeMismatch {
                expected,
                actual: arena.len(),
            });
        }

        let first = config.first_frame();
        let pool = FramePool {
            first,
            frames: config.frame_count(),
            arena,
            free_list: Mutex::new(FreeList { head: None, len: 0 }),
            refs: ReferenceTable::new(first, config.ref_capacity),
            counters: Counters {
                allocations: AtomicU64::new(0),
                frees: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
                copies: AtomicU64::new(0),
            },
        };
        pool.free_all();

        log::info!(
            "frame pool: {} frames at {:#x} ({} KiB)",
            pool.frames,
            first.as_u64(),
            pool.frames * PAGE_SIZE / 1024
        );
        Ok(pool)
    }

    /// Build a pool backed by a heap buffer of the right size.
    pub fn hosted(config: PoolConfig) -> Result<Self, ConfigError> {
        let expected = config.arena_len();
        let arena = Arena::hosted(expected).ok_or(ConfigError::ArenaSizeMismatch {
            expected,
            actual: 0,
        })?;
        Self::initialize(config, arena)
    }

    /// Link every frame onto the free list, lowest address at the head.
    fn free_all(&self) {
        let mut list = self.free_list.lock();
        for index in (0..self.frames).rev() {
            unsafe {
                self.arena.fill(index, FREE_POISON);
                self.arena.write_link(index, encode_link(list.head));
            }
            list.head = Some(index);
            list.len += 1;
        }
    }

    /// Take one frame off the free list.
    ///
    /// The frame comes back filled with [`ALLOC_POISON`] and a share count
    /// of 1. `None` means the pool is exhausted; the caller decides what
    /// that means for it.
    pub fn allocate(&self) -> Option<Frame> {
        let index = {
            let mut list = self.free_list.lock();
            let head = list.head;
            let index = match head {
                Some(index) => index,
                None => {
                    drop(list);
                    self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                    log::warn!("frame pool exhausted");
                    return None;
                }
            };
            let link = unsafe { self.arena.read_link(index) };
            list.head = match link {
                NO_LINK => None,
                next if (next as usize) < self.frames => Some(next as usize),
                _ => fatal(FatalError::CorruptFreeList { index, link }),
            };
            list.len -= 1;
            index
        };

        let frame = self.frame_at(index);
        unsafe { self.arena.fill(index, ALLOC_POISON) };
        self.refs.set_count(frame, 1);
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Drop one share of `frame`, returning it to the free list when the
    /// last share goes.
    ///
    /// Aborts if `frame` is misaligned, outside the pool, or already free.
    pub fn free(&self, frame: Frame) {
        let index = match self.index_of(frame) {
            Ok(index) => index,
            Err(error) => fatal(error),
        };

        match self.refs.release_at(index) {
            Release::Shared(_) => return,
            Release::Last => {}
            Release::AlreadyFree => fatal(FatalError::DoubleFree(frame)),
        }

        unsafe { self.arena.fill(index, FREE_POISON) };
        let mut list = self.free_list.lock();
        unsafe { self.arena.write_link(index, encode_link(list.head)) };
        list.head = Some(index);
        list.len += 1;
        drop(list);
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Add one share of `frame`, for a second mapping of the same data.
    /// Frames outside the reference table are ignored.
    pub fn increment(&self, frame: Frame) {
        self.refs.increment(frame);
    }

    pub fn refs(&self) -> &ReferenceTable {
        &self.refs
    }

    /// Share count of `frame`, if it is tracked.
    pub fn ref_count(&self, frame: Frame) -> Option<u32> {
        self.refs.count(frame)
    }

    /// Whether `frame` is one of this pool's frames.
    pub fn contains(&self, frame: Frame) -> bool {
        self.index_of(frame).is_ok()
    }

    pub fn total_frames(&self) -> usize {
        self.frames
    }

    pub fn free_frames(&self) -> usize {
        self.free_list.lock().len
    }

    pub fn allocated_frames(&self) -> usize {
        self.frames - self.free_frames()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            frees: self.counters.frees.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
            copies: self.counters.copies.load(Ordering::Relaxed),
        }
    }

    /// Contents of `frame`.
    ///
    /// # Safety
    /// No one may write `frame` while the slice is alive.
    pub unsafe fn frame_bytes(&self, frame: Frame) -> Option<&[u8]> {
        let index = self.index_of(frame).ok()?;
        Some(self.arena.bytes(index))
    }

    /// Mutable contents of `frame`.
    ///
    /// # Safety
    /// The caller must hold the only writable mapping of `frame` and no
    /// one else may touch it while the slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn frame_bytes_mut(&self, frame: Frame) -> Option<&mut [u8]> {
        let index = self.index_of(frame).ok()?;
        Some(self.arena.bytes_mut(index))
    }

    /// Walk the free list and the share counts and check they agree.
    ///
    /// Only meaningful while no other context is allocating or freeing.
    pub fn audit(&self) -> Result<PoolAudit, AuditError> {
        let mut on_free_list = vec![false; self.frames];
        let walked = {
            let list = self.free_list.lock();
            let mut walked = 0;
            let mut cursor = list.head;
            while let Some(index) = cursor {
                if on_free_list[index] {
                    return Err(AuditError::Cycle { index });
                }
                on_free_list[index] = true;
                walked += 1;
                cursor = match unsafe { self.arena.read_link(index) } {
                    NO_LINK => None,
                    link if (link as usize) < self.frames => Some(link as usize),
                    link => return Err(AuditError::LinkOutOfRange { index, link }),
                };
            }
            if walked != list.len {
                return Err(AuditError::LengthMismatch {
                    recorded: list.len,
                    walked,
                });
            }
            walked
        };

        for (index, &free) in on_free_list.iter().enumerate() {
            let count = self.refs.count_at(index);
            let frame = self.frame_at(index);
            if free && count != 0 {
                return Err(AuditError::FreeFrameShared { frame, count });
            }
            if !free && count == 0 {
                return Err(AuditError::AllocatedFrameUnowned { frame });
            }
        }

        Ok(PoolAudit {
            total: self.frames,
            free: walked,
            allocated: self.frames - walked,
        })
    }

    // ─── Internal helpers ───────────────────────────────────────

    fn frame_at(&self, index: usize) -> Frame {
        Frame::at(self.first + (index * PAGE_SIZE) as u64)
    }

    /// Pool index of `frame`, or the fatal error a `free` of it would raise.
    pub(crate) fn index_of(&self, frame: Frame) -> Result<usize, FatalError> {
        if !frame.is_page_aligned() {
            return Err(FatalError::MisalignedFree(frame));
        }
        let addr = frame.start_address().as_u64();
        let first = self.first.as_u64();
        if addr < first {
            return Err(FatalError::FreeOutOfRange(frame));
        }
        let index = ((addr - first) / PAGE_SIZE as u64) as usize;
        if index >= self.frames {
            return Err(FatalError::FreeOutOfRange(frame));
        }
        Ok(index)
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn note_copy(&self) {
        self.counters.copies.fetch_add(1, Ordering::Relaxed);
    }
}
