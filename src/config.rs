//! Fixed configuration of the physical memory manager.
//!
//! Everything here is decided once at boot; the pool never changes
//! its range, page size or reference capacity afterwards.

use x86_64::PhysAddr;

/// Size of one page frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// First virtual address that is not addressable from user space
/// (top of the lower canonical half).
pub const MAX_VA: u64 = 0x0000_8000_0000_0000;

/// Fill pattern written into a frame when it is handed out.
pub const ALLOC_POISON: u8 = 0x45;

/// Fill pattern written into a frame when it returns to the free list.
pub const FREE_POISON: u8 = 0x01;

const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// Round `addr` up to the next page boundary.
pub const fn page_round_up(addr: u64) -> u64 {
    (addr + PAGE_MASK) & !PAGE_MASK
}

/// Round `addr` down to its page boundary.
pub const fn page_round_down(addr: u64) -> u64 {
    addr & !PAGE_MASK
}

/// Boot-time description of the managed physical range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Start of the range; rounded up to a page boundary by the pool.
    pub managed_start: PhysAddr,
    /// End of the range (exclusive). A trailing partial frame is not managed.
    pub managed_end: PhysAddr,
    /// Number of frames the reference table can track, counted from
    /// the first managed frame.
    pub ref_capacity: usize,
}

impl PoolConfig {
    /// Describe `[start, end)` with a reference table sized to fit it exactly.
    pub fn new(managed_start: PhysAddr, managed_end: PhysAddr) -> Self {
        let mut config = PoolConfig {
            managed_start,
            managed_end,
            ref_capacity: 0,
        };
        config.ref_capacity = config.frame_count();
        config
    }

    /// Builder: override the reference table capacity.
    pub fn with_ref_capacity(mut self, ref_capacity: usize) -> Self {
        self.ref_capacity = ref_capacity;
        self
    }

    /// Address of the first whole frame in the range.
    pub fn first_frame(&self) -> PhysAddr {
        PhysAddr::new(page_round_up(self.managed_start.as_u64()))
    }

    /// Number of whole frames in `[round_up(start), end)`.
    pub fn frame_count(&self) -> usize {
        let first = page_round_up(self.managed_start.as_u64());
        let end = self.managed_end.as_u64();
        if end <= first {
            return 0;
        }
        ((end - first) / PAGE_SIZE as u64) as usize
    }

    /// Bytes of backing memory the pool needs for this range.
    pub fn arena_len(&self) -> usize {
        self.frame_count() * PAGE_SIZE
    }

    /// Check that the range holds at least one frame and that every
    /// frame it holds can be tracked by the reference table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let frames = self.frame_count();
        if frames == 0 {
            return Err(ConfigError::EmptyRange);
        }
        if self.ref_capacity < frames {
            return Err(ConfigError::RefCapacityTooSmall {
                frames,
                capacity: self.ref_capacity,
            });
        }
        Ok(())
    }
}

/// Invalid boot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The managed range does not contain a single whole frame.
    EmptyRange,
    /// The reference table cannot track every managed frame.
    RefCapacityTooSmall { frames: usize, capacity: usize },
    /// Backing memory does not match the size of the managed range.
    ArenaSizeMismatch { expected: usize, actual: usize },
    /// The kernel pool has already been built.
    AlreadyInitialized,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ConfigError::EmptyRange => write!(f, "managed range holds no whole frame"),
            ConfigError::RefCapacityTooSmall { frames, capacity } => write!(
                f,
                "reference table tracks {} frames but range holds {}",
                capacity, frames
            ),
            ConfigError::ArenaSizeMismatch { expected, actual } => write!(
                f,
                "arena is {} bytes, range needs {}",
                actual, expected
            ),
            ConfigError::AlreadyInitialized => write!(f, "frame pool already initialized"),
        }
    }
}
