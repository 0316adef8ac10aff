//! Physical memory management.
//!
//! Provides:
//! - A frame pool over the managed range (`frame_allocator`)
//! - Per-frame share counts (`refcount`)
//! - Copy-on-write fault resolution (`cow`)
//!
//! Errors come in two tiers. Recoverable conditions (exhaustion, a
//! fault that is not ours) are returned as values. Broken invariants
//! go through [`fatal`], which never returns.

pub mod arena;
pub mod cow;
pub mod frame;
pub mod frame_allocator;
pub mod refcount;

use spin::Once;

use crate::config::{ConfigError, PoolConfig};
use arena::Arena;
use cow::MapError;
use frame::Frame;
use frame_allocator::FramePool;

/// The kernel's frame pool, built once at boot.
static FRAMES: Once<FramePool> = Once::new();

/// Build the kernel's frame pool over `arena`.
///
/// Must be called exactly once, before any frame is allocated.
pub fn init(config: PoolConfig, arena: Arena) -> Result<&'static FramePool, ConfigError> {
    if FRAMES.is_completed() {
        return Err(ConfigError::AlreadyInitialized);
    }
    let pool = FramePool::initialize(config, arena)?;
    Ok(FRAMES.call_once(|| pool))
}

/// The kernel's frame pool, if [`init`] has run.
pub fn frames() -> Option<&'static FramePool> {
    FRAMES.get()
}

// ─── Reported errors ────────────────────────────────────────────

/// Recoverable memory-manager errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// No free frame left.
    OutOfFrames,
    /// The address is outside the reference table.
    Untracked,
}

impl core::fmt::Display for MemError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            MemError::OutOfFrames => write!(f, "out of frames"),
            MemError::Untracked => write!(f, "frame not tracked"),
        }
    }
}

// ─── Fatal errors ───────────────────────────────────────────────

/// Invariant violations. Raised only through [`fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// `free` of an address that is not page aligned.
    MisalignedFree(Frame),
    /// `free` of an address outside the managed range.
    FreeOutOfRange(Frame),
    /// `free` of a frame that is already on the free list.
    DoubleFree(Frame),
    /// A free-list link points outside the pool.
    CorruptFreeList { index: usize, link: u64 },
    /// The page table refused a mapping while resolving a COW fault.
    RemapFailed { va: u64, error: MapError },
}

impl core::fmt::Display for FatalError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            FatalError::MisalignedFree(frame) => write!(f, "free: misaligned {}", frame),
            FatalError::FreeOutOfRange(frame) => write!(f, "free: out of range {}", frame),
            FatalError::DoubleFree(frame) => write!(f, "free: double free of {}", frame),
            FatalError::CorruptFreeList { index, link } => {
                write!(f, "free list corrupt: frame {} links to {:#x}", index, link)
            }
            FatalError::RemapFailed { va, error } => {
                write!(f, "cow: remap of 0x{:x} failed: {}", va, error)
            }
        }
    }
}

/// Abort on a broken invariant.
#[cold]
pub fn fatal(error: FatalError) -> ! {
    log::error!("{}", error);
    panic!("{}", error);
}
