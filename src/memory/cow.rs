//! Copy-on-write fault resolution.
//!
//! Cloning an address space maps the parent's writable user frames into
//! the child read-only with [`PteFlags::COPY_ON_WRITE`] set and one extra
//! share per frame. The first write from either side traps here:
//!
//! 1. `validate` checks that the fault really is a COW fault.
//! 2. `resolve` asks the pool for the frame to write to (the same frame
//!    for its last owner, a copy otherwise) and remaps the page writable.
//!
//! The page table itself belongs to another subsystem and is reached
//! through [`PageTable`].

use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::VirtAddr;

use super::fatal;
use super::frame::Frame;
use super::frame_allocator::FramePool;
use super::FatalError;
use crate::config::{page_round_down, MAX_VA};

bitflags::bitflags! {
    /// Page-table entry bits the resolver reads and rewrites.
    /// Same positions as an x86_64 entry; COW uses an OS-available bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const VALID         = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const COPY_ON_WRITE = 1 << 9;
    }
}

/// One page-table mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub frame: Frame,
    pub flags: PteFlags,
}

impl Mapping {
    pub fn new(frame: Frame, flags: PteFlags) -> Self {
        Mapping { frame, flags }
    }

    /// The mapping both sides of a clone should hold: writable pages turn
    /// read-only + COW, read-only pages stay as they are.
    pub fn into_cow(self) -> Self {
        if !self.flags.contains(PteFlags::WRITABLE) {
            return self;
        }
        Mapping {
            frame: self.frame,
            flags: self
                .flags
                .difference(PteFlags::WRITABLE)
                .union(PteFlags::COPY_ON_WRITE),
        }
    }
}

/// Page-table failure reported by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Something is already mapped at the address.
    AlreadyMapped,
    /// An intermediate table could not be allocated.
    TableAllocationFailed,
}

impl core::fmt::Display for MapError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            MapError::AlreadyMapped => write!(f, "already mapped"),
            MapError::TableAllocationFailed => write!(f, "table allocation failed"),
        }
    }
}

/// The page-table operations the resolver needs. Addresses passed in are
/// page aligned.
pub trait PageTable {
    /// Current leaf mapping of `va`, without side effects.
    fn lookup(&self, va: VirtAddr) -> Option<Mapping>;

    /// Remove `pages` mappings starting at `va`. Must not free the frames
    /// and must not fail for mappings known to exist.
    fn unmap(&mut self, va: VirtAddr, pages: usize);

    /// Install a mapping of `frame` at `va`.
    fn map(&mut self, va: VirtAddr, frame: Frame, flags: PteFlags) -> Result<(), MapError>;
}

/// Per-process count of COW faults seen.
#[derive(Debug, Default)]
pub struct FaultCounter(AtomicU64);

impl FaultCounter {
    pub const fn new() -> Self {
        FaultCounter(AtomicU64::new(0))
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why a fault is not a COW fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultRejection {
    /// Address is zero or beyond user space.
    OutOfRange,
    /// No mapping for the address.
    NotMapped,
    NotValid,
    NotUser,
    NotCopyOnWrite,
}

/// Why a COW fault could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    Rejected(FaultRejection),
    /// A private copy was needed and the pool is empty.
    OutOfFrames,
}

impl From<FaultRejection> for FaultError {
    fn from(r: FaultRejection) -> Self {
        FaultError::Rejected(r)
    }
}

impl core::fmt::Display for FaultRejection {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            FaultRejection::OutOfRange => write!(f, "address out of range"),
            FaultRejection::NotMapped => write!(f, "not mapped"),
            FaultRejection::NotValid => write!(f, "entry not valid"),
            FaultRejection::NotUser => write!(f, "not a user page"),
            FaultRejection::NotCopyOnWrite => write!(f, "not copy-on-write"),
        }
    }
}

impl core::fmt::Display for FaultError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            FaultError::Rejected(r) => write!(f, "rejected: {}", r),
            FaultError::OutOfFrames => write!(f, "out of frames"),
        }
    }
}

/// How a fault was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Sole owner: the same frame, now writable.
    InPlace(Frame),
    /// Shared: the page now maps a private copy.
    Copied { from: Frame, to: Frame },
}

/// Verdict handed back to the trap dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Resume at the faulting instruction.
    Success,
    /// Genuine access violation; kill the process.
    Failure,
}

/// Resolves COW write faults against one frame pool.
pub struct CowResolver<'a> {
    pool: &'a FramePool,
}

impl<'a> CowResolver<'a> {
    pub fn new(pool: &'a FramePool) -> Self {
        CowResolver { pool }
    }

    /// Check that a write fault at `va` hit a valid user COW mapping and
    /// count it. Touches neither the table nor any frame.
    pub fn validate<T: PageTable + ?Sized>(
        &self,
        table: &T,
        counter: &FaultCounter,
        va: u64,
    ) -> Result<Mapping, FaultRejection> {
        if va == 0 || va >= MAX_VA {
            return Err(FaultRejection::OutOfRange);
        }
        let mapping = table
            .lookup(VirtAddr::new(page_round_down(va)))
            .ok_or(FaultRejection::NotMapped)?;
        if !mapping.flags.contains(PteFlags::VALID) {
            return Err(FaultRejection::NotValid);
        }
        if !mapping.flags.contains(PteFlags::USER) {
            return Err(FaultRejection::NotUser);
        }
        if !mapping.flags.contains(PteFlags::COPY_ON_WRITE) {
            return Err(FaultRejection::NotCopyOnWrite);
        }
        counter.record();
        Ok(mapping)
    }

    /// Make the page at `va` privately writable.
    ///
    /// `mapping` must come from [`CowResolver::validate`]. If no copy can
    /// be made the table is left untouched. A table that refuses the new
    /// mapping is corrupt and aborts the kernel.
    pub fn resolve<T: PageTable + ?Sized>(
        &self,
        table: &mut T,
        va: u64,
        mapping: Mapping,
    ) -> Result<Resolution, FaultError> {
        let page = VirtAddr::new_truncate(page_round_down(va));
        let flags = mapping
            .flags
            .union(PteFlags::WRITABLE)
            .difference(PteFlags::COPY_ON_WRITE);

        let target = self
            .pool
            .resolve_write(mapping.frame)
            .ok_or(FaultError::OutOfFrames)?;

        table.unmap(page, 1);
        if let Err(error) = table.map(page, target, flags) {
            fatal(FatalError::RemapFailed { va, error });
        }

        if target == mapping.frame {
            Ok(Resolution::InPlace(target))
        } else {
            Ok(Resolution::Copied {
                from: mapping.frame,
                to: target,
            })
        }
    }

    /// Entry point for the trap dispatcher on a write-protection fault.
    pub fn handle_fault<T: PageTable + ?Sized>(
        &self,
        table: &mut T,
        counter: &FaultCounter,
        va: u64,
    ) -> FaultOutcome {
        match self.try_handle_fault(table, counter, va) {
            Ok(resolution) => {
                log::trace!("cow fault at {:#x}: {:?}", va, resolution);
                FaultOutcome::Success
            }
            Err(FaultError::Rejected(reason)) => {
                log::debug!("fault at {:#x} not copy-on-write: {}", va, reason);
                FaultOutcome::Failure
            }
            Err(error) => {
                log::warn!("cow fault at {:#x} unresolved: {}", va, error);
                FaultOutcome::Failure
            }
        }
    }

    /// `validate` then `resolve`, keeping the reason on failure.
    pub fn try_handle_fault<T: PageTable + ?Sized>(
        &self,
        table: &mut T,
        counter: &FaultCounter,
        va: u64,
    ) -> Result<Resolution, FaultError> {
        let mapping = self.validate(&*table, counter, va)?;
        self.resolve(table, va, mapping)
    }
}
