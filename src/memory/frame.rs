//! Page frame handle.

use crate::config::PAGE_SIZE;
use x86_64::PhysAddr;

/// A physical page frame, identified by its base address.
///
/// Any address can be wrapped; whether it names a frame the pool
/// actually manages is checked by the pool on every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(PhysAddr);

impl Frame {
    /// Wrap a physical address.
    pub fn at(addr: PhysAddr) -> Self {
        Frame(addr)
    }

    /// Base physical address.
    pub fn start_address(&self) -> PhysAddr {
        self.0
    }

    pub fn is_page_aligned(&self) -> bool {
        self.0.is_aligned(PAGE_SIZE as u64)
    }
}

impl core::fmt::Display for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Frame(0x{:x})", self.0.as_u64())
    }
}
