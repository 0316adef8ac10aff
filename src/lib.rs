//! ParyantaOS physical memory manager.
//!
//! Owns every page frame in the managed physical range:
//! - Frame pool with an intrusive free list (allocate / free)
//! - Per-frame share counts for copy-on-write sharing
//! - Write-fault resolution for COW mappings
//!
//! Page-table walking, trap dispatch and process bookkeeping live
//! elsewhere; they reach this crate through [`memory::cow::PageTable`]
//! and [`memory::cow::FaultCounter`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod logger;
pub mod memory;
pub mod serial;

pub use config::{PoolConfig, PAGE_SIZE};
pub use memory::cow::{CowResolver, FaultCounter, FaultOutcome, Mapping, PageTable, PteFlags};
pub use memory::frame::Frame;
pub use memory::frame_allocator::FramePool;
pub use memory::refcount::CopyDecision;
