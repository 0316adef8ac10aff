//! Shared fixtures: hosted pools and an in-memory page table.

#![allow(dead_code)]

use std::collections::BTreeMap;

use pmm::memory::cow::MapError;
use pmm::{Frame, FramePool, Mapping, PageTable, PoolConfig, PteFlags, PAGE_SIZE};
use x86_64::{PhysAddr, VirtAddr};

pub const BASE: u64 = 0x80_0000;

/// Pool of `frames` frames starting at [`BASE`].
pub fn pool(frames: u64) -> FramePool {
    let config = PoolConfig::new(
        PhysAddr::new(BASE),
        PhysAddr::new(BASE + frames * PAGE_SIZE as u64),
    );
    FramePool::hosted(config).expect("valid test config")
}

pub fn user_rw() -> PteFlags {
    PteFlags::VALID | PteFlags::USER | PteFlags::WRITABLE
}

pub fn user_cow() -> PteFlags {
    PteFlags::VALID | PteFlags::USER | PteFlags::COPY_ON_WRITE
}

/// Single-level page table keyed by page address.
#[derive(Default)]
pub struct MockPageTable {
    pub entries: BTreeMap<u64, Mapping>,
    pub fail_next_map: Option<MapError>,
    pub unmaps: usize,
}

impl MockPageTable {
    pub fn with(va: u64, frame: Frame, flags: PteFlags) -> Self {
        let mut table = MockPageTable::default();
        table.entries.insert(va, Mapping::new(frame, flags));
        table
    }

    pub fn get(&self, va: u64) -> Option<Mapping> {
        self.entries.get(&va).copied()
    }
}

impl PageTable for MockPageTable {
    fn lookup(&self, va: VirtAddr) -> Option<Mapping> {
        self.entries.get(&va.as_u64()).copied()
    }

    fn unmap(&mut self, va: VirtAddr, pages: usize) {
        for page in 0..pages as u64 {
            self.entries.remove(&(va.as_u64() + page * PAGE_SIZE as u64));
        }
        self.unmaps += 1;
    }

    fn map(&mut self, va: VirtAddr, frame: Frame, flags: PteFlags) -> Result<(), MapError> {
        if let Some(error) = self.fail_next_map.take() {
            return Err(error);
        }
        if self.entries.contains_key(&va.as_u64()) {
            return Err(MapError::AlreadyMapped);
        }
        self.entries.insert(va.as_u64(), Mapping::new(frame, flags));
        Ok(())
    }
}

/// Share `va` from `parent` into `child` the way an address-space clone
/// does: both sides end up read-only COW and the frame gains a share.
pub fn clone_page(pool: &FramePool, parent: &mut MockPageTable, child: &mut MockPageTable, va: u64) {
    let shared = parent.get(va).expect("parent maps va").into_cow();
    parent.entries.insert(va, shared);
    child
        .map(VirtAddr::new(va), shared.frame, shared.flags)
        .expect("child slot free");
    pool.increment(shared.frame);
}
