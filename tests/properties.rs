mod common;

use common::pool;
use pmm::memory::frame_allocator::PoolAudit;
use pmm::CopyDecision;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Allocate,
    /// Free the n-th (mod len) frame currently held.
    Free(usize),
    /// Share the n-th held frame once more.
    Share(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
        1 => any::<usize>().prop_map(Op::Share),
    ]
}

proptest! {
    #[test]
    fn free_plus_allocated_is_conserved(ops in prop::collection::vec(op(), 0..200)) {
        let frames = 8;
        let pool = pool(frames as u64);
        // One entry per share held.
        let mut held = Vec::new();

        for op in ops {
            match op {
                Op::Allocate => {
                    let full = pool.free_frames() == 0;
                    match pool.allocate() {
                        Some(frame) => held.push(frame),
                        None => prop_assert!(full),
                    }
                }
                Op::Free(n) if !held.is_empty() => {
                    let frame = held.swap_remove(n % held.len());
                    pool.free(frame);
                }
                Op::Share(n) if !held.is_empty() => {
                    let frame = held[n % held.len()];
                    pool.increment(frame);
                    held.push(frame);
                }
                _ => {}
            }

            let mut distinct = held.clone();
            distinct.sort();
            distinct.dedup();
            let audit = pool.audit().unwrap();
            prop_assert_eq!(audit.free + audit.allocated, frames);
            prop_assert_eq!(audit.allocated, distinct.len());
        }

        for frame in held.drain(..) {
            pool.free(frame);
        }
        prop_assert_eq!(pool.audit(), Ok(PoolAudit { total: frames, free: frames, allocated: 0 }));
    }

    #[test]
    fn k_increments_need_k_copies(k in 0u32..40) {
        let pool = pool(2);
        let frame = pool.allocate().unwrap();
        for _ in 0..k {
            pool.increment(frame);
        }
        for _ in 0..k {
            prop_assert_eq!(pool.refs().decrement_and_check(frame), Ok(CopyDecision::CopyNeeded));
        }
        prop_assert_eq!(pool.refs().decrement_and_check(frame), Ok(CopyDecision::NoCopyNeeded));
        prop_assert_eq!(pool.ref_count(frame), Some(1));
    }
}
