mod common;

use std::sync::Arc;
use std::thread;

use common::pool;
use pmm::memory::frame_allocator::PoolAudit;
use pmm::CopyDecision;

#[test]
fn parallel_allocate_free_conserves_frames() {
    let pool = Arc::new(pool(64));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut held = Vec::new();
                for round in 0..500 {
                    if round % 3 == 2 {
                        if let Some(frame) = held.pop() {
                            pool.free(frame);
                        }
                    } else if let Some(frame) = pool.allocate() {
                        held.push(frame);
                    }
                }
                held
            })
        })
        .collect();

    let mut remaining = Vec::new();
    for worker in workers {
        remaining.extend(worker.join().unwrap());
    }
    let mut distinct = remaining.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), remaining.len(), "frame handed out twice");

    let audit = pool.audit().unwrap();
    assert_eq!(audit.allocated, remaining.len());
    assert_eq!(audit.free + audit.allocated, 64);

    for frame in remaining {
        pool.free(frame);
    }
    assert_eq!(pool.audit(), Ok(PoolAudit { total: 64, free: 64, allocated: 0 }));
}

#[test]
fn concurrent_checks_on_one_frame_are_serialised() {
    let pool = Arc::new(pool(4));
    let frame = pool.allocate().unwrap();
    let sharers = 4 * 100;
    for _ in 0..sharers {
        pool.increment(frame);
    }

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                (0..100)
                    .filter(|_| {
                        pool.refs().decrement_and_check(frame) == Ok(CopyDecision::CopyNeeded)
                    })
                    .count()
            })
        })
        .collect();

    let copies: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert_eq!(copies, sharers);
    assert_eq!(pool.ref_count(frame), Some(1));
}
