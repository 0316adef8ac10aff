use pmm::config::ConfigError;
use pmm::memory::{self, arena::Arena};
use pmm::{PoolConfig, PAGE_SIZE};
use x86_64::PhysAddr;

#[test]
fn kernel_pool_is_built_once() {
    assert!(memory::frames().is_none());

    let config = PoolConfig::new(PhysAddr::new(0x10_0000), PhysAddr::new(0x10_8000));
    let arena = Arena::hosted(config.arena_len()).unwrap();
    let pool = memory::init(config, arena).unwrap();
    assert_eq!(pool.total_frames(), 8);

    let frame = memory::frames().unwrap().allocate().unwrap();
    assert_eq!(pool.ref_count(frame), Some(1));

    let again = memory::init(config, Arena::hosted(8 * PAGE_SIZE).unwrap());
    assert_eq!(again.err(), Some(ConfigError::AlreadyInitialized));
}
