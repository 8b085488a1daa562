//! Device allocation accounting through the session

mod common;

use common::{open_sim, TEST_MEMORY_BYTES};
use fletcher_alveo::config::DEFAULT_DEVICE_ALIGNMENT;
use fletcher_alveo::{AddressSpace, PlatformError};
use proptest::prelude::*;

#[test]
fn test_malloc_free_does_not_leak() -> anyhow::Result<()> {
    let mut session = open_sim(AddressSpace::Disjoint)?;

    let addr = session.device_malloc(1000)?;
    assert_eq!(session.backend()?.allocated_bytes(), 1000);
    session.device_free(addr)?;

    assert_eq!(session.live_allocations(), 0);
    assert_eq!(session.backend()?.allocated_bytes(), 0);

    // The whole arena is one block again.
    let whole = session.device_malloc(TEST_MEMORY_BYTES)?;
    session.device_free(whole)?;
    Ok(())
}

#[test]
fn test_allocations_are_aligned_and_distinct() -> anyhow::Result<()> {
    let mut session = open_sim(AddressSpace::Disjoint)?;
    let mut seen = Vec::new();
    for size in [1usize, 17, 4095, 4096, 4097, 65536] {
        let addr = session.device_malloc(size)?;
        assert!(addr.is_aligned_to(DEFAULT_DEVICE_ALIGNMENT));
        assert!(!addr.is_null());
        assert!(!seen.contains(&addr));
        seen.push(addr);
    }
    Ok(())
}

#[test]
fn test_zero_size_allocation() -> anyhow::Result<()> {
    let mut session = open_sim(AddressSpace::Disjoint)?;
    let a = session.device_malloc(0)?;
    let b = session.device_malloc(0)?;
    assert_ne!(a, b);
    session.device_free(a)?;
    session.device_free(b)?;
    Ok(())
}

#[test]
fn test_double_free_rejected() -> anyhow::Result<()> {
    let mut session = open_sim(AddressSpace::Shared)?;
    let addr = session.device_malloc(64)?;
    session.device_free(addr)?;
    assert!(matches!(
        session.device_free(addr),
        Err(PlatformError::InvalidAddress(_))
    ));
    Ok(())
}

#[test]
fn test_exhaustion_and_recovery() -> anyhow::Result<()> {
    let mut session = open_sim(AddressSpace::Disjoint)?;
    let chunk = TEST_MEMORY_BYTES / 4;
    let addrs: Vec<_> = (0..4)
        .map(|_| session.device_malloc(chunk))
        .collect::<Result<_, _>>()?;

    assert!(matches!(
        session.device_malloc(1),
        Err(PlatformError::AllocationFailed(_))
    ));

    for addr in addrs {
        session.device_free(addr)?;
    }
    session.device_malloc(TEST_MEMORY_BYTES)?;
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_interleaved_malloc_free_restores_state(
        sizes in proptest::collection::vec(1usize..64 * 1024, 1..24),
    ) {
        let mut session = open_sim(AddressSpace::Disjoint).unwrap();
        let mut live = Vec::new();

        for (i, size) in sizes.iter().enumerate() {
            if let Ok(addr) = session.device_malloc(*size) {
                live.push(addr);
            }
            if i % 3 == 2 {
                if let Some(addr) = live.pop() {
                    session.device_free(addr).unwrap();
                }
            }
        }
        for addr in live.drain(..) {
            session.device_free(addr).unwrap();
        }

        prop_assert_eq!(session.live_allocations(), 0);
        prop_assert_eq!(session.backend().unwrap().allocated_bytes(), 0);
        let whole = session.device_malloc(TEST_MEMORY_BYTES);
        prop_assert!(whole.is_ok());
    }
}
