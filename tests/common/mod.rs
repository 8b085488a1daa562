//! Shared fixtures for the integration tests
//!
//! Sessions run on the software device so the suite needs no card. Helpers
//! return `anyhow::Result` with context, so a failing fixture names itself.

mod tempfile_helpers;

#[allow(unused_imports)]
pub use tempfile_helpers::{create_temp_dir, write_bitstream};

use anyhow::Context;
use fletcher_alveo::{AddressSpace, PlatformConfig, Session, SimDevice};

/// Sim memory used by the fixtures: small enough to exhaust on purpose
#[allow(dead_code)]
pub const TEST_MEMORY_BYTES: usize = 4 << 20;

/// Config for a software device with the given address-space model
#[allow(dead_code)]
pub fn sim_config(address_space: AddressSpace) -> PlatformConfig {
    PlatformConfig::default()
        .with_address_space(address_space)
        .with_sim_memory_bytes(TEST_MEMORY_BYTES)
}

/// Open a software device session
#[allow(dead_code)]
pub fn open_sim(address_space: AddressSpace) -> anyhow::Result<Session<SimDevice>> {
    Session::init(sim_config(address_space))
        .with_context(|| format!("Failed to open {:?} sim session", address_space))
}

/// Deterministic test payload
#[allow(dead_code)]
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}
