//! fletcher-alveo - Fletcher platform shim for Xilinx Alveo cards
//!
//! Implements the Fletcher platform operation vocabulary (init, register
//! access, host/device copies, device allocation, host buffer staging,
//! terminate) over the Alveo OpenCL/XRT stack, with a software device model
//! for simulation and tests.
//!
//! Rust callers open a [`Session`] directly; a Fletcher runtime loads the
//! `cdylib` and calls the `platform*` symbols in [`capi`].

#![allow(clippy::missing_safety_doc)]

pub mod backend;
pub mod capi;
pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod session;
pub mod teardown;

pub use backend::{DefaultBackend, DeviceBackend, SimDevice};
pub use config::PlatformConfig;
pub use error::{ErrorCategory, PlatformError, PlatformResult, Status};
pub use platform::{AddressSpace, DeviceAddress, PreparedBuffer};
pub use session::Session;

#[cfg(feature = "opencl")]
pub use backend::AlveoDevice;
