//! Xilinx extension and XRT HAL FFI bindings
//!
//! Standard OpenCL goes through `opencl3`. Only the Xilinx pieces it does not
//! wrap are declared here; `build.rs` links `xilinxopencl` and `xrt_core`
//! when the `opencl` feature is enabled.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_void};

use opencl3::types::{cl_device_id, cl_int, cl_mem};

// cl_ext_xilinx.h, provided by the XRT ICD
#[link(name = "xilinxopencl")]
extern "C" {
    pub fn xclGetMemObjDeviceAddress(
        mem: cl_mem,
        device: cl_device_id,
        size: usize,
        address: *mut c_void,
    ) -> cl_int;
}

pub type xclDeviceHandle = *mut c_void;

/// `enum xclVerbosityLevel`
pub const XCL_QUIET: u32 = 0;

/// `enum xclAddressSpace`: compute unit control registers
pub const XCL_ADDR_KERNEL_CTRL: u32 = 2;

#[link(name = "xrt_core")]
extern "C" {
    pub fn xclOpen(device_index: u32, log_file_name: *const c_char, level: u32) -> xclDeviceHandle;
    pub fn xclClose(handle: xclDeviceHandle);
    pub fn xclRead(
        handle: xclDeviceHandle,
        space: u32,
        offset: u64,
        host_buf: *mut c_void,
        size: usize,
    ) -> usize;
    pub fn xclWrite(
        handle: xclDeviceHandle,
        space: u32,
        offset: u64,
        host_buf: *const c_void,
        size: usize,
    ) -> usize;
}
