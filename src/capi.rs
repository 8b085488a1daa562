//! C ABI of the platform shim
//!
//! A Fletcher runtime loads the shim as a shared library and resolves these
//! symbols by name. Every function returns an `fstatus_t`: `0` for OK and
//! `1` for ERROR. The specific error is logged before it is collapsed.
//!
//! The adapter owns the one session of the process. Operations other than
//! `platformGetName` and `platformInit` fail while no session is open.

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_void, CStr};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::backend::DefaultBackend;
use crate::config::PlatformConfig;
use crate::error::{PlatformError, PlatformResult, Status};
use crate::logging;
use crate::platform::{self, DeviceAddress};
use crate::session::Session;

/// Fletcher `fstatus_t`
pub type fstatus_t = u64;
/// Fletcher `da_t` (device address)
pub type da_t = u64;

/// Number of positional `platformInit` arguments: bitstream, device, kernel
pub const INIT_ARG_COUNT: usize = 3;

static SESSION: Lazy<Mutex<Option<Session<DefaultBackend>>>> = Lazy::new(|| Mutex::new(None));

fn report<T>(op: &str, result: &PlatformResult<T>) -> fstatus_t {
    if let Err(e) = result {
        tracing::error!("[{}] {} failed ({}): {}", platform_name(), op, e.category(), e);
    }
    Status::from(result).code()
}

fn platform_name() -> &'static str {
    <DefaultBackend as crate::backend::DeviceBackend>::NAME
}

fn with_session<T, F>(f: F) -> PlatformResult<T>
where
    F: FnOnce(&mut Session<DefaultBackend>) -> PlatformResult<T>,
{
    let mut guard = SESSION.lock()?;
    let session = guard.as_mut().ok_or(PlatformError::NotInitialized)?;
    f(session)
}

fn byte_count(size: i64) -> PlatformResult<usize> {
    usize::try_from(size)
        .map_err(|_| PlatformError::InvalidArgument(format!("negative byte count {}", size)))
}

/// Borrow `size` bytes at `ptr`; a zero size never touches the pointer
///
/// # Safety
///
/// For a non-zero size, `ptr` must be valid for reads of `size` bytes.
unsafe fn host_slice<'a>(ptr: *const u8, size: i64) -> PlatformResult<&'a [u8]> {
    let len = byte_count(size)?;
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(PlatformError::InvalidArgument("null host buffer".to_string()));
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

/// # Safety
///
/// For a non-zero size, `ptr` must be valid for writes of `size` bytes.
unsafe fn host_slice_mut<'a>(ptr: *mut u8, size: i64) -> PlatformResult<&'a mut [u8]> {
    let len = byte_count(size)?;
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(PlatformError::InvalidArgument("null host buffer".to_string()));
    }
    Ok(std::slice::from_raw_parts_mut(ptr, len))
}

/// Write a value through an out-pointer
///
/// # Safety
///
/// `out` must be null or valid for a write of `T`.
unsafe fn store<T>(out: *mut T, value: T, what: &str) -> PlatformResult<()> {
    if out.is_null() {
        return Err(PlatformError::InvalidArgument(format!("null {} pointer", what)));
    }
    out.write(value);
    Ok(())
}

/// Decode the positional init arguments
///
/// # Safety
///
/// `argv` must be null or point to [`INIT_ARG_COUNT`] entries, each null or
/// a NUL-terminated string.
unsafe fn init_args(argv: *mut *mut c_void) -> Vec<Option<String>> {
    if argv.is_null() {
        return Vec::new();
    }
    (0..INIT_ARG_COUNT)
        .map(|i| {
            let arg = *argv.add(i);
            (!arg.is_null())
                .then(|| CStr::from_ptr(arg as *const c_char).to_string_lossy().into_owned())
        })
        .collect()
}

/// Write the platform name into `name`, NUL-terminated and truncated to `size`
///
/// # Safety
///
/// `name` must be valid for writes of `size` bytes, or `size` must be 0.
#[no_mangle]
pub unsafe extern "C" fn platformGetName(name: *mut c_char, size: usize) -> fstatus_t {
    if name.is_null() || size == 0 {
        return Status::Ok.code();
    }
    let buf = std::slice::from_raw_parts_mut(name as *mut u8, size);
    platform::get_name(platform_name(), buf).code()
}

/// Open the device
///
/// `argv[0]` is the bitstream path, `argv[1]` the target device name and
/// `argv[2]` the kernel name; any of them may be null. Environment
/// overrides are applied on top.
///
/// # Safety
///
/// See [`init_args`].
#[no_mangle]
pub unsafe extern "C" fn platformInit(argv: *mut *mut c_void) -> fstatus_t {
    logging::init_logging_default();

    let args = init_args(argv);
    let result = open_session(&args);
    report("platformInit", &result)
}

fn open_session(args: &[Option<String>]) -> PlatformResult<()> {
    let args: Vec<Option<&str>> = args.iter().map(|a| a.as_deref()).collect();
    let config = PlatformConfig::from_env_file()?
        .with_init_args(&args)
        .apply_env()?;

    let mut guard = SESSION.lock()?;
    if let Some(mut previous) = guard.take() {
        tracing::warn!("[{}] platformInit with an open session; terminating it first", platform_name());
        previous.terminate()?;
    }
    *guard = Some(Session::init(config)?);
    Ok(())
}

#[no_mangle]
pub extern "C" fn platformWriteMMIO(offset: u64, value: u32) -> fstatus_t {
    let result = with_session(|s| s.write_mmio(offset, value));
    report("platformWriteMMIO", &result)
}

/// # Safety
///
/// `value` must be valid for a write of a `u32`.
#[no_mangle]
pub unsafe extern "C" fn platformReadMMIO(offset: u64, value: *mut u32) -> fstatus_t {
    let result = with_session(|s| s.read_mmio(offset)).and_then(|v| store(value, v, "value"));
    report("platformReadMMIO", &result)
}

/// # Safety
///
/// `host_source` must be valid for reads of `size` bytes.
#[no_mangle]
pub unsafe extern "C" fn platformCopyHostToDevice(
    host_source: *const u8,
    device_destination: da_t,
    size: i64,
) -> fstatus_t {
    let result = host_slice(host_source, size).and_then(|src| {
        with_session(|s| s.copy_host_to_device(src, DeviceAddress(device_destination)))
    });
    report("platformCopyHostToDevice", &result)
}

/// # Safety
///
/// `host_destination` must be valid for writes of `size` bytes.
#[no_mangle]
pub unsafe extern "C" fn platformCopyDeviceToHost(
    device_source: da_t,
    host_destination: *mut u8,
    size: i64,
) -> fstatus_t {
    let result = host_slice_mut(host_destination, size).and_then(|dst| {
        with_session(|s| s.copy_device_to_host(DeviceAddress(device_source), dst))
    });
    report("platformCopyDeviceToHost", &result)
}

/// # Safety
///
/// `device_address` must be valid for a write of a `da_t`.
#[no_mangle]
pub unsafe extern "C" fn platformDeviceMalloc(device_address: *mut da_t, size: i64) -> fstatus_t {
    let result = byte_count(size)
        .and_then(|len| with_session(|s| s.device_malloc(len)))
        .and_then(|addr| store(device_address, addr.as_u64(), "device address"));
    report("platformDeviceMalloc", &result)
}

#[no_mangle]
pub extern "C" fn platformDeviceFree(device_address: da_t) -> fstatus_t {
    let result = with_session(|s| s.device_free(DeviceAddress(device_address)));
    report("platformDeviceFree", &result)
}

/// # Safety
///
/// `host_source` must be valid for reads of `size` bytes and stay valid
/// while the device uses it; the out-pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn platformPrepareHostBuffer(
    host_source: *const u8,
    device_destination: *mut da_t,
    size: i64,
    alloced: *mut c_int,
) -> fstatus_t {
    let result = host_slice(host_source, size)
        .and_then(|src| with_session(|s| s.prepare_host_buffer(src)))
        .and_then(|prepared| {
            store(device_destination, prepared.address.as_u64(), "device destination")?;
            store(alloced, c_int::from(prepared.allocated), "alloced")
        });
    report("platformPrepareHostBuffer", &result)
}

/// # Safety
///
/// `host_source` must be valid for reads of `size` bytes and
/// `device_destination` valid for a write.
#[no_mangle]
pub unsafe extern "C" fn platformCacheHostBuffer(
    host_source: *const u8,
    device_destination: *mut da_t,
    size: i64,
) -> fstatus_t {
    let result = host_slice(host_source, size)
        .and_then(|src| with_session(|s| s.cache_host_buffer(src)))
        .and_then(|addr| store(device_destination, addr.as_u64(), "device destination"));
    report("platformCacheHostBuffer", &result)
}

/// Close the session; OK when none is open
#[no_mangle]
pub extern "C" fn platformTerminate(_arg: *mut c_void) -> fstatus_t {
    let result = SESSION.lock().map_err(PlatformError::from).and_then(|mut guard| {
        match guard.take() {
            Some(mut session) => session.terminate(),
            None => Ok(()),
        }
    });
    report("platformTerminate", &result)
}
