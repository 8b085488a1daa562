//! Platform configuration
//!
//! [`PlatformConfig`] controls which device the shim opens, which bitstream
//! it loads and how the software device model behaves. Values are layered:
//! defaults, then an optional JSON document, then positional init arguments,
//! then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};
use crate::platform::AddressSpace;

/// Default vendor string matched against `CL_PLATFORM_VENDOR`
pub const DEFAULT_PLATFORM_VENDOR: &str = "Xilinx";

/// Default kernel entry point inside the bitstream
pub const DEFAULT_KERNEL_NAME: &str = "Vadd_A_B";

/// Alveo buffers are placed on 4 KiB boundaries
pub const DEFAULT_DEVICE_ALIGNMENT: usize = 4096;

const DEFAULT_SIM_MEMORY_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_SIM_REGISTER_COUNT: usize = 1024;

/// Environment variable overriding the bitstream path
pub const ENV_XCLBIN: &str = "FLETCHER_ALVEO_XCLBIN";
/// Environment variable overriding the target device name
pub const ENV_DEVICE: &str = "FLETCHER_ALVEO_DEVICE";
/// Environment variable overriding the kernel name
pub const ENV_KERNEL: &str = "FLETCHER_ALVEO_KERNEL";
/// Environment variable setting the status register poll delay in milliseconds
pub const ENV_STATUS_DELAY_MS: &str = "FLETCHER_ALVEO_STATUS_DELAY_MS";
/// Environment variable selecting the sim address space (`shared` or `disjoint`)
pub const ENV_ADDRESS_SPACE: &str = "FLETCHER_ALVEO_ADDRESS_SPACE";
/// Environment variable naming a JSON config file used as the base layer
pub const ENV_CONFIG: &str = "FLETCHER_ALVEO_CONFIG";

/// Configuration for a platform session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Path of the bitstream (xclbin) image
    pub bitstream: Option<PathBuf>,

    /// Device name fragment to match; `None` selects the first accelerator
    pub target_device: Option<String>,

    /// Platform vendor to select
    pub platform_vendor: String,

    /// Kernel / compute unit entry point
    pub kernel_name: String,

    /// Required alignment of device allocations in bytes
    pub device_alignment: usize,

    /// Address-space model of the software device
    pub address_space: AddressSpace,

    /// Size of the software device memory in bytes
    pub sim_memory_bytes: usize,

    /// Number of 32-bit registers of the software device
    pub sim_register_count: usize,

    /// Delay before status register reads in simulation
    #[serde(with = "duration_ms")]
    pub status_poll_delay: Option<Duration>,

    /// Byte base of the compute unit control space
    pub mmio_base: u64,

    /// XRT HAL device index used for register access
    pub device_index: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            bitstream: None,
            target_device: None,
            platform_vendor: DEFAULT_PLATFORM_VENDOR.to_string(),
            kernel_name: DEFAULT_KERNEL_NAME.to_string(),
            device_alignment: DEFAULT_DEVICE_ALIGNMENT,
            address_space: AddressSpace::Disjoint,
            sim_memory_bytes: DEFAULT_SIM_MEMORY_BYTES,
            sim_register_count: DEFAULT_SIM_REGISTER_COUNT,
            status_poll_delay: None,
            mmio_base: 0,
            device_index: 0,
        }
    }
}

impl PlatformConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> PlatformResult<Self> {
        serde_json::from_str(json).map_err(|e| PlatformError::InvalidConfig(e.to_string()))
    }

    /// Read and parse a JSON config file
    pub fn from_json_file(path: &Path) -> PlatformResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PlatformError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Apply positional init arguments.
    ///
    /// `args[0]` is the bitstream path, `args[1]` the target device name and
    /// `args[2]` the kernel name. Missing or `None` entries keep the current
    /// value.
    pub fn with_init_args(mut self, args: &[Option<&str>]) -> Self {
        if let Some(Some(path)) = args.first() {
            self.bitstream = Some(PathBuf::from(path));
        }
        if let Some(Some(device)) = args.get(1) {
            self.target_device = Some(device.to_string());
        }
        if let Some(Some(kernel)) = args.get(2) {
            self.kernel_name = kernel.to_string();
        }
        self
    }

    /// Build a config from positional init arguments on top of the defaults
    pub fn from_init_args(args: &[Option<&str>]) -> Self {
        Self::default().with_init_args(args)
    }

    /// Base layer for callers that cannot pass a config: the JSON file named
    /// by `FLETCHER_ALVEO_CONFIG`, or the defaults
    pub fn from_env_file() -> PlatformResult<Self> {
        Self::base_from_lookup(|key| std::env::var(key).ok())
    }

    fn base_from_lookup<F>(lookup: F) -> PlatformResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(ENV_CONFIG) {
            Some(path) => Self::from_json_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env(self) -> PlatformResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> PlatformResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_XCLBIN) {
            self.bitstream = Some(PathBuf::from(path));
        }
        if let Some(device) = lookup(ENV_DEVICE) {
            self.target_device = Some(device);
        }
        if let Some(kernel) = lookup(ENV_KERNEL) {
            self.kernel_name = kernel;
        }
        if let Some(ms) = lookup(ENV_STATUS_DELAY_MS) {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                PlatformError::InvalidConfig(format!("{} must be an integer, got '{}'", ENV_STATUS_DELAY_MS, ms))
            })?;
            self.status_poll_delay = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(space) = lookup(ENV_ADDRESS_SPACE) {
            self.address_space = space.parse()?;
        }
        Ok(self)
    }

    /// Check internal consistency
    pub fn validate(&self) -> PlatformResult<()> {
        if !self.device_alignment.is_power_of_two() {
            return Err(PlatformError::InvalidConfig(format!(
                "device alignment must be a power of two, got {}",
                self.device_alignment
            )));
        }
        if self.sim_memory_bytes == 0 {
            return Err(PlatformError::InvalidConfig(
                "sim device memory cannot be zero".to_string(),
            ));
        }
        if self.kernel_name.is_empty() {
            return Err(PlatformError::InvalidConfig(
                "kernel name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the bitstream path
    pub fn with_bitstream(mut self, path: impl Into<PathBuf>) -> Self {
        self.bitstream = Some(path.into());
        self
    }

    /// Set the target device name fragment
    pub fn with_target_device(mut self, name: impl Into<String>) -> Self {
        self.target_device = Some(name.into());
        self
    }

    /// Set the platform vendor
    pub fn with_platform_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.platform_vendor = vendor.into();
        self
    }

    /// Set the kernel name
    pub fn with_kernel_name(mut self, name: impl Into<String>) -> Self {
        self.kernel_name = name.into();
        self
    }

    /// Set the device allocation alignment
    pub fn with_device_alignment(mut self, alignment: usize) -> Self {
        self.device_alignment = alignment;
        self
    }

    /// Set the address-space model
    pub fn with_address_space(mut self, address_space: AddressSpace) -> Self {
        self.address_space = address_space;
        self
    }

    /// Set the software device memory size
    pub fn with_sim_memory_bytes(mut self, bytes: usize) -> Self {
        self.sim_memory_bytes = bytes;
        self
    }

    /// Set the number of software device registers
    pub fn with_sim_register_count(mut self, count: usize) -> Self {
        self.sim_register_count = count;
        self
    }

    /// Set the status register poll delay
    pub fn with_status_poll_delay(mut self, delay: Duration) -> Self {
        self.status_poll_delay = Some(delay);
        self
    }

    /// Set the MMIO control space base
    pub fn with_mmio_base(mut self, base: u64) -> Self {
        self.mmio_base = base;
        self
    }

    /// Set the XRT HAL device index
    pub fn with_device_index(mut self, index: u32) -> Self {
        self.device_index = index;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms: Option<u64> = Option::deserialize(d)?;
        Ok(ms.filter(|&ms| ms > 0).map(Duration::from_millis))
    }
}
