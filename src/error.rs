//! Error handling for the platform shim
//!
//! Every operation returns a [`PlatformResult`]. The calling runtime only
//! distinguishes OK from ERROR, so each [`PlatformError`] collapses to a
//! [`Status`] via [`PlatformError::status`], while the specific kind is kept
//! for logging and for Rust callers that want to match on it.

use std::fmt;
use std::path::PathBuf;

/// Error type for all platform shim operations
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    // ========== Initialization ==========
    /// Bitstream file does not exist
    #[error("bitstream not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Bitstream file exists but could not be read completely
    #[error("failed to read bitstream {}: {source}", path.display())]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No compute platform, or none from the target vendor
    #[error("platform not found: {0}")]
    PlatformNotFound(String),

    /// No device matched the target device name
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Vendor refused to create a compute context
    #[error("context creation failed: {0}")]
    ContextCreationFailed(String),

    /// Vendor refused to create a command queue
    #[error("command queue creation failed: {0}")]
    QueueCreationFailed(String),

    /// Program creation or build failed; `log` is the vendor build log verbatim
    #[error("program build failed: {reason}\n{log}")]
    ProgramBuildFailed { reason: String, log: String },

    /// Kernel / compute unit entry point is absent from the built program
    #[error("kernel not found: {0}")]
    KernelNotFound(String),

    // ========== Memory and transfers ==========
    /// Host/device transfer failed or could not be completed
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// Device memory allocation failed
    #[error("device allocation failed: {0}")]
    AllocationFailed(String),

    /// Device address is not inside any live allocation of this session
    #[error("invalid device address 0x{0:016X}")]
    InvalidAddress(u64),

    // ========== Registers ==========
    /// MMIO register read or write failed
    #[error("register access failed at offset {offset}: {reason}")]
    RegisterAccessFailed { offset: u64, reason: String },

    // ========== Usage ==========
    /// Operation issued against a session that is not in the Ready state
    #[error("platform session is not initialized")]
    NotInitialized,

    /// Backend cannot perform this operation
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// Configuration is invalid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller passed a null pointer or a negative size
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ========== Internal ==========
    /// Lock poisoned (a previous caller panicked while holding the session)
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl PlatformError {
    /// Categorize the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlatformError::FileNotFound(_)
            | PlatformError::FileReadFailed { .. }
            | PlatformError::PlatformNotFound(_)
            | PlatformError::DeviceNotFound(_)
            | PlatformError::ContextCreationFailed(_)
            | PlatformError::QueueCreationFailed(_)
            | PlatformError::ProgramBuildFailed { .. }
            | PlatformError::KernelNotFound(_) => ErrorCategory::Initialization,

            PlatformError::AllocationFailed(_) | PlatformError::InvalidAddress(_) => {
                ErrorCategory::Memory
            }

            PlatformError::TransferFailed(_) => ErrorCategory::Transfer,

            PlatformError::RegisterAccessFailed { .. } => ErrorCategory::Register,

            PlatformError::NotInitialized
            | PlatformError::Unsupported(_)
            | PlatformError::InvalidConfig(_)
            | PlatformError::InvalidArgument(_) => ErrorCategory::Usage,

            PlatformError::LockPoisoned(_) => ErrorCategory::Internal,
        }
    }

    /// True if this error aborted platform initialization
    pub fn is_init_failure(&self) -> bool {
        self.category() == ErrorCategory::Initialization
    }

    /// Coarse status reported to the calling runtime
    pub fn status(&self) -> Status {
        Status::Error
    }
}

impl<T> From<std::sync::PoisonError<T>> for PlatformError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PlatformError::LockPoisoned(err.to_string())
    }
}

/// Result type for platform shim operations
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Error category for logging and handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A step of platform initialization failed
    Initialization,
    /// Device memory allocation or addressing
    Memory,
    /// Host/device data movement
    Transfer,
    /// MMIO register access
    Register,
    /// Caller misuse or unsupported request
    Usage,
    /// Indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Initialization => write!(f, "Initialization"),
            ErrorCategory::Memory => write!(f, "Memory"),
            ErrorCategory::Transfer => write!(f, "Transfer"),
            ErrorCategory::Register => write!(f, "Register"),
            ErrorCategory::Usage => write!(f, "Usage"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

/// Status code of the platform operation vocabulary
///
/// Values match the Fletcher `fstatus_t` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl Status {
    /// Raw `fstatus_t` value
    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl<T> From<&PlatformResult<T>> for Status {
    fn from(result: &PlatformResult<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_errors_are_categorized_as_initialization() {
        let errors = [
            PlatformError::FileNotFound(PathBuf::from("/nope.xclbin")),
            PlatformError::PlatformNotFound("Xilinx".to_string()),
            PlatformError::DeviceNotFound("u250".to_string()),
            PlatformError::ContextCreationFailed("-6".to_string()),
            PlatformError::QueueCreationFailed("-6".to_string()),
            PlatformError::ProgramBuildFailed {
                reason: "clBuildProgram returned -11".to_string(),
                log: String::new(),
            },
            PlatformError::KernelNotFound("Vadd_A_B".to_string()),
        ];
        for err in &errors {
            assert!(err.is_init_failure(), "{} should be an init failure", err);
        }
    }

    #[test]
    fn test_build_log_is_included_verbatim() {
        let err = PlatformError::ProgramBuildFailed {
            reason: "clBuildProgram returned -11".to_string(),
            log: "ERROR: xclbin does not match shell\nline 2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ERROR: xclbin does not match shell\nline 2"));
    }

    #[test]
    fn test_every_error_collapses_to_error_status() {
        let errors = [
            PlatformError::NotInitialized,
            PlatformError::Unsupported("copy"),
            PlatformError::InvalidAddress(0x1000),
            PlatformError::TransferFailed("short write".to_string()),
        ];
        for err in &errors {
            assert_eq!(err.status(), Status::Error);
        }
    }

    #[test]
    fn test_status_from_result() {
        let ok: PlatformResult<u32> = Ok(7);
        let err: PlatformResult<u32> = Err(PlatformError::NotInitialized);
        assert_eq!(Status::from(&ok), Status::Ok);
        assert_eq!(Status::from(&err), Status::Error);
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Error.code(), 1);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Transfer.to_string(), "Transfer");
        assert_eq!(
            PlatformError::InvalidAddress(0).category(),
            ErrorCategory::Memory
        );
        assert_eq!(
            PlatformError::RegisterAccessFailed {
                offset: 4,
                reason: "out of range".to_string()
            }
            .category(),
            ErrorCategory::Register
        );
    }

    #[test]
    fn test_poison_error_converts() {
        let lock = std::sync::Arc::new(std::sync::Mutex::new(0u32));
        let l2 = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = l2.lock().unwrap();
            panic!("poison");
        })
        .join();
        let err: PlatformError = lock.lock().unwrap_err().into();
        assert_eq!(err.category(), ErrorCategory::Internal);
    }
}
