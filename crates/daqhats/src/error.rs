//! Error types for HAT operations.
//!
//! Every failure maps onto one of the library's wire result codes so callers
//! that need the numeric contract can still get it through [`HatError::code`].

use thiserror::Error;

/// Result type alias for HAT operations.
pub type Result<T> = std::result::Result<T, HatError>;

/// Numeric result codes shared with the boards' C interface.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Success, no errors.
    Success = 0,
    /// A parameter passed to the function was incorrect.
    BadParameter = -1,
    /// The device is busy.
    Busy = -2,
    /// There was a timeout accessing a resource.
    Timeout = -3,
    /// There was a timeout while obtaining a resource lock.
    LockTimeout = -4,
    /// The device at the specified address is not the correct type.
    InvalidDevice = -5,
    /// A needed resource was not available.
    ResourceUnavailable = -6,
    /// Some other error occurred.
    Undefined = -10,
}

impl ResultCode {
    /// The raw integer value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Errors that can occur when working with HAT boards.
///
/// The type is `Clone` so an acquisition thread can park a failure and hand
/// the same error to every later reader.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HatError {
    /// Invalid argument or a board that is not open
    #[error("Bad parameter: {message}")]
    BadParameter { message: String },

    /// The board is doing something that excludes this request
    #[error("Device busy: {message}")]
    Busy { message: String },

    /// The board did not answer in time
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// A bus or board lock could not be taken in time
    #[error("Timed out waiting for lock '{path}'")]
    LockTimeout { path: String },

    /// The EEPROM at an address describes a different board
    #[error("Invalid device at address {address}: expected id {expected:#06x}, found {found:#06x}")]
    InvalidDevice {
        address: u8,
        expected: u16,
        found: u16,
    },

    /// Memory, file or OS resource could not be obtained, or no scan exists
    #[error("Resource unavailable: {message}")]
    ResourceUnavailable { message: String },

    /// Anything else, including malformed replies from the board
    #[error("Undefined error: {message}")]
    Undefined { message: String },
}

impl HatError {
    /// Shorthand for [`HatError::BadParameter`].
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter {
            message: message.into(),
        }
    }

    /// Shorthand for [`HatError::Busy`].
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Shorthand for [`HatError::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Shorthand for [`HatError::ResourceUnavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            message: message.into(),
        }
    }

    /// Shorthand for [`HatError::Undefined`].
    pub fn undefined(message: impl Into<String>) -> Self {
        Self::Undefined {
            message: message.into(),
        }
    }

    /// Map to the numeric result code.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::BadParameter { .. } => ResultCode::BadParameter,
            Self::Busy { .. } => ResultCode::Busy,
            Self::Timeout { .. } => ResultCode::Timeout,
            Self::LockTimeout { .. } => ResultCode::LockTimeout,
            Self::InvalidDevice { .. } => ResultCode::InvalidDevice,
            Self::ResourceUnavailable { .. } => ResultCode::ResourceUnavailable,
            Self::Undefined { .. } => ResultCode::Undefined,
        }
    }

    /// Check if this is a parameter error.
    pub fn is_bad_parameter(&self) -> bool {
        matches!(self, Self::BadParameter { .. })
    }

    /// Check if the device is busy.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Check if this is a timeout, including lock timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::LockTimeout { .. })
    }

    /// Check if a resource was unavailable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable { .. })
    }
}

impl From<std::io::Error> for HatError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(err.to_string()),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Self::unavailable(err.to_string())
            }
            _ => Self::undefined(err.to_string()),
        }
    }
}

impl From<std::collections::TryReserveError> for HatError {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::unavailable(format!("buffer allocation failed: {err}"))
    }
}
