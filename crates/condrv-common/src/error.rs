use thiserror::Error;

/// Win32 error values the collaborators report
pub mod win32 {
    pub const ERROR_INVALID_DATA: u32 = 13;
    pub const ERROR_OUTOFMEMORY: u32 = 14;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_ARITHMETIC_OVERFLOW: u32 = 534;
    pub const ERROR_INVALID_STATE: u32 = 5023;
}

/// Failure raised by the transport or host I/O collaborators. The
/// dispatcher propagates these to its caller instead of producing a
/// completion: the transport must treat the request as a soft failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{context} (win32 error {win32_error})")]
pub struct DeviceCommError {
    pub context: &'static str,
    pub win32_error: u32,
}

impl DeviceCommError {
    pub fn new(context: &'static str, win32_error: u32) -> Self {
        Self {
            context,
            win32_error,
        }
    }

    pub fn invalid_parameter(context: &'static str) -> Self {
        Self::new(context, win32::ERROR_INVALID_PARAMETER)
    }

    pub fn invalid_data(context: &'static str) -> Self {
        Self::new(context, win32::ERROR_INVALID_DATA)
    }

    pub fn out_of_memory(context: &'static str) -> Self {
        Self::new(context, win32::ERROR_OUTOFMEMORY)
    }
}

pub type CommResult<T> = std::result::Result<T, DeviceCommError>;
