//! Error and status types for the hook engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Result type alias for inputtap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while starting, running or stopping the hook.
///
/// Every variant maps onto exactly one [`Status`] code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An allocation needed by the engine could not be satisfied.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A session is already active in this process.
    #[error("hook is already running")]
    AlreadyRunning,

    /// No session is active.
    #[error("hook is not running")]
    NotRunning,

    /// The device pattern matched nothing.
    #[error("no input devices match {0}")]
    NoDevicesFound(String),

    /// The device namespace could not be expanded.
    #[error("failed to enumerate {path}: {source}")]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Candidates were found but none could be opened and classified.
    #[error("no usable input devices (checked {checked})")]
    NoUsableDevices { checked: usize },

    /// The X display connection could not be opened.
    #[error("failed to open display {0}")]
    DisplayOpenFailed(String),

    /// The interception extension is not present on the display.
    #[error("{0} extension is not available")]
    FeatureUnavailable(&'static str),

    /// The extension version query failed in transport.
    #[error("failed to query {0} extension version")]
    VersionQueryFailed(&'static str),

    /// The record range could not be allocated.
    #[error("failed to allocate record range")]
    ContextAllocFailed,

    /// The interception context could not be created.
    #[error("failed to create record context")]
    ContextCreateFailed,

    /// The interception context could not be enabled.
    #[error("failed to enable record context")]
    ContextEnableFailed,

    /// The readiness registry could not be created.
    #[error("failed to create wait registry: {0}")]
    WaitRegistryCreateFailed(#[source] io::Error),

    /// A single source failed to read. Never returned from `start`/`stop`.
    #[error("failed to read from {name}: {source}")]
    DeviceReadFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Anything outside the closed taxonomy.
    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// The status code for this error.
    pub fn status(&self) -> Status {
        match self {
            Error::OutOfMemory(_) => Status::OutOfMemory,
            Error::AlreadyRunning => Status::AlreadyRunning,
            Error::NotRunning => Status::NotRunning,
            Error::NoDevicesFound(_) => Status::NoDevicesFound,
            Error::EnumerationFailed { .. } => Status::EnumerationFailed,
            Error::NoUsableDevices { .. } => Status::NoUsableDevices,
            Error::DisplayOpenFailed(_) => Status::DisplayOpenFailed,
            Error::FeatureUnavailable(_) => Status::FeatureUnavailable,
            Error::VersionQueryFailed(_) => Status::VersionQueryFailed,
            Error::ContextAllocFailed => Status::ContextAllocFailed,
            Error::ContextCreateFailed => Status::ContextCreateFailed,
            Error::ContextEnableFailed => Status::ContextEnableFailed,
            Error::WaitRegistryCreateFailed(_) => Status::WaitRegistryCreateFailed,
            Error::DeviceReadFailed { .. } => Status::DeviceReadFailed,
            Error::Unknown(_) => Status::UnknownFailure,
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory(err.to_string())
    }
}

/// Closed set of status codes returned by engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(i32)]
pub enum Status {
    Success = 0x00,
    OutOfMemory = 0x01,
    AlreadyRunning = 0x02,
    NotRunning = 0x03,

    NoDevicesFound = 0x10,
    EnumerationFailed = 0x11,
    NoUsableDevices = 0x12,

    DisplayOpenFailed = 0x20,
    FeatureUnavailable = 0x21,
    VersionQueryFailed = 0x22,
    ContextAllocFailed = 0x23,
    ContextCreateFailed = 0x24,
    ContextEnableFailed = 0x25,

    WaitRegistryCreateFailed = 0x30,
    DeviceReadFailed = 0x31,

    UnknownFailure = 0xFF,
}

impl Status {
    const ALL: [Status; 16] = [
        Status::Success,
        Status::OutOfMemory,
        Status::AlreadyRunning,
        Status::NotRunning,
        Status::NoDevicesFound,
        Status::EnumerationFailed,
        Status::NoUsableDevices,
        Status::DisplayOpenFailed,
        Status::FeatureUnavailable,
        Status::VersionQueryFailed,
        Status::ContextAllocFailed,
        Status::ContextCreateFailed,
        Status::ContextEnableFailed,
        Status::WaitRegistryCreateFailed,
        Status::DeviceReadFailed,
        Status::UnknownFailure,
    ];

    /// Numeric code, stable across releases.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decode a numeric code. Codes this version does not know are a generic failure.
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .unwrap_or(Status::UnknownFailure)
    }

    /// Whether this is [`Status::Success`].
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Permission or capability problems that a caller may fix and then retry `start` for.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Status::FeatureUnavailable
                | Status::DisplayOpenFailed
                | Status::NoDevicesFound
                | Status::NoUsableDevices
                | Status::EnumerationFailed
        )
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }
}

impl<T> From<Result<T>> for Status {
    fn from(result: Result<T>) -> Self {
        Status::from(&result)
    }
}
