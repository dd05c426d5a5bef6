//! Error types and the numeric status taxonomy

use dcelink_memplugin::MemError;
use dcelink_mmrpc::MmRpcError;
use thiserror::Error;

use crate::xdm::EngineErrorCode;

/// Numeric status reported to callers.
///
/// The values are part of the interface with existing applications and
/// must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DceStatus {
    /// Success
    Ok = 0,
    /// The codec reported a failure
    XdmFail = -1,
    /// The remote call could not be completed
    IpcCallFail = -2,
    /// The request is not supported
    Unsupported = -3,
    /// Shared memory exhausted
    OutOfMemory = -4,
    /// The channel could not be created
    IpcCreateFail = -5,
    /// Invalid arguments
    InvalidInput = -6,
}

impl DceStatus {
    /// Numeric value.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Status for a numeric value, if it is one of the known codes.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            -1 => Some(Self::XdmFail),
            -2 => Some(Self::IpcCallFail),
            -3 => Some(Self::Unsupported),
            -4 => Some(Self::OutOfMemory),
            -5 => Some(Self::IpcCreateFail),
            -6 => Some(Self::InvalidInput),
            _ => None,
        }
    }
}

/// Errors raised by codec engine operations.
#[derive(Debug, Error)]
pub enum DceError {
    /// Argument validation failed before anything was allocated.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A message or parameter buffer could not be allocated.
    #[error("Out of shared memory: {0}")]
    OutOfMemory(#[source] MemError),

    /// Shared memory error other than an allocation failure.
    #[error("Shared memory error: {0}")]
    Memory(#[from] MemError),

    /// The channel to the remote processor could not be created.
    #[error("Channel create failed: {0}")]
    ChannelCreate(#[source] MmRpcError),

    /// The remote call failed in transit.
    #[error("Remote call failed: {0}")]
    ChannelCall(#[source] MmRpcError),

    /// The call package could not be assembled.
    #[error("Marshalling error: {0}")]
    Marshal(#[from] MmRpcError),

    /// A bundled message could not be encoded or decoded.
    #[error("Message encoding error: {0}")]
    Encoding(#[from] binrw::Error),

    /// The engine refused to open.
    #[error("Engine open rejected: {0}")]
    EngineRejected(EngineErrorCode),

    /// The engine returned no codec instance.
    #[error("Codec create rejected for {name}")]
    CodecRejected {
        /// Requested codec name
        name: String,
    },

    /// An operation needs an open session and there is none.
    #[error("No engine is open")]
    NotConnected,
}

impl DceError {
    /// Status code reported for this error.
    pub const fn status(&self) -> DceStatus {
        match self {
            Self::InvalidInput(_) | Self::Marshal(_) | Self::Memory(_) => DceStatus::InvalidInput,
            Self::OutOfMemory(_) => DceStatus::OutOfMemory,
            Self::ChannelCreate(_) => DceStatus::IpcCreateFail,
            Self::ChannelCall(_) | Self::Encoding(_) | Self::NotConnected => DceStatus::IpcCallFail,
            Self::EngineRejected(_) | Self::CodecRejected { .. } => DceStatus::XdmFail,
        }
    }
}

impl From<&DceError> for DceStatus {
    fn from(error: &DceError) -> Self {
        error.status()
    }
}
