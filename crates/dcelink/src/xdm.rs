//! Codec interface codes and buffer descriptor helpers

use dcelink_memplugin::SharedBuffer;

use crate::family::DescLayout;
use crate::{DceError, Result};

/// Control command passed to a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XdmCmd {
    /// Query the codec status
    GetStatus,
    /// Apply dynamic parameters
    SetParams,
    /// Reset the codec
    Reset,
    /// Restore default dynamic parameters
    SetDefault,
    /// Flush pending frames
    Flush,
    /// Query buffer requirements
    GetBufInfo,
    /// Query the codec version string
    GetVersion,
    /// Query context information
    GetContextInfo,
    /// Query default dynamic parameters
    GetDynParamsDefault,
    /// Set late acquire argument
    SetLateAcquireArg,
    /// Codec-specific command
    Other(i32),
}

impl XdmCmd {
    /// Numeric command id.
    pub const fn id(self) -> i32 {
        match self {
            Self::GetStatus => 0,
            Self::SetParams => 1,
            Self::Reset => 2,
            Self::SetDefault => 3,
            Self::Flush => 4,
            Self::GetBufInfo => 5,
            Self::GetVersion => 6,
            Self::GetContextInfo => 7,
            Self::GetDynParamsDefault => 8,
            Self::SetLateAcquireArg => 9,
            Self::Other(id) => id,
        }
    }

    /// Command for a numeric id.
    pub const fn from_id(id: i32) -> Self {
        match id {
            0 => Self::GetStatus,
            1 => Self::SetParams,
            2 => Self::Reset,
            3 => Self::SetDefault,
            4 => Self::Flush,
            5 => Self::GetBufInfo,
            6 => Self::GetVersion,
            7 => Self::GetContextInfo,
            8 => Self::GetDynParamsDefault,
            9 => Self::SetLateAcquireArg,
            other => Self::Other(other),
        }
    }
}

/// Result of a codec control or process call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XdmStatus {
    /// Success
    Ok,
    /// Failure, details in the status struct
    Fail,
    /// Request not supported by the codec
    Unsupported,
    /// Any other value
    Other(i32),
}

impl XdmStatus {
    /// Status for a raw result value.
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Ok,
            -1 => Self::Fail,
            -3 => Self::Unsupported,
            other => Self::Other(other),
        }
    }

    /// Raw result value.
    pub const fn raw(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Fail => -1,
            Self::Unsupported => -3,
            Self::Other(raw) => raw,
        }
    }

    /// Whether the call succeeded.
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Error code reported by the remote engine on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorCode {
    /// No error
    Ok,
    /// Name already exists
    Exists,
    /// Out of memory on the remote
    NoMemory,
    /// Remote image could not be loaded
    DspLoad,
    /// No communication with the remote
    NoComm,
    /// No server on the remote
    NoServer,
    /// Communication buffer allocation failed
    ComAlloc,
    /// Remote runtime failure
    Runtime,
    /// Codec creation failed
    CodecCreate,
    /// Codec start failed
    CodecStart,
    /// Invalid argument
    Invalid,
    /// Server image mismatch
    BadServer,
    /// Resource not available
    NotAvailable,
    /// Engine in the wrong state
    WrongState,
    /// Engine in use
    InUse,
    /// Engine name not found
    NotFound,
    /// Timed out
    Timeout,
    /// Any other value
    Other(i32),
}

impl EngineErrorCode {
    /// Code for a raw value.
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Ok,
            1 => Self::Exists,
            2 => Self::NoMemory,
            3 => Self::DspLoad,
            4 => Self::NoComm,
            5 => Self::NoServer,
            6 => Self::ComAlloc,
            7 => Self::Runtime,
            8 => Self::CodecCreate,
            9 => Self::CodecStart,
            10 => Self::Invalid,
            11 => Self::BadServer,
            12 => Self::NotAvailable,
            13 => Self::WrongState,
            14 => Self::InUse,
            15 => Self::NotFound,
            16 => Self::Timeout,
            other => Self::Other(other),
        }
    }

    /// Raw value.
    pub const fn raw(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Exists => 1,
            Self::NoMemory => 2,
            Self::DspLoad => 3,
            Self::NoComm => 4,
            Self::NoServer => 5,
            Self::ComAlloc => 6,
            Self::Runtime => 7,
            Self::CodecCreate => 8,
            Self::CodecStart => 9,
            Self::Invalid => 10,
            Self::BadServer => 11,
            Self::NotAvailable => 12,
            Self::WrongState => 13,
            Self::InUse => 14,
            Self::NotFound => 15,
            Self::Timeout => 16,
            Self::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?} ({})", self.raw())
    }
}

/// Populates a caller-owned buffer descriptor.
///
/// ```
/// use dcelink::family::XDM2_BUF_DESC;
/// use dcelink::xdm::BufDescWriter;
/// use dcelink_memplugin::{MemPool, MmapArena, SharedMemory};
///
/// let arena = MmapArena::new();
/// let frame = arena.alloc(4096, 0, MemPool::Carveout).unwrap();
/// let mut desc = arena.alloc(XDM2_BUF_DESC.size, 0, MemPool::Heap).unwrap();
///
/// BufDescWriter::new(XDM2_BUF_DESC)
///     .buffer(&frame)
///     .write(&mut desc)
///     .unwrap();
/// assert_eq!(XDM2_BUF_DESC.read_count(&desc).unwrap(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct BufDescWriter {
    layout: DescLayout,
    slots: Vec<(u64, u32)>,
}

impl BufDescWriter {
    /// Start an empty descriptor in `layout`.
    pub const fn new(layout: DescLayout) -> Self {
        Self {
            layout,
            slots: Vec::new(),
        }
    }

    /// Append a slot covering all of `buffer`.
    #[must_use]
    pub fn buffer(self, buffer: &SharedBuffer) -> Self {
        let size = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        self.raw(buffer.addr(), size)
    }

    /// Append a slot with an explicit address and size.
    #[must_use]
    pub fn raw(mut self, addr: u64, size: u32) -> Self {
        self.slots.push((addr, size));
        self
    }

    /// Write the count and every slot into `desc`.
    pub fn write(&self, desc: &mut SharedBuffer) -> Result<()> {
        let layout = &self.layout;
        if self.slots.len() > layout.max_slots {
            return Err(DceError::InvalidInput(format!(
                "{} holds at most {} buffers, got {}",
                layout.name,
                layout.max_slots,
                self.slots.len()
            )));
        }
        if desc.len() < layout.size {
            return Err(DceError::InvalidInput(format!(
                "{} needs {} bytes, buffer has {}",
                layout.name,
                layout.size,
                desc.len()
            )));
        }

        let count = i32::try_from(self.slots.len()).unwrap_or(i32::MAX);
        desc.write_i32(layout.count_offset, count)?;
        for (index, (addr, size)) in self.slots.iter().enumerate() {
            let slot = layout.slot_field(index) - layout.buf_offset;
            desc.write_u64(slot + layout.buf_offset, *addr)?;
            desc.write_i32(slot + layout.size_offset, i32::try_from(*size).unwrap_or(i32::MAX))?;
        }
        Ok(())
    }
}
