//! Bundled message layouts
//!
//! Each operation except process exchanges a single message struct that
//! lives in shared memory and is passed as the call's only argument. The
//! remote writes its results back into the same struct. All fields are
//! little-endian, pointers and handles are 64 bits wide.
//!
//! Pointer fields inside a message are invisible to the transport; the
//! `*_OFFSET` constants name them so the caller can declare translations.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use dcelink_memplugin::SharedBuffer;

use crate::Result;

/// Length of the name fields, including the terminating NUL.
pub const NAME_LEN: usize = 32;

/// Remote function identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FxnId {
    /// Open an engine
    EngineOpen = 0,
    /// Close an engine
    EngineClose = 1,
    /// Create a codec instance
    CodecCreate = 2,
    /// Control a codec instance
    CodecControl = 3,
    /// Query a codec's version string
    CodecGetVersion = 4,
    /// Process one frame
    CodecProcess = 5,
    /// Delete a codec instance
    CodecDelete = 6,
}

impl FxnId {
    /// Numeric identifier.
    pub const fn id(self) -> u32 {
        self as u32
    }
}

/// A message struct exchanged as a single pointer argument.
pub trait Message:
    Sized + for<'a> BinRead<Args<'a> = ()> + for<'a> BinWrite<Args<'a> = ()>
{
    /// Function the message is sent with.
    const FXN: FxnId;
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Encode into the start of `buf`.
    fn encode(&self, buf: &mut SharedBuffer) -> Result<()> {
        let mut cursor = Cursor::new(buf.as_mut_slice());
        self.write_le(&mut cursor)?;
        Ok(())
    }

    /// Decode from the start of `buf`.
    fn decode(buf: &SharedBuffer) -> Result<Self> {
        let mut cursor = Cursor::new(buf.as_slice());
        Ok(Self::read_le(&mut cursor)?)
    }
}

/// Copy `name` into a fixed, NUL-terminated name field.
///
/// Callers validate the length first; anything that does not fit is
/// truncated so the terminator is always present.
pub fn name_field(name: &str) -> [u8; NAME_LEN] {
    let mut field = [0u8; NAME_LEN];
    let len = name.len().min(NAME_LEN - 1);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

/// `Engine_open` request and reply.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct EngineOpenMsg {
    /// Engine name, NUL-terminated
    pub name: [u8; NAME_LEN],
    /// Engine attributes (not interpreted by the remote)
    pub attrs: u64,
    /// Engine error code (out)
    pub error_code: i32,
    /// Reserved
    pub reserved: u32,
    /// Engine handle (out)
    pub eng_handle: u64,
}

impl EngineOpenMsg {
    /// Offset of `error_code`.
    pub const ERROR_CODE_OFFSET: usize = 40;
    /// Offset of `eng_handle`.
    pub const ENG_HANDLE_OFFSET: usize = 48;

    /// Request for `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name_field(name),
            attrs: 0,
            error_code: 0,
            reserved: 0,
            eng_handle: 0,
        }
    }
}

impl Message for EngineOpenMsg {
    const FXN: FxnId = FxnId::EngineOpen;
    const SIZE: usize = 56;
}

/// `Engine_close` request.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct EngineCloseMsg {
    /// Engine to close
    pub eng_handle: u64,
}

impl Message for EngineCloseMsg {
    const FXN: FxnId = FxnId::EngineClose;
    const SIZE: usize = 8;
}

/// Codec create request and reply.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CodecCreateMsg {
    /// Owning engine
    pub engine: u64,
    /// Codec name, NUL-terminated
    pub name: [u8; NAME_LEN],
    /// Static parameters (translated)
    pub static_params: u64,
    /// Family tag
    pub codec_id: u32,
    /// Reserved
    pub reserved: u32,
    /// Codec handle (out)
    pub codec_handle: u64,
}

impl CodecCreateMsg {
    /// Offset of `static_params`.
    pub const STATIC_PARAMS_OFFSET: usize = 40;
    /// Offset of `codec_handle`.
    pub const CODEC_HANDLE_OFFSET: usize = 56;
}

impl Message for CodecCreateMsg {
    const FXN: FxnId = FxnId::CodecCreate;
    const SIZE: usize = 64;
}

/// Codec control request and reply.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CodecControlMsg {
    /// Codec instance
    pub codec_handle: u64,
    /// Command id
    pub cmd_id: i32,
    /// Reserved
    pub reserved: u32,
    /// Dynamic parameters (translated)
    pub dyn_params: u64,
    /// Status struct (translated)
    pub status: u64,
    /// Family tag
    pub codec_id: u32,
    /// Codec result (out)
    pub result: i32,
}

impl CodecControlMsg {
    /// Offset of `dyn_params`.
    pub const DYN_PARAMS_OFFSET: usize = 16;
    /// Offset of `status`.
    pub const STATUS_OFFSET: usize = 24;
    /// Offset of `result`.
    pub const RESULT_OFFSET: usize = 36;
}

impl Message for CodecControlMsg {
    const FXN: FxnId = FxnId::CodecControl;
    const SIZE: usize = 40;
}

/// Codec get-version request and reply.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CodecGetVersionMsg {
    /// Codec instance
    pub codec_handle: u64,
    /// Dynamic parameters (translated)
    pub dyn_params: u64,
    /// Status struct (translated)
    pub status: u64,
    /// Version string buffer from the status struct (translated)
    pub version: u64,
    /// Family tag
    pub codec_id: u32,
    /// Codec result (out)
    pub result: i32,
}

impl CodecGetVersionMsg {
    /// Offset of `dyn_params`.
    pub const DYN_PARAMS_OFFSET: usize = 8;
    /// Offset of `status`.
    pub const STATUS_OFFSET: usize = 16;
    /// Offset of `version`.
    pub const VERSION_OFFSET: usize = 24;
    /// Offset of `result`.
    pub const RESULT_OFFSET: usize = 36;
}

impl Message for CodecGetVersionMsg {
    const FXN: FxnId = FxnId::CodecGetVersion;
    const SIZE: usize = 40;
}

/// Codec delete request.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct CodecDeleteMsg {
    /// Codec instance
    pub codec_handle: u64,
    /// Family tag
    pub codec_id: u32,
    /// Reserved
    pub reserved: u32,
}

impl Message for CodecDeleteMsg {
    const FXN: FxnId = FxnId::CodecDelete;
    const SIZE: usize = 16;
}
