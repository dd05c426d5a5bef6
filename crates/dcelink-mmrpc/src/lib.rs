//! Function-call marshalling for remote codec processors
//!
//! A call to the remote processor is described by a [`FunctionContext`]: a
//! function identifier, an ordered list of arguments and a list of address
//! translations. Arguments are either inline scalars or pointers into shared
//! memory. A pointer argument is translated by the transport on its own; a
//! pointer that is stored *inside* a pointer argument is invisible to the
//! transport unless a translation entry ([`Xlt`]) names the field that holds
//! it.
//!
//! ```text
//!   arg[0] ──► ┌──────────────────┐
//!              │ codec_handle     │
//!              │ dyn_params ──────┼──► (needs Xlt { index: 0, offset: 16 })
//!              │ status ──────────┼──► (needs Xlt { index: 0, offset: 24 })
//!              └──────────────────┘
//! ```
//!
//! The channel ([`RpcChannel`]) performs the crossing. [`loopback`] provides
//! an in-process endpoint that applies the translations exactly like a
//! transport would, which is what the host-side tests run against.

#![warn(missing_docs)]

use thiserror::Error;

pub mod call;
pub mod channel;
pub mod loopback;

pub use call::{CallBuilder, FunctionContext, MAX_PARAMS, MAX_XLTS, Param, Xlt};
pub use channel::{ChannelParams, Connector, RpcChannel};

/// Result type for marshalling and channel operations.
pub type Result<T> = std::result::Result<T, MmRpcError>;

/// Errors raised while building or dispatching a call.
#[derive(Debug, Error)]
pub enum MmRpcError {
    /// Too many arguments for a single call.
    #[error("Too many parameters: {count} (max {max})")]
    TooManyParams {
        /// Requested parameter count
        count: usize,
        /// Supported maximum
        max: usize,
    },

    /// Too many translation entries for a single call.
    #[error("Too many translations: {count} (max {max})")]
    TooManyXlts {
        /// Requested translation count
        count: usize,
        /// Supported maximum
        max: usize,
    },

    /// Argument slot outside the declared range.
    #[error("Parameter slot {slot} out of range (call has {count})")]
    SlotOutOfRange {
        /// Offending slot
        slot: usize,
        /// Declared parameter count
        count: usize,
    },

    /// Argument slot filled twice.
    #[error("Parameter slot {0} already filled")]
    SlotAlreadyFilled(usize),

    /// Argument slot never filled.
    #[error("Parameter slot {0} was never filled")]
    SlotUnfilled(usize),

    /// A translation refers to a slot that does not hold a pointer.
    #[error("Parameter slot {0} is not a pointer argument")]
    NotAPointer(usize),

    /// A translated field does not lie inside its argument.
    #[error("Field at {field_addr:#x} is outside argument {slot} ({base:#x}+{size})")]
    FieldOutsideArgument {
        /// Argument slot
        slot: usize,
        /// Field address
        field_addr: u64,
        /// Argument base address
        base: u64,
        /// Argument size
        size: usize,
    },

    /// The container buffer is not the one passed as the argument.
    #[error("Container at {container:#x} is not argument {slot} ({arg:#x})")]
    ContainerMismatch {
        /// Argument slot
        slot: usize,
        /// Container base address
        container: u64,
        /// Address recorded for the argument
        arg: u64,
    },

    /// Translation count differs from the declared count.
    #[error("Declared {declared} translations, built {actual}")]
    XltCountMismatch {
        /// Declared at construction
        declared: usize,
        /// Actually added
        actual: usize,
    },

    /// The channel could not be created.
    #[error("Channel create failed for {device}: {reason}")]
    Create {
        /// Device name
        device: String,
        /// Failure description
        reason: String,
    },

    /// The call could not be delivered or the remote failed it.
    #[error("Call to function {fxn_id} failed: {reason}")]
    Call {
        /// Function identifier
        fxn_id: u32,
        /// Failure description
        reason: String,
    },

    /// A translation entry no longer matches the memory it describes.
    #[error("Translation error: {0}")]
    Translation(String),

    /// Shared memory error.
    #[error("Shared memory error: {0}")]
    Memory(#[from] dcelink_memplugin::MemError),
}
