//! Opaque handles to remote objects
//!
//! Handles are identifiers issued by the remote processor. The host never
//! dereferences them; it only hands them back in later calls.

use std::num::NonZeroU64;

use crate::family::CodecFamily;

/// An open codec engine on the remote processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(NonZeroU64);

impl EngineHandle {
    /// Wrap a raw identifier; `None` for the null handle.
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Raw identifier.
    pub const fn raw(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine@{:#x}", self.raw())
    }
}

/// A codec instance created within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecHandle {
    id: NonZeroU64,
    family: CodecFamily,
}

impl CodecHandle {
    /// Wrap a raw identifier; `None` for the null handle.
    pub const fn from_raw(raw: u64, family: CodecFamily) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self { id, family }),
            None => None,
        }
    }

    /// Raw identifier.
    pub const fn raw(self) -> u64 {
        self.id.get()
    }

    /// Family the instance was created as.
    pub const fn family(self) -> CodecFamily {
        self.family
    }
}

impl std::fmt::Display for CodecHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:#x}", self.family, self.raw())
    }
}
