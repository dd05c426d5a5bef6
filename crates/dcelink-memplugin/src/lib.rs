//! Shared memory arena for host/remote codec processors
//!
//! The host and the remote codec processor do not share a virtual address
//! space, only a window of physical memory. Everything that crosses the
//! boundary (RPC message structs, codec parameter blocks, buffer
//! descriptors) has to live in memory handed out by an arena implementing
//! [`SharedMemory`].
//!
//! # Components
//!
//! - [`SharedMemory`]: allocate/free contiguous blocks visible to both sides
//! - [`SharedBuffer`]: an owned block, addressable by its host virtual address
//! - [`RemoteAccess`]: address-based access used by a simulated remote endpoint
//! - [`MmapArena`]: host arena backed by anonymous memory maps
//!
//! # Example
//!
//! ```
//! use dcelink_memplugin::{MemPool, MmapArena, SharedMemory};
//!
//! let arena = MmapArena::new();
//! let mut buf = arena.alloc(64, 0, MemPool::Tiler1d).unwrap();
//! buf.write_u64(0, 0xdead_beef).unwrap();
//! assert_eq!(buf.read_u64(0), Some(0xdead_beef));
//! arena.free(buf).unwrap();
//! ```

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod arena;
pub mod buffer;

pub use arena::{ArenaStats, MmapArena};
pub use buffer::{BufferHandle, SharedBuffer};

/// Result type for shared memory operations.
pub type Result<T> = std::result::Result<T, MemError>;

/// Memory pool a block is carved from.
///
/// The pool tag must be handed back unchanged when the block is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemPool {
    /// 1D tiler container, the default for RPC message structs.
    Tiler1d,
    /// Contiguous carveout reserved for the remote processor.
    Carveout,
    /// Generic heap memory mapped into the remote's window.
    Heap,
}

impl std::fmt::Display for MemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tiler1d => "tiler-1d",
            Self::Carveout => "carveout",
            Self::Heap => "heap",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during shared memory operations.
#[derive(Debug, Error)]
pub enum MemError {
    /// The pool cannot satisfy the request.
    #[error("Out of shared memory: {size} bytes from {pool}")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
        /// Pool the request was made against
        pool: MemPool,
    },

    /// Zero-sized allocations are rejected.
    #[error("Zero-sized allocation requested")]
    ZeroSize,

    /// Requested alignment is not supported by the arena.
    #[error("Unsupported alignment: {0}")]
    UnsupportedAlignment(usize),

    /// The buffer was not allocated by this arena (or was already freed).
    #[error("Unknown buffer at {0:#x}")]
    UnknownBuffer(u64),

    /// The buffer is being freed into a different pool than it came from.
    #[error("Pool mismatch for buffer at {addr:#x}: allocated from {allocated}, freed to {freed}")]
    PoolMismatch {
        /// Buffer address
        addr: u64,
        /// Pool the buffer was allocated from
        allocated: MemPool,
        /// Pool passed to free
        freed: MemPool,
    },

    /// An address range does not fall inside any live allocation.
    #[error("Address range {addr:#x}+{len} is not mapped")]
    Unmapped {
        /// Start address
        addr: u64,
        /// Length in bytes
        len: usize,
    },

    /// The underlying mapping could not be created.
    #[error("Mapping error: {0}")]
    Map(#[from] std::io::Error),
}

/// Allocator for memory visible to both processors.
///
/// Implementations must be usable from several threads at once; each
/// returned [`SharedBuffer`] is owned exclusively by its caller until it is
/// handed back through [`SharedMemory::free`].
pub trait SharedMemory: Send + Sync {
    /// Allocate `size` contiguous bytes from `pool`.
    ///
    /// `align` of 0 selects the arena's natural alignment. The returned
    /// memory is zero-filled.
    fn alloc(&self, size: usize, align: usize, pool: MemPool) -> Result<SharedBuffer>;

    /// Return a block to the pool it was allocated from.
    fn free(&self, buffer: SharedBuffer) -> Result<()>;
}

/// Address-based access to shared memory.
///
/// This is the view a remote endpoint has: it receives bare addresses and
/// must only touch ranges that belong to live allocations.
pub trait RemoteAccess: Send + Sync {
    /// Copy `out.len()` bytes starting at host address `addr`.
    fn read(&self, addr: u64, out: &mut [u8]) -> Result<()>;

    /// Copy `data` to host address `addr`.
    fn write(&self, addr: u64, data: &[u8]) -> Result<()>;

    /// Read a little-endian 64-bit value at `addr`.
    fn read_u64(&self, addr: u64) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read(addr, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Write a little-endian 64-bit value at `addr`.
    fn write_u64(&self, addr: u64, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }
}
