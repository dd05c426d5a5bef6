//! Owned shared memory blocks.

use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};

use crate::{MemError, MemPool, Result};

/// Identifier of a backing allocation.
///
/// Transports use it to find the allocation a translated pointer must be
/// relocated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u64);

impl BufferHandle {
    /// Wrap a raw allocation identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw allocation identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Anonymous mapping backing one block; unmapped when the last owner drops.
pub(crate) struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
    _map: MmapMut,
}

// Safety: `ptr` points into `_map`, which lives as long as the mapping and
// never moves. Concurrent access is plain shared memory, as with the
// remote processor.
#[allow(unsafe_code)]
unsafe impl Send for Mapping {}
#[allow(unsafe_code)]
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Map `len` zero-filled bytes.
    pub(crate) fn anon(len: usize) -> Result<Self> {
        let mut map = MmapOptions::new().len(len).map_anon()?;
        let ptr = NonNull::new(map.as_mut_ptr()).ok_or(MemError::Unmapped { addr: 0, len })?;
        Ok(Self {
            ptr,
            len,
            _map: map,
        })
    }

    pub(crate) fn addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn contains(&self, addr: u64, len: usize) -> bool {
        let base = self.addr();
        addr >= base
            && (addr - base)
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.len as u64)
    }

    /// Copy out of the mapping starting at host address `addr`.
    pub(crate) fn read_at(&self, addr: u64, out: &mut [u8]) -> Result<()> {
        if !self.contains(addr, out.len()) {
            return Err(MemError::Unmapped {
                addr,
                len: out.len(),
            });
        }
        // Safety: the range was checked against a mapping `self` keeps alive.
        #[allow(unsafe_code)]
        unsafe {
            ptr::copy_nonoverlapping(addr as *const u8, out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// Copy into the mapping starting at host address `addr`.
    pub(crate) fn write_at(&self, addr: u64, data: &[u8]) -> Result<()> {
        if !self.contains(addr, data.len()) {
            return Err(MemError::Unmapped {
                addr,
                len: data.len(),
            });
        }
        // Safety: as in `read_at`; anonymous mappings are writable.
        #[allow(unsafe_code)]
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len());
        }
        Ok(())
    }
}

/// A block of shared memory owned by the caller.
///
/// The block is identified on the host by its virtual address
/// ([`SharedBuffer::addr`]). It is not `Clone`: handing it back to
/// [`SharedMemory::free`](crate::SharedMemory::free) consumes it, so a block
/// cannot be freed twice. The buffer keeps its mapping alive on its own, so
/// it stays valid after the arena is dropped; dropping it without a free
/// unmaps the block and the arena reclaims the bookkeeping later.
pub struct SharedBuffer {
    mapping: Arc<Mapping>,
    /// Pool the block was carved from.
    pool: MemPool,
    /// Arena-assigned allocation identifier.
    handle: BufferHandle,
}

impl SharedBuffer {
    pub(crate) const fn new(mapping: Arc<Mapping>, pool: MemPool, handle: BufferHandle) -> Self {
        Self {
            mapping,
            pool,
            handle,
        }
    }

    /// Second view of the same block carrying another pool tag.
    #[cfg(test)]
    pub(crate) fn retagged(&self, pool: MemPool) -> Self {
        Self::new(Arc::clone(&self.mapping), pool, self.handle)
    }

    /// Host virtual address of the first byte.
    pub fn addr(&self) -> u64 {
        self.mapping.addr()
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether the block is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pool the block was allocated from.
    pub const fn pool(&self) -> MemPool {
        self.pool
    }

    /// Allocation identifier.
    pub const fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Whether `addr..addr + len` lies inside this block.
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        self.mapping.contains(addr, len)
    }

    /// Shared view of the block.
    #[allow(unsafe_code)]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: the mapping outlives `self` and spans `len` bytes.
        unsafe { slice::from_raw_parts(self.mapping.ptr.as_ptr(), self.mapping.len) }
    }

    /// Mutable view of the block.
    #[allow(unsafe_code)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: as above; `&mut self` is the only host-side view.
        unsafe { slice::from_raw_parts_mut(self.mapping.ptr.as_ptr(), self.mapping.len) }
    }

    /// Read a little-endian `u64` at `offset`, if it fits.
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        let bytes = self.as_slice().get(offset..offset.checked_add(8)?)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Some(u64::from_le_bytes(raw))
    }

    /// Read a little-endian `i32` at `offset`, if it fits.
    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        let bytes = self.as_slice().get(offset..offset.checked_add(4)?)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a little-endian `u64` at `offset`.
    pub fn write_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Write a little-endian `i32` at `offset`.
    pub fn write_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Copy `data` into the block at `offset`.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let addr = self.addr().wrapping_add(offset as u64);
        let target = offset
            .checked_add(data.len())
            .and_then(|end| self.as_mut_slice().get_mut(offset..end))
            .ok_or(MemError::Unmapped {
                addr,
                len: data.len(),
            })?;
        target.copy_from_slice(data);
        Ok(())
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .field("pool", &self.pool)
            .field("handle", &self.handle)
            .finish()
    }
}
