//! Host arena backed by anonymous memory maps.
//!
//! Each allocation gets its own page-aligned anonymous mapping. The arena
//! keeps the mappings in a registry keyed by host address so that a
//! simulated remote endpoint can resolve bare addresses through
//! [`RemoteAccess`], the same way the remote processor's MMU would only
//! resolve addresses inside mapped buffers.
//!
//! The mapping itself belongs to the [`SharedBuffer`]; the registry only
//! holds a weak reference, so a buffer stays valid after the arena is gone
//! and remote accesses keep the mapping alive for the length of the copy.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::buffer::{BufferHandle, Mapping, SharedBuffer};
use crate::{MemError, MemPool, RemoteAccess, Result, SharedMemory};

/// Largest alignment an anonymous mapping can guarantee.
const PAGE_SIZE: usize = 4096;

/// Registry entry for an outstanding block.
struct Region {
    /// Dead once the owning buffer is dropped.
    mapping: Weak<Mapping>,
    /// Requested length (the mapping may be longer).
    len: usize,
    /// Pool tag recorded at allocation time.
    pool: MemPool,
    /// Allocation identifier.
    handle: BufferHandle,
}

/// Allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Successful allocations.
    pub allocs: u64,
    /// Successful frees.
    pub frees: u64,
    /// Allocation requests refused for lack of memory.
    pub failed_allocs: u64,
    /// Blocks currently outstanding.
    pub live_blocks: usize,
    /// Bytes currently outstanding.
    pub bytes_in_use: usize,
}

/// Shared memory arena using one anonymous mapping per block.
pub struct MmapArena {
    /// Live regions keyed by host address.
    regions: DashMap<u64, Region>,
    /// Optional cap on outstanding bytes.
    capacity: Option<usize>,
    /// Outstanding bytes.
    in_use: AtomicUsize,
    /// Next allocation identifier.
    next_handle: AtomicU64,
    allocs: AtomicU64,
    frees: AtomicU64,
    failed_allocs: AtomicU64,
}

impl Default for MmapArena {
    fn default() -> Self {
        Self::new()
    }
}

impl MmapArena {
    /// Create an arena without a capacity limit.
    pub fn new() -> Self {
        Self {
            regions: DashMap::new(),
            capacity: None,
            in_use: AtomicUsize::new(0),
            next_handle: AtomicU64::new(1),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            failed_allocs: AtomicU64::new(0),
        }
    }

    /// Create an arena that refuses allocations once `capacity` bytes are
    /// outstanding.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut arena = Self::new();
        arena.capacity = Some(capacity);
        arena
    }

    /// Snapshot of the allocation counters.
    pub fn stats(&self) -> ArenaStats {
        self.reap();
        ArenaStats {
            allocs: self.allocs.load(Ordering::Acquire),
            frees: self.frees.load(Ordering::Acquire),
            failed_allocs: self.failed_allocs.load(Ordering::Acquire),
            live_blocks: self.regions.len(),
            bytes_in_use: self.in_use.load(Ordering::Acquire),
        }
    }

    /// Reserve `size` bytes against the capacity limit.
    fn reserve(&self, size: usize) -> bool {
        let Some(capacity) = self.capacity else {
            self.in_use.fetch_add(size, Ordering::AcqRel);
            return true;
        };

        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= capacity)
            })
            .is_ok()
    }

    /// Release the accounting of blocks whose buffer was dropped unfreed.
    fn reap(&self) {
        self.regions.retain(|addr, region| {
            let live = region.mapping.strong_count() > 0;
            if !live {
                self.in_use.fetch_sub(region.len, Ordering::AcqRel);
                debug!("Reclaimed block at {addr:#x} dropped without free");
            }
            live
        });
    }

    /// Find the live mapping covering `addr..addr + len`.
    fn resolve(&self, addr: u64, len: usize) -> Result<Arc<Mapping>> {
        self.regions
            .iter()
            .find_map(|entry| {
                entry
                    .value()
                    .mapping
                    .upgrade()
                    .filter(|mapping| mapping.contains(addr, len))
            })
            .ok_or(MemError::Unmapped { addr, len })
    }
}

impl SharedMemory for MmapArena {
    fn alloc(&self, size: usize, align: usize, pool: MemPool) -> Result<SharedBuffer> {
        if size == 0 {
            return Err(MemError::ZeroSize);
        }
        if align > PAGE_SIZE || (align != 0 && !align.is_power_of_two()) {
            return Err(MemError::UnsupportedAlignment(align));
        }

        self.reap();
        if !self.reserve(size) {
            self.failed_allocs.fetch_add(1, Ordering::AcqRel);
            warn!("Shared memory exhausted: {size} bytes requested from {pool}");
            return Err(MemError::OutOfMemory { size, pool });
        }

        let mapping = match Mapping::anon(size) {
            Ok(mapping) => Arc::new(mapping),
            Err(e) => {
                self.in_use.fetch_sub(size, Ordering::AcqRel);
                self.failed_allocs.fetch_add(1, Ordering::AcqRel);
                return Err(e);
            }
        };

        let handle = BufferHandle::new(self.next_handle.fetch_add(1, Ordering::AcqRel));
        let addr = mapping.addr();
        let region = Region {
            mapping: Arc::downgrade(&mapping),
            len: size,
            pool,
            handle,
        };
        // The address of a block dropped since the last reap can come back
        if let Some(stale) = self.regions.insert(addr, region) {
            self.in_use.fetch_sub(stale.len, Ordering::AcqRel);
        }
        self.allocs.fetch_add(1, Ordering::AcqRel);
        trace!("alloc {size} bytes from {pool} at {addr:#x} ({handle})");

        Ok(SharedBuffer::new(mapping, pool, handle))
    }

    fn free(&self, buffer: SharedBuffer) -> Result<()> {
        let addr = buffer.addr();

        let Some(entry) = self.regions.get(&addr) else {
            return Err(MemError::UnknownBuffer(addr));
        };
        if entry.pool != buffer.pool() {
            return Err(MemError::PoolMismatch {
                addr,
                allocated: entry.pool,
                freed: buffer.pool(),
            });
        }
        if entry.handle != buffer.handle() {
            return Err(MemError::UnknownBuffer(addr));
        }
        drop(entry);

        if let Some((_, region)) = self.regions.remove(&addr) {
            self.in_use.fetch_sub(region.len, Ordering::AcqRel);
            self.frees.fetch_add(1, Ordering::AcqRel);
            trace!("free {} bytes at {addr:#x} to {}", region.len, region.pool);
        }
        Ok(())
    }
}

impl RemoteAccess for MmapArena {
    fn read(&self, addr: u64, out: &mut [u8]) -> Result<()> {
        self.resolve(addr, out.len())?.read_at(addr, out)
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<()> {
        self.resolve(addr, data.len())?.write_at(addr, data)
    }
}

impl Drop for MmapArena {
    fn drop(&mut self) {
        let leaked = self.regions.len();
        if leaked > 0 {
            debug!("Dropping arena with {leaked} outstanding blocks still mapped by their owners");
        }
    }
}
