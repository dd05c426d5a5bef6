//! Call packages and address translation entries.

use dcelink_memplugin::{BufferHandle, SharedBuffer};
use tracing::trace;

use crate::{MmRpcError, Result};

/// Maximum number of arguments in one call.
pub const MAX_PARAMS: usize = 10;

/// Maximum number of translation entries in one call.
pub const MAX_XLTS: usize = 64;

/// Width of a pointer field inside a shared struct.
pub const POINTER_SIZE: usize = 8;

/// One call argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Inline value, passed by copy.
    Scalar {
        /// Size of the value in bytes
        size: usize,
        /// The value, zero-extended
        data: u64,
    },
    /// Pointer into shared memory; the callee may access `size` bytes.
    Ptr {
        /// Size of the pointed-to region
        size: usize,
        /// Host virtual address
        addr: u64,
        /// Backing allocation, if known
        handle: Option<BufferHandle>,
    },
}

impl Param {
    /// Whether the argument is a pointer.
    pub const fn is_pointer(&self) -> bool {
        matches!(self, Self::Ptr { .. })
    }
}

/// Address translation entry for a pointer stored inside a pointer argument.
///
/// The transport locates the field at `container + offset` inside argument
/// `index` and relocates the value it holds (`target`) into the remote
/// address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xlt {
    /// Argument the field belongs to.
    pub index: usize,
    /// Base address of the containing allocation.
    pub container: u64,
    /// Byte offset of the pointer field inside the container.
    pub offset: u64,
    /// Pointer value stored in the field when the entry was built.
    pub target: u64,
    /// Backing allocation of `target`, if known.
    pub handle: Option<BufferHandle>,
}

impl Xlt {
    /// Address of the pointer field.
    pub const fn field_addr(&self) -> u64 {
        self.container.wrapping_add(self.offset)
    }
}

/// A complete, immutable call package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionContext {
    fxn_id: u32,
    params: Vec<Param>,
    xlts: Vec<Xlt>,
}

impl FunctionContext {
    /// Remote function identifier.
    pub const fn fxn_id(&self) -> u32 {
        self.fxn_id
    }

    /// Arguments in slot order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Translation entries.
    pub fn xlts(&self) -> &[Xlt] {
        &self.xlts
    }
}

/// Builder for a [`FunctionContext`].
///
/// The argument and translation counts are fixed up front. Every slot must
/// be filled exactly once and exactly the declared number of translations
/// must be added before [`CallBuilder::finish`] succeeds.
#[derive(Debug)]
pub struct CallBuilder {
    fxn_id: u32,
    params: Vec<Option<Param>>,
    xlts: Vec<Xlt>,
    num_xlts: usize,
}

impl CallBuilder {
    /// Start a call to `fxn_id` with `num_params` arguments and `num_xlts`
    /// translation entries.
    pub fn new(fxn_id: u32, num_params: usize, num_xlts: usize) -> Result<Self> {
        if num_params > MAX_PARAMS {
            return Err(MmRpcError::TooManyParams {
                count: num_params,
                max: MAX_PARAMS,
            });
        }
        if num_xlts > MAX_XLTS {
            return Err(MmRpcError::TooManyXlts {
                count: num_xlts,
                max: MAX_XLTS,
            });
        }

        Ok(Self {
            fxn_id,
            params: vec![None; num_params],
            xlts: Vec::with_capacity(num_xlts),
            num_xlts,
        })
    }

    fn fill(&mut self, slot: usize, param: Param) -> Result<&mut Self> {
        let count = self.params.len();
        let entry = self
            .params
            .get_mut(slot)
            .ok_or(MmRpcError::SlotOutOfRange { slot, count })?;
        if entry.is_some() {
            return Err(MmRpcError::SlotAlreadyFilled(slot));
        }
        *entry = Some(param);
        Ok(self)
    }

    /// Store an inline value in `slot`.
    pub fn scalar(&mut self, slot: usize, size: usize, data: u64) -> Result<&mut Self> {
        self.fill(slot, Param::Scalar { size, data })
    }

    /// Store a pointer to `size` bytes at `addr` in `slot`.
    pub fn pointer(
        &mut self,
        slot: usize,
        size: usize,
        addr: u64,
        handle: Option<BufferHandle>,
    ) -> Result<&mut Self> {
        self.fill(slot, Param::Ptr { size, addr, handle })
    }

    /// Store a pointer to the first `size` bytes of `buffer` in `slot`.
    pub fn pointer_to(
        &mut self,
        slot: usize,
        buffer: &SharedBuffer,
        size: usize,
    ) -> Result<&mut Self> {
        if size > buffer.len() {
            return Err(MmRpcError::FieldOutsideArgument {
                slot,
                field_addr: buffer.addr(),
                base: buffer.addr(),
                size,
            });
        }
        self.pointer(slot, size, buffer.addr(), Some(buffer.handle()))
    }

    /// Declare the pointer field at `field_addr` inside argument `slot` for
    /// translation.
    ///
    /// `container` must be the buffer passed as that argument. The pointer
    /// value currently stored in the field is captured into the entry.
    pub fn translate(
        &mut self,
        slot: usize,
        container: &SharedBuffer,
        field_addr: u64,
        handle: Option<BufferHandle>,
    ) -> Result<&mut Self> {
        if self.xlts.len() == self.num_xlts {
            return Err(MmRpcError::XltCountMismatch {
                declared: self.num_xlts,
                actual: self.xlts.len() + 1,
            });
        }

        let count = self.params.len();
        let (base, size) = match self.params.get(slot) {
            None => return Err(MmRpcError::SlotOutOfRange { slot, count }),
            Some(None) => return Err(MmRpcError::SlotUnfilled(slot)),
            Some(Some(Param::Scalar { .. })) => return Err(MmRpcError::NotAPointer(slot)),
            Some(Some(Param::Ptr { size, addr, .. })) => (*addr, *size),
        };

        if container.addr() != base {
            return Err(MmRpcError::ContainerMismatch {
                slot,
                container: container.addr(),
                arg: base,
            });
        }

        let outside = || MmRpcError::FieldOutsideArgument {
            slot,
            field_addr,
            base,
            size,
        };
        let offset = field_addr.checked_sub(base).ok_or_else(outside)?;
        let end = offset.checked_add(POINTER_SIZE as u64).ok_or_else(outside)?;
        if end > size as u64 {
            return Err(outside());
        }
        let target = usize::try_from(offset)
            .ok()
            .and_then(|offset| container.read_u64(offset))
            .ok_or_else(outside)?;

        trace!("xlt slot {slot}: {base:#x}+{offset:#x} -> {target:#x}");
        self.xlts.push(Xlt {
            index: slot,
            container: base,
            offset,
            target,
            handle,
        });
        Ok(self)
    }

    /// Validate and produce the call package.
    pub fn finish(self) -> Result<FunctionContext> {
        let params = self
            .params
            .into_iter()
            .enumerate()
            .map(|(slot, param)| param.ok_or(MmRpcError::SlotUnfilled(slot)))
            .collect::<Result<Vec<_>>>()?;

        if self.xlts.len() != self.num_xlts {
            return Err(MmRpcError::XltCountMismatch {
                declared: self.num_xlts,
                actual: self.xlts.len(),
            });
        }

        Ok(FunctionContext {
            fxn_id: self.fxn_id,
            params,
            xlts: self.xlts,
        })
    }
}
