//! Call shapes
//!
//! Two ways of putting an operation on the wire:
//!
//! - [`Bundled`]: every field goes into one message struct allocated in
//!   shared memory, which is the call's single pointer argument. Pointers
//!   stored in the struct are declared as translations relative to it.
//! - [`Independent`]: every field is its own top-level argument and the
//!   pointer arguments are caller-owned memory. Translations are declared
//!   against the caller's structs directly. Nothing is allocated.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use dcelink_memplugin::{BufferHandle, MemPool, SharedBuffer, SharedMemory};
use dcelink_mmrpc::{CallBuilder, FunctionContext, MmRpcError, RpcChannel};
use tracing::{trace, warn};

use crate::message::{FxnId, Message};
use crate::{DceError, Result};

/// A message buffer that returns to its pool when dropped.
pub struct MessageGuard<'a> {
    memory: &'a dyn SharedMemory,
    buffer: ManuallyDrop<SharedBuffer>,
}

impl<'a> MessageGuard<'a> {
    /// Allocate `size` bytes from `pool`.
    pub fn alloc(
        memory: &'a dyn SharedMemory,
        size: usize,
        align: usize,
        pool: MemPool,
    ) -> Result<Self> {
        let buffer = memory
            .alloc(size, align, pool)
            .map_err(DceError::OutOfMemory)?;
        Ok(Self {
            memory,
            buffer: ManuallyDrop::new(buffer),
        })
    }
}

impl Deref for MessageGuard<'_> {
    type Target = SharedBuffer;

    fn deref(&self) -> &SharedBuffer {
        &self.buffer
    }
}

impl DerefMut for MessageGuard<'_> {
    fn deref_mut(&mut self) -> &mut SharedBuffer {
        &mut self.buffer
    }
}

impl Drop for MessageGuard<'_> {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: `buffer` is taken exactly once, here, and never touched again.
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };
        let addr = buffer.addr();
        if let Err(e) = self.memory.free(buffer) {
            warn!("Failed to free message at {addr:#x}: {e}");
        }
    }
}

/// Single message struct passed as the only argument.
pub struct Bundled<'a> {
    memory: &'a dyn SharedMemory,
    pool: MemPool,
    align: usize,
}

impl<'a> Bundled<'a> {
    /// Allocate messages from `pool` of `memory`.
    pub const fn new(memory: &'a dyn SharedMemory, pool: MemPool, align: usize) -> Self {
        Self {
            memory,
            pool,
            align,
        }
    }

    /// Send `msg` and return the struct as the remote left it.
    ///
    /// `nested` lists the byte offsets of pointer fields inside the message,
    /// each with the backing allocation of the pointer it holds if known.
    /// The message buffer is freed before this returns, on every path.
    pub fn call<M: Message>(
        &self,
        channel: &dyn RpcChannel,
        msg: &M,
        nested: &[(usize, Option<BufferHandle>)],
    ) -> Result<M> {
        let mut buffer = MessageGuard::alloc(self.memory, M::SIZE, self.align, self.pool)?;
        msg.encode(&mut buffer)?;

        let mut builder = CallBuilder::new(M::FXN.id(), 1, nested.len())?;
        builder.pointer_to(0, &buffer, M::SIZE)?;
        for (offset, handle) in nested {
            builder.translate(0, &buffer, buffer.addr() + *offset as u64, *handle)?;
        }
        let ctx = builder.finish()?;

        let ret = channel.call(&ctx).map_err(DceError::ChannelCall)?;
        trace!("{:?} returned {ret}", M::FXN);
        M::decode(&buffer)
    }
}

/// One top-level call argument.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'b> {
    /// Inline value
    Scalar {
        /// Size in bytes
        size: usize,
        /// Value, zero-extended
        value: u64,
    },
    /// The first `size` bytes of a caller buffer
    Buffer {
        /// Caller-owned buffer
        buffer: &'b SharedBuffer,
        /// Bytes the remote may access
        size: usize,
    },
}

/// A pointer field inside a caller-owned argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nested {
    /// Argument the field lives in
    pub arg: usize,
    /// Byte offset of the field inside that argument
    pub offset: usize,
}

/// Every field as its own argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct Independent;

impl Independent {
    /// Build the call package for `args` with translations for `nested`.
    pub fn build(fxn: FxnId, args: &[Arg<'_>], nested: &[Nested]) -> Result<FunctionContext> {
        let mut builder = CallBuilder::new(fxn.id(), args.len(), nested.len())?;
        for (slot, arg) in args.iter().enumerate() {
            match *arg {
                Arg::Scalar { size, value } => builder.scalar(slot, size, value)?,
                Arg::Buffer { buffer, size } => builder.pointer_to(slot, buffer, size)?,
            };
        }

        for field in nested {
            let Some(Arg::Buffer { buffer, .. }) = args.get(field.arg) else {
                return Err(MmRpcError::NotAPointer(field.arg).into());
            };
            builder.translate(field.arg, buffer, buffer.addr() + field.offset as u64, None)?;
        }
        Ok(builder.finish()?)
    }

    /// Build and send; returns the remote function's result.
    pub fn call(
        channel: &dyn RpcChannel,
        fxn: FxnId,
        args: &[Arg<'_>],
        nested: &[Nested],
    ) -> Result<i32> {
        let ctx = Self::build(fxn, args, nested)?;
        let ret = channel.call(&ctx).map_err(DceError::ChannelCall)?;
        trace!("{fxn:?} returned {ret}");
        Ok(ret)
    }
}
