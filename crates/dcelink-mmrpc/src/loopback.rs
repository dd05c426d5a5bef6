//! In-process remote endpoint.
//!
//! The loopback channel plays the part of the transport and the remote
//! processor at once. Before the handler runs it rewrites every field named
//! by a translation entry into a device address (the host address with
//! [`DEVICE_TAG`] folded in); pointer arguments are handed to the handler as
//! device addresses as well. The handler can only reach memory through
//! [`RemoteCall`], which refuses anything that is not a device address, so a
//! nested pointer that was never declared for translation fails the call
//! instead of silently working. After the handler returns, every rewritten
//! field gets its original host value back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dcelink_memplugin::RemoteAccess;
use tracing::{debug, info, trace, warn};

use crate::call::POINTER_SIZE;
use crate::{ChannelParams, Connector, FunctionContext, MmRpcError, Param, Result, RpcChannel};

/// Bits folded into host addresses to form device addresses.
pub const DEVICE_TAG: u64 = 0xA000_0000_0000_0000;

/// Largest prefix of a pointer argument dumped at trace level.
const TRACE_DUMP_LEN: usize = 64;

/// Host address as seen by the remote.
pub const fn to_device(host: u64) -> u64 {
    host ^ DEVICE_TAG
}

/// Device address back to host, if it carries the device tag.
pub const fn to_host(device: u64) -> Option<u64> {
    if device & DEVICE_TAG == DEVICE_TAG {
        Some(device ^ DEVICE_TAG)
    } else {
        None
    }
}

/// An argument as delivered to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteArg {
    /// Inline value.
    Scalar(u64),
    /// Device address and size of a pointer argument.
    Ptr {
        /// Device address
        addr: u64,
        /// Accessible size in bytes
        size: usize,
    },
}

/// The remote side's view of one call.
pub struct RemoteCall<'a> {
    fxn_id: u32,
    args: Vec<RemoteArg>,
    memory: &'a dyn RemoteAccess,
}

impl RemoteCall<'_> {
    /// Function identifier.
    pub const fn fxn_id(&self) -> u32 {
        self.fxn_id
    }

    /// Arguments in slot order.
    pub fn args(&self) -> &[RemoteArg] {
        &self.args
    }

    /// Scalar argument value.
    pub fn scalar(&self, index: usize) -> Result<u64> {
        match self.args.get(index) {
            Some(RemoteArg::Scalar(value)) => Ok(*value),
            _ => Err(self.fail(format!("argument {index} is not a scalar"))),
        }
    }

    /// Device address of a pointer argument.
    pub fn pointer(&self, index: usize) -> Result<u64> {
        match self.args.get(index) {
            Some(RemoteArg::Ptr { addr, .. }) => Ok(*addr),
            _ => Err(self.fail(format!("argument {index} is not a pointer"))),
        }
    }

    fn host(&self, device: u64) -> Result<u64> {
        to_host(device)
            .ok_or_else(|| self.fail(format!("dereferenced untranslated address {device:#x}")))
    }

    fn fail(&self, reason: String) -> MmRpcError {
        MmRpcError::Call {
            fxn_id: self.fxn_id,
            reason,
        }
    }

    /// Read `len` bytes at a device address.
    pub fn read(&self, device: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.memory.read(self.host(device)?, &mut out)?;
        Ok(out)
    }

    /// Write bytes at a device address.
    pub fn write(&self, device: u64, data: &[u8]) -> Result<()> {
        self.memory.write(self.host(device)?, data)?;
        Ok(())
    }

    /// Read a little-endian `u64` at a device address.
    pub fn read_u64(&self, device: u64) -> Result<u64> {
        Ok(self.memory.read_u64(self.host(device)?)?)
    }

    /// Write a little-endian `u64` at a device address.
    pub fn write_u64(&self, device: u64, value: u64) -> Result<()> {
        self.write(device, &value.to_le_bytes())
    }

    /// Read a little-endian `i32` at a device address.
    pub fn read_i32(&self, device: u64) -> Result<i32> {
        let bytes = self.read(device, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a little-endian `i32` at a device address.
    pub fn write_i32(&self, device: u64, value: i32) -> Result<()> {
        self.write(device, &value.to_le_bytes())
    }
}

/// Remote function implementation driven by the loopback channel.
pub trait RemoteHandler: Send + Sync {
    /// Execute one call and return its numeric result.
    fn handle(&self, call: &mut RemoteCall<'_>) -> Result<i32>;
}

impl<F> RemoteHandler for F
where
    F: Fn(&mut RemoteCall<'_>) -> Result<i32> + Send + Sync,
{
    fn handle(&self, call: &mut RemoteCall<'_>) -> Result<i32> {
        self(call)
    }
}

/// Connector producing [`LoopbackChannel`]s.
pub struct LoopbackConnector {
    memory: Arc<dyn RemoteAccess>,
    handler: Arc<dyn RemoteHandler>,
    connects: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl LoopbackConnector {
    /// Serve calls with `handler`, resolving addresses through `memory`.
    pub fn new(memory: Arc<dyn RemoteAccess>, handler: impl RemoteHandler + 'static) -> Self {
        Self {
            memory,
            handler: Arc::new(handler),
            connects: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of channels created so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }

    /// Number of channels not yet dropped.
    pub fn live_channels(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self, device: &str, params: &ChannelParams) -> Result<Box<dyn RpcChannel>> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);
        info!("Opened loopback channel for /dev/{device} (instance {})", params.id);

        Ok(Box::new(LoopbackChannel {
            memory: Arc::clone(&self.memory),
            handler: Arc::clone(&self.handler),
            live: Arc::clone(&self.live),
            calls: AtomicU64::new(0),
        }))
    }
}

/// Channel that translates pointers and runs the handler in-process.
pub struct LoopbackChannel {
    memory: Arc<dyn RemoteAccess>,
    handler: Arc<dyn RemoteHandler>,
    live: Arc<AtomicUsize>,
    calls: AtomicU64,
}

impl LoopbackChannel {
    /// Rewrite every translated field to its device address.
    ///
    /// Fields already rewritten are pushed to `applied` with their host
    /// value so they can be restored even when a later entry fails.
    fn apply(&self, ctx: &FunctionContext, applied: &mut Vec<(u64, u64)>) -> Result<()> {
        for xlt in ctx.xlts() {
            let Some(Param::Ptr { size, addr, .. }) = ctx.params().get(xlt.index) else {
                return Err(MmRpcError::Translation(format!(
                    "entry for argument {} which is not a pointer",
                    xlt.index
                )));
            };
            if xlt.container != *addr {
                return Err(MmRpcError::Translation(format!(
                    "entry base {:#x} does not match argument {} at {addr:#x}",
                    xlt.container, xlt.index
                )));
            }
            if xlt.offset + POINTER_SIZE as u64 > *size as u64 {
                return Err(MmRpcError::Translation(format!(
                    "offset {:#x} outside argument {} ({size} bytes)",
                    xlt.offset, xlt.index
                )));
            }

            let field = xlt.field_addr();
            if applied.iter().any(|(seen, _)| *seen == field) {
                return Err(MmRpcError::Translation(format!(
                    "field {field:#x} translated twice"
                )));
            }

            let current = self.memory.read_u64(field)?;
            if current != xlt.target {
                return Err(MmRpcError::Translation(format!(
                    "field {field:#x} holds {current:#x}, entry expects {:#x}",
                    xlt.target
                )));
            }
            if current != 0 {
                self.memory.write_u64(field, to_device(current))?;
            }
            applied.push((field, current));
        }
        Ok(())
    }

    fn restore(&self, applied: &[(u64, u64)]) {
        for (field, original) in applied.iter().rev() {
            if let Err(e) = self.memory.write_u64(*field, *original) {
                warn!("Failed to restore translated field {field:#x}: {e}");
            }
        }
    }

    fn dispatch(&self, ctx: &FunctionContext) -> Result<i32> {
        let args = ctx
            .params()
            .iter()
            .map(|param| match *param {
                Param::Scalar { data, .. } => RemoteArg::Scalar(data),
                Param::Ptr { size, addr, .. } => RemoteArg::Ptr {
                    addr: to_device(addr),
                    size,
                },
            })
            .collect();

        let mut call = RemoteCall {
            fxn_id: ctx.fxn_id(),
            args,
            memory: self.memory.as_ref(),
        };
        self.handler.handle(&mut call)
    }

    fn trace_args(&self, ctx: &FunctionContext) {
        for (index, param) in ctx.params().iter().enumerate() {
            if let Param::Ptr { size, addr, .. } = *param {
                let mut bytes = vec![0u8; size.min(TRACE_DUMP_LEN)];
                if self.memory.read(addr, &mut bytes).is_ok() {
                    trace!("fxn {} arg{index}: {}", ctx.fxn_id(), hex::encode(&bytes));
                }
            }
        }
    }

    /// Number of calls served by this channel.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Acquire)
    }
}

impl RpcChannel for LoopbackChannel {
    fn call(&self, ctx: &FunctionContext) -> Result<i32> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.trace_args(ctx);

        let mut applied = Vec::with_capacity(ctx.xlts().len());
        let result = self
            .apply(ctx, &mut applied)
            .and_then(|()| self.dispatch(ctx));
        self.restore(&applied);

        debug!(
            "loopback fxn {} ({} args, {} xlts) -> {:?}",
            ctx.fxn_id(),
            ctx.params().len(),
            ctx.xlts().len(),
            result.as_ref().ok()
        );
        result
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        info!("Closed loopback channel after {} calls", self.calls());
    }
}
