//! Shared fixtures for the integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dcelink::family::CodecFamily;
use dcelink::message::{
    CodecControlMsg, CodecCreateMsg, CodecGetVersionMsg, EngineOpenMsg, FxnId, Message,
};
use dcelink::{Dce, DceConfig};
use dcelink_memplugin::{MemPool, MmapArena, SharedBuffer, SharedMemory};
use dcelink_mmrpc::loopback::{LoopbackConnector, RemoteArg, RemoteCall, RemoteHandler};
use dcelink_mmrpc::{ChannelParams, Connector, FunctionContext, MmRpcError, RpcChannel};
use mockall::mock;

/// Engine name the simulated server accepts.
pub const ENGINE_NAME: &str = "ivahd_vidsvr";

/// Version string the simulated codecs report.
pub const VERSION: &[u8] = b"loopback codec 1.0\0";

/// `Engine_ENOTFOUND`
pub const ENGINE_NOT_FOUND: i32 = 15;

/// Offset the simulated codecs write `bytesConsumed` to in the out args.
pub const BYTES_CONSUMED_OFFSET: u64 = 8;

/// Offset the simulated codecs echo the control command to in the status.
pub const EXTENDED_ERROR_OFFSET: u64 = 4;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Remote codec server run in-process behind the loopback channel.
///
/// It only reaches memory through device addresses, so any pointer the
/// host forgot to declare fails the call.
#[derive(Default)]
pub struct CodecServer {
    next_handle: AtomicU64,
    pub calls: AtomicUsize,
}

impl CodecServer {
    fn open(call: &RemoteCall<'_>, next: u64) -> dcelink_mmrpc::Result<i32> {
        let msg = call.pointer(0)?;
        let raw = call.read(msg, EngineOpenMsg::SIZE)?;
        let name_len = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        let (handle, code) = if &raw[..name_len] == ENGINE_NAME.as_bytes() {
            (0x1000 + next, 0)
        } else {
            (0, ENGINE_NOT_FOUND)
        };
        call.write_i32(msg + EngineOpenMsg::ERROR_CODE_OFFSET as u64, code)?;
        call.write_u64(msg + EngineOpenMsg::ENG_HANDLE_OFFSET as u64, handle)?;
        Ok(0)
    }

    fn create(call: &RemoteCall<'_>, next: u64) -> dcelink_mmrpc::Result<i32> {
        let msg = call.pointer(0)?;
        // The static params must be reachable through the translated field
        let params = call.read_u64(msg + CodecCreateMsg::STATIC_PARAMS_OFFSET as u64)?;
        let size = call.read_i32(params)?;
        let handle = if size > 0 { 0xc0de_0000 + next } else { 0 };
        call.write_u64(msg + CodecCreateMsg::CODEC_HANDLE_OFFSET as u64, handle)?;
        Ok(0)
    }

    fn control(call: &RemoteCall<'_>) -> dcelink_mmrpc::Result<i32> {
        let msg = call.pointer(0)?;
        let cmd = call.read_i32(msg + 8)?;
        let dyn_params = call.read_u64(msg + CodecControlMsg::DYN_PARAMS_OFFSET as u64)?;
        call.read_i32(dyn_params)?;
        let status = call.read_u64(msg + CodecControlMsg::STATUS_OFFSET as u64)?;
        call.write_i32(status + EXTENDED_ERROR_OFFSET, cmd)?;
        call.write_i32(msg + CodecControlMsg::RESULT_OFFSET as u64, 0)?;
        Ok(0)
    }

    fn get_version(call: &RemoteCall<'_>) -> dcelink_mmrpc::Result<i32> {
        let msg = call.pointer(0)?;
        let version = call.read_u64(msg + CodecGetVersionMsg::VERSION_OFFSET as u64)?;
        call.write(version, VERSION)?;
        call.write_i32(msg + CodecGetVersionMsg::RESULT_OFFSET as u64, 0)?;
        Ok(0)
    }

    fn process(call: &RemoteCall<'_>) -> dcelink_mmrpc::Result<i32> {
        let family = u32::try_from(call.scalar(5)?)
            .ok()
            .and_then(CodecFamily::from_tag)
            .ok_or_else(|| MmRpcError::Call {
                fxn_id: call.fxn_id(),
                reason: "unknown family".into(),
            })?;
        let layout = family.layout();
        let in_desc = call.pointer(1)?;
        let out_desc = call.pointer(2)?;
        let out_args = call.pointer(4)?;

        let mut consumed = 0i32;
        let mut frame = Vec::new();
        let num_in = call.read_i32(in_desc + layout.in_desc.count_offset as u64)?;
        for slot in 0..usize::try_from(num_in).unwrap_or(0) {
            let field = in_desc + layout.in_desc.slot_field(slot) as u64;
            let buf = call.read_u64(field)?;
            let size = call.read_i32(field - layout.in_desc.buf_offset as u64 + layout.in_desc.size_offset as u64)?;
            let bytes = call.read(buf, usize::try_from(size).unwrap_or(0))?;
            consumed += size;
            frame.extend_from_slice(&bytes);
        }

        let num_out = call.read_i32(out_desc + layout.out_desc.count_offset as u64)?;
        if num_out > 0 {
            let field = out_desc + layout.out_desc.slot_field(0) as u64;
            let buf = call.read_u64(field)?;
            let size = call.read_i32(field - layout.out_desc.buf_offset as u64 + layout.out_desc.size_offset as u64)?;
            let len = frame.len().min(usize::try_from(size).unwrap_or(0));
            call.write(buf, &frame[..len])?;
        }
        // Touch every output slot so a missing translation shows up
        for slot in 1..usize::try_from(num_out).unwrap_or(0) {
            let buf = call.read_u64(out_desc + layout.out_desc.slot_field(slot) as u64)?;
            call.read(buf, 1)?;
        }

        call.write_i32(out_args + BYTES_CONSUMED_OFFSET, consumed)?;
        Ok(0)
    }
}

impl RemoteHandler for CodecServer {
    fn handle(&self, call: &mut RemoteCall<'_>) -> dcelink_mmrpc::Result<i32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let fxn = call.fxn_id();
        if fxn == FxnId::EngineOpen.id() {
            Self::open(call, next)
        } else if fxn == FxnId::CodecCreate.id() {
            Self::create(call, next)
        } else if fxn == FxnId::CodecControl.id() {
            Self::control(call)
        } else if fxn == FxnId::CodecGetVersion.id() {
            Self::get_version(call)
        } else if fxn == FxnId::CodecProcess.id() {
            Self::process(call)
        } else if fxn == FxnId::EngineClose.id() || fxn == FxnId::CodecDelete.id() {
            assert!(matches!(call.args()[0], RemoteArg::Ptr { .. }));
            Ok(0)
        } else {
            Err(MmRpcError::Call {
                fxn_id: fxn,
                reason: "unknown function".into(),
            })
        }
    }
}

/// Client wired to the simulated server.
pub struct Harness {
    pub arena: Arc<MmapArena>,
    pub connector: Arc<LoopbackConnector>,
    pub dce: Dce,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_arena(MmapArena::new())
    }

    pub fn with_arena(arena: MmapArena) -> Self {
        init_tracing();
        let arena = Arc::new(arena);
        let connector = Arc::new(LoopbackConnector::new(
            arena.clone(),
            CodecServer::default(),
        ));
        let dce = Dce::new(DceConfig::default(), connector.clone(), arena.clone());
        Self {
            arena,
            connector,
            dce,
        }
    }

    pub fn buffer(&self, size: usize) -> SharedBuffer {
        self.arena.alloc(size, 0, MemPool::Heap).unwrap()
    }

    /// Parameter block whose leading `size` field is filled in.
    pub fn params(&self, size: usize) -> SharedBuffer {
        let mut buf = self.dce.alloc_params(size).unwrap();
        buf.write_i32(0, i32::try_from(size).unwrap()).unwrap();
        buf
    }
}

mock! {
    pub Channel {}

    impl RpcChannel for Channel {
        fn call(&self, ctx: &FunctionContext) -> dcelink_mmrpc::Result<i32>;
    }
}

struct Tracked {
    inner: MockChannel,
    drops: Arc<AtomicUsize>,
}

impl RpcChannel for Tracked {
    fn call(&self, ctx: &FunctionContext) -> dcelink_mmrpc::Result<i32> {
        self.inner.call(ctx)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector handing out mocks and counting their lifetimes.
pub struct MockConnector {
    factory: Box<dyn Fn() -> MockChannel + Send + Sync>,
    pub connects: AtomicUsize,
    pub drops: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(factory: impl Fn() -> MockChannel + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            connects: AtomicUsize::new(0),
            drops: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        _device: &str,
        _params: &ChannelParams,
    ) -> dcelink_mmrpc::Result<Box<dyn RpcChannel>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Tracked {
            inner: (self.factory)(),
            drops: Arc::clone(&self.drops),
        }))
    }
}

/// Host address of the single bundled message of `ctx`.
pub fn message_addr(ctx: &FunctionContext) -> u64 {
    match ctx.params()[0] {
        dcelink_mmrpc::Param::Ptr { addr, .. } => addr,
        dcelink_mmrpc::Param::Scalar { .. } => panic!("message argument is not a pointer"),
    }
}
