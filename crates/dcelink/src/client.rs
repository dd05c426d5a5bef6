//! Codec engine operations
//!
//! [`Dce`] owns the session, the shared memory allocator and the
//! configuration. Every operation validates its arguments before touching
//! shared memory, runs one remote call and frees whatever it allocated
//! before returning.

use std::sync::Arc;

use dcelink_memplugin::{SharedBuffer, SharedMemory};
use dcelink_mmrpc::Connector;
use tracing::{debug, warn};

use crate::config::DceConfig;
use crate::family::CodecFamily;
use crate::handle::{CodecHandle, EngineHandle};
use crate::message::{
    CodecControlMsg, CodecCreateMsg, CodecDeleteMsg, CodecGetVersionMsg, EngineCloseMsg,
    EngineOpenMsg, FxnId, NAME_LEN, name_field,
};
use crate::session::Session;
use crate::shape::{Arg, Bundled, Independent, Nested};
use crate::xdm::{EngineErrorCode, XdmCmd, XdmStatus};
use crate::{DceError, Result};

/// Argument positions of a process call.
const PROCESS_IN_DESC: usize = 1;
const PROCESS_OUT_DESC: usize = 2;

/// Result of a successful engine open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedEngine {
    /// Handle to pass to later calls
    pub handle: EngineHandle,
    /// Error code the engine reported alongside the handle
    pub error_code: EngineErrorCode,
}

/// Client for codec engines on the remote processor.
pub struct Dce {
    config: DceConfig,
    session: Session,
    memory: Arc<dyn SharedMemory>,
}

fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DceError::InvalidInput(format!("{what} name is empty")));
    }
    if name.len() >= NAME_LEN {
        return Err(DceError::InvalidInput(format!(
            "{what} name {name:?} longer than {} bytes",
            NAME_LEN - 1
        )));
    }
    if name.contains('\0') {
        return Err(DceError::InvalidInput(format!("{what} name contains NUL")));
    }
    Ok(())
}

fn check_size(what: &str, buffer: &SharedBuffer, needed: usize) -> Result<()> {
    if buffer.len() < needed {
        return Err(DceError::InvalidInput(format!(
            "{what} needs {needed} bytes, buffer has {}",
            buffer.len()
        )));
    }
    Ok(())
}

impl Dce {
    /// Create a client; no channel is opened until the first engine open.
    pub fn new(
        config: DceConfig,
        connector: Arc<dyn Connector>,
        memory: Arc<dyn SharedMemory>,
    ) -> Self {
        let session = Session::new(connector, config.device.clone(), config.channel.clone());
        Self {
            config,
            session,
            memory,
        }
    }

    /// Client configuration.
    pub const fn config(&self) -> &DceConfig {
        &self.config
    }

    /// The channel session.
    pub const fn session(&self) -> &Session {
        &self.session
    }

    fn bundled(&self) -> Bundled<'_> {
        Bundled::new(
            self.memory.as_ref(),
            self.config.message_pool,
            self.config.message_align,
        )
    }

    /// Allocate a parameter buffer the remote can access.
    pub fn alloc_params(&self, size: usize) -> Result<SharedBuffer> {
        self.memory
            .alloc(size, self.config.message_align, self.config.message_pool)
            .map_err(DceError::OutOfMemory)
    }

    /// Return a buffer obtained from [`Dce::alloc_params`].
    pub fn free_params(&self, buffer: SharedBuffer) -> Result<()> {
        Ok(self.memory.free(buffer)?)
    }

    /// Open the engine called `name`.
    ///
    /// The first open connects the channel. A failed open, including one the
    /// engine rejects, leaves the session as it found it.
    pub fn open_engine(&self, name: &str) -> Result<OpenedEngine> {
        check_name("engine", name)?;
        self.session.acquire()?;

        let opened = self.open_acquired(name);
        if let Err(e) = &opened {
            warn!("Engine_open({name}) failed: {e}");
            self.session.release();
        }
        opened
    }

    fn open_acquired(&self, name: &str) -> Result<OpenedEngine> {
        debug!(">> Engine_open name={name} size={}", name.len());
        let channel = self.session.channel()?;
        let reply = self
            .bundled()
            .call(channel.as_ref(), &EngineOpenMsg::new(name), &[])?;

        let error_code = EngineErrorCode::from_raw(reply.error_code);
        let handle =
            EngineHandle::from_raw(reply.eng_handle).ok_or(DceError::EngineRejected(error_code))?;
        debug!("<< Engine_open handle={handle} ec={error_code}");
        Ok(OpenedEngine { handle, error_code })
    }

    /// Close an engine.
    ///
    /// The session reference taken by the open is dropped even when the
    /// remote call fails; the failure is still returned.
    pub fn close_engine(&self, engine: EngineHandle) -> Result<()> {
        debug!(">> Engine_close engine={engine}");
        let closed = self.session.channel().and_then(|channel| {
            self.bundled()
                .call(
                    channel.as_ref(),
                    &EngineCloseMsg {
                        eng_handle: engine.raw(),
                    },
                    &[],
                )
                .map(drop)
        });
        self.session.release();

        if let Err(e) = &closed {
            warn!("Engine_close({engine}) failed: {e}");
        }
        debug!("<< Engine_close");
        closed
    }

    /// Create a codec instance of `family` named `name` within `engine`.
    pub fn create_codec(
        &self,
        engine: EngineHandle,
        name: &str,
        static_params: &SharedBuffer,
        family: CodecFamily,
    ) -> Result<CodecHandle> {
        check_name("codec", name)?;
        let channel = self.session.channel()?;

        let msg = CodecCreateMsg {
            engine: engine.raw(),
            name: name_field(name),
            static_params: static_params.addr(),
            codec_id: family.tag(),
            reserved: 0,
            codec_handle: 0,
        };
        let reply = self.bundled().call(
            channel.as_ref(),
            &msg,
            &[(
                CodecCreateMsg::STATIC_PARAMS_OFFSET,
                Some(static_params.handle()),
            )],
        )?;

        CodecHandle::from_raw(reply.codec_handle, family).ok_or_else(|| {
            warn!("{family} create of {name} returned no instance");
            DceError::CodecRejected {
                name: name.to_string(),
            }
        })
    }

    /// Send a control command.
    ///
    /// [`XdmCmd::GetVersion`] is sent as a get-version call, which also
    /// declares the version buffer held by `status`.
    pub fn control_codec(
        &self,
        codec: CodecHandle,
        cmd: XdmCmd,
        dyn_params: &SharedBuffer,
        status: &SharedBuffer,
    ) -> Result<XdmStatus> {
        // Routed for encoders too; the C library only did this for decoders
        if cmd == XdmCmd::GetVersion {
            return self.get_version(codec, dyn_params, status);
        }
        let channel = self.session.channel()?;

        let msg = CodecControlMsg {
            codec_handle: codec.raw(),
            cmd_id: cmd.id(),
            reserved: 0,
            dyn_params: dyn_params.addr(),
            status: status.addr(),
            codec_id: codec.family().tag(),
            result: 0,
        };
        let reply = self.bundled().call(
            channel.as_ref(),
            &msg,
            &[
                (CodecControlMsg::DYN_PARAMS_OFFSET, Some(dyn_params.handle())),
                (CodecControlMsg::STATUS_OFFSET, Some(status.handle())),
            ],
        )?;
        Ok(XdmStatus::from_raw(reply.result))
    }

    /// Ask the codec for its version string.
    ///
    /// The string is written into the buffer whose address `status` holds
    /// in its version field.
    pub fn get_version(
        &self,
        codec: CodecHandle,
        dyn_params: &SharedBuffer,
        status: &SharedBuffer,
    ) -> Result<XdmStatus> {
        let offset = codec.family().layout().status_version_offset;
        let version = status.read_u64(offset).ok_or_else(|| {
            DceError::InvalidInput(format!(
                "status buffer of {} bytes has no version field",
                status.len()
            ))
        })?;
        if version == 0 {
            return Err(DceError::InvalidInput(
                "status has no version buffer".to_string(),
            ));
        }
        let channel = self.session.channel()?;

        let msg = CodecGetVersionMsg {
            codec_handle: codec.raw(),
            dyn_params: dyn_params.addr(),
            status: status.addr(),
            version,
            codec_id: codec.family().tag(),
            result: 0,
        };
        let reply = self.bundled().call(
            channel.as_ref(),
            &msg,
            &[
                (CodecGetVersionMsg::DYN_PARAMS_OFFSET, Some(dyn_params.handle())),
                (CodecGetVersionMsg::STATUS_OFFSET, Some(status.handle())),
                (CodecGetVersionMsg::VERSION_OFFSET, None),
            ],
        )?;
        Ok(XdmStatus::from_raw(reply.result))
    }

    /// Process one frame.
    ///
    /// All four buffers stay owned by the caller. Each populated slot of
    /// both descriptors gets its buffer pointer translated.
    pub fn process(
        &self,
        codec: CodecHandle,
        in_desc: &SharedBuffer,
        out_desc: &SharedBuffer,
        in_args: &SharedBuffer,
        out_args: &SharedBuffer,
    ) -> Result<XdmStatus> {
        let family = codec.family();
        let layout = family.layout();
        let num_in = layout.in_desc.read_count(in_desc)?;
        let num_out = layout.out_desc.read_count(out_desc)?;
        check_size("in_args", in_args, layout.in_args_size)?;
        check_size("out_args", out_args, layout.out_args_size)?;
        let channel = self.session.channel()?;

        let args = [
            Arg::Scalar {
                size: 8,
                value: codec.raw(),
            },
            Arg::Buffer {
                buffer: in_desc,
                size: layout.in_desc.size,
            },
            Arg::Buffer {
                buffer: out_desc,
                size: layout.out_desc.size,
            },
            Arg::Buffer {
                buffer: in_args,
                size: layout.in_args_size,
            },
            Arg::Buffer {
                buffer: out_args,
                size: layout.out_args_size,
            },
            Arg::Scalar {
                size: 4,
                value: u64::from(family.tag()),
            },
        ];
        let nested: Vec<Nested> = (0..num_in)
            .map(|slot| Nested {
                arg: PROCESS_IN_DESC,
                offset: layout.in_desc.slot_field(slot),
            })
            .chain((0..num_out).map(|slot| Nested {
                arg: PROCESS_OUT_DESC,
                offset: layout.out_desc.slot_field(slot),
            }))
            .collect();

        let ret = Independent::call(channel.as_ref(), FxnId::CodecProcess, &args, &nested)?;
        Ok(XdmStatus::from_raw(ret))
    }

    /// Delete a codec instance.
    pub fn delete_codec(&self, codec: CodecHandle) -> Result<()> {
        let channel = self.session.channel()?;
        let msg = CodecDeleteMsg {
            codec_handle: codec.raw(),
            codec_id: codec.family().tag(),
            reserved: 0,
        };
        self.bundled().call(channel.as_ref(), &msg, &[])?;
        Ok(())
    }
}

impl std::fmt::Debug for Dce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dce")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
