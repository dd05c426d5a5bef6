//! Per-family entry points
//!
//! Thin wrappers that fix the codec family and trace each call.

use dcelink_memplugin::SharedBuffer;
use tracing::debug;

use crate::client::Dce;
use crate::family::CodecFamily;
use crate::handle::{CodecHandle, EngineHandle};
use crate::xdm::{XdmCmd, XdmStatus};
use crate::{DceError, Result};

fn check_family(codec: CodecHandle, family: CodecFamily) -> Result<()> {
    if codec.family() == family {
        Ok(())
    } else {
        Err(DceError::InvalidInput(format!(
            "{codec} used through the {family} interface"
        )))
    }
}

macro_rules! family_entry {
    ($(#[$doc:meta])* $name:ident, $family:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name<'a> {
            dce: &'a Dce,
        }

        impl<'a> $name<'a> {
            /// Family every call through this interface uses.
            pub const FAMILY: CodecFamily = $family;

            /// Wrap a client.
            pub const fn new(dce: &'a Dce) -> Self {
                Self { dce }
            }

            /// Create a codec instance.
            pub fn create(
                &self,
                engine: EngineHandle,
                name: &str,
                params: &SharedBuffer,
            ) -> Result<CodecHandle> {
                debug!(">> engine={engine}, name={name}, params={:#x}", params.addr());
                let codec = self.dce.create_codec(engine, name, params, Self::FAMILY);
                debug!("<< codec={:?}", codec.as_ref().ok());
                codec
            }

            /// Send a control command; `GetVersion` is routed to get-version.
            pub fn control(
                &self,
                codec: CodecHandle,
                cmd: XdmCmd,
                dyn_params: &SharedBuffer,
                status: &SharedBuffer,
            ) -> Result<XdmStatus> {
                check_family(codec, Self::FAMILY)?;
                debug!(
                    ">> codec={codec}, id={}, dynParams={:#x}, status={:#x}",
                    cmd.id(),
                    dyn_params.addr(),
                    status.addr()
                );
                let ret = self.dce.control_codec(codec, cmd, dyn_params, status);
                debug!("<< ret={:?}", ret.as_ref().ok());
                ret
            }

            /// Process one frame.
            pub fn process(
                &self,
                codec: CodecHandle,
                in_bufs: &SharedBuffer,
                out_bufs: &SharedBuffer,
                in_args: &SharedBuffer,
                out_args: &SharedBuffer,
            ) -> Result<XdmStatus> {
                check_family(codec, Self::FAMILY)?;
                debug!(
                    ">> codec={codec}, inBufs={:#x}, outBufs={:#x}, inArgs={:#x}, outArgs={:#x}",
                    in_bufs.addr(),
                    out_bufs.addr(),
                    in_args.addr(),
                    out_args.addr()
                );
                let ret = self.dce.process(codec, in_bufs, out_bufs, in_args, out_args);
                debug!("<< ret={:?}", ret.as_ref().ok());
                ret
            }

            /// Delete a codec instance.
            pub fn delete(&self, codec: CodecHandle) -> Result<()> {
                check_family(codec, Self::FAMILY)?;
                debug!(">> codec={codec}");
                let ret = self.dce.delete_codec(codec);
                debug!("<<");
                ret
            }
        }
    };
}

family_entry!(
    /// Video decoder interface.
    Viddec3,
    CodecFamily::Viddec3
);

family_entry!(
    /// Video encoder interface.
    Videnc2,
    CodecFamily::Videnc2
);
