//! Remote invocation channel interface.

use serde::{Deserialize, Serialize};

use crate::{FunctionContext, Result};

/// Parameters used when creating a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// Remote server instance to bind to (0 = default instance).
    pub id: u32,
}

/// A live connection to the remote endpoint.
///
/// `call` blocks until the remote side answers or the transport gives up;
/// timeouts and retries are the channel's business. Deleting the channel is
/// dropping it.
pub trait RpcChannel: Send + Sync {
    /// Deliver a marshalled call and return the remote function's result.
    fn call(&self, ctx: &FunctionContext) -> Result<i32>;
}

/// Factory for channels to a named device.
pub trait Connector: Send + Sync {
    /// Open a channel to `device`.
    fn connect(&self, device: &str, params: &ChannelParams) -> Result<Box<dyn RpcChannel>>;
}
