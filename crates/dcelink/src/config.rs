//! Configuration for the codec engine client

use dcelink_memplugin::MemPool;
use dcelink_mmrpc::ChannelParams;
use serde::{Deserialize, Serialize};

/// Device name of the remote codec server.
pub const DEFAULT_DEVICE: &str = "rpmsg-dce";

/// Configuration for a [`Dce`](crate::Dce) client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DceConfig {
    /// Device the channel is opened on
    pub device: String,

    /// Parameters passed when creating the channel
    pub channel: ChannelParams,

    /// Pool message structs and parameter buffers are allocated from
    pub message_pool: MemPool,

    /// Alignment of message allocations (0 = arena default)
    pub message_align: usize,
}

impl Default for DceConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            channel: ChannelParams::default(),
            message_pool: MemPool::Tiler1d,
            message_align: 0,
        }
    }
}

impl DceConfig {
    /// Create a configuration for `device`
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Set the device name
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Select the remote server instance
    #[must_use]
    pub const fn with_instance(mut self, id: u32) -> Self {
        self.channel.id = id;
        self
    }

    /// Set the pool used for message structs
    #[must_use]
    pub const fn with_message_pool(mut self, pool: MemPool) -> Self {
        self.message_pool = pool;
        self
    }

    /// Set the alignment of message allocations
    #[must_use]
    pub const fn with_message_align(mut self, align: usize) -> Self {
        self.message_align = align;
        self
    }
}
