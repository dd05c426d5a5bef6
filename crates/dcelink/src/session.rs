//! Reference-counted channel session
//!
//! Every open engine holds one reference on the session. The first
//! reference creates the channel to the remote processor, the last one
//! drops it. Counter updates and channel creation/teardown happen under the
//! same lock, so the channel exists exactly while the count is non-zero.

use std::sync::Arc;

use dcelink_mmrpc::{ChannelParams, Connector, RpcChannel};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{DceError, Result};

struct SessionState {
    channel: Option<Arc<dyn RpcChannel>>,
    open_count: usize,
}

/// Channel lifecycle shared by all engines of a client.
pub struct Session {
    connector: Arc<dyn Connector>,
    device: String,
    params: ChannelParams,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create an idle session that connects to `device` on first use.
    pub fn new(connector: Arc<dyn Connector>, device: impl Into<String>, params: ChannelParams) -> Self {
        Self {
            connector,
            device: device.into(),
            params,
            state: Mutex::new(SessionState {
                channel: None,
                open_count: 0,
            }),
        }
    }

    /// Take a reference, creating the channel if this is the first one.
    ///
    /// If the channel cannot be created the count is left unchanged.
    pub fn acquire(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.open_count += 1;
        if state.open_count > 1 {
            debug!("session acquire: count={}", state.open_count);
            return Ok(());
        }

        match self.connector.connect(&self.device, &self.params) {
            Ok(channel) => {
                info!("open(/dev/{}) -> connected", self.device);
                state.channel = Some(Arc::from(channel));
                Ok(())
            }
            Err(e) => {
                state.open_count -= 1;
                warn!("open(/dev/{}) failed: {e}", self.device);
                Err(DceError::ChannelCreate(e))
            }
        }
    }

    /// Drop a reference, destroying the channel with the last one.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.open_count == 0 {
            warn!("session release without a matching acquire");
            return;
        }

        state.open_count -= 1;
        debug!("session release: count={}", state.open_count);
        if state.open_count == 0 && state.channel.take().is_some() {
            info!("close(/dev/{})", self.device);
        }
    }

    /// The live channel.
    ///
    /// Calls are made on the returned handle outside the session lock.
    pub fn channel(&self) -> Result<Arc<dyn RpcChannel>> {
        self.state
            .lock()
            .channel
            .as_ref()
            .map(Arc::clone)
            .ok_or(DceError::NotConnected)
    }

    /// Number of outstanding references.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Whether a channel is currently held.
    pub fn is_connected(&self) -> bool {
        self.state.lock().channel.is_some()
    }

    /// Device the session connects to.
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("params", &self.params)
            .field("open_count", &state.open_count)
            .field("connected", &state.channel.is_some())
            .finish()
    }
}
