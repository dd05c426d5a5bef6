//! Host-side client for codec engines on a remote processor
//!
//! The codecs run on a separate processor that shares a window of physical
//! memory with the host but not its address space. This crate turns engine
//! and codec operations into remote calls: arguments are placed in shared
//! memory, every pointer stored inside an argument is declared for address
//! translation, and results are read back from the same memory.
//!
//! # Components
//!
//! - [`Session`]: reference-counted channel lifecycle
//! - [`Dce`]: engine and codec operations
//! - [`shape`]: bundled-message and independent-argument call shapes
//! - [`message`]: bundled message layouts
//! - [`family`]: codec families and their struct layouts
//! - [`Viddec3`] / [`Videnc2`]: per-family entry points
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use dcelink::message::{EngineOpenMsg, FxnId};
//! use dcelink::{Dce, DceConfig};
//! use dcelink_memplugin::MmapArena;
//! use dcelink_mmrpc::loopback::{LoopbackConnector, RemoteCall};
//!
//! let arena = Arc::new(MmapArena::new());
//! let remote = |call: &mut RemoteCall<'_>| -> dcelink_mmrpc::Result<i32> {
//!     if call.fxn_id() == FxnId::EngineOpen.id() {
//!         let msg = call.pointer(0)?;
//!         call.write_u64(msg + EngineOpenMsg::ENG_HANDLE_OFFSET as u64, 0x1000)?;
//!     }
//!     Ok(0)
//! };
//! let connector = Arc::new(LoopbackConnector::new(arena.clone(), remote));
//!
//! let dce = Dce::new(DceConfig::default(), connector, arena);
//! let engine = dce.open_engine("ivahd_vidsvr").unwrap();
//! assert_eq!(engine.handle.raw(), 0x1000);
//! dce.close_engine(engine.handle).unwrap();
//! assert!(!dce.session().is_connected());
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod codecs;
pub mod config;
pub mod error;
pub mod family;
pub mod handle;
pub mod message;
pub mod session;
pub mod shape;
pub mod xdm;

pub use client::{Dce, OpenedEngine};
pub use codecs::{Viddec3, Videnc2};
pub use config::DceConfig;
pub use error::{DceError, DceStatus};
pub use family::CodecFamily;
pub use handle::{CodecHandle, EngineHandle};
pub use session::Session;
pub use xdm::{EngineErrorCode, XdmCmd, XdmStatus};

/// Result type for codec engine operations.
pub type Result<T> = std::result::Result<T, DceError>;
