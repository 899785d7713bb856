//! ArrayBridge - Storage Plugin IPC
//!
//! Middleware plumbing between storage management clients and per-backend
//! plugin daemons: endpoint resolution, a length-prefixed JSON wire
//! contract over unix sockets, method dispatch, an async job-completion
//! protocol, capability negotiation and a closed error taxonomy.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   uri "scheme://..."   ┌─────────────────────────────┐
//! │   Client   │ ─────────────────────► │  <socket_root>/<scheme>     │
//! │ (typed API)│                        │  unix socket rendezvous     │
//! └─────┬──────┘                        └──────────────┬──────────────┘
//!       │ 10-digit length header + JSON frame          │
//!       ▼                                              ▼
//! ┌────────────┐    request {method,id,params}   ┌──────────────┐
//! │ Transport  │ ──────────────────────────────► │ PluginRunner │
//! │            │ ◄────────────────────────────── │  dispatcher  │
//! └────────────┘    result XOR error envelope    └──────┬───────┘
//!                                                       │
//!                                     ┌─────────────────┴───────────┐
//!                                     │ StoragePlugin trait object  │
//!                                     │ (e.g. the SimArray backend) │
//!                                     └─────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`client`]: typed client session and job-waiting helpers
//! - [`transport`]: framed wire codec over unix sockets
//! - [`plugin`]: plugin-side traits and the method dispatcher
//! - [`data`]: wire entities and the class-tagged envelope
//! - [`capabilities`]: per-system feature bitmap
//! - [`uri`]: device URI parsing and socket rendezvous
//! - [`sim`]: in-memory reference backend
//! - [`error`]: closed error taxonomy with stable wire codes

pub mod capabilities;
pub mod client;
pub mod data;
pub mod error;
pub mod plugin;
pub mod sim;
pub mod transport;
pub mod units;
pub mod uri;

// Re-export commonly used types
pub use capabilities::{Capabilities, Capability};
pub use client::{Client, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT_MS};
pub use data::{
    AccessGroup, AsyncResult, Battery, BlockRange, Disk, FileSystem, FsSnapshot, InitiatorType,
    JobState, NfsExport, Pool, System, TargetPort, Volume, VolumeProvisionType,
    VolumeReplicateType, WireObject,
};
pub use error::{Error, ErrorInfo, Result};
pub use plugin::{
    JobId, JobPoll, Method, NasPlugin, PluginBase, PluginInfo, PluginRunner, SanPlugin,
    StoragePlugin,
};
pub use sim::{SimArray, SimConfig};
pub use transport::{Request, Transport};
pub use units::{size_bytes_to_human, size_human_to_bytes};
pub use uri::{DeviceUri, IpcConfig, DEFAULT_SOCKET_ROOT, SOCKET_ROOT_ENV};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
