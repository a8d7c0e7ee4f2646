//! # Strata - Multi-Client Plane Compositor
//!
//! A minimal display compositor for embedded Linux-class devices. Client
//! processes render into their own buffers and hand the resulting DRM
//! framebuffer ids to the server, which stacks them onto hardware planes
//! of a single output and commits the result atomically once per refresh.
//!
//! ## Architecture
//!
//! Strata is built on a small set of modules:
//! - `compositor`: output discovery, plane table, and atomic commits
//! - `protocol`: the SOCK_SEQPACKET connection server and client registry
//! - `config`: configuration parsing and validation
//! - `client`: the client-side protocol library
//! - `buffer`: dumb-buffer allocation for CPU-rendered clients

pub mod buffer;
pub mod client;
pub mod compositor;
pub mod config;
pub mod protocol;

// Re-export main types for easy access
pub use compositor::{Compositor, CompositorError};
pub use config::StrataConfig;
pub use protocol::ProtocolServer;

/// Version information for Strata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
