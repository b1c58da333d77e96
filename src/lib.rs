//! Wire parser and per-request routing context for a memcached-protocol
//! proxy core.
//!
//! Two collaborating pieces: a [`dispatch::FrameDispatcher`] that detects a
//! connection's sub-protocol from its first byte and turns a growing read
//! buffer into a sequence of frame deliveries, and a
//! [`context::RequestContext`] that tracks one logical request from arrival
//! through fan-out until a client-visible reply has gone out. Route-tree
//! traversal, connection acceptance, configuration loading and statistics
//! backends are out of scope; this crate only defines the seams they plug
//! into.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod parser_state;
pub mod protocol;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use config::ProxyConfig;
pub use context::RequestContext;
pub use dispatch::{FrameCallbacks, FrameDispatcher};
pub use protocol::Protocol;
