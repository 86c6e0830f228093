//! patchd, a patch-distribution daemon.
//!
//! Serves a hierarchical file tree to remote clients over a unix-domain
//! socket and keeps derived artifacts (content checksums, compressed payload
//! sizes) warm in the background, so client requests never pay the cost of
//! computing them on the hot path.

pub mod config;
pub mod daemon;
pub mod endpoint;
pub mod error;
pub mod ipc;
pub mod tree;
pub mod updater;
pub mod usock;
pub mod version;

pub use error::{Error, Result};
