//! Build version information.

/// Crate version as baked in at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the version string shown by `--version` and used for the IPC
/// handshake.
pub fn version_string() -> String {
   format!("patchd {VERSION}")
}
