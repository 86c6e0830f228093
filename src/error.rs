use std::{io, path::PathBuf};

use thiserror::Error;

use crate::usock::SocketError;

/// Main error type for the patchd application.
///
/// Covers startup/configuration failures, socket and IPC failures, and tree
/// access failures surfaced out of a traversal pass. Anything that escapes
/// to `main` is printed once and mapped to a process exit code.
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error occurred during file or network operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// Socket communication error occurred.
   #[error("socket error: {0}")]
   Socket(#[from] SocketError),

   /// Inter-process communication error occurred.
   #[error("ipc error: {0}")]
   Ipc(#[from] IpcError),

   /// The served root resolved to something other than a directory.
   ///
   /// This is a deployment/programming error, not a runtime condition; it is
   /// the one failure allowed to end the updater worker.
   #[error("tree root is not a directory: {path}", path = .0.display())]
   RootNotDirectory(PathBuf),

   /// Failed to switch to the configured working directory.
   #[error("cannot change to directory `{path}`: {source}", path = .path.display())]
   ChangeDirectory {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   /// Server error occurred during a specific operation.
   #[error("server error during {op}: {reason}")]
   Server { op: &'static str, reason: String },
}

impl Error {
   pub fn exit_code(&self) -> i32 {
      match self {
         Error::Config(_) | Error::ChangeDirectory { .. } => 2,
         _ => 1,
      }
   }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// The required endpoint binding is absent.
   #[error("property `endpoint` is not set")]
   MissingEndpoint,

   /// The configuration sources could not be parsed or merged.
   #[error("failed to load config: {0}")]
   Load(#[from] Box<figment::Error>),
}

/// Errors that can occur during inter-process communication (IPC).
///
/// These errors are related to message serialization, deserialization, and
/// I/O operations on the daemon socket.
#[derive(Debug, Error)]
pub enum IpcError {
   /// The message size exceeds the maximum allowed size.
   #[error("message too large: {0} bytes")]
   MessageTooLarge(usize),

   /// Failed to serialize a message for IPC transmission.
   #[error("failed to serialize: {0}")]
   Serialize(#[source] postcard::Error),

   /// Failed to deserialize a message received via IPC.
   #[error("failed to deserialize: {0}")]
   Deserialize(#[source] postcard::Error),

   /// Failed to read data from the IPC channel.
   #[error("failed to read: {0}")]
   Read(#[source] io::Error),

   /// Failed to write data to the IPC channel.
   #[error("failed to write: {0}")]
   Write(#[source] io::Error),
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
