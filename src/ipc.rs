//! IPC protocol for client-server communication over the daemon socket.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
   Result,
   error::IpcError,
   tree::{NodeDescriptor, WarmArtifacts},
};

/// Client request messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
   /// Version handshake.
   Hello { version: String },
   /// Resolve a path identity to a node descriptor.
   Describe { path: PathBuf },
   /// List the children of a directory.
   List { path: PathBuf },
   /// Force materialization of the derived artifacts for a regular file.
   Warm { path: PathBuf },
   /// Daemon liveness and uptime.
   Health,
   /// Ask the daemon to shut down.
   Shutdown,
}

/// Server response messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
   Hello { version: String },
   Node(NodeDescriptor),
   List(Vec<NodeDescriptor>),
   Warm(WarmArtifacts),
   Health { version: String, uptime_ms: u64 },
   Shutdown { success: bool },
   Error { message: String },
}

/// Stack-allocated buffer for socket I/O operations
pub struct SocketBuffer {
   buf: SmallVec<[u8; 2048]>,
}

const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

impl Extend<u8> for &mut SocketBuffer {
   fn extend<I: IntoIterator<Item = u8>>(&mut self, iter: I) {
      self.buf.extend(iter);
   }
}

impl Default for SocketBuffer {
   fn default() -> Self {
      Self::new()
   }
}

impl SocketBuffer {
   pub fn new() -> Self {
      Self { buf: SmallVec::new() }
   }

   #[allow(
      clippy::future_not_send,
      reason = "Generic async function with references - Send bound would be too restrictive for \
                trait"
   )]
   /// Serializes and sends a message with length prefix
   pub async fn send<W, T>(&mut self, writer: &mut W, msg: &T) -> Result<()>
   where
      W: AsyncWrite + Unpin,
      T: Serialize,
   {
      self.buf.clear();
      self.buf.resize(4, 0u8);
      _ = postcard::to_extend(msg, &mut *self).map_err(IpcError::Serialize)?;
      let payload_len = (self.buf.len() - 4) as u32;
      *self.buf.first_chunk_mut().unwrap() = payload_len.to_le_bytes();
      writer.write_all(&self.buf).await.map_err(IpcError::Write)?;
      writer.flush().await.map_err(IpcError::Write)?;
      Ok(())
   }

   /// Receives and deserializes a message with length prefix
   pub async fn recv<'de, R, T>(&'de mut self, reader: &mut R) -> Result<T>
   where
      R: AsyncRead + Unpin,
      T: Deserialize<'de>,
   {
      let mut len_buf = [0u8; 4];
      reader
         .read_exact(&mut len_buf)
         .await
         .map_err(IpcError::Read)?;
      let len = u32::from_le_bytes(len_buf) as usize;

      if len > MAX_MESSAGE_BYTES {
         return Err(IpcError::MessageTooLarge(len).into());
      }

      self.buf.resize(len, 0u8);
      reader
         .read_exact(self.buf.as_mut_slice())
         .await
         .map_err(IpcError::Read)?;
      postcard::from_bytes(&self.buf).map_err(|e| IpcError::Deserialize(e).into())
   }
}
