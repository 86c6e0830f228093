//! Unix domain socket plumbing for the serving endpoint.
//!
//! Unlike a per-store socket registry, the daemon binds exactly one socket at
//! the configured endpoint path. A stale socket file (no listener behind it)
//! is detected with a connect probe and replaced; a live one is reported as
//! already running.

use std::{
   fs, io,
   path::{Path, PathBuf},
   pin::Pin,
   task::{self, Poll},
};

use tokio::{
   io::ReadBuf,
   net::{UnixListener as TokioUnixListener, UnixStream as TokioUnixStream},
};

use crate::Result;

/// Errors that can occur during socket operations
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
   #[error("server already running")]
   AlreadyRunning,

   #[error("failed to connect: {0}")]
   Connect(#[source] io::Error),

   #[error("failed to bind: {0}")]
   Bind(#[source] io::Error),

   #[error("accept failed: {0}")]
   Accept(#[source] io::Error),

   #[error("failed to create socket directory: {0}")]
   CreateDir(#[source] io::Error),

   #[error("failed to remove stale socket: {0}")]
   RemoveStale(#[source] io::Error),
}

/// Path of the pid file kept next to the socket.
pub fn pid_path(socket_path: &Path) -> PathBuf {
   socket_path.with_extension("pid")
}

pub fn write_pid(socket_path: &Path) {
   let path = pid_path(socket_path);
   if let Some(parent) = path.parent() {
      let _ = fs::create_dir_all(parent);
   }
   let _ = fs::write(path, format!("{}", std::process::id()));
}

pub fn remove_pid(socket_path: &Path) {
   let _ = fs::remove_file(pid_path(socket_path));
}

/// Unix domain socket listener
pub struct Listener {
   inner: TokioUnixListener,
   path:  PathBuf,
}

impl Listener {
   /// Binds to a Unix domain socket path
   pub async fn bind(path: &Path) -> Result<Self> {
      if let Some(parent) = path.parent()
         && !parent.as_os_str().is_empty()
      {
         fs::create_dir_all(parent).map_err(SocketError::CreateDir)?;
         #[cfg(unix)]
         {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
         }
      }

      if path.exists() {
         // If a daemon is listening, we must not unlink the socket file;
         // doing so can "orphan" the running daemon and cause multiple
         // servers to pile up. Treat a successful connect as "already
         // running" and only remove the socket if the connect fails (stale
         // file, no listener).
         if Stream::connect(path).await.is_ok() {
            return Err(SocketError::AlreadyRunning.into());
         }
         fs::remove_file(path).map_err(SocketError::RemoveStale)?;
      }

      let inner = TokioUnixListener::bind(path).map_err(SocketError::Bind)?;
      #[cfg(unix)]
      {
         use std::os::unix::fs::PermissionsExt;
         fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .map_err(SocketError::Bind)?;
      }
      Ok(Self { inner, path: path.to_path_buf() })
   }

   /// Accepts an incoming connection
   pub async fn accept(&self) -> Result<Stream> {
      let (stream, _) = self.inner.accept().await.map_err(SocketError::Accept)?;
      Ok(Stream { inner: stream })
   }

   /// Returns the socket path as a string
   pub fn local_addr(&self) -> String {
      self.path.display().to_string()
   }
}

impl Drop for Listener {
   fn drop(&mut self) {
      let _ = fs::remove_file(&self.path);
   }
}

/// Unix domain socket stream implementing async I/O
#[repr(transparent)]
pub struct Stream {
   inner: TokioUnixStream,
}

impl Stream {
   /// Connects to a Unix domain socket
   pub async fn connect(path: &Path) -> Result<Self> {
      let inner = TokioUnixStream::connect(path)
         .await
         .map_err(SocketError::Connect)?;
      Ok(Self { inner })
   }
}

impl tokio::io::AsyncRead for Stream {
   fn poll_read(
      mut self: Pin<&mut Self>,
      cx: &mut task::Context<'_>,
      buf: &mut ReadBuf<'_>,
   ) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_read(cx, buf)
   }
}

impl tokio::io::AsyncWrite for Stream {
   fn poll_write(
      mut self: Pin<&mut Self>,
      cx: &mut task::Context<'_>,
      buf: &[u8],
   ) -> Poll<io::Result<usize>> {
      Pin::new(&mut self.inner).poll_write(cx, buf)
   }

   fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_flush(cx)
   }

   fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_shutdown(cx)
   }
}
