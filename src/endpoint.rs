//! Serving endpoint: accepts client connections on the daemon socket and
//! dispatches requests to the tree accessor.
//!
//! The endpoint is built first, activated after the updater exists, and
//! deactivated before the updater is stopped, so a background pass is never
//! left touching a torn-down endpoint.

use std::{fmt, path::Path, sync::Arc, time::Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   ipc::{Request, Response, SocketBuffer},
   tree::{AccessError, NodeDescriptor, TreeAccessor},
   usock::{self, Listener},
   version,
};

/// The serving endpoint bound to the configured socket path.
pub struct Endpoint {
   accessor:    Arc<dyn TreeAccessor>,
   listener:    Option<Listener>,
   accept:      Option<JoinHandle<()>>,
   launch_time: Instant,
}

impl fmt::Debug for Endpoint {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Endpoint")
         .field("listener", &self.listener.is_some())
         .field("accept", &self.accept)
         .field("launch_time", &self.launch_time)
         .finish_non_exhaustive()
   }
}

impl Endpoint {
   /// Binds the endpoint listener and associates the tree accessor with it.
   /// No requests are served until [`Endpoint::activate`] is called.
   pub async fn bind(accessor: Arc<dyn TreeAccessor>, socket_path: &Path) -> Result<Self> {
      let listener = Listener::bind(socket_path).await?;
      Ok(Self {
         accessor,
         listener: Some(listener),
         accept: None,
         launch_time: Instant::now(),
      })
   }

   /// Returns the bound socket path, if the listener is still held.
   pub fn local_addr(&self) -> Option<String> {
      self.listener.as_ref().map(|l| l.local_addr())
   }

   /// Starts accepting client connections. A client Shutdown request cancels
   /// the given token, which the orchestrator uses as its shutdown signal.
   pub fn activate(&mut self, shutdown: CancellationToken) {
      let Some(listener) = self.listener.take() else {
         return;
      };

      let accessor = Arc::clone(&self.accessor);
      let launch_time = self.launch_time;
      self.accept = Some(tokio::spawn(async move {
         loop {
            tokio::select! {
               result = listener.accept() => {
                  match result {
                     Ok(stream) => {
                        let accessor = Arc::clone(&accessor);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                           handle_client(accessor, launch_time, shutdown, stream).await;
                        });
                     },
                     Err(e) => {
                        tracing::error!("accept error: {e}");
                     },
                  }
               }
               () = shutdown.cancelled() => break,
            }
         }
      }));
   }

   /// Stops accepting connections and removes the socket. Safe to call more
   /// than once; clients already connected keep being served until they hang
   /// up.
   pub async fn deactivate(&mut self) {
      if let Some(accept) = self.accept.take() {
         accept.abort();
         let _ = accept.await;
      }
      // Never activated: drop the listener here so the socket file goes away.
      self.listener = None;
   }
}

async fn handle_client(
   accessor: Arc<dyn TreeAccessor>,
   launch_time: Instant,
   shutdown: CancellationToken,
   mut stream: usock::Stream,
) {
   let mut buffer = SocketBuffer::new();
   let mut shutting_down = false;

   loop {
      let request: Request = match buffer.recv(&mut stream).await {
         Ok(req) => req,
         Err(e) => {
            tracing::debug!("client read error: {e}");
            break;
         },
      };

      let response = match request {
         Request::Hello { .. } => Response::Hello { version: version::version_string() },
         Request::Describe { path } => match accessor.resolve(&path).await {
            Ok(node) => Response::Node(node),
            Err(e) => access_error(&e),
         },
         Request::List { path } => handle_list(accessor.as_ref(), &path).await,
         Request::Warm { path } => handle_warm(accessor.as_ref(), &path).await,
         Request::Health => Response::Health {
            version:   version::version_string(),
            uptime_ms: launch_time.elapsed().as_millis() as u64,
         },
         Request::Shutdown => {
            shutting_down = true;
            Response::Shutdown { success: true }
         },
      };

      if let Err(e) = buffer.send(&mut stream, &response).await {
         tracing::debug!("client write error: {e}");
         break;
      }

      if shutting_down {
         shutdown.cancel();
         break;
      }
   }
}

async fn handle_list(accessor: &dyn TreeAccessor, path: &Path) -> Response {
   match accessor.resolve(path).await {
      Ok(NodeDescriptor::Directory(dir)) => match accessor.children(&dir).await {
         Ok(children) => Response::List(children),
         Err(e) => access_error(&e),
      },
      Ok(NodeDescriptor::RegularFile(_)) => Response::Error {
         message: format!("not a directory: {}", path.display()),
      },
      Err(e) => access_error(&e),
   }
}

async fn handle_warm(accessor: &dyn TreeAccessor, path: &Path) -> Response {
   match accessor.resolve(path).await {
      Ok(NodeDescriptor::RegularFile(file)) => match accessor.warm_cache(&file).await {
         Ok(artifacts) => Response::Warm(artifacts),
         Err(e) => access_error(&e),
      },
      Ok(NodeDescriptor::Directory(_)) => Response::Error {
         message: format!("not a regular file: {}", path.display()),
      },
      Err(e) => access_error(&e),
   }
}

fn access_error(err: &AccessError) -> Response {
   Response::Error { message: err.to_string() }
}
