//! Background cache-warming updater.
//!
//! A long-lived worker that wakes on a fixed period, walks the served tree
//! through the same accessor interface clients use, and forces
//! materialization of the derived artifacts for every regular file. The
//! walk tolerates transient contention, survives per-node failures, and
//! stops cooperatively: a stop issued while the worker waits for the next
//! period wakes it immediately, and a stop issued mid-traversal abandons the
//! walk before the next directory is entered.

use std::{future::Future, path::{Path, PathBuf}, pin::Pin, sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   error::Error,
   tree::{AccessError, DirEntry, NodeDescriptor, TreeAccessor},
};

/// Handle to the updater worker.
///
/// Created at most once at startup (never when the configured period is
/// zero) and joined exactly once during shutdown.
pub struct Updater {
   stop:   CancellationToken,
   worker: Option<JoinHandle<Result<()>>>,
}

impl Updater {
   /// Starts the worker on the runtime.
   ///
   /// The `stop` token is the cooperative stop signal; cancelling it (or
   /// calling [`Updater::request_stop`]) wakes a worker blocked in its
   /// period wait. Handing the token in (rather than minting it here) lets
   /// the orchestrator derive it from the daemon-wide shutdown token, so the
   /// worker's failure classification sees a shutdown the moment it begins.
   pub fn start(
      accessor: Arc<dyn TreeAccessor>,
      period: Duration,
      stop: CancellationToken,
   ) -> Self {
      let worker = tokio::spawn(run_worker(accessor, period, stop.clone()));
      Self { stop, worker: Some(worker) }
   }

   /// Signals the worker to stop.
   ///
   /// Idempotent: calling it repeatedly, concurrently, or after the worker
   /// already exited is a no-op.
   pub fn request_stop(&self) {
      self.stop.cancel();
   }

   /// Waits until the worker has fully returned and yields its terminal
   /// result; the only error it can carry is the root invariant violation.
   ///
   /// Cancel safe: a caller that gives up mid-wait may join again later.
   /// Without a prior [`Updater::request_stop`] this blocks until the worker
   /// exits on its own, which the orchestrator relies on to notice a dying
   /// worker.
   pub async fn join(&mut self) -> Result<()> {
      let Some(handle) = self.worker.as_mut() else {
         return Ok(());
      };
      let result = handle.await;
      self.worker = None;
      result.map_err(|e| Error::Server {
         op:     "updater join",
         reason: e.to_string(),
      })?
   }
}

/// How a failed pass is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
   /// Log at warn level with reason detail; next pass on schedule.
   Warn,
   /// Silent retry on the next scheduled pass; busy is expected under
   /// concurrent readers.
   Retry,
   /// Log at error level with full detail.
   Log,
   /// Produce no output; failures during shutdown are expected artifacts of
   /// the endpoint tearing down mid-traversal and are not actionable.
   Suppress,
}

/// Classifies a pass failure. A pure function of the error and the local
/// shutdown-in-progress signal, so it can be tested in isolation.
pub fn classify(err: &AccessError, shutting_down: bool) -> FailureAction {
   match err {
      AccessError::Denied { .. } => FailureAction::Warn,
      AccessError::Busy { .. } => FailureAction::Retry,
      AccessError::Unavailable(_) => {
         if shutting_down {
            FailureAction::Suppress
         } else {
            FailureAction::Log
         }
      },
   }
}

enum PassError {
   /// The tree root is defined to always be a directory; anything else is a
   /// deployment error that ends the worker.
   RootNotDirectory(PathBuf),
   Access(AccessError),
}

impl From<AccessError> for PassError {
   fn from(err: AccessError) -> Self {
      Self::Access(err)
   }
}

async fn run_worker(
   accessor: Arc<dyn TreeAccessor>,
   period: Duration,
   stop: CancellationToken,
) -> Result<()> {
   loop {
      if stop.is_cancelled() {
         return Ok(());
      }

      match run_pass(accessor.as_ref(), &stop).await {
         Ok(()) => {},
         Err(PassError::RootNotDirectory(path)) => return Err(Error::RootNotDirectory(path)),
         Err(PassError::Access(err)) => match classify(&err, stop.is_cancelled()) {
            FailureAction::Warn => tracing::warn!("update pass abandoned: {err}"),
            FailureAction::Log => tracing::error!("exception during update: {err}"),
            FailureAction::Retry | FailureAction::Suppress => {},
         },
      }

      if stop.is_cancelled() {
         return Ok(());
      }

      tokio::select! {
         () = time::sleep(period) => {},
         () = stop.cancelled() => return Ok(()),
      }
   }
}

/// One full (or abandoned) traversal of the tree.
async fn run_pass(accessor: &dyn TreeAccessor, stop: &CancellationToken) -> Result<(), PassError> {
   let root = accessor.resolve(Path::new(".")).await?;
   let top = match root {
      NodeDescriptor::Directory(dir) => dir,
      NodeDescriptor::RegularFile(file) => return Err(PassError::RootNotDirectory(file.path)),
   };
   warm_directory(accessor, top, stop).await
}

/// Recursively warms every regular file below `dir`. Checked against the
/// stop signal before each directory's children, which bounds shutdown
/// latency to roughly one node visit instead of one full pass.
fn warm_directory<'a>(
   accessor: &'a dyn TreeAccessor,
   dir: DirEntry,
   stop: &'a CancellationToken,
) -> Pin<Box<dyn Future<Output = Result<(), PassError>> + Send + 'a>> {
   Box::pin(async move {
      if stop.is_cancelled() {
         return Ok(());
      }

      for child in accessor.children(&dir).await? {
         match child {
            NodeDescriptor::Directory(sub) => {
               warm_directory(accessor, sub, stop).await?;
            },
            NodeDescriptor::RegularFile(file) => {
               // Side effect only: invoking the operation forces the
               // accessor to materialize the cached artifacts.
               accessor.warm_cache(&file).await?;
            },
         }
      }

      Ok(())
   })
}
