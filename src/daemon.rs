//! Daemon lifecycle orchestration.
//!
//! Startup order: configuration, working-directory switch, endpoint bind,
//! updater start, endpoint activation, then block until shutdown is
//! signalled. Shutdown order: endpoint deactivation, updater stop, updater
//! join. The process never returns while a background pass is still
//! touching the tree.

use std::{path::PathBuf, sync::Arc};

use console::style;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   config::Config,
   endpoint::Endpoint,
   error::Error,
   tree::{LocalTree, TreeAccessor},
   updater::Updater,
   usock,
};

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
   pub config:             Option<PathBuf>,
   pub endpoint:           Option<String>,
   pub directory:          Option<PathBuf>,
   pub update_period_secs: Option<u64>,
}

struct PidFileGuard {
   socket_path: PathBuf,
}

impl Drop for PidFileGuard {
   fn drop(&mut self) {
      usock::remove_pid(&self.socket_path);
   }
}

/// Runs the daemon to completion.
pub async fn run(overrides: Overrides) -> Result<()> {
   let mut cfg = Config::load(overrides.config.as_deref())?;
   if let Some(endpoint) = overrides.endpoint {
      cfg.endpoint = endpoint;
   }
   if let Some(directory) = overrides.directory {
      cfg.directory = Some(directory);
   }
   if let Some(period) = overrides.update_period_secs {
      cfg.update_period_secs = period;
   }
   cfg.validate()?;

   if let Some(directory) = &cfg.directory {
      std::env::set_current_dir(directory).map_err(|source| Error::ChangeDirectory {
         path: directory.clone(),
         source,
      })?;
   }

   let root = std::env::current_dir()?;
   let local = Arc::new(LocalTree::new(root, cfg.cache_dir_name.clone())?);
   let serve_root = local.root().to_path_buf();
   let accessor: Arc<dyn TreeAccessor> = local;

   let socket_path = PathBuf::from(&cfg.endpoint);
   let mut endpoint = Endpoint::bind(Arc::clone(&accessor), &socket_path).await?;

   usock::write_pid(&socket_path);
   let _pid_guard = PidFileGuard { socket_path: socket_path.clone() };

   println!("{}", style("Starting patchd...").green().bold());
   if let Some(addr) = endpoint.local_addr() {
      println!("Listening: {}", style(addr).cyan());
   }
   println!("Serving: {}", style(serve_root.display()).dim());

   // The updater is started only after the endpoint exists: it reaches the
   // tree through the same accessor the endpoint serves. Its stop token is a
   // child of the daemon shutdown token, so failure classification inside a
   // pass sees the shutdown the moment it begins.
   let shutdown = CancellationToken::new();
   let updater = cfg
      .effective_update_period()
      .map(|period| Updater::start(Arc::clone(&accessor), period, shutdown.child_token()));

   println!("\n{}", style("Server listening").green());
   println!("{}", style("Press Ctrl+C to stop").dim());

   supervise(endpoint, updater, shutdown).await?;

   println!("{}", style("Server stopped").green());
   Ok(())
}

/// Serves until shutdown is signalled, then tears down in order: endpoint
/// deactivation first, updater stop and join last.
///
/// The updater worker's exit is one of the supervised events: a worker that
/// dies on its own (the root invariant violation) takes the whole daemon
/// down with its error instead of leaving it serving with warming silently
/// dead.
pub async fn supervise(
   mut endpoint: Endpoint,
   mut updater: Option<Updater>,
   shutdown: CancellationToken,
) -> Result<()> {
   endpoint.activate(shutdown.clone());

   let outcome = tokio::select! {
      _ = signal::ctrl_c() => {
         println!("\n{}", style("Shutting down...").yellow());
         shutdown.cancel();
         Ok(())
      }
      () = shutdown.cancelled() => {
         println!("\n{}", style("Shutdown requested, stopping...").yellow());
         Ok(())
      }
      result = worker_exit(updater.as_mut()) => {
         if result.is_err() {
            println!("\n{}", style("Updater failed, stopping...").red());
         }
         shutdown.cancel();
         result
      }
   };

   endpoint.deactivate().await;

   if let Some(mut updater) = updater {
      updater.request_stop();
      updater.join().await?;
   }

   outcome
}

async fn worker_exit(updater: Option<&mut Updater>) -> Result<()> {
   match updater {
      Some(updater) => updater.join().await,
      None => std::future::pending().await,
   }
}
