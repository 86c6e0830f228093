use std::path::PathBuf;

use clap::{Parser, error::ErrorKind};
use patchd::{
   daemon::{self, Overrides},
   version,
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the patchd daemon
#[derive(Parser)]
#[command(name = "patchd")]
#[command(about = "Patch-distribution daemon with background cache warming")]
#[command(disable_version_flag = true)]
struct Cli {
   #[arg(short = 'v', long, help = "Display the patchd version")]
   version: bool,

   #[arg(long, help = "Config file path (default: ./patchd.toml)")]
   config: Option<PathBuf>,

   #[arg(long, help = "Unix socket path to bind (overrides config)")]
   endpoint: Option<String>,

   #[arg(long, help = "Working directory to serve (overrides config)")]
   directory: Option<PathBuf>,

   #[arg(long, help = "Seconds between cache-warming passes, 0 disables (overrides config)")]
   update_period: Option<u64>,
}

#[tokio::main]
async fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
      .init();

   let cli = match Cli::try_parse() {
      Ok(cli) => cli,
      Err(err) => match err.kind() {
         // Usage belongs on the error stream; help still yields a success
         // exit.
         ErrorKind::DisplayHelp => {
            eprint!("{err}");
            std::process::exit(0);
         },
         _ => {
            eprint!("{err}");
            std::process::exit(1);
         },
      },
   };

   if cli.version {
      println!("{}", version::version_string());
      return;
   }

   let overrides = Overrides {
      config:             cli.config,
      endpoint:           cli.endpoint,
      directory:          cli.directory,
      update_period_secs: cli.update_period,
   };

   if let Err(err) = daemon::run(overrides).await {
      eprintln!("patchd: {err}");
      std::process::exit(err.exit_code());
   }
}
