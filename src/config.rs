//! Configuration management for the daemon: endpoint binding, served root,
//! and update scheduling.

use std::{
   path::{Path, PathBuf},
   time::Duration,
};

use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default updater period when none is configured.
pub const DEFAULT_UPDATE_PERIOD_SECS: u64 = 60;

/// Hard floor for the updater period; configured values below this are
/// silently raised to bound worst-case traversal load.
pub const MIN_UPDATE_PERIOD_SECS: u64 = 10;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "patchd.toml";

/// Application configuration loaded from config file and environment
/// variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   /// Unix socket path the serving endpoint binds. Required.
   pub endpoint: String,

   /// Working-directory root; the process switches to it before any tree
   /// access occurs.
   pub directory: Option<PathBuf>,

   /// Seconds between cache-warming passes. 0 disables the updater.
   pub update_period_secs: u64,

   /// Name of the sidecar artifact directory under the served root.
   pub cache_dir_name: String,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         endpoint:           String::new(),
         directory:          None,
         update_period_secs: DEFAULT_UPDATE_PERIOD_SECS,
         cache_dir_name:     ".patchd-cache".to_string(),
      }
   }
}

impl Config {
   /// Loads configuration: defaults, then the config file (an explicit
   /// `--config` path or `patchd.toml` in the working directory), then
   /// `PATCHD_`-prefixed environment variables.
   pub fn load(config_file: Option<&Path>) -> Result<Self> {
      let mut figment = Figment::from(Serialized::defaults(Self::default()));

      figment = match config_file {
         Some(path) => figment.merge(Toml::file_exact(path)),
         None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
      };

      figment
         .merge(Env::prefixed("PATCHD_").lowercase(true))
         .extract()
         .map_err(|e| ConfigError::Load(Box::new(e)).into())
   }

   /// Fails fast when required settings are absent.
   pub fn validate(&self) -> Result<()> {
      if self.endpoint.is_empty() {
         return Err(ConfigError::MissingEndpoint.into());
      }
      Ok(())
   }

   /// Effective updater period after clamping to the floor; `None` means the
   /// updater is disabled and never constructed.
   pub fn effective_update_period(&self) -> Option<Duration> {
      match self.update_period_secs {
         0 => None,
         secs => Some(Duration::from_secs(secs.max(MIN_UPDATE_PERIOD_SECS))),
      }
   }
}
