//! Node descriptors and the tree accessor interface consumed by both the
//! serving endpoint and the background updater.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod local;

pub use local::LocalTree;

/// Failures an accessor can report for a single node.
#[derive(Debug, Error)]
pub enum AccessError {
   /// The node could not be read: missing, permission denied, or any other
   /// I/O problem.
   #[error("access denied for `{path}`: {reason}", path = .path.display())]
   Denied { path: PathBuf, reason: String },

   /// A derived-artifact computation for this file is already in progress.
   /// Expected and recoverable under concurrent readers; callers must not
   /// retry within the same pass.
   #[error("busy: `{path}`", path = .path.display())]
   Busy { path: PathBuf },

   /// The accessor (or the endpoint behind it) is no longer available.
   #[error("accessor unavailable during {0}")]
   Unavailable(&'static str),
}

/// One entry in the served tree, tagged by kind and matched exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeDescriptor {
   Directory(DirEntry),
   RegularFile(FileEntry),
}

impl NodeDescriptor {
   /// Path identity of the node, relative to the served root.
   pub fn path(&self) -> &Path {
      match self {
         Self::Directory(dir) => &dir.path,
         Self::RegularFile(file) => &file.path,
      }
   }
}

/// Descriptor for a directory node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
   pub path: PathBuf,
}

/// Descriptor for a regular-file node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
   pub path: PathBuf,
   pub size: u64,
}

/// Derived artifacts materialized for a regular file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmArtifacts {
   /// Hex-encoded SHA-256 of the file contents.
   pub checksum:        String,
   /// Size in bytes of the deflate-compressed payload.
   pub compressed_size: u64,
}

/// Structural and content queries against the served file hierarchy.
///
/// Shared between the endpoint's client tasks and the updater worker; every
/// method may fail once endpoint deactivation begins.
#[async_trait::async_trait]
pub trait TreeAccessor: Send + Sync {
   /// Resolves a path identity to a node descriptor.
   async fn resolve(&self, path: &Path) -> Result<NodeDescriptor, AccessError>;

   /// Lists the children of a directory node. Collection order carries no
   /// meaning.
   async fn children(&self, dir: &DirEntry) -> Result<Vec<NodeDescriptor>, AccessError>;

   /// Forces computation (and caching) of the derived artifacts for a
   /// regular file, paying the cost once for later requests.
   async fn warm_cache(&self, file: &FileEntry) -> Result<WarmArtifacts, AccessError>;
}
