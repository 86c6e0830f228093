//! Filesystem-backed tree accessor.
//!
//! Serves the directory the daemon was started in and materializes derived
//! artifacts as sidecar files under a cache directory at the root: a SHA-256
//! checksum (`.sha256`) and a deflate-compressed payload (`.dfl`) whose size
//! is the compressed-size artifact. Artifacts are recomputed only when the
//! source file changed, so the cost is paid once and reused thereafter.

use std::{
   collections::HashSet,
   io::{self, Write},
   path::{Component, Path, PathBuf},
   sync::{Mutex, PoisonError},
   time::SystemTime,
};

use flate2::{Compression, write::DeflateEncoder};
use sha2::{Digest, Sha256};
use tokio::fs;

use super::{AccessError, DirEntry, FileEntry, NodeDescriptor, TreeAccessor, WarmArtifacts};

/// Local file system implementation of [`TreeAccessor`].
pub struct LocalTree {
   root:           PathBuf,
   cache_dir_name: String,
   in_flight:      Mutex<HashSet<PathBuf>>,
}

/// Marks a file's artifacts as being computed.
///
/// A second warmer hitting the same file observes [`AccessError::Busy`].
/// Cleared on drop, so a warm that fails or is cancelled never leaves the
/// file wedged as busy; the set lives in memory, so an unclean process exit
/// cannot leave stale state behind for the next run either.
struct WarmGuard<'a> {
   in_flight: &'a Mutex<HashSet<PathBuf>>,
   path:      PathBuf,
}

impl Drop for WarmGuard<'_> {
   fn drop(&mut self) {
      self
         .in_flight
         .lock()
         .unwrap_or_else(PoisonError::into_inner)
         .remove(&self.path);
   }
}

fn denied(path: &Path, err: &io::Error) -> AccessError {
   AccessError::Denied { path: path.to_path_buf(), reason: err.to_string() }
}

fn mtime(meta: &std::fs::Metadata) -> Option<SystemTime> {
   meta.modified().ok()
}

impl LocalTree {
   pub fn new(root: PathBuf, cache_dir_name: String) -> io::Result<Self> {
      let root = root.canonicalize()?;
      Ok(Self {
         root,
         cache_dir_name,
         in_flight: Mutex::new(HashSet::new()),
      })
   }

   pub fn root(&self) -> &Path {
      &self.root
   }

   /// Normalizes a relative identity and refuses anything that could escape
   /// the served root.
   fn normalize(&self, rel: &Path) -> Result<PathBuf, AccessError> {
      let mut normalized = PathBuf::new();
      for component in rel.components() {
         match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
               return Err(AccessError::Denied {
                  path:   rel.to_path_buf(),
                  reason: "path escapes served root".to_string(),
               });
            },
         }
      }
      Ok(normalized)
   }

   fn absolute(&self, rel: &Path) -> Result<(PathBuf, PathBuf), AccessError> {
      let normalized = self.normalize(rel)?;
      let absolute = self.root.join(&normalized);
      Ok((normalized, absolute))
   }

   fn artifact_path(&self, rel: &Path, ext: &str) -> Result<PathBuf, AccessError> {
      let mut path = self.root.join(&self.cache_dir_name).join(rel);
      let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
         return Err(AccessError::Denied {
            path:   rel.to_path_buf(),
            reason: "invalid artifact path".to_string(),
         });
      };
      path.set_file_name(format!("{name}.{ext}"));
      Ok(path)
   }

   /// Returns the cached artifacts when both sidecars exist and are at least
   /// as new as the source file.
   async fn cached_artifacts(
      &self,
      checksum_path: &Path,
      payload_path: &Path,
      source_mtime: Option<SystemTime>,
   ) -> Option<WarmArtifacts> {
      let checksum_meta = fs::metadata(checksum_path).await.ok()?;
      let payload_meta = fs::metadata(payload_path).await.ok()?;

      let source_mtime = source_mtime?;
      if mtime(&checksum_meta)? < source_mtime || mtime(&payload_meta)? < source_mtime {
         return None;
      }

      let checksum = fs::read_to_string(checksum_path).await.ok()?;
      Some(WarmArtifacts {
         checksum:        checksum.trim().to_string(),
         compressed_size: payload_meta.len(),
      })
   }

   /// Claims the in-flight slot for a file, or reports it busy.
   fn begin_warm(&self, path: &Path) -> Result<WarmGuard<'_>, AccessError> {
      let mut in_flight = self
         .in_flight
         .lock()
         .unwrap_or_else(PoisonError::into_inner);
      if !in_flight.insert(path.to_path_buf()) {
         return Err(AccessError::Busy { path: path.to_path_buf() });
      }
      Ok(WarmGuard { in_flight: &self.in_flight, path: path.to_path_buf() })
   }
}

#[async_trait::async_trait]
impl TreeAccessor for LocalTree {
   async fn resolve(&self, path: &Path) -> Result<NodeDescriptor, AccessError> {
      let (normalized, absolute) = self.absolute(path)?;
      let meta = fs::metadata(&absolute)
         .await
         .map_err(|e| denied(path, &e))?;

      if meta.is_dir() {
         Ok(NodeDescriptor::Directory(DirEntry { path: normalized }))
      } else if meta.is_file() {
         Ok(NodeDescriptor::RegularFile(FileEntry { path: normalized, size: meta.len() }))
      } else {
         Err(AccessError::Denied {
            path:   path.to_path_buf(),
            reason: "unsupported node type".to_string(),
         })
      }
   }

   async fn children(&self, dir: &DirEntry) -> Result<Vec<NodeDescriptor>, AccessError> {
      let (normalized, absolute) = self.absolute(&dir.path)?;
      let mut entries = fs::read_dir(&absolute)
         .await
         .map_err(|e| denied(&dir.path, &e))?;

      let mut children = Vec::new();
      while let Some(entry) = entries
         .next_entry()
         .await
         .map_err(|e| denied(&dir.path, &e))?
      {
         let name = entry.file_name();
         if name.to_string_lossy() == self.cache_dir_name {
            continue;
         }

         let child_path = normalized.join(&name);
         let meta = match entry.metadata().await {
            Ok(m) => m,
            // A child vanishing between listing and stat is a concurrent
            // mutation, not a failure of this directory.
            Err(_) => continue,
         };

         if meta.is_dir() {
            children.push(NodeDescriptor::Directory(DirEntry { path: child_path }));
         } else if meta.is_file() {
            children.push(NodeDescriptor::RegularFile(FileEntry {
               path: child_path,
               size: meta.len(),
            }));
         }
      }

      Ok(children)
   }

   async fn warm_cache(&self, file: &FileEntry) -> Result<WarmArtifacts, AccessError> {
      let (normalized, absolute) = self.absolute(&file.path)?;
      let _warm = self.begin_warm(&normalized)?;

      let source_meta = fs::metadata(&absolute)
         .await
         .map_err(|e| denied(&file.path, &e))?;

      let checksum_path = self.artifact_path(&normalized, "sha256")?;
      let payload_path = self.artifact_path(&normalized, "dfl")?;

      if let Some(cached) = self
         .cached_artifacts(&checksum_path, &payload_path, mtime(&source_meta))
         .await
      {
         return Ok(cached);
      }

      if let Some(parent) = checksum_path.parent() {
         fs::create_dir_all(parent)
            .await
            .map_err(|e| denied(&file.path, &e))?;
      }

      let contents = fs::read(&absolute)
         .await
         .map_err(|e| denied(&file.path, &e))?;

      let checksum = hex::encode(Sha256::digest(&contents));

      let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
      encoder
         .write_all(&contents)
         .map_err(|e| denied(&file.path, &e))?;
      let compressed = encoder.finish().map_err(|e| denied(&file.path, &e))?;
      let compressed_size = compressed.len() as u64;

      // Payload first, checksum last: the checksum sidecar's mtime gates
      // freshness, so a crash in between leaves a stale-looking cache rather
      // than a fresh-looking torn one.
      fs::write(&payload_path, &compressed)
         .await
         .map_err(|e| denied(&file.path, &e))?;
      fs::write(&checksum_path, &checksum)
         .await
         .map_err(|e| denied(&file.path, &e))?;

      Ok(WarmArtifacts { checksum, compressed_size })
   }
}
