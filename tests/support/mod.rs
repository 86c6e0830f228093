#![allow(dead_code)]

use std::{
   collections::HashMap,
   path::{Component, Path, PathBuf},
   sync::{
      Mutex,
      atomic::{AtomicUsize, Ordering},
   },
   time::Duration,
};

use patchd::tree::{AccessError, DirEntry, FileEntry, NodeDescriptor, TreeAccessor, WarmArtifacts};
use tokio::time;

/// Behavior of one node in a [`ScriptedTree`].
#[derive(Clone)]
pub enum Script {
   /// Directory whose children are the given identities.
   Dir(Vec<&'static str>),
   /// Regular file; warming succeeds.
   File,
   /// Regular file; warming reports transient contention.
   FileBusy,
   /// Regular file; warming sleeps for the given delay, then succeeds.
   FileSlow(Duration),
   /// Directory whose children listing is denied.
   DirDenied,
   /// Directory whose children listing fails as unavailable.
   DirUnavailable,
}

/// In-memory tree accessor with scripted failures, for driving the updater
/// without a real filesystem.
pub struct ScriptedTree {
   nodes:  HashMap<PathBuf, Script>,
   warmed: Mutex<Vec<PathBuf>>,
   passes: AtomicUsize,
}

fn key(path: &Path) -> PathBuf {
   path
      .components()
      .filter(|c| matches!(c, Component::Normal(_)))
      .collect()
}

impl ScriptedTree {
   /// Empty tree; add the root with `with(".", Script::Dir(..))`.
   pub fn new() -> Self {
      Self {
         nodes:  HashMap::new(),
         warmed: Mutex::new(Vec::new()),
         passes: AtomicUsize::new(0),
      }
   }

   pub fn with(mut self, path: &str, script: Script) -> Self {
      self.nodes.insert(key(Path::new(path)), script);
      self
   }

   /// Identities passed to `warm_cache` so far, in call order.
   pub fn warmed(&self) -> Vec<PathBuf> {
      self.warmed.lock().expect("warmed lock").clone()
   }

   /// Number of root resolutions observed, i.e. passes started.
   pub fn passes(&self) -> usize {
      self.passes.load(Ordering::SeqCst)
   }

   /// Polls until at least `n` passes have started or the timeout elapses.
   pub async fn wait_for_passes(&self, n: usize, timeout: Duration) -> bool {
      let deadline = time::Instant::now() + timeout;
      while time::Instant::now() < deadline {
         if self.passes() >= n {
            return true;
         }
         time::sleep(Duration::from_millis(5)).await;
      }
      false
   }

   /// Polls until at least `n` warm calls were recorded or the timeout
   /// elapses.
   pub async fn wait_for_warms(&self, n: usize, timeout: Duration) -> bool {
      let deadline = time::Instant::now() + timeout;
      while time::Instant::now() < deadline {
         if self.warmed().len() >= n {
            return true;
         }
         time::sleep(Duration::from_millis(5)).await;
      }
      false
   }

   fn script_for(&self, path: &Path) -> Option<&Script> {
      self.nodes.get(&key(path))
   }
}

#[async_trait::async_trait]
impl TreeAccessor for ScriptedTree {
   async fn resolve(&self, path: &Path) -> Result<NodeDescriptor, AccessError> {
      let normalized = key(path);
      if normalized.as_os_str().is_empty() {
         self.passes.fetch_add(1, Ordering::SeqCst);
      }

      match self.script_for(path) {
         Some(Script::Dir(_) | Script::DirDenied | Script::DirUnavailable) => {
            Ok(NodeDescriptor::Directory(DirEntry { path: normalized }))
         },
         Some(Script::File | Script::FileBusy | Script::FileSlow(_)) => {
            Ok(NodeDescriptor::RegularFile(FileEntry { path: normalized, size: 0 }))
         },
         None => Err(AccessError::Denied {
            path:   path.to_path_buf(),
            reason: "no such node".to_string(),
         }),
      }
   }

   async fn children(&self, dir: &DirEntry) -> Result<Vec<NodeDescriptor>, AccessError> {
      match self.script_for(&dir.path) {
         Some(Script::Dir(children)) => {
            let mut out = Vec::new();
            for child in children {
               out.push(self.resolve(Path::new(child)).await?);
            }
            Ok(out)
         },
         Some(Script::DirDenied) => Err(AccessError::Denied {
            path:   dir.path.clone(),
            reason: "permission denied".to_string(),
         }),
         Some(Script::DirUnavailable) => Err(AccessError::Unavailable("children")),
         _ => Err(AccessError::Denied {
            path:   dir.path.clone(),
            reason: "not a directory".to_string(),
         }),
      }
   }

   async fn warm_cache(&self, file: &FileEntry) -> Result<WarmArtifacts, AccessError> {
      self
         .warmed
         .lock()
         .expect("warmed lock")
         .push(file.path.clone());

      match self.script_for(&file.path) {
         Some(Script::File) => Ok(WarmArtifacts {
            checksum:        "0".repeat(64),
            compressed_size: 0,
         }),
         Some(Script::FileSlow(delay)) => {
            time::sleep(*delay).await;
            Ok(WarmArtifacts { checksum: "0".repeat(64), compressed_size: 0 })
         },
         Some(Script::FileBusy) => Err(AccessError::Busy { path: file.path.clone() }),
         _ => Err(AccessError::Denied {
            path:   file.path.clone(),
            reason: "not a regular file".to_string(),
         }),
      }
   }
}
