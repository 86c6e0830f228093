use std::path::{Path, PathBuf};

use patchd::tree::{AccessError, LocalTree, NodeDescriptor, TreeAccessor};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const CACHE_DIR: &str = ".patchd-cache";

fn tree(root: &TempDir) -> LocalTree {
   LocalTree::new(root.path().to_path_buf(), CACHE_DIR.to_string()).expect("local tree")
}

fn file_entry(node: NodeDescriptor) -> patchd::tree::FileEntry {
   match node {
      NodeDescriptor::RegularFile(file) => file,
      NodeDescriptor::Directory(dir) => panic!("expected file, got directory {:?}", dir.path),
   }
}

#[tokio::test]
async fn resolves_directories_and_files() {
   let root = TempDir::new().expect("tempdir");
   std::fs::create_dir(root.path().join("sub")).expect("mkdir");
   std::fs::write(root.path().join("sub/data.bin"), b"payload").expect("seed file");

   let tree = tree(&root);

   assert!(matches!(
      tree.resolve(Path::new(".")).await.expect("resolve root"),
      NodeDescriptor::Directory(_)
   ));
   assert!(matches!(
      tree.resolve(Path::new("sub")).await.expect("resolve sub"),
      NodeDescriptor::Directory(_)
   ));

   let file = file_entry(tree.resolve(Path::new("sub/data.bin")).await.expect("resolve file"));
   assert_eq!(file.path, PathBuf::from("sub/data.bin"));
   assert_eq!(file.size, 7);
}

#[tokio::test]
async fn missing_node_is_denied() {
   let root = TempDir::new().expect("tempdir");
   let tree = tree(&root);

   let err = tree
      .resolve(Path::new("nope.txt"))
      .await
      .expect_err("missing node resolved");
   assert!(matches!(err, AccessError::Denied { .. }));
}

#[tokio::test]
async fn parent_components_are_refused() {
   let root = TempDir::new().expect("tempdir");
   let tree = tree(&root);

   let err = tree
      .resolve(Path::new("../etc/passwd"))
      .await
      .expect_err("escape accepted");
   assert!(matches!(err, AccessError::Denied { .. }));
   assert!(err.to_string().contains("escapes"));
}

#[tokio::test]
async fn children_skip_the_cache_directory() {
   let root = TempDir::new().expect("tempdir");
   std::fs::write(root.path().join("a.txt"), b"a").expect("seed file");
   std::fs::create_dir(root.path().join(CACHE_DIR)).expect("mkdir cache");

   let tree = tree(&root);
   let NodeDescriptor::Directory(dir) = tree.resolve(Path::new(".")).await.expect("root") else {
      panic!("root is not a directory");
   };

   let children = tree.children(&dir).await.expect("children");
   assert_eq!(children.len(), 1);
   assert_eq!(children[0].path(), Path::new("a.txt"));
}

#[tokio::test]
async fn warm_creates_checksum_and_payload_artifacts() {
   let root = TempDir::new().expect("tempdir");
   let contents = b"the quick brown fox jumps over the lazy dog".repeat(8);
   std::fs::write(root.path().join("a.txt"), &contents).expect("seed file");

   let tree = tree(&root);
   let file = file_entry(tree.resolve(Path::new("a.txt")).await.expect("resolve"));
   let artifacts = tree.warm_cache(&file).await.expect("warm");

   assert_eq!(artifacts.checksum, hex::encode(Sha256::digest(&contents)));
   assert!(artifacts.compressed_size > 0);
   assert!(root.path().join(CACHE_DIR).join("a.txt.sha256").exists());
   assert!(root.path().join(CACHE_DIR).join("a.txt.dfl").exists());
}

#[tokio::test]
async fn warm_reuses_cached_artifacts_until_source_changes() {
   let root = TempDir::new().expect("tempdir");
   std::fs::write(root.path().join("a.txt"), b"version one").expect("seed file");

   let tree = tree(&root);
   let file = file_entry(tree.resolve(Path::new("a.txt")).await.expect("resolve"));
   tree.warm_cache(&file).await.expect("first warm");

   // Tamper with the sidecar; a cache hit returns the tampered value, which
   // proves the second warm read the cache instead of recomputing.
   let checksum_path = root.path().join(CACHE_DIR).join("a.txt.sha256");
   std::fs::write(&checksum_path, "tampered").expect("tamper");

   let cached = tree.warm_cache(&file).await.expect("second warm");
   assert_eq!(cached.checksum, "tampered");

   // Modifying the source must force a recompute.
   std::thread::sleep(std::time::Duration::from_millis(20));
   let new_contents = b"version two";
   std::fs::write(root.path().join("a.txt"), new_contents).expect("rewrite");

   let file = file_entry(tree.resolve(Path::new("a.txt")).await.expect("re-resolve"));
   let fresh = tree.warm_cache(&file).await.expect("third warm");
   assert_eq!(fresh.checksum, hex::encode(Sha256::digest(new_contents)));
}

#[tokio::test]
async fn concurrent_warm_of_the_same_file_is_busy() {
   let root = TempDir::new().expect("tempdir");
   std::fs::write(root.path().join("a.txt"), b"contended").expect("seed file");

   let tree = tree(&root);
   let file = file_entry(tree.resolve(Path::new("a.txt")).await.expect("resolve"));

   // On the current-thread runtime the first future claims the in-flight
   // slot before its first await, so the second observes it deterministically.
   let (first, second) = tokio::join!(tree.warm_cache(&file), tree.warm_cache(&file));
   first.expect("first warm");
   let err = second.expect_err("concurrent warm accepted");
   assert!(matches!(err, AccessError::Busy { .. }));

   // Once the first warm finished, the file is warmable again.
   tree.warm_cache(&file).await.expect("warm after completion");
}

#[tokio::test]
async fn unclean_shutdown_leaves_nothing_that_blocks_warming() {
   let root = TempDir::new().expect("tempdir");
   std::fs::write(root.path().join("a.txt"), b"survivor").expect("seed file");

   // A crashed run may leave arbitrary droppings in the cache directory.
   let cache = root.path().join(CACHE_DIR);
   std::fs::create_dir_all(&cache).expect("mkdir cache");
   std::fs::write(cache.join("a.txt.lock"), b"").expect("stray file");

   // Every restart gets a fresh accessor; none of them may report the file
   // as busy.
   for _ in 0..3 {
      let tree = tree(&root);
      let file = file_entry(tree.resolve(Path::new("a.txt")).await.expect("resolve"));
      tree.warm_cache(&file).await.expect("warm blocked after restart");
   }
}
