//! Manifest generation from a build output directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use pwa_sw::{Manifest, ROOT_KEY};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// The worker script never lists itself.
pub const DEFAULT_EXCLUDE: &str = "flutter_service_worker.js";

/// `extra` plus [`DEFAULT_EXCLUDE`], which is always left out.
pub fn with_default_exclude(mut extra: Vec<String>) -> Vec<String> {
    if !extra.iter().any(|e| e == DEFAULT_EXCLUDE) {
        extra.push(DEFAULT_EXCLUDE.to_string());
    }
    extra
}

/// Error type for manifest generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to walk build directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to hash {path}: {source}")]
    Hash { path: PathBuf, source: io::Error },
}

/// Hash every file under `root` into a manifest.
///
/// Keys are `/`-separated paths relative to `root`. Entries whose name
/// starts with `.` are skipped along with everything below them, as are
/// names listed in `exclude`. When `index.html` is present the document
/// root `/` gets the same hash.
pub fn generate(root: &Path, exclude: &[String]) -> Result<Manifest, GenerateError> {
    if !root.is_dir() {
        return Err(GenerateError::NotADirectory(root.to_path_buf()));
    }

    let mut manifest = Manifest::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped(e, exclude));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(key) = resource_key(root, entry.path()) else {
            continue;
        };
        let hash = hash_file(entry.path()).map_err(|source| GenerateError::Hash {
            path: entry.path().to_path_buf(),
            source,
        })?;
        trace!(key = %key, hash = %hash, "Hashed");
        manifest.insert(key, hash);
    }

    if let Some(hash) = manifest.get("index.html").map(str::to_string) {
        manifest.insert(ROOT_KEY, hash);
    }

    debug!(resources = manifest.len(), root = %root.display(), "Generated manifest");
    Ok(manifest)
}

fn is_skipped(entry: &DirEntry, exclude: &[String]) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || exclude.iter().any(|e| *e == name)
}

fn resource_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}

/// SHA-256 of a file's contents, hex encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn build_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<html></html>");
        write(dir.path(), "main.dart.js", "void main() {}");
        write(dir.path(), "assets/FontManifest.json", "[]");
        write(dir.path(), "flutter_service_worker.js", "self.addEventListener");
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main");
        write(dir.path(), "assets/.DS_Store", "junk");
        dir
    }

    #[test]
    fn test_generate_keys() {
        let dir = build_dir();
        let manifest = generate(dir.path(), &[DEFAULT_EXCLUDE.to_string()]).unwrap();

        let keys: Vec<&str> = manifest.keys().collect();
        assert_eq!(
            keys,
            vec!["/", "assets/FontManifest.json", "index.html", "main.dart.js"]
        );
    }

    #[test]
    fn test_extra_excludes_keep_worker_script_out() {
        let dir = build_dir();
        write(dir.path(), "canvaskit/skwasm.wasm", "wasm");

        let exclude = with_default_exclude(vec!["canvaskit".to_string()]);
        let manifest = generate(dir.path(), &exclude).unwrap();

        assert!(!manifest.contains_key("flutter_service_worker.js"));
        assert!(!manifest.contains_key("canvaskit/skwasm.wasm"));
        assert!(manifest.contains_key("main.dart.js"));
        assert_eq!(
            with_default_exclude(vec![DEFAULT_EXCLUDE.to_string()]),
            vec![DEFAULT_EXCLUDE.to_string()]
        );
    }

    #[test]
    fn test_root_shares_index_hash() {
        let dir = build_dir();
        let manifest = generate(dir.path(), &[]).unwrap();

        assert_eq!(manifest.get("/"), manifest.get("index.html"));
        assert!(manifest.contains_key("flutter_service_worker.js"));
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "empty.txt", "");

        assert_eq!(
            hash_file(&dir.path().join("empty.txt")).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_changed_file_changes_hash() {
        let dir = build_dir();
        let before = generate(dir.path(), &[]).unwrap();
        write(dir.path(), "main.dart.js", "void main() { run(); }");
        let after = generate(dir.path(), &[]).unwrap();

        let diff = after.diff(&before);
        assert_eq!(diff.changed, vec!["main.dart.js"]);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_no_index_no_root() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.dart.js", "x");

        let manifest = generate(dir.path(), &[]).unwrap();
        assert!(!manifest.contains_key("/"));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = generate(&dir.path().join("build"), &[]).unwrap_err();
        assert!(matches!(err, GenerateError::NotADirectory(_)));
    }
}
