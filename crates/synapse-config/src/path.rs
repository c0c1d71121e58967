//! Path helpers shared by the store crates.
//!
//! Everything that turns user input into a filesystem location goes through
//! here, so `~` expansion and containment checks behave the same everywhere.

use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~` are returned unchanged.
pub fn expand_home(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Normalize path, falling back to the original if canonicalization fails.
///
/// This is useful when the path might not exist and that's acceptable.
pub fn normalize_or_original(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Check if a path is within a directory (security check for path traversal).
///
/// Both paths are canonicalized before comparison to handle symlinks and `..`.
/// Returns false if either path cannot be canonicalized.
pub fn is_within_directory(path: impl AsRef<Path>, dir: impl AsRef<Path>) -> bool {
    match (path.as_ref().canonicalize(), dir.as_ref().canonicalize()) {
        (Ok(canonical_path), Ok(canonical_dir)) => canonical_path.starts_with(&canonical_dir),
        _ => false,
    }
}

/// Check that a relative path stays below its base once joined.
///
/// Works on paths that do not exist yet (view entries, pack filenames):
/// rejects absolute paths, `..`, and prefix components.
pub fn is_contained_relative(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/srv/store"), PathBuf::from("/srv/store"));
        assert_eq!(expand_home("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn test_expand_home_replaces_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.synapse"), home.join(".synapse"));
        }
    }

    #[test]
    fn test_normalize_or_original_returns_original_on_failure() {
        let fake_path = Path::new("/nonexistent/path/file.txt");
        assert_eq!(normalize_or_original(fake_path), fake_path);
    }

    #[test]
    fn test_is_within_directory() {
        let temp = tempdir().unwrap();
        let subdir = temp.path().join("subdir");
        fs::create_dir(&subdir).unwrap();
        let file = subdir.join("file.txt");
        fs::write(&file, "test").unwrap();

        assert!(is_within_directory(&file, temp.path()));
        assert!(is_within_directory(&subdir, temp.path()));
        assert!(!is_within_directory(temp.path(), &subdir));
        assert!(!is_within_directory("/nonexistent/path", temp.path()));
    }

    #[test]
    fn test_is_contained_relative() {
        assert!(is_contained_relative("models/loras/a.safetensors"));
        assert!(is_contained_relative("./a.bin"));
        assert!(!is_contained_relative("../escape.bin"));
        assert!(!is_contained_relative("models/../../escape.bin"));
        assert!(!is_contained_relative("/etc/passwd"));
        assert!(!is_contained_relative(""));
    }
}
