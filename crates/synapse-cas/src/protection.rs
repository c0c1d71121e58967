//! Blob file protection.
//!
//! Stored blobs are read-only and never executable. Views symlink straight
//! into the store, so a consumer writing through a symlink must fail instead
//! of corrupting every profile that shares the blob.

use std::fs;
use std::io;
use std::path::Path;

/// Permission bits for every stored blob (0444)
pub const BLOB_READ_ONLY_PERM: u32 = 0o444;

/// Write and execute bits for all users
pub const BLOB_FORBIDDEN_PERM_MASK: u32 = 0o333;

/// Apply the read-only mode to a blob (or a temp file about to become one).
#[cfg(unix)]
pub fn enforce_blob_invariant(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(BLOB_READ_ONLY_PERM))
}

#[cfg(not(unix))]
pub fn enforce_blob_invariant(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)
}

/// True when the blob carries no write or execute bits.
#[cfg(unix)]
pub fn is_protected(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(mode & BLOB_FORBIDDEN_PERM_MASK == 0)
}

#[cfg(not(unix))]
pub fn is_protected(path: &Path) -> io::Result<bool> {
    Ok(fs::metadata(path)?.permissions().readonly())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_enforce_strips_write_bits() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        fs::write(&path, b"data").unwrap();

        enforce_blob_invariant(&path).unwrap();
        assert!(is_protected(&path).unwrap());
    }

    #[test]
    fn test_writable_file_is_not_protected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        fs::write(&path, b"data").unwrap();
        assert!(!is_protected(&path).unwrap());
    }
}
