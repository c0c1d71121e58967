//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary store root
//! - A scratch directory for source files (downloads, local assets)
//! - A `Config` pointing at both, tuned for fast tests
//!
//! # Usage
//!
//! ```ignore
//! use synapse_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let cfg = env.config();
//!     // cfg.storage.root == env.store_root, isolated per test
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Store root (`state/` and `data/` live below it)
    pub store_root: PathBuf,
    /// Scratch directory for files fed into imports
    pub source_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let store_root = root.join("store");
        let source_dir = root.join("sources");

        std::fs::create_dir_all(&store_root)?;
        std::fs::create_dir_all(&source_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            source_dir,
            test_id,
        })
    }

    /// Config rooted at this environment.
    ///
    /// Short lock timeout, a single network attempt, and no GC grace period,
    /// so failure paths finish quickly.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.root = self.store_root.clone();
        cfg.locks.timeout_secs = 2;
        cfg.network.retries = 1;
        cfg.network.retry_delay_ms = 0;
        cfg.gc.grace_secs = 0;
        cfg.ui.enabled = vec!["comfyui".to_string()];
        cfg
    }

    /// Create a source file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.source_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// `file://` URL for a source file, as a provider would hand out.
    pub fn file_url(&self, relative_path: &str) -> String {
        format!("file://{}", self.source_dir.join(relative_path).display())
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
