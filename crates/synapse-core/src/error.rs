use std::fmt;
use std::time::Duration;

use thiserror::Error;

use synapse_cas::{BlobHash, CasError};
use synapse_config::log_store_warn;
use synapse_layout::LayoutError;
use synapse_lock::LockError;
use synapse_pack::PackError;
use synapse_runtime::RuntimeError;

/// What went wrong with one item of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    IntegrityMismatch { expected: BlobHash, actual: BlobHash },
    Unresolvable,
    Locked,
    Io,
    Other,
}

/// Per-item outcome of a batch operation that did not fully succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, err: &CoreError) -> Self {
        let kind = match err {
            CoreError::IntegrityMismatch {
                expected, actual, ..
            } => FailureKind::IntegrityMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            CoreError::Unresolvable { .. } => FailureKind::Unresolvable,
            CoreError::Locked { .. } => FailureKind::Locked,
            CoreError::Io(_) => FailureKind::Io,
            _ => FailureKind::Other,
        };
        Self {
            item: item.into(),
            kind,
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.reason)
    }
}

/// Errors surfaced to the presentation layer.
///
/// `Locked` and `IntegrityMismatch` from lower layers are lifted to the
/// top-level variants so callers can match on them directly.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Pack not found: {0}")]
    PackNotFound(String),

    #[error("Pack '{0}' is not installed")]
    PackNotInstalled(String),

    #[error("Pack '{0}' already exists (import with replace to overwrite)")]
    PackExists(String),

    #[error("Pack '{pack}' is active in: {}", .uis.join(", "))]
    PackInUse { pack: String, uis: Vec<String> },

    #[error("Integrity mismatch for {context}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        context: String,
        expected: BlobHash,
        actual: BlobHash,
    },

    #[error("Timed out after {timeout:?} waiting for lock on {scope}")]
    Locked { scope: String, timeout: Duration },

    #[error("Update of '{pack}' needs an explicit choice for: {}", .dependencies.join(", "))]
    AmbiguousUpdateRequiresChoice {
        pack: String,
        dependencies: Vec<String>,
    },

    #[error("Unknown candidate '{candidate}' for dependency '{dependency}'")]
    UnknownCandidate {
        dependency: String,
        candidate: String,
    },

    #[error("UI '{ui}' is inconsistent: {detail}. Run `synapse doctor --rebuild-views` to repair")]
    Inconsistent { ui: String, detail: String },

    #[error("{operation}: {} succeeded, {} failed", .succeeded.len(), .failed.len())]
    PartialFailure {
        operation: String,
        succeeded: Vec<String>,
        failed: Vec<ItemFailure>,
    },

    #[error("Update plan for '{pack}' is out of date ({} changed since the check); check again", .dependencies.join(", "))]
    StalePlan {
        pack: String,
        dependencies: Vec<String>,
    },

    #[error("Cannot resolve '{dependency}': {reason}")]
    Unresolvable { dependency: String, reason: String },

    #[error("Invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Layout(LayoutError),

    #[error(transparent)]
    Pack(PackError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Attach a dependency name to a blob integrity failure.
    pub(crate) fn for_dependency(self, dependency: &str) -> Self {
        match self {
            CoreError::IntegrityMismatch {
                expected, actual, ..
            } => CoreError::IntegrityMismatch {
                context: format!("dependency '{}'", dependency),
                expected,
                actual,
            },
            other => other,
        }
    }
}

/// Fold the per-item outcome of a batch into one result.
///
/// Without a single success the batch fails with the item's own error
/// (an integrity failure first, if any); other failures are logged. With
/// some successes the failures become `PartialFailure`.
pub(crate) fn batch_outcome(
    operation: String,
    succeeded: Vec<String>,
    mut errors: Vec<(String, CoreError)>,
) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    if succeeded.is_empty() {
        let first = errors
            .iter()
            .position(|(_, e)| matches!(e, CoreError::IntegrityMismatch { .. }))
            .unwrap_or(0);
        let (_, err) = errors.swap_remove(first);
        for (item, other) in &errors {
            log_store_warn!("Batch item failed", operation = operation.as_str(), item = item.as_str(), error = other.to_string().as_str());
        }
        return Err(err);
    }
    Err(CoreError::PartialFailure {
        operation,
        succeeded,
        failed: errors
            .iter()
            .map(|(item, err)| ItemFailure::new(item.clone(), err))
            .collect(),
    })
}

impl From<LayoutError> for CoreError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::Locked { scope, timeout } => CoreError::Locked { scope, timeout },
            LayoutError::InvalidName { kind, name, reason } => {
                CoreError::InvalidName { kind, name, reason }
            }
            LayoutError::Io(e) => CoreError::Io(e),
            other => CoreError::Layout(other),
        }
    }
}

impl From<CasError> for CoreError {
    fn from(err: CasError) -> Self {
        match err {
            CasError::IntegrityMismatch { expected, actual } => CoreError::IntegrityMismatch {
                context: "blob".to_string(),
                expected,
                actual,
            },
            CasError::NotFound { hash } => CoreError::NotFound {
                kind: "blob",
                name: hash.to_string(),
            },
            CasError::Layout(e) => e.into(),
            CasError::Io(e) => CoreError::Io(e),
        }
    }
}

impl From<PackError> for CoreError {
    fn from(err: PackError) -> Self {
        match err {
            PackError::Layout(e) => e.into(),
            other => CoreError::Pack(other),
        }
    }
}

impl From<LockError> for CoreError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Layout(e) => e.into(),
        }
    }
}

impl From<RuntimeError> for CoreError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Io(e) => CoreError::Io(e),
            RuntimeError::Layout(e) => e.into(),
            RuntimeError::Cas(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_locked_is_lifted() {
        let err: CoreError = RuntimeError::Layout(LayoutError::Locked {
            scope: "runtime".into(),
            timeout: Duration::from_secs(1),
        })
        .into();
        assert!(matches!(err, CoreError::Locked { ref scope, .. } if scope == "runtime"));
    }

    #[test]
    fn test_integrity_mismatch_is_lifted() {
        let err: CoreError = CasError::IntegrityMismatch {
            expected: BlobHash::of_bytes(b"a"),
            actual: BlobHash::of_bytes(b"b"),
        }
        .into();
        let err = err.for_dependency("vae");
        assert!(matches!(err, CoreError::IntegrityMismatch { ref context, .. } if context.contains("vae")));
    }

    fn mismatch() -> CoreError {
        CoreError::IntegrityMismatch {
            context: "dependency 'ckpt'".into(),
            expected: BlobHash::of_bytes(b"declared"),
            actual: BlobHash::of_bytes(b"served"),
        }
    }

    fn unresolvable(dep: &str) -> CoreError {
        CoreError::Unresolvable {
            dependency: dep.into(),
            reason: "404".into(),
        }
    }

    #[test]
    fn test_batch_without_success_keeps_integrity_error() {
        let err = batch_outcome(
            "install A".into(),
            Vec::new(),
            vec![("gone".into(), unresolvable("gone")), ("ckpt".into(), mismatch())],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::IntegrityMismatch { .. }));
    }

    #[test]
    fn test_batch_with_success_is_partial() {
        let err = batch_outcome("install A".into(), vec!["good".into()], vec![("ckpt".into(), mismatch())])
            .unwrap_err();
        let CoreError::PartialFailure { succeeded, failed, .. } = err else {
            panic!("expected PartialFailure, got {err}");
        };
        assert_eq!(succeeded, vec!["good"]);
        assert_eq!(
            failed[0].kind,
            FailureKind::IntegrityMismatch {
                expected: BlobHash::of_bytes(b"declared"),
                actual: BlobHash::of_bytes(b"served"),
            }
        );
        assert!(batch_outcome("install A".into(), vec!["good".into()], Vec::new()).is_ok());
    }

    #[test]
    fn test_inconsistent_recommends_doctor() {
        let err = CoreError::Inconsistent {
            ui: "comfyui".into(),
            detail: "active points at work__A, stack top is global".into(),
        };
        assert!(err.to_string().contains("doctor --rebuild-views"));
    }
}
