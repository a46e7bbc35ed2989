//! Engine-specific connection-string resolution.
//!
//! Resolution runs exactly once, while the registry loads. Two rules apply:
//!
//! - **File-based engine**: the configured value is a bare filename. It is
//!   rewritten to an absolute path inside a [`DATA_DIR_NAME`] directory
//!   (created if absent) under the deployment root, found by walking parent
//!   directories upward from the load base directory until a
//!   [`ROOT_MARKER_FILE`] is seen. If no marker exists the base directory
//!   itself is used.
//! - **Client-server engines**: a small set of well-known local files is
//!   tried in a fixed order; the first one that exists supplies the literal
//!   connection string (trimmed). Only when none exists is the value from
//!   structured settings used. Production credentials can therefore live in
//!   untracked local files instead of the settings file.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{BackendError, StorageError};

use super::settings::DatabaseKind;

/// Marker file identifying the deployment root during the upward walk.
pub const ROOT_MARKER_FILE: &str = ".stratum-root";

/// Directory under the deployment root that holds file-based databases.
pub const DATA_DIR_NAME: &str = "databases";

/// Walks parent directories upward from `base_dir` looking for the root
/// marker; falls back to `base_dir` when the marker is never found.
fn find_deployment_root(base_dir: &Path) -> PathBuf {
    let mut current = Some(base_dir);
    while let Some(dir) = current {
        if dir.join(ROOT_MARKER_FILE).is_file() {
            return dir.to_path_buf();
        }
        current = dir.parent();
    }
    base_dir.to_path_buf()
}

/// Rewrites a file-based connection string to an absolute database path.
///
/// The parent directory is created if it does not exist, so a resolved
/// descriptor always points into an existing directory.
pub(crate) fn resolve_file_based(
    base_dir: &Path,
    file_name: &str,
) -> Result<String, StorageError> {
    let data_dir = find_deployment_root(base_dir).join(DATA_DIR_NAME);
    std::fs::create_dir_all(&data_dir).map_err(|e| {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: format!("cannot create data directory {}: {}", data_dir.display(), e),
            source: Some(Box::new(e)),
        })
    })?;
    Ok(data_dir.join(file_name).to_string_lossy().into_owned())
}

/// Candidate override files for a client-server engine, in trial order.
fn override_candidates(base_dir: &Path, kind: DatabaseKind) -> [PathBuf; 2] {
    [
        base_dir.join("secrets").join(format!("{}_conn.txt", kind)),
        base_dir.join(format!("{}_conn.txt", kind)),
    ]
}

/// Resolves a client-server connection string through local override files.
///
/// The first existing candidate wins; an unreadable candidate is logged and
/// skipped. When no candidate exists the configured value is kept.
pub(crate) fn resolve_client_server(base_dir: &Path, kind: DatabaseKind, configured: &str) -> String {
    for candidate in override_candidates(base_dir, kind) {
        if candidate.is_file() {
            match std::fs::read_to_string(&candidate) {
                Ok(text) => return text.trim().to_string(),
                Err(e) => {
                    warn!(
                        file = %candidate.display(),
                        error = %e,
                        "skipping unreadable connection override file"
                    );
                }
            }
        }
    }
    configured.to_string()
}
