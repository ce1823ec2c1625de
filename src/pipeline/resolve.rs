//! Local image resolution confined to a trusted base directory.
//!
//! ## Why canonicalise before checking?
//!
//! A string prefix test on the joined path (`/srv/app/../../etc/passwd`
//! "starts with" `/srv/app`) is trivially bypassed, and even a lexical `..`
//! normaliser misses symlinks that point outside the root. The only sound
//! check is to let the OS resolve the path completely and then compare
//! path components of the result against the canonical base.

use crate::error::{ResolveError, ServerError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Largest local file that will be embedded: 25 MiB, the default request
/// body limit.
pub const MAX_LOCAL_IMAGE_BYTES: u64 = 25 * 1024 * 1024;

/// The directory local image references are confined to.
///
/// Holds the canonical form of the path, so every comparison made against
/// it is between two fully resolved paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedBaseDir(PathBuf);

impl TrustedBaseDir {
    /// Canonicalise `path` and check that it names a directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let canonical = path.canonicalize().map_err(|e| {
            ServerError::InvalidConfig(format!(
                "base directory '{}' cannot be resolved: {e}",
                path.display()
            ))
        })?;
        if !canonical.is_dir() {
            return Err(ServerError::InvalidConfig(format!(
                "base directory '{}' is not a directory",
                path.display()
            )));
        }
        Ok(Self(canonical))
    }

    /// The canonical base path.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Read the file `candidate` names, provided it lies inside `base`.
///
/// Relative candidates are joined to the base directory; absolute ones are
/// used as-is and must still resolve inside it.
///
/// # Errors
/// - [`ResolveError::OutOfBounds`] when the canonical path is outside `base`.
/// - [`ResolveError::NotFound`] when the path does not exist, is not a
///   regular file, is larger than [`MAX_LOCAL_IMAGE_BYTES`], or cannot be
///   read.
pub fn resolve(candidate: &str, base: &TrustedBaseDir) -> Result<Vec<u8>, ResolveError> {
    if candidate.is_empty() {
        return Err(ResolveError::NotFound);
    }

    let candidate = Path::new(candidate);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.path().join(candidate)
    };

    let canonical = joined.canonicalize().map_err(|_| ResolveError::NotFound)?;
    if !canonical.starts_with(base.path()) {
        debug!("Rejected image reference outside the base directory");
        return Err(ResolveError::OutOfBounds);
    }

    let metadata = fs::metadata(&canonical).map_err(|_| ResolveError::NotFound)?;
    if !metadata.is_file() {
        return Err(ResolveError::NotFound);
    }
    if metadata.len() > MAX_LOCAL_IMAGE_BYTES {
        debug!(bytes = metadata.len(), "Rejected oversized local image");
        return Err(ResolveError::NotFound);
    }

    fs::read(&canonical).map_err(|_| ResolveError::NotFound)
}
