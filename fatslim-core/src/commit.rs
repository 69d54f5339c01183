use crate::error::CommitError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Atomically replaces `destination` with `bytes`.
///
/// The data goes to a temporary file in the destination's directory first and
/// is renamed over `destination` only once fully written, so a failure at any
/// point leaves the existing file untouched. Permission bits, and on unix the
/// owner and group, are copied from `metadata_from` when given (typically the
/// input file).
pub fn commit(
    bytes: &[u8],
    destination: &Path,
    metadata_from: Option<&Path>,
) -> Result<(), CommitError> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut temp = NamedTempFile::new_in(&dir).map_err(|source| CommitError::TempFile {
        dir: dir.clone(),
        source,
    })?;

    let write_err = |source| CommitError::Write {
        path: destination.to_path_buf(),
        source,
    };
    temp.write_all(bytes).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;

    if let Some(template) = metadata_from {
        copy_metadata(template, temp.path())?;
    }

    temp.persist(destination)
        .map_err(|err| CommitError::Persist {
            path: destination.to_path_buf(),
            source: err.error,
        })?;

    log::info!("Wrote {} bytes to {}", bytes.len(), destination.display());
    Ok(())
}

/// Ownership goes first; changing the owner may clear set-id mode bits.
fn copy_metadata(template: &Path, target: &Path) -> Result<(), CommitError> {
    let permissions_err = |source| CommitError::Permissions {
        path: template.to_path_buf(),
        source,
    };
    let metadata = fs::metadata(template).map_err(permissions_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let ownership_err = |source| CommitError::Ownership {
            path: template.to_path_buf(),
            source,
        };
        let current = fs::metadata(target).map_err(ownership_err)?;
        let owner = (metadata.uid(), metadata.gid());
        if (current.uid(), current.gid()) != owner {
            log::debug!("Restoring owner {}:{} on {}", owner.0, owner.1, target.display());
            std::os::unix::fs::chown(target, Some(owner.0), Some(owner.1))
                .map_err(ownership_err)?;
        }
    }

    fs::set_permissions(target, metadata.permissions()).map_err(permissions_err)
}
