//! Moving a finished download into its permanent location.
//!
//! The driver's temporary file already lives in the destination directory,
//! so publishing is a single same-filesystem rename: the destination is never
//! observed half-written, and when it is being replaced it is never
//! momentarily absent.

use crate::error::{Error, Result};
use log::{debug, info, warn};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

/// What to do when the destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    /// Replace the existing file.
    Replace,
    /// Leave the existing file alone and discard the download.
    Keep,
}

impl From<bool> for Overwrite {
    fn from(replace: bool) -> Self {
        if replace { Self::Replace } else { Self::Keep }
    }
}

/// A completed temporary file and where it should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeRequest {
    /// Temporary file written by the driver.
    pub temp_path: PathBuf,
    /// Directory the file is published into.
    pub destination: PathBuf,
    /// Final file name (a single path component).
    pub file_name: String,
}

impl FinalizeRequest {
    /// Create a request.
    pub fn new(
        temp_path: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            temp_path: temp_path.into(),
            destination: destination.into(),
            file_name: file_name.into(),
        }
    }

    /// `destination / file_name`.
    pub fn final_path(&self) -> PathBuf {
        self.destination.join(&self.file_name)
    }
}

/// Publish `request`, asking `decide` only if the destination already exists.
///
/// On success returns the final path. On [`Error::Aborted`] the existing file
/// is untouched and the temporary file has been deleted. On a rename or
/// removal failure the temporary file is left where it was.
pub fn publish<F>(request: FinalizeRequest, decide: F) -> Result<PathBuf>
where
    F: FnOnce(&Path) -> Overwrite,
{
    validate_file_name(&request.file_name)?;
    let final_path = request.final_path();
    let FinalizeRequest { temp_path, .. } = request;

    // Does not follow symlinks, so a dangling link still counts as a conflict.
    if fs::symlink_metadata(&final_path).is_ok() {
        debug!("{} already exists", final_path.display());
        if decide(&final_path) == Overwrite::Keep {
            info!("Keeping existing {}", final_path.display());
            discard(&temp_path);
            return Err(Error::Aborted { path: final_path });
        }
    }

    move_into_place(
        &temp_path,
        &final_path,
        |from, to| fs::rename(from, to),
        |path| fs::remove_file(path),
    )?;

    info!("Published {}", final_path.display());
    Ok(final_path)
}

/// Rename `temp_path` onto `final_path`, removing the destination first only
/// if the platform refuses to replace it in one step.
fn move_into_place<R, D>(temp_path: &Path, final_path: &Path, mut rename: R, remove: D) -> Result<()>
where
    R: FnMut(&Path, &Path) -> io::Result<()>,
    D: FnOnce(&Path) -> io::Result<()>,
{
    let finalize_error = |source: io::Error| Error::Finalize {
        from: temp_path.to_path_buf(),
        to: final_path.to_path_buf(),
        source,
    };

    match rename(temp_path, final_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!("Atomic replace unavailable, removing {}", final_path.display());
            remove(final_path).map_err(|source| Error::RemoveExisting {
                path: final_path.to_path_buf(),
                source,
            })?;
            rename(temp_path, final_path).map_err(finalize_error)
        },
        Err(source) => Err(finalize_error(source)),
    }
}

/// Best-effort removal of a temporary file that will not be published.
pub(crate) fn discard(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path) {
        warn!("Failed to remove {}: {e}", temp_path.display());
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None)
            if part == name && !name.contains(['/', '\\']) =>
        {
            Ok(())
        },
        _ => Err(Error::InvalidFileName(name.to_string())),
    }
}
