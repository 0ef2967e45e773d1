//! Error types for ridepull.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for ridepull operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ridepull operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// YMODEM transfer error.
    #[error("YMODEM error: {0}")]
    Ymodem(String),

    /// The device transfer failed for a device or protocol reason.
    #[error("Download failed: {0}")]
    Driver(String),

    /// The transfer was stopped because the user asked for it.
    #[error("Download canceled by user")]
    Canceled,

    /// The destination already existed and the user declined to overwrite it.
    #[error("{} already exists; overwrite declined", path.display())]
    Aborted {
        /// Destination that was left untouched.
        path: PathBuf,
    },

    /// The existing destination could not be removed before replacing it.
    #[error("Failed to remove existing file {}: {source}", path.display())]
    RemoveExisting {
        /// Destination that could not be removed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Moving the temporary file into place failed.
    #[error("Failed to rename {} to {}: {source}", from.display(), to.display())]
    Finalize {
        /// Temporary file (still present).
        from: PathBuf,
        /// Intended destination.
        to: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// A driver proposed a file name that is not a plain file name.
    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    /// A download was requested while the controller is not ready.
    #[error("Not ready to download: {0}")]
    NotReady(String),

    /// The requested port selection does not match the current scan.
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// No driver is registered under the given name.
    #[error("Unknown device type: {0}")]
    UnknownDriver(String),

    /// Unsupported operation on this platform or build.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether this error reports a user-requested cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether this error was raised while moving the download into place.
    ///
    /// For these errors the transferred data still exists in the temporary
    /// file.
    #[must_use]
    pub fn is_finalize_failure(&self) -> bool {
        matches!(self, Self::RemoveExisting { .. } | Self::Finalize { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_is_not_a_failure_message() {
        let msg = Error::Canceled.to_string();
        assert!(msg.contains("canceled"));
        assert!(!msg.contains("failed"));
        assert!(Error::Canceled.is_canceled());
        assert!(!Error::Driver("timeout".into()).is_canceled());
    }

    #[test]
    fn test_finalize_messages_name_both_paths() {
        let err = Error::Finalize {
            from: PathBuf::from("/tmp/.ridepull-abc"),
            to: PathBuf::from("/rides/ride001.dat"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains(".ridepull-abc"));
        assert!(msg.contains("ride001.dat"));
        assert!(err.is_finalize_failure());
        assert!(!Error::Aborted { path: PathBuf::from("x") }.is_finalize_failure());
    }
}
