//! Package loading errors.

use std::path::PathBuf;

use crate::descriptor::DescriptorError;
use crate::loader::LoadError;

/// Result type for package operations.
pub type Result<T> = std::result::Result<T, PackageError>;

/// Package error types.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// The package descriptor is missing or invalid.
    #[error("Invalid package at {}: {source}", .path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },

    /// The package's root library could not be opened.
    #[error("Failed to load root library of package at {}: {source}", .path.display())]
    RootLibrary {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    /// Filesystem error.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured packages directory does not exist.
    #[error("Packages directory does not exist: {}", .0.display())]
    PackagesDirMissing(PathBuf),

    /// A background load task failed.
    #[error("Package load task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
