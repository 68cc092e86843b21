//! Error types for the LLVM installer.
//!
//! Operations propagate `anyhow::Error` with added context; the variants of
//! [`InstallError`] are the failure kinds callers (and tests) need to tell
//! apart, recoverable through `downcast_ref`.

use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds surfaced while provisioning the LLVM toolchain.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The requested feature tag is not one of the supported LLVM versions.
    #[error("unsupported LLVM feature '{tag}' (supported: {supported})")]
    UnsupportedFeature {
        /// The rejected tag.
        tag: String,
        /// Comma separated list of accepted tags.
        supported: String,
    },

    /// `RSQL_LLVM_EXTERNAL_DIR` points at a directory that does not exist.
    #[error("external LLVM directory does not exist: {path}")]
    MissingExternalDir {
        /// The configured path.
        path: PathBuf,
    },

    /// Download-based acquisition requested while `RSQL_DOWNLOAD_LLVM` is not `true`.
    #[error("downloading LLVM is disabled; set RSQL_DOWNLOAD_LLVM=true or use the build operation")]
    DownloadDisabled,

    /// A local archive the installer expected to find is missing.
    #[error("LLVM archive not found: {path}")]
    MissingArchive {
        /// Where the archive was expected.
        path: PathBuf,
    },

    /// No `llvm-config` executable exists in the installation's bin directory.
    #[error("no llvm-config executable found in {bin_dir}")]
    ToolchainProbeNotFound {
        /// The directory that was searched.
        bin_dir: PathBuf,
    },

    /// `llvm-config --version` printed something that is not a version.
    #[error("could not parse LLVM version from '{output}'")]
    VersionParseError {
        /// The trimmed probe output.
        output: String,
    },

    /// An external command kept failing (or failed with a non-retryable error).
    #[error("command `{command}` failed after {attempts} attempt(s): {output}")]
    CommandFailed {
        /// The expanded command line.
        command: String,
        /// Number of attempts made, including the first.
        attempts: u32,
        /// Last observed error output.
        output: String,
    },

    /// Network error while fetching a release archive.
    #[error("download error: {message}")]
    DownloadError {
        /// Description of the download error.
        message: String,
    },
}

impl InstallError {
    /// Creates a new `UnsupportedFeature` error.
    #[must_use]
    pub fn unsupported_feature(tag: impl Into<String>, supported: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            tag: tag.into(),
            supported: supported.into(),
        }
    }

    /// Creates a new `MissingExternalDir` error.
    #[must_use]
    pub fn missing_external_dir(path: impl Into<PathBuf>) -> Self {
        Self::MissingExternalDir { path: path.into() }
    }

    /// Creates a new `MissingArchive` error.
    #[must_use]
    pub fn missing_archive(path: impl Into<PathBuf>) -> Self {
        Self::MissingArchive { path: path.into() }
    }

    /// Creates a new `ToolchainProbeNotFound` error.
    #[must_use]
    pub fn probe_not_found(bin_dir: impl Into<PathBuf>) -> Self {
        Self::ToolchainProbeNotFound {
            bin_dir: bin_dir.into(),
        }
    }

    /// Creates a new `VersionParseError`.
    #[must_use]
    pub fn version_parse(output: impl Into<String>) -> Self {
        Self::VersionParseError {
            output: output.into(),
        }
    }

    /// Creates a new `CommandFailed` error.
    #[must_use]
    pub fn command_failed(command: impl Into<String>, attempts: u32, output: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            attempts,
            output: output.into(),
        }
    }

    /// Creates a new `DownloadError`.
    #[must_use]
    pub fn download_error(message: impl Into<String>) -> Self {
        Self::DownloadError {
            message: message.into(),
        }
    }
}
