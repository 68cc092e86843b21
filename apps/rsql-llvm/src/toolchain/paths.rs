//! Installation directory resolution.
//!
//! The directory holding one LLVM version is chosen with this precedence:
//!
//! ```text
//! RSQL_LLVM_EXTERNAL_DIR   used verbatim, must already exist
//! RSQL_CACHE_DIR           used as-is
//! <default_root>/<tag>     default_root = --default-root or ~/.rsql/llvm
//! ```
//!
//! A `bin` subdirectory marks an installation as complete (see
//! [`crate::toolchain::cache::CacheState`]).

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::InstallConfig;
use crate::errors::InstallError;
use crate::toolchain::feature::FeatureTag;

/// Where an installation directory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirOrigin {
    /// `RSQL_LLVM_EXTERNAL_DIR`; the installer never acquires into it.
    External,
    /// `RSQL_CACHE_DIR`.
    Cache,
    /// Per-feature directory below the default root.
    Default,
}

impl fmt::Display for DirOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::External => "external",
            Self::Cache => "cache",
            Self::Default => "default",
        };
        write!(f, "{s}")
    }
}

/// Resolved location of one toolchain version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallDir {
    pub path: PathBuf,
    pub origin: DirOrigin,
}

impl InstallDir {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, origin: DirOrigin) -> Self {
        Self {
            path: path.into(),
            origin,
        }
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        self.origin == DirOrigin::External
    }
}

/// Returns `~/.rsql/llvm`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_root() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Cannot determine home directory. Pass --default-root or set RSQL_CACHE_DIR.")?
        .join(".rsql")
        .join("llvm"))
}

/// Determines the installation directory for `tag`.
///
/// Only the external directory is checked for existence; nothing is created.
/// Relative paths are made absolute against the current directory, so the
/// build child running in the build directory sees the same location.
///
/// # Errors
///
/// Returns [`InstallError::MissingExternalDir`] when an external directory is
/// configured but absent, or an error if the default root cannot be found.
pub fn resolve_install_dir(config: &InstallConfig, tag: FeatureTag) -> Result<InstallDir> {
    if let Some(external) = &config.external_dir {
        if !external.is_dir() {
            return Err(InstallError::missing_external_dir(external).into());
        }
        return Ok(InstallDir::new(absolute(external)?, DirOrigin::External));
    }

    if let Some(cache) = &config.cache_dir {
        return Ok(InstallDir::new(absolute(cache)?, DirOrigin::Cache));
    }

    let root = match &config.default_root {
        Some(root) => root.clone(),
        None => default_root()?,
    };
    Ok(InstallDir::new(
        absolute(&root.join(tag.as_str()))?,
        DirOrigin::Default,
    ))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .with_context(|| format!("Failed to resolve path: {}", path.display()))
}
