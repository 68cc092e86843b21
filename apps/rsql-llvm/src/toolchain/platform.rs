//! Platform detection for LLVM provisioning.
//!
//! The installer only distinguishes Windows from POSIX hosts: Windows installs
//! from a pre-staged ZIP archive, POSIX hosts fetch a tarball from the LLVM
//! release host.

use anyhow::{Result, bail};
use std::fmt;

/// Host platform the installer is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Linux (any architecture).
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    Linux,
    /// macOS (any architecture).
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    Macos,
    /// Windows (any architecture).
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    Windows,
}

impl Platform {
    /// Detects the current platform based on compile-time configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the current OS is not supported.
    pub fn detect() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            return Ok(Self::Linux);
        }

        #[cfg(target_os = "macos")]
        {
            return Ok(Self::Macos);
        }

        #[cfg(target_os = "windows")]
        {
            return Ok(Self::Windows);
        }

        #[allow(unreachable_code)]
        {
            bail!(
                "Unsupported platform: {}. Supported platforms are: linux, macos, windows",
                std::env::consts::OS
            );
        }
    }

    /// Returns the platform identifier used in log output.
    #[must_use = "returns the platform string without side effects"]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Windows => "windows",
        }
    }

    /// Returns whether this platform is Windows.
    #[must_use = "returns platform check result without side effects"]
    pub fn is_windows(self) -> bool {
        matches!(self, Self::Windows)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
