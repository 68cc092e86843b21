//! LLVM feature tags and their release descriptors.
//!
//! A feature tag (e.g. `llvm14-0`) names one supported LLVM version. It
//! selects both the prebuilt archive to download and the cargo features used
//! when building LLVM from source.

use std::fmt;
use std::str::FromStr;

use crate::errors::InstallError;

/// Host serving prebuilt LLVM release archives.
pub const RELEASE_HOST: &str = "https://github.com/llvm/llvm-project/releases/download";

/// Feature tag used when neither the CLI nor the environment selects one.
pub const DEFAULT_FEATURE: FeatureTag = FeatureTag::Llvm14;

/// A supported LLVM version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureTag {
    /// LLVM 11.
    Llvm11,
    /// LLVM 12.
    Llvm12,
    /// LLVM 13.
    Llvm13,
    /// LLVM 14.
    Llvm14,
}

impl FeatureTag {
    /// Every supported tag, oldest first.
    pub const ALL: [Self; 4] = [Self::Llvm11, Self::Llvm12, Self::Llvm13, Self::Llvm14];

    /// Returns the tag as written in feature flags and directory names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Llvm11 => "llvm11-0",
            Self::Llvm12 => "llvm12-0",
            Self::Llvm13 => "llvm13-0",
            Self::Llvm14 => "llvm14-0",
        }
    }

    /// Returns the release path suffix below [`RELEASE_HOST`].
    fn release_suffix(self) -> &'static str {
        match self {
            Self::Llvm11 => "llvmorg-11.1.0/clang+llvm-11.1.0-x86_64-linux-gnu-ubuntu-16.04.tar.xz",
            Self::Llvm12 => "llvmorg-12.0.1/clang+llvm-12.0.1-x86_64-linux-gnu-ubuntu-16.04.tar.xz",
            Self::Llvm13 => "llvmorg-13.0.1/clang+llvm-13.0.1-x86_64-linux-gnu-ubuntu-18.04.tar.xz",
            Self::Llvm14 => "llvmorg-14.0.6/clang+llvm-14.0.6-x86_64-linux-gnu-rhel-8.4.tar.xz",
        }
    }

    /// Resolves the prebuilt archive for this tag.
    #[must_use]
    pub fn release(self) -> ReleaseDescriptor {
        ReleaseDescriptor::new(RELEASE_HOST, self.release_suffix())
    }

    /// Cargo features passed to the downstream build when compiling LLVM from source.
    #[must_use]
    pub fn build_features(self) -> String {
        format!("build-llvm,{}-no-llvm-linking", self.as_str())
    }

    /// File name of the pre-staged archive used on Windows.
    #[must_use]
    pub fn staged_archive_name(self) -> String {
        format!("{}.zip", self.as_str())
    }

    fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|tag| tag.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for FeatureTag {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == wanted)
            .ok_or_else(|| InstallError::unsupported_feature(wanted, Self::supported_list()))
    }
}

impl fmt::Display for FeatureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Download location of a prebuilt LLVM archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Release host, without a trailing slash.
    pub base_url: String,
    /// Path below the host.
    pub suffix: String,
    /// File name of the archive (last segment of the suffix).
    pub archive_name: String,
}

impl ReleaseDescriptor {
    /// Builds a descriptor by joining a host with a release path suffix.
    #[must_use]
    pub fn new(base_url: &str, suffix: &str) -> Self {
        let suffix = suffix.trim_start_matches('/');
        let archive_name = suffix.rsplit('/').next().unwrap_or(suffix).to_string();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            suffix: suffix.to_string(),
            archive_name,
        }
    }

    /// Full URL of the archive.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/{}", self.base_url, self.suffix)
    }
}
