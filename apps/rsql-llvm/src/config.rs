//! Installer configuration.
//!
//! Every environment variable the installer honors is declared here as a
//! clap argument with an `env` fallback. [`InstallConfig`] is assembled once
//! in the command entry points; nothing below it reads the environment.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use regex::Regex;

use crate::toolchain::executor::RetryPolicy;
use crate::toolchain::feature::{DEFAULT_FEATURE, FeatureTag};

/// Default number of extra attempts for retryable commands and downloads.
pub const DEFAULT_RETRIES: u32 = 2;

/// How the toolchain artifacts are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Fetch and extract a prebuilt release archive.
    Download,
    /// Compile LLVM through the downstream cargo build.
    Build,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Build => "build",
        }
    }
}

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// LLVM feature tag to provision (e.g. llvm14-0).
    #[arg(long, env = "RSQL_LLVM_FEATURE_VERSION")]
    pub feature: Option<String>,

    /// Use an existing LLVM installation verbatim.
    #[arg(long, env = "RSQL_LLVM_EXTERNAL_DIR", value_name = "DIR")]
    pub external_dir: Option<PathBuf>,

    /// Installation directory to use instead of the per-feature default.
    #[arg(long, env = "RSQL_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Root under which per-feature installations live (default: ~/.rsql/llvm).
    #[arg(long, value_name = "DIR")]
    pub default_root: Option<PathBuf>,

    /// Allow download-based acquisition; only the literal `true` enables it.
    #[arg(long, env = "RSQL_DOWNLOAD_LLVM", value_name = "BOOL", hide = true)]
    pub download_llvm: Option<String>,
}

/// Fully resolved installer configuration.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Directory of the downstream build; receives `.cargo/config.toml`.
    pub build_dir: PathBuf,
    pub feature: FeatureTag,
    pub external_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub default_root: Option<PathBuf>,
    pub download_enabled: bool,
    /// Operation requested on the command line, if any.
    pub operation: Option<Operation>,
    /// Extra attempts allowed for retryable failures.
    pub retries: u32,
    /// Restricts retries to failures whose output matches.
    pub retry_pattern: Option<Regex>,
}

impl InstallConfig {
    /// Builds the configuration from parsed arguments.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::InstallError::UnsupportedFeature`] when the
    /// selected feature tag is not supported.
    pub fn from_args(
        build_dir: PathBuf,
        args: &ConfigArgs,
        operation: Option<Operation>,
        retries: u32,
    ) -> Result<Self> {
        let feature = match args.feature.as_deref() {
            Some(tag) => tag.parse::<FeatureTag>()?,
            None => DEFAULT_FEATURE,
        };

        Ok(Self {
            build_dir,
            feature,
            external_dir: args.external_dir.clone(),
            cache_dir: args.cache_dir.clone(),
            default_root: args.default_root.clone(),
            download_enabled: args.download_llvm.as_deref().map(str::trim) == Some("true"),
            operation,
            retries,
            retry_pattern: None,
        })
    }

    #[must_use]
    pub fn with_retry_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.retry_pattern = pattern;
        self
    }

    /// Retry policy for downloads and builds.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::retries(self.retries);
        match &self.retry_pattern {
            Some(pattern) => policy.matching(pattern.clone()),
            None => policy,
        }
    }

    /// The operation to run: the requested one, or download when the gate is
    /// open and build otherwise.
    #[must_use]
    pub fn effective_operation(&self) -> Operation {
        self.operation.unwrap_or(if self.download_enabled {
            Operation::Download
        } else {
            Operation::Build
        })
    }
}
