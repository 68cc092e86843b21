//! LLVM toolchain provisioning.
//!
//! ## Module Structure
//!
//! - [`feature`] - Supported LLVM versions and their release archives
//! - [`paths`] - Installation directory resolution
//! - [`cache`] - Installation progress markers
//! - [`executor`] - External commands with bounded retries
//! - [`download`] - HTTP download of release archives
//! - [`archive`] - ZIP and tarball extraction
//! - [`acquire`] - Download or build into the installation directory
//! - [`configure`] - `llvm-config` probing and `.cargo/config.toml` generation
//! - [`platform`] - OS detection

pub mod acquire;
pub mod archive;
pub mod cache;
pub mod configure;
pub mod download;
pub mod executor;
pub mod feature;
pub mod paths;
pub mod platform;

pub use acquire::ArtifactAcquirer;
pub use archive::ArchiveExtractor;
pub use cache::CacheState;
pub use download::HttpFetcher;
pub use executor::CommandExecutor;
pub use feature::FeatureTag;
pub use paths::{InstallDir, resolve_install_dir};
pub use platform::Platform;
