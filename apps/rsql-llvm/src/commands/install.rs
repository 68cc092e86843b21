//! Install command for install-llvm.
//!
//! Resolves where the requested LLVM version lives, obtains it if needed and
//! writes the `LLVM_SYS_<major>0_PREFIX` binding into the build directory's
//! `.cargo/config.toml`.
//!
//! ## Usage
//!
//! ```bash
//! install-llvm install .                          # download if RSQL_DOWNLOAD_LLVM=true, else build
//! install-llvm install . --operation download     # force a download
//! install-llvm install . --feature llvm13-0       # pick another LLVM version
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use regex::Regex;
use tracing::info;

use crate::config::{ConfigArgs, DEFAULT_RETRIES, InstallConfig, Operation};
use crate::toolchain::configure::configure;
use crate::toolchain::{
    ArchiveExtractor, ArtifactAcquirer, CommandExecutor, HttpFetcher, Platform, resolve_install_dir,
};

/// Arguments for the install command.
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Directory of the build that links against LLVM.
    #[arg(value_name = "BUILD_DIR")]
    pub build_dir: PathBuf,

    /// How to obtain LLVM. Defaults to download when RSQL_DOWNLOAD_LLVM=true, build otherwise.
    #[arg(long, value_enum)]
    pub operation: Option<Operation>,

    /// Extra attempts for failed downloads and builds.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_RETRIES)]
    pub retries: u32,

    /// Only retry failures whose output matches this regular expression.
    #[arg(long, value_name = "REGEX", value_parser = Regex::new)]
    pub retry_pattern: Option<Regex>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Executes the install command.
///
/// # Process
///
/// 1. Resolve the feature tag and installation directory
/// 2. Download and extract, or build, unless already done
/// 3. Probe `llvm-config` and write `.cargo/config.toml`
///
/// # Errors
///
/// Returns an error if configuration is invalid or any step fails.
pub async fn execute(args: &InstallArgs) -> Result<()> {
    let config = InstallConfig::from_args(
        args.build_dir.clone(),
        &args.config,
        args.operation,
        args.retries,
    )?
    .with_retry_pattern(args.retry_pattern.clone());
    install(&config).await
}

async fn install(config: &InstallConfig) -> Result<()> {
    let platform = Platform::detect()?;
    let dir = resolve_install_dir(config, config.feature)?;
    let operation = config.effective_operation();

    info!(
        feature = %config.feature,
        dir = %dir.path.display(),
        origin = %dir.origin,
        operation = operation.as_str(),
        %platform,
        "Provisioning LLVM"
    );

    let executor = CommandExecutor::system();
    let acquirer = ArtifactAcquirer {
        fetcher: HttpFetcher::new(config.retry_policy()),
        extractor: ArchiveExtractor::for_platform(platform),
        executor: &executor,
        platform,
        build_dir: config.build_dir.clone(),
        download_enabled: config.download_enabled,
        policy: config.retry_policy(),
    };
    let outcome = acquirer.acquire(&dir, config.feature, operation).await?;
    info!(?outcome, "LLVM artifacts ready");

    let binding = configure(&dir.path, &config.build_dir, &executor)?;
    println!("{} = {}", binding.key, binding.value.display());
    Ok(())
}
