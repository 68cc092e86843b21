//! Status command for install-llvm.
//!
//! Reports what `install` would work with, without changing anything:
//! the feature tag, the installation directory and where it came from, the
//! cache state, and for finished installations the probed LLVM version.

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::config::{ConfigArgs, InstallConfig};
use crate::toolchain::configure::{self, EnvironmentBinding, ProbedToolchain};
use crate::toolchain::executor::CommandRunner;
use crate::toolchain::{CacheState, CommandExecutor, FeatureTag, InstallDir, resolve_install_dir};

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Directory of the build that links against LLVM.
    #[arg(value_name = "BUILD_DIR")]
    pub build_dir: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Snapshot of an installation.
#[derive(Debug)]
struct StatusReport {
    feature: FeatureTag,
    dir: InstallDir,
    state: CacheState,
    download_enabled: bool,
    /// Probe result for complete installations; the error text otherwise.
    toolchain: Option<Result<ProbedToolchain, String>>,
    configured: Option<EnvironmentBinding>,
}

impl StatusReport {
    fn gather<R: CommandRunner>(
        config: &InstallConfig,
        executor: &CommandExecutor<R>,
    ) -> Result<Self> {
        let dir = resolve_install_dir(config, config.feature)?;
        let state = CacheState::inspect(&dir.path, &config.feature.release().archive_name);
        let toolchain = (state == CacheState::Complete).then(|| {
            configure::probe(&dir.path, executor).map_err(|e| format!("{e:#}"))
        });
        let configured = configure::read_binding(&config.build_dir)?;

        Ok(Self {
            feature: config.feature,
            dir,
            state,
            download_enabled: config.download_enabled,
            toolchain,
            configured,
        })
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "feature:    {}", self.feature)?;
        writeln!(
            f,
            "directory:  {} ({})",
            self.dir.path.display(),
            self.dir.origin
        )?;
        writeln!(f, "state:      {}", self.state)?;
        let download = if self.download_enabled {
            "enabled"
        } else {
            "disabled"
        };
        writeln!(f, "download:   {download}")?;

        match &self.toolchain {
            Some(Ok(toolchain)) => {
                let binding = EnvironmentBinding::for_major(toolchain.major, &self.dir.path);
                writeln!(f, "probe:      {}", toolchain.probe.display())?;
                writeln!(f, "version:    {}", toolchain.version)?;
                writeln!(f, "key:        {}", binding.key)?;
            }
            Some(Err(error)) => writeln!(f, "probe:      failed: {error}")?,
            None => {}
        }

        match &self.configured {
            Some(binding) => writeln!(
                f,
                "configured: {} = {}",
                binding.key,
                binding.value.display()
            ),
            None => writeln!(f, "configured: no"),
        }
    }
}

/// Executes the status command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the external
/// directory does not exist.
pub fn execute(args: &StatusArgs) -> Result<()> {
    let config = InstallConfig::from_args(args.build_dir.clone(), &args.config, None, 0)?;
    let report = StatusReport::gather(&config, &CommandExecutor::system())?;
    print!("{report}");
    Ok(())
}
