#![warn(clippy::pedantic)]

//! # install-llvm
//!
//! Provisions the LLVM toolchain the native build links against and points
//! that build at it through `.cargo/config.toml`.
//!
//! ## Subcommands
//!
//! - `install` - Download or build LLVM, then write the build configuration
//! - `status` - Show the resolved installation without changing anything
//!
//! ## Examples
//!
//! ```bash
//! RSQL_DOWNLOAD_LLVM=true install-llvm install path/to/build
//! install-llvm status path/to/build --feature llvm13-0
//! ```

mod commands;
mod config;
mod errors;
mod toolchain;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{install, status};
use errors::InstallError;
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("RSQL_LLVM_GIT_COMMIT"),
    ")"
);

/// LLVM provisioning for the native build.
#[derive(Parser)]
#[command(
    name = "install-llvm",
    version = VERSION,
    about = "Provisions the LLVM toolchain for the native build",
    after_help = "\
INSTALLATION DIRECTORY:
    1. RSQL_LLVM_EXTERNAL_DIR   existing installation, used verbatim
    2. RSQL_CACHE_DIR           used as-is
    3. <default root>/<feature> default root is ~/.rsql/llvm or --default-root

ENVIRONMENT VARIABLES:
    RSQL_LLVM_FEATURE_VERSION   LLVM feature tag (default: llvm14-0)
    RSQL_LLVM_EXTERNAL_DIR      Existing LLVM installation
    RSQL_CACHE_DIR              Installation directory override
    RSQL_DOWNLOAD_LLVM          'true' allows downloading prebuilt archives
    RUST_LOG                    Log filter (default: info)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Obtain LLVM and configure the build directory.
    ///
    /// Downloads a prebuilt archive or builds LLVM from source, skipping work
    /// that is already done, then writes LLVM_SYS_<major>0_PREFIX into
    /// BUILD_DIR/.cargo/config.toml.
    Install(install::InstallArgs),

    /// Show the resolved installation without changing anything.
    Status(status::StatusArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        let exit_code = handle_error(&e);
        std::process::exit(exit_code);
    }
}

/// Installs the stderr log subscriber; `RUST_LOG` overrides the `info` default.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Prints the error chain and returns the process exit code.
fn handle_error(e: &anyhow::Error) -> i32 {
    if let Some(kind) = e.downcast_ref::<InstallError>() {
        tracing::debug!(?kind, "Installer error");
    }
    eprintln!("Error: {e:?}");
    1
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Install(args) => install::execute(&args).await,
        Commands::Status(args) => status::execute(&args),
    }
}
