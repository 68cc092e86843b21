//! Obtaining LLVM artifacts: download and extract, or build from source.
//!
//! Downloads are idempotent. The `bin` marker short-circuits everything and
//! an archive left by an earlier run is extracted without fetching it again.
//! Builds always run; the downstream cargo build decides what is up to date.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::Operation;
use crate::errors::InstallError;
use crate::toolchain::archive::Extractor;
use crate::toolchain::cache::CacheState;
use crate::toolchain::download::Fetcher;
use crate::toolchain::executor::{CommandExecutor, CommandRunner, CommandSpec, RetryPolicy};
use crate::toolchain::feature::FeatureTag;
use crate::toolchain::paths::InstallDir;
use crate::toolchain::platform::Platform;

/// What [`ArtifactAcquirer::acquire`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// External directory; used as provided.
    External,
    /// The `bin` marker was already present.
    AlreadyInstalled,
    /// An archive was extracted; `fetched` tells whether it was downloaded first.
    Extracted { fetched: bool },
    /// The downstream build ran.
    Built,
}

/// Acquires toolchain artifacts into an installation directory.
pub struct ArtifactAcquirer<'a, F, E, R> {
    pub fetcher: F,
    pub extractor: E,
    pub executor: &'a CommandExecutor<R>,
    pub platform: Platform,
    /// Downstream build directory; holds the pre-staged Windows archive.
    pub build_dir: PathBuf,
    pub download_enabled: bool,
    /// Retry policy for the source build.
    pub policy: RetryPolicy,
}

impl<F, E, R> ArtifactAcquirer<'_, F, E, R>
where
    F: Fetcher,
    E: Extractor,
    R: CommandRunner,
{
    /// Ensures `dir` holds the toolchain for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::DownloadDisabled`] when downloading is not
    /// allowed, [`InstallError::MissingArchive`] when the staged Windows
    /// archive is absent, or the underlying fetch, extract or build error.
    pub async fn acquire(
        &self,
        dir: &InstallDir,
        tag: FeatureTag,
        operation: Operation,
    ) -> Result<Acquisition> {
        if dir.is_external() {
            info!(dir = %dir.path.display(), "Using external LLVM installation");
            return Ok(Acquisition::External);
        }

        std::fs::create_dir_all(&dir.path)
            .with_context(|| format!("Failed to create directory: {}", dir.path.display()))?;

        match operation {
            Operation::Download => self.download(&dir.path, tag).await,
            Operation::Build => self.build(&dir.path, tag),
        }
    }

    async fn download(&self, dir: &Path, tag: FeatureTag) -> Result<Acquisition> {
        if !self.download_enabled {
            return Err(InstallError::DownloadDisabled.into());
        }

        let release = tag.release();
        let state = CacheState::inspect(dir, &release.archive_name);
        debug!(feature = %tag, dir = %dir.display(), ?state, "Inspected cache");

        if state == CacheState::Complete {
            info!(feature = %tag, dir = %dir.display(), "LLVM already installed");
            return Ok(Acquisition::AlreadyInstalled);
        }

        if self.platform.is_windows() {
            let staged = self.build_dir.join(tag.staged_archive_name());
            if !staged.is_file() {
                return Err(InstallError::missing_archive(staged).into());
            }
            self.extractor.extract(&staged, dir)?;
            return Ok(Acquisition::Extracted { fetched: false });
        }

        let archive = dir.join(&release.archive_name);
        let fetched = state == CacheState::Absent;
        if fetched {
            self.fetcher
                .fetch(&release.url(), &archive)
                .await
                .with_context(|| format!("Failed to download LLVM {tag}"))?;
        } else {
            info!(archive = %archive.display(), "Reusing downloaded archive");
        }

        self.extractor.extract(&archive, dir)?;
        Ok(Acquisition::Extracted { fetched })
    }

    fn build(&self, dir: &Path, tag: FeatureTag) -> Result<Acquisition> {
        info!(feature = %tag, dir = %dir.display(), "Building LLVM from source");

        let spec = build_command(dir, tag);
        self.executor
            .run(&spec, &self.policy, Some(&self.build_dir))
            .with_context(|| format!("Failed to build LLVM {tag}"))?;
        Ok(Acquisition::Built)
    }
}

/// The downstream cargo invocation that compiles LLVM into `dir`.
#[must_use]
pub fn build_command(dir: &Path, tag: FeatureTag) -> CommandSpec {
    CommandSpec::new("cargo")
        .args([
            "build",
            "--release",
            "--no-default-features",
            "--features",
        ])
        .arg(tag.build_features())
        .arg("-vv")
        .env("RSQL_CACHE_DIR", dir.to_string_lossy())
        .streaming()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::executor::OutputMode;
    use crate::toolchain::executor::tests::FakeRunner;
    use crate::toolchain::paths::DirOrigin;
    use std::cell::{Cell, RefCell};

    fn temp_test_dir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("rsql_acquire_{}_{}", name, rand::random::<u64>()));
        std::fs::create_dir_all(&dir).expect("Should create temp dir");
        dir
    }

    /// Writes a placeholder archive and records requested URLs.
    #[derive(Default)]
    struct FakeFetcher {
        urls: RefCell<Vec<String>>,
    }

    impl Fetcher for FakeFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
            self.urls.borrow_mut().push(url.to_string());
            std::fs::write(dest, b"archive")?;
            Ok(())
        }
    }

    /// Creates the `bin` marker and counts extractions.
    #[derive(Default)]
    struct FakeExtractor {
        calls: Cell<usize>,
        archives: RefCell<Vec<PathBuf>>,
    }

    impl Extractor for FakeExtractor {
        fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            self.archives.borrow_mut().push(archive.to_path_buf());
            std::fs::create_dir_all(dest.join("bin"))?;
            Ok(())
        }
    }

    fn acquirer<'a>(
        executor: &'a CommandExecutor<FakeRunner>,
        build_dir: &Path,
        platform: Platform,
    ) -> ArtifactAcquirer<'a, FakeFetcher, FakeExtractor, FakeRunner> {
        ArtifactAcquirer {
            fetcher: FakeFetcher::default(),
            extractor: FakeExtractor::default(),
            executor,
            platform,
            build_dir: build_dir.to_path_buf(),
            download_enabled: true,
            policy: RetryPolicy::none(),
        }
    }

    #[tokio::test]
    async fn download_twice_fetches_and_extracts_once() {
        let root = temp_test_dir("idempotent");
        let executor = CommandExecutor::new(FakeRunner::default());
        let acquirer = acquirer(&executor, &root, Platform::Linux);
        let dir = InstallDir::new(root.join("llvm14-0"), DirOrigin::Default);

        let first = acquirer
            .acquire(&dir, FeatureTag::Llvm14, Operation::Download)
            .await
            .unwrap();
        let second = acquirer
            .acquire(&dir, FeatureTag::Llvm14, Operation::Download)
            .await
            .unwrap();

        assert_eq!(first, Acquisition::Extracted { fetched: true });
        assert_eq!(second, Acquisition::AlreadyInstalled);
        assert_eq!(acquirer.fetcher.urls.borrow().len(), 1);
        assert_eq!(acquirer.extractor.calls.get(), 1);
        assert_eq!(
            acquirer.fetcher.urls.borrow()[0],
            FeatureTag::Llvm14.release().url()
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn present_archive_is_extracted_without_fetch() {
        let root = temp_test_dir("partial");
        let dir = InstallDir::new(root.join("cache"), DirOrigin::Cache);
        let archive_name = FeatureTag::Llvm13.release().archive_name;
        std::fs::create_dir_all(&dir.path).unwrap();
        std::fs::write(dir.path.join(&archive_name), b"archive").unwrap();

        let executor = CommandExecutor::new(FakeRunner::default());
        let acquirer = acquirer(&executor, &root, Platform::Linux);

        let outcome = acquirer
            .acquire(&dir, FeatureTag::Llvm13, Operation::Download)
            .await
            .unwrap();

        assert_eq!(outcome, Acquisition::Extracted { fetched: false });
        assert!(acquirer.fetcher.urls.borrow().is_empty());
        assert_eq!(
            acquirer.extractor.archives.borrow().as_slice(),
            &[dir.path.join(archive_name)]
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn download_gate_closed_is_download_disabled() {
        let root = temp_test_dir("gate");
        let executor = CommandExecutor::new(FakeRunner::default());
        let mut acquirer = acquirer(&executor, &root, Platform::Linux);
        acquirer.download_enabled = false;
        let dir = InstallDir::new(root.join("llvm14-0"), DirOrigin::Default);

        let err = acquirer
            .acquire(&dir, FeatureTag::Llvm14, Operation::Download)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::DownloadDisabled)
        ));
        assert!(acquirer.fetcher.urls.borrow().is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn external_dir_skips_acquisition() {
        let root = temp_test_dir("external");
        let executor = CommandExecutor::new(FakeRunner::default());
        let acquirer = acquirer(&executor, &root, Platform::Linux);
        let dir = InstallDir::new(&root, DirOrigin::External);

        for operation in [Operation::Download, Operation::Build] {
            let outcome = acquirer
                .acquire(&dir, FeatureTag::Llvm14, operation)
                .await
                .unwrap();
            assert_eq!(outcome, Acquisition::External);
        }
        assert!(acquirer.fetcher.urls.borrow().is_empty());
        assert_eq!(acquirer.extractor.calls.get(), 0);
        assert_eq!(executor.runner().call_count(), 0);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn windows_extracts_staged_zip() {
        let root = temp_test_dir("windows");
        std::fs::write(root.join("llvm12-0.zip"), b"zip").unwrap();
        let executor = CommandExecutor::new(FakeRunner::default());
        let acquirer = acquirer(&executor, &root, Platform::Windows);
        let dir = InstallDir::new(root.join("llvm12-0"), DirOrigin::Default);

        let outcome = acquirer
            .acquire(&dir, FeatureTag::Llvm12, Operation::Download)
            .await
            .unwrap();

        assert_eq!(outcome, Acquisition::Extracted { fetched: false });
        assert!(acquirer.fetcher.urls.borrow().is_empty());
        assert_eq!(
            acquirer.extractor.archives.borrow().as_slice(),
            &[root.join("llvm12-0.zip")]
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn windows_without_staged_zip_is_missing_archive() {
        let root = temp_test_dir("windows_missing");
        let executor = CommandExecutor::new(FakeRunner::default());
        let acquirer = acquirer(&executor, &root, Platform::Windows);
        let dir = InstallDir::new(root.join("llvm12-0"), DirOrigin::Default);

        let err = acquirer
            .acquire(&dir, FeatureTag::Llvm12, Operation::Download)
            .await
            .unwrap_err();

        match err.downcast_ref::<InstallError>() {
            Some(InstallError::MissingArchive { path }) => {
                assert_eq!(path, &root.join("llvm12-0.zip"));
            }
            other => panic!("Expected MissingArchive, got {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn build_runs_cargo_every_time() {
        let root = temp_test_dir("build");
        let runner = FakeRunner::default();
        runner.push_ok("");
        runner.push_ok("");
        let executor = CommandExecutor::new(runner);
        let acquirer = acquirer(&executor, &root, Platform::Linux);
        let dir = InstallDir::new(root.join("llvm11-0"), DirOrigin::Default);
        std::fs::create_dir_all(dir.path.join("bin")).unwrap();

        for _ in 0..2 {
            let outcome = acquirer
                .acquire(&dir, FeatureTag::Llvm11, Operation::Build)
                .await
                .unwrap();
            assert_eq!(outcome, Acquisition::Built);
        }

        let calls = executor.runner().calls.borrow();
        assert_eq!(calls.len(), 2);
        let (spec, working_dir) = &calls[0];
        assert_eq!(spec.program, "cargo");
        assert!(spec.args.contains(&"build-llvm,llvm11-0-no-llvm-linking".to_string()));
        assert_eq!(spec.mode, OutputMode::Stream);
        assert_eq!(
            spec.env,
            vec![(
                "RSQL_CACHE_DIR".to_string(),
                dir.path.to_string_lossy().into_owned()
            )]
        );
        assert_eq!(working_dir.as_deref(), Some(root.as_path()));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failing_build_is_command_failed() {
        let root = temp_test_dir("build_fail");
        let executor = CommandExecutor::new(FakeRunner::default());
        let mut acquirer = acquirer(&executor, &root, Platform::Linux);
        acquirer.policy = RetryPolicy::retries(1);
        let dir = InstallDir::new(root.join("llvm14-0"), DirOrigin::Default);

        let err = acquirer
            .acquire(&dir, FeatureTag::Llvm14, Operation::Build)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::CommandFailed { attempts: 2, .. })
        ));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn build_command_line() {
        let spec = build_command(Path::new("/cache"), FeatureTag::Llvm14);
        assert_eq!(
            spec.to_string(),
            "RSQL_CACHE_DIR=/cache cargo build --release --no-default-features --features build-llvm,llvm14-0-no-llvm-linking -vv"
        );
    }
}
