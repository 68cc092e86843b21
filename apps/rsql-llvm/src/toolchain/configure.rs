//! Exposing an installed toolchain to the downstream build.
//!
//! `llvm-sys` looks for `LLVM_SYS_<major>0_PREFIX`. The binding is written
//! to `<build_dir>/.cargo/config.toml` as a single `[env]` table, replacing
//! whatever was there before.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::InstallError;
use crate::toolchain::executor::{CommandExecutor, CommandRunner, CommandSpec, RetryPolicy};

/// Name prefix of the LLVM configuration probe.
const PROBE_NAME: &str = "llvm-config";

/// An environment variable the downstream build should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentBinding {
    pub key: String,
    pub value: PathBuf,
}

impl EnvironmentBinding {
    /// Binding for an installation of LLVM `major` located at `prefix`.
    #[must_use]
    pub fn for_major(major: u32, prefix: impl Into<PathBuf>) -> Self {
        Self {
            key: format!("LLVM_SYS_{major}0_PREFIX"),
            value: prefix.into(),
        }
    }
}

/// Result of probing an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedToolchain {
    /// Trimmed `llvm-config --version` output.
    pub version: String,
    pub major: u32,
    pub probe: PathBuf,
}

/// Finds the `llvm-config` executable in `bin_dir`.
///
/// An exact `llvm-config` (or `llvm-config.exe`) wins; otherwise the
/// alphabetically first file starting with `llvm-config` is used, which
/// covers versioned names such as `llvm-config-14`.
///
/// # Errors
///
/// Returns [`InstallError::ToolchainProbeNotFound`] when nothing matches.
pub fn find_llvm_config(bin_dir: &Path) -> Result<PathBuf> {
    let Ok(entries) = std::fs::read_dir(bin_dir) else {
        return Err(InstallError::probe_not_found(bin_dir).into());
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(PROBE_NAME))
        })
        .collect();
    candidates.sort();

    let exact = candidates.iter().position(|path| {
        path.file_stem().and_then(|s| s.to_str()) == Some(PROBE_NAME)
            && path
                .extension()
                .is_none_or(|ext| ext.eq_ignore_ascii_case("exe"))
    });

    match exact {
        Some(index) => Ok(candidates.swap_remove(index)),
        None => candidates
            .into_iter()
            .next()
            .ok_or_else(|| InstallError::probe_not_found(bin_dir).into()),
    }
}

/// Extracts the major version from `llvm-config --version` output.
///
/// The major version is the run of digits before the first `.`; anything
/// after it (`14.0.6git`, `17.0.0-rc1`) is ignored.
///
/// # Errors
///
/// Returns [`InstallError::VersionParseError`] for output without a leading
/// `<digits>.` prefix.
pub fn parse_major_version(output: &str) -> Result<u32> {
    let version = output.trim();
    let parse_error = || InstallError::version_parse(version);

    let (major, _) = version.split_once('.').ok_or_else(parse_error)?;
    if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
        return Err(parse_error().into());
    }
    Ok(major.parse::<u32>().map_err(|_| parse_error())?)
}

/// Runs `llvm-config --version` from `dir/bin`.
///
/// # Errors
///
/// Returns an error if the probe is missing, fails, or prints an
/// unparseable version.
pub fn probe<R: CommandRunner>(
    dir: &Path,
    executor: &CommandExecutor<R>,
) -> Result<ProbedToolchain> {
    let probe = find_llvm_config(&dir.join("bin"))?;
    debug!(probe = %probe.display(), "Found llvm-config");

    let output = executor.run(
        &CommandSpec::new(probe.to_string_lossy()).arg("--version"),
        &RetryPolicy::none(),
        None,
    )?;
    let version = output.stdout.trim().to_string();
    let major = parse_major_version(&version)?;

    Ok(ProbedToolchain {
        version,
        major,
        probe,
    })
}

/// Path of the generated cargo configuration.
#[must_use]
pub fn cargo_config_path(build_dir: &Path) -> PathBuf {
    build_dir.join(".cargo").join("config.toml")
}

/// Quotes `value` as a TOML basic string.
fn toml_basic_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Renders the configuration file contents for `binding`.
#[must_use]
pub fn render_cargo_config(binding: &EnvironmentBinding) -> String {
    format!(
        "[env]\n{} = {}\n",
        binding.key,
        toml_basic_string(&binding.value.to_string_lossy())
    )
}

/// Overwrites `<build_dir>/.cargo/config.toml` with `binding`.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_cargo_config(build_dir: &Path, binding: &EnvironmentBinding) -> Result<PathBuf> {
    let path = cargo_config_path(build_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(&path, render_cargo_config(binding))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[derive(Debug, Deserialize)]
struct CargoConfig {
    #[serde(default)]
    env: BTreeMap<String, toml::Value>,
}

/// Reads the `LLVM_SYS_*_PREFIX` binding from an existing configuration.
///
/// Returns `Ok(None)` when the file does not exist or holds no such key.
///
/// # Errors
///
/// Returns an error if the file exists but is not valid TOML.
pub fn read_binding(build_dir: &Path) -> Result<Option<EnvironmentBinding>> {
    let path = cargo_config_path(build_dir);
    if !path.is_file() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: CargoConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(config.env.into_iter().find_map(|(key, value)| {
        let value = value.as_str()?;
        (key.starts_with("LLVM_SYS_") && key.ends_with("_PREFIX")).then(|| EnvironmentBinding {
            key,
            value: PathBuf::from(value),
        })
    }))
}

/// Probes the installation in `dir` and points the downstream build at it.
///
/// # Errors
///
/// Returns an error if probing fails or the configuration cannot be written.
pub fn configure<R: CommandRunner>(
    dir: &Path,
    build_dir: &Path,
    executor: &CommandExecutor<R>,
) -> Result<EnvironmentBinding> {
    let toolchain = probe(dir, executor)?;
    let prefix = std::path::absolute(dir)
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;
    let binding = EnvironmentBinding::for_major(toolchain.major, prefix);

    let path = write_cargo_config(build_dir, &binding)?;
    info!(
        version = %toolchain.version,
        key = %binding.key,
        config = %path.display(),
        "Configured LLVM for the build"
    );
    Ok(binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::executor::tests::FakeRunner;

    fn temp_test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rsql_configure_{}_{}",
            name,
            rand::random::<u64>()
        ));
        std::fs::create_dir_all(&dir).expect("Should create temp dir");
        dir
    }

    fn install_with_probes(root: &Path, names: &[&str]) -> PathBuf {
        let dir = root.join("llvm");
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        for name in names {
            std::fs::write(dir.join("bin").join(name), b"").unwrap();
        }
        dir
    }

    #[test]
    fn parse_major_version_accepts_release_versions() {
        assert_eq!(parse_major_version("14.0.0").unwrap(), 14);
        assert_eq!(parse_major_version("11.1.0\n").unwrap(), 11);
        assert_eq!(parse_major_version("14.0.6git").unwrap(), 14);
        assert_eq!(parse_major_version("  9.0.1-rc2  ").unwrap(), 9);
    }

    #[test]
    fn parse_major_version_rejects_garbage() {
        for output in ["", "14", "abc", ".14.0", "v14.0.0", "llvm 14.0.0"] {
            let err = parse_major_version(output).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<InstallError>(),
                    Some(InstallError::VersionParseError { .. })
                ),
                "output {output:?}"
            );
        }
    }

    #[test]
    fn binding_key_multiplies_major_by_ten() {
        let binding = EnvironmentBinding::for_major(14, "/opt/llvm");
        assert_eq!(binding.key, "LLVM_SYS_140_PREFIX");
    }

    #[test]
    fn find_llvm_config_prefers_exact_name() {
        let root = temp_test_dir("exact");
        let dir = install_with_probes(&root, &["llvm-config-14", "llvm-config", "clang"]);

        let found = find_llvm_config(&dir.join("bin")).unwrap();
        assert_eq!(found, dir.join("bin").join("llvm-config"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn find_llvm_config_accepts_versioned_name() {
        let root = temp_test_dir("versioned");
        let dir = install_with_probes(&root, &["clang", "llvm-config-14"]);

        let found = find_llvm_config(&dir.join("bin")).unwrap();
        assert_eq!(found, dir.join("bin").join("llvm-config-14"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn find_llvm_config_missing_is_probe_not_found() {
        let root = temp_test_dir("missing");
        let dir = install_with_probes(&root, &["clang"]);

        let err = find_llvm_config(&dir.join("bin")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::ToolchainProbeNotFound { .. })
        ));

        let err = find_llvm_config(&root.join("no-such-dir")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::ToolchainProbeNotFound { .. })
        ));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn rendered_config_escapes_windows_paths() {
        let binding = EnvironmentBinding::for_major(13, r"C:\llvm\13");
        let rendered = render_cargo_config(&binding);
        assert_eq!(rendered, "[env]\nLLVM_SYS_130_PREFIX = \"C:\\\\llvm\\\\13\"\n");

        let parsed: CargoConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(
            parsed.env["LLVM_SYS_130_PREFIX"].as_str(),
            Some(r"C:\llvm\13")
        );
    }

    #[test]
    fn configure_writes_single_env_binding() {
        let root = temp_test_dir("configure");
        let dir = install_with_probes(&root, &["llvm-config"]);
        let build_dir = root.join("build");

        let runner = FakeRunner::default();
        runner.push_ok("14.0.0\n");
        let executor = CommandExecutor::new(runner);

        let binding = configure(&dir, &build_dir, &executor).unwrap();
        assert_eq!(binding.key, "LLVM_SYS_140_PREFIX");
        assert_eq!(binding.value, dir);

        let contents = std::fs::read_to_string(cargo_config_path(&build_dir)).unwrap();
        let table: toml::Table = toml::from_str(&contents).unwrap();
        assert_eq!(table.len(), 1);
        let env = table["env"].as_table().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(
            env["LLVM_SYS_140_PREFIX"].as_str(),
            Some(dir.to_string_lossy().as_ref())
        );

        let calls = executor.runner().calls.borrow();
        assert_eq!(calls[0].0.args, vec!["--version".to_string()]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn configure_overwrites_previous_config() {
        let root = temp_test_dir("overwrite");
        let dir = install_with_probes(&root, &["llvm-config"]);
        let build_dir = root.join("build");
        std::fs::create_dir_all(build_dir.join(".cargo")).unwrap();
        std::fs::write(
            cargo_config_path(&build_dir),
            "[env]\nLLVM_SYS_110_PREFIX = \"/old\"\n[build]\njobs = 2\n",
        )
        .unwrap();

        let runner = FakeRunner::default();
        runner.push_ok("13.0.1");
        let executor = CommandExecutor::new(runner);
        configure(&dir, &build_dir, &executor).unwrap();

        let binding = read_binding(&build_dir).unwrap().unwrap();
        assert_eq!(binding.key, "LLVM_SYS_130_PREFIX");
        let contents = std::fs::read_to_string(cargo_config_path(&build_dir)).unwrap();
        assert!(!contents.contains("[build]"));
        assert!(!contents.contains("LLVM_SYS_110_PREFIX"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn configure_with_bad_version_writes_nothing() {
        let root = temp_test_dir("bad_version");
        let dir = install_with_probes(&root, &["llvm-config"]);
        let build_dir = root.join("build");

        let runner = FakeRunner::default();
        runner.push_ok("not a version");
        let executor = CommandExecutor::new(runner);

        let err = configure(&dir, &build_dir, &executor).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::VersionParseError { .. })
        ));
        assert!(!cargo_config_path(&build_dir).exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn read_binding_without_file_is_none() {
        let root = temp_test_dir("no_config");
        assert!(read_binding(&root).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&root);
    }
}
