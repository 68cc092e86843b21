//! Archive extraction for LLVM distributions.
//!
//! Release tarballs wrap everything in one top-level directory
//! (`clang+llvm-14.0.6-x86_64-linux-gnu-rhel-8.4/bin/...`). Tar extraction
//! drops that first component so `bin/` lands directly in the installation
//! directory. Pre-staged ZIP archives are unpacked as-is unless every entry
//! shares a common root folder other than `bin`, which is stripped the same
//! way.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};
use xz2::read::XzDecoder;

use crate::toolchain::platform::Platform;

/// Directory whose presence marks a finished installation.
const INSTALL_MARKER: &str = "bin";

/// Unpacks an archive into a directory.
pub trait Extractor {
    /// Extracts `archive` into `dest`, creating `dest` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read or written out.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// Archive format handled on the current platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveExtractor {
    /// ZIP archives, used for the pre-staged Windows distribution.
    Zip,
    /// Compressed tarballs (`.tar.xz`, `.tar.gz`, `.tgz`).
    Tar,
}

impl ArchiveExtractor {
    /// Chooses the extractor used by `platform`.
    #[must_use]
    pub fn for_platform(platform: Platform) -> Self {
        if platform.is_windows() {
            Self::Zip
        } else {
            Self::Tar
        }
    }
}

impl Extractor for ArchiveExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        info!(
            archive = %archive.display(),
            dest = %dest.display(),
            "Extracting {self:?} archive"
        );
        match self {
            Self::Zip => extract_zip(archive, dest),
            Self::Tar => extract_tar(archive, dest),
        }
    }
}

/// Extracts a compressed tarball, dropping the first path component of
/// every entry.
///
/// # Errors
///
/// Returns an error for unknown compression suffixes, unreadable archives,
/// entries escaping `dest_dir`, or I/O failures.
pub fn extract_tar(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;

    let name = archive_path.to_string_lossy();
    let reader: Box<dyn Read> = if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Box::new(XzDecoder::new(file))
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else {
        bail!("Unsupported archive format: {}", archive_path.display());
    };

    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let mut archive = Archive::new(reader);
    let mut extracted = 0usize;

    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read tar entries: {}", archive_path.display()))?
    {
        let mut entry = entry
            .with_context(|| format!("Failed to read tar entry: {}", archive_path.display()))?;

        let entry_path = entry
            .path()
            .context("Failed to get entry path")?
            .into_owned();
        reject_unsafe_path(&entry_path)?;

        let Some(relative_path) = strip_first_component(&entry_path) else {
            continue;
        };
        let output_path = dest_dir.join(&relative_path);

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
        } else if entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .context("Failed to get hard link target")?
                .with_context(|| format!("Hard link without target: {}", entry_path.display()))?
                .into_owned();
            reject_unsafe_path(&target)?;
            let target = strip_first_component(&target).with_context(|| {
                format!("Hard link points at the archive root: {}", entry_path.display())
            })?;
            link_file(&dest_dir.join(target), &output_path)?;
        } else {
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            entry
                .unpack(&output_path)
                .with_context(|| format!("Failed to extract: {}", output_path.display()))?;
        }
        extracted += 1;
    }

    debug!(entries = extracted, "Tar extraction finished");
    Ok(())
}

/// Extracts a ZIP archive, stripping a root folder shared by all entries.
///
/// # Errors
///
/// Returns an error if the archive is unreadable or an entry cannot be written.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;

    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {}", archive_path.display()))?;

    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let strip_prefix = find_common_root_folder(&mut archive);

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read archive entry {i}"))?;

        let entry_path = entry
            .enclosed_name()
            .with_context(|| format!("Invalid entry path in archive: entry {i}"))?;
        reject_unsafe_path(&entry_path)?;

        let relative_path = match &strip_prefix {
            Some(prefix) => match entry_path.strip_prefix(prefix) {
                Ok(p) if p.as_os_str().is_empty() => continue,
                Ok(p) => p.to_path_buf(),
                Err(_) => entry_path.clone(),
            },
            None => entry_path.clone(),
        };

        let output_path = dest_dir.join(&relative_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut outfile = File::create(&output_path)
            .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
        std::io::copy(&mut entry, &mut outfile)
            .with_context(|| format!("Failed to extract: {}", output_path.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&output_path, std::fs::Permissions::from_mode(mode & 0o7777))
                .with_context(|| format!("Failed to set permissions: {}", output_path.display()))?;
        }
    }

    Ok(())
}

/// Recreates a hard link from an archive, replacing an existing file.
fn link_file(original: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    if link.exists() {
        std::fs::remove_file(link)
            .with_context(|| format!("Failed to replace: {}", link.display()))?;
    }
    std::fs::hard_link(original, link).with_context(|| {
        format!(
            "Failed to hard link {} to {}",
            original.display(),
            link.display()
        )
    })
}

fn reject_unsafe_path(path: &Path) -> Result<()> {
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        bail!(
            "Refusing to extract path with parent directory or absolute reference: {}",
            path.display()
        );
    }
    Ok(())
}

/// Drops leading `.` components and the first real one. Returns `None` for
/// the top-level directory itself.
fn strip_first_component(path: &Path) -> Option<PathBuf> {
    let rest: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .skip(1)
        .collect();
    (!rest.as_os_str().is_empty()).then_some(rest)
}

/// Finds a common root folder shared by all ZIP entries.
///
/// Only returns a prefix when at least one entry is nested below it, so a
/// flat archive is never mistaken for a wrapped one. `bin` is never a
/// wrapper: it is the installation marker itself.
fn find_common_root_folder<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Option<PathBuf> {
    let mut common_root: Option<PathBuf> = None;
    let mut has_nested_entries = false;

    for i in 0..archive.len() {
        let entry = archive.by_index(i).ok()?;
        let path = entry.enclosed_name()?;

        if path.components().count() > 1 {
            has_nested_entries = true;
        }

        let root = PathBuf::from(path.components().next()?.as_os_str());
        match &common_root {
            None => common_root = Some(root),
            Some(existing) if existing != &root => return None,
            Some(_) => {}
        }
    }

    common_root.filter(|root| has_nested_entries && root.as_os_str() != INSTALL_MARKER)
}
