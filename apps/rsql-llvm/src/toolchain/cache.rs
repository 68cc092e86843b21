//! Cache state of an installation directory.

use std::fmt;
use std::path::Path;

/// Progress of an installation, derived from marker files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing has been fetched.
    Absent,
    /// The archive is on disk but has not been extracted.
    PartiallyFetched,
    /// The `bin` directory exists.
    Complete,
}

impl CacheState {
    /// Inspects `dir` for the `bin` marker and the downloaded archive.
    #[must_use]
    pub fn inspect(dir: &Path, archive_name: &str) -> Self {
        if dir.join("bin").is_dir() {
            Self::Complete
        } else if dir.join(archive_name).is_file() {
            Self::PartiallyFetched
        } else {
            Self::Absent
        }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::PartiallyFetched => "archive downloaded, not extracted",
            Self::Complete => "installed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_test_dir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("rsql_cache_{}_{}", name, rand::random::<u64>()));
        std::fs::create_dir_all(&dir).expect("Should create temp dir");
        dir
    }

    #[test]
    fn empty_dir_is_absent() {
        let dir = temp_test_dir("absent");
        assert_eq!(CacheState::inspect(&dir, "llvm.tar.xz"), CacheState::Absent);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_dir_is_absent() {
        let dir = temp_test_dir("missing").join("nope");
        assert_eq!(CacheState::inspect(&dir, "llvm.tar.xz"), CacheState::Absent);
    }

    #[test]
    fn archive_only_is_partially_fetched() {
        let dir = temp_test_dir("partial");
        std::fs::write(dir.join("llvm.tar.xz"), b"data").unwrap();
        assert_eq!(
            CacheState::inspect(&dir, "llvm.tar.xz"),
            CacheState::PartiallyFetched
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bin_marks_complete_with_or_without_archive() {
        let dir = temp_test_dir("complete");
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        assert_eq!(CacheState::inspect(&dir, "llvm.tar.xz"), CacheState::Complete);

        std::fs::write(dir.join("llvm.tar.xz"), b"data").unwrap();
        assert_eq!(CacheState::inspect(&dir, "llvm.tar.xz"), CacheState::Complete);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn temp_download_does_not_count_as_archive() {
        let dir = temp_test_dir("tmp");
        std::fs::write(dir.join("llvm.tar.xz.tmp"), b"partial").unwrap();
        assert_eq!(CacheState::inspect(&dir, "llvm.tar.xz"), CacheState::Absent);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
