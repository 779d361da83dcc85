//! 7z extraction via sevenz-rust.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, PostProcessError, Result};

/// Archive extractor for 7z files
pub struct SevenZipExtractor;

impl SevenZipExtractor {
    /// Try to extract a 7z archive with a single password.
    pub fn try_extract(
        archive_path: &Path,
        password: &str,
        dest_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting 7z extraction");

        std::fs::create_dir_all(dest_path).map_err(Error::Io)?;

        use sevenz_rust::Password;
        let result = if password.is_empty() {
            sevenz_rust::decompress_file(archive_path, dest_path)
        } else {
            sevenz_rust::decompress_file_with_password(
                archive_path,
                dest_path,
                Password::from(password),
            )
        };

        match result {
            Ok(()) => {
                Self::validate_extracted_paths(dest_path)?;
                Self::collect_extracted_files(dest_path)
            }
            Err(e) => {
                let err_str = e.to_string();
                if err_str.contains("password")
                    || err_str.contains("encrypted")
                    || err_str.contains("Wrong password")
                {
                    Err(Error::PostProcess(PostProcessError::WrongPassword {
                        archive: archive_path.to_path_buf(),
                    }))
                } else {
                    Err(Error::PostProcess(PostProcessError::ExtractionFailed {
                        archive: archive_path.to_path_buf(),
                        reason: err_str,
                    }))
                }
            }
        }
    }

    /// Reject extractions that escaped the destination (hostile entry names).
    fn validate_extracted_paths(dest_path: &Path) -> Result<()> {
        let canonical_dest = dest_path.canonicalize().map_err(Error::Io)?;

        fn check_dir(dir: &Path, canonical_dest: &Path) -> Result<()> {
            for entry in std::fs::read_dir(dir).map_err(Error::Io)? {
                let path = entry.map_err(Error::Io)?.path();
                let canonical = path.canonicalize().map_err(Error::Io)?;

                if !canonical.starts_with(canonical_dest) {
                    return Err(Error::PostProcess(PostProcessError::ExtractionFailed {
                        archive: dir.to_path_buf(),
                        reason: format!(
                            "path traversal detected: {} is outside the destination",
                            canonical.display()
                        ),
                    }));
                }

                if path.is_dir() {
                    check_dir(&path, canonical_dest)?;
                }
            }
            Ok(())
        }

        check_dir(dest_path, &canonical_dest)
    }

    /// Recursively collect all files (not directories) under `dir`.
    fn collect_extracted_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        fn visit(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
            for entry in std::fs::read_dir(dir).map_err(Error::Io)? {
                let path = entry.map_err(Error::Io)?.path();
                if path.is_dir() {
                    visit(&path, files)?;
                } else {
                    files.push(path);
                }
            }
            Ok(())
        }

        visit(dir, &mut files)?;
        Ok(files)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_archive_is_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.7z");
        std::fs::write(&archive, b"definitely not 7z").unwrap();

        let err = SevenZipExtractor::try_extract(&archive, "", dir.path()).unwrap_err();
        assert!(matches!(err, Error::PostProcess(_)), "got: {err}");
    }

    #[test]
    fn collect_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("a/b/deep.bin"), b"y").unwrap();

        let files = SevenZipExtractor::collect_extracted_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
    }
}
