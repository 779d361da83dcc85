//! ZIP extraction via the zip crate.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, PostProcessError, Result};

/// Archive extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    fn classify_error(e: impl std::fmt::Display, archive_path: &Path) -> Error {
        let err_str = e.to_string();
        if err_str.contains("password") || err_str.contains("encrypted") {
            Error::PostProcess(PostProcessError::WrongPassword {
                archive: archive_path.to_path_buf(),
            })
        } else {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: err_str,
            })
        }
    }

    /// Open a ZIP entry by index, decrypting when a password is supplied.
    fn open_entry<'a>(
        archive: &'a mut zip::ZipArchive<std::fs::File>,
        index: usize,
        password: &str,
        archive_path: &Path,
    ) -> Result<zip::read::ZipFile<'a>> {
        if password.is_empty() {
            archive
                .by_index(index)
                .map_err(|e| Self::classify_error(e, archive_path))
        } else {
            archive
                .by_index_decrypt(index, password.as_bytes())
                .map_err(|e| Self::classify_error(e, archive_path))?
                .map_err(|_| {
                    Error::PostProcess(PostProcessError::WrongPassword {
                        archive: archive_path.to_path_buf(),
                    })
                })
        }
    }

    /// Extract a single entry, creating parent directories as needed.
    fn extract_entry(
        mut file: zip::read::ZipFile,
        dest_path: &Path,
    ) -> Result<Option<PathBuf>> {
        // enclosed_name rejects traversal attempts
        let Some(relative) = file.enclosed_name().map(Path::to_path_buf) else {
            debug!("skipping ZIP entry with unsafe path");
            return Ok(None);
        };
        let file_path = dest_path.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&file_path).map_err(Error::Io)?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let mut outfile = std::fs::File::create(&file_path).map_err(Error::Io)?;
        std::io::copy(&mut file, &mut outfile).map_err(Error::Io)?;

        Ok(Some(file_path))
    }

    /// Try to extract a ZIP archive with a single password.
    pub fn try_extract(
        archive_path: &Path,
        password: &str,
        dest_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting ZIP extraction");

        std::fs::create_dir_all(dest_path).map_err(Error::Io)?;

        let file = std::fs::File::open(archive_path).map_err(Error::Io)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| Self::classify_error(e, archive_path))?;

        let mut extracted_files = Vec::new();
        for i in 0..archive.len() {
            let entry = Self::open_entry(&mut archive, i, password, archive_path)?;
            if let Some(path) = Self::extract_entry(entry, dest_path)? {
                extracted_files.push(path);
            }
        }

        Ok(extracted_files)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_entries_with_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(
            &archive,
            &[("top.txt", b"top"), ("sub/inner.txt", b"inner")],
        );

        let dest = dir.path().join("out");
        let files = ZipExtractor::try_extract(&archive, "", &dest).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read(dest.join("top.txt")).unwrap(), b"top");
        assert_eq!(
            std::fs::read(dest.join("sub").join("inner.txt")).unwrap(),
            b"inner"
        );
    }

    #[test]
    fn corrupt_archive_is_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.zip");
        std::fs::write(&archive, b"garbage").unwrap();

        let err = ZipExtractor::try_extract(&archive, "", dir.path()).unwrap_err();
        assert!(
            matches!(
                err,
                Error::PostProcess(PostProcessError::ExtractionFailed { .. })
            ),
            "got: {err}"
        );
    }
}
