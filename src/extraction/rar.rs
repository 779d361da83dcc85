//! RAR extraction via the unrar crate.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, PostProcessError, Result};

/// Archive extractor for RAR files and split .r00 sets
pub struct RarExtractor;

impl RarExtractor {
    /// Check if an unrar error indicates a password problem
    fn is_password_error(error_msg: &str) -> bool {
        error_msg.contains("password")
            || error_msg.contains("encrypted")
            || error_msg.contains("ERAR_BAD_PASSWORD")
    }

    fn convert_unrar_error(e: unrar::error::UnrarError, archive_path: &Path) -> Error {
        let err_str = e.to_string();
        if Self::is_password_error(&err_str) {
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

    /// Try to extract a RAR archive with a single password.
    pub fn try_extract(
        archive_path: &Path,
        password: &str,
        dest_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting RAR extraction");

        std::fs::create_dir_all(dest_path).map_err(Error::Io)?;

        let archive = if password.is_empty() {
            unrar::Archive::new(archive_path)
        } else {
            unrar::Archive::with_password(archive_path, password.as_bytes())
        };

        let processor = archive
            .open_for_processing()
            .map_err(|e| Self::convert_unrar_error(e, archive_path))?;

        let mut extracted_files = Vec::new();
        let mut at_header = processor;

        loop {
            let at_file = match at_header.read_header() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(Self::convert_unrar_error(e, archive_path)),
            };

            let header = at_file.entry();

            // Strip any non-normal components so hostile entries cannot
            // escape the destination
            let sanitized = Path::new(&header.filename)
                .components()
                .filter(|c| matches!(c, std::path::Component::Normal(_)))
                .collect::<PathBuf>();

            if sanitized.as_os_str().is_empty() {
                at_header = at_file.skip().map_err(|e| {
                    Error::PostProcess(PostProcessError::ExtractionFailed {
                        archive: archive_path.to_path_buf(),
                        reason: format!("failed to skip unsafe entry: {e}"),
                    })
                })?;
                continue;
            }

            let file_path = dest_path.join(&sanitized);

            if !header.is_directory() {
                at_header = at_file
                    .extract_to(&file_path)
                    .map_err(|e| Self::convert_unrar_error(e, archive_path))?;
                extracted_files.push(file_path);
            } else {
                at_header = at_file.skip().map_err(|e| {
                    Error::PostProcess(PostProcessError::ExtractionFailed {
                        archive: archive_path.to_path_buf(),
                        reason: format!("failed to skip directory: {e}"),
                    })
                })?;
            }
        }

        Ok(extracted_files)
    }
}
