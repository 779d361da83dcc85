//! Post-processing: archive extraction and relocation.
//!
//! The engine hands a finished job directory (and the NZB's password, if
//! any) to a [`PostProcessor`]; the processor extracts whatever archives it
//! finds (RAR, ZIP, 7z), relocates loose files, and reports the final
//! directory. Extraction progress is published to the runtime state so the
//! control plane can render `extract_pct`/`extract_file`.

mod rar;
mod sevenz;
mod zip;

pub use rar::RarExtractor;
pub use sevenz::SevenZipExtractor;
pub use zip::ZipExtractor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::db::{Download, RuntimeState};
use crate::error::{Error, PostProcessError, Result};

/// Archive type detected by file extension
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveType {
    /// RAR archive (.rar, .r00 for split sets)
    Rar,
    /// 7-Zip archive (.7z)
    SevenZip,
    /// ZIP archive (.zip)
    Zip,
}

/// Detect archive type by file extension
pub fn detect_archive_type(path: &Path) -> Option<ArchiveType> {
    let ext = path.extension()?.to_str()?.to_lowercase();

    match ext.as_str() {
        "rar" | "r00" => Some(ArchiveType::Rar),
        "7z" => Some(ArchiveType::SevenZip),
        "zip" => Some(ArchiveType::Zip),
        _ => None,
    }
}

/// Takes an assembled job directory and produces the final output directory.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Process `job`, whose assembled files live under `job.path`.
    ///
    /// On success returns the directory the results landed in. The caller
    /// owns the `processing → completed/failed` transition.
    async fn process(&self, job: &Download) -> Result<PathBuf>;
}

/// Default post-processor: extract archives into the completion directory,
/// move everything else, and clean up the incomplete directory.
pub struct ArchiveExtractor {
    complete_dir: PathBuf,
    state: Arc<RuntimeState>,
}

impl ArchiveExtractor {
    /// Create an extractor that delivers into `complete_dir`.
    pub fn new(complete_dir: PathBuf, state: Arc<RuntimeState>) -> Self {
        Self { complete_dir, state }
    }

    /// Passwords to try, in priority order: the NZB's password first, then
    /// the empty password for unencrypted archives.
    fn password_candidates(job: &Download) -> Vec<String> {
        let mut passwords = Vec::new();
        if let Some(password) = &job.password
            && !password.is_empty()
        {
            passwords.push(password.clone());
        }
        passwords.push(String::new());
        passwords
    }

    /// Split a directory listing into (archives, loose files).
    ///
    /// Later volumes of a `.partNN.rar` set are neither: unrar consumes
    /// them while extracting the first volume, and cleanup removes them
    /// with the incomplete directory.
    fn scan(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut archives = Vec::new();
        let mut loose = Vec::new();

        for entry in std::fs::read_dir(dir).map_err(Error::Io)? {
            let path = entry.map_err(Error::Io)?.path();
            if path.is_dir() {
                loose.push(path);
            } else if is_later_rar_volume(&path) {
                continue;
            } else if detect_archive_type(&path).is_some() {
                archives.push(path);
            } else {
                loose.push(path);
            }
        }

        archives.sort();
        loose.sort();
        Ok((archives, loose))
    }
}

#[async_trait]
impl PostProcessor for ArchiveExtractor {
    async fn process(&self, job: &Download) -> Result<PathBuf> {
        let id = job.download_id();
        let source = PathBuf::from(job.path.as_deref().ok_or_else(|| {
            Error::PostProcess(PostProcessError::InvalidPath {
                path: PathBuf::new(),
                reason: "job has no assembled directory".to_string(),
            })
        })?);

        let dest = self.complete_dir.join(&job.name);
        tokio::fs::create_dir_all(&dest).await.map_err(Error::Io)?;

        let (archives, loose) = Self::scan(&source)?;
        let passwords = Self::password_candidates(job);
        let total = archives.len();

        info!(
            download_id = id.0,
            archives = total,
            loose = loose.len(),
            "post-processing assembled job"
        );

        for (index, archive) in archives.iter().enumerate() {
            let name = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.state
                .set_extraction_progress(id, (index as f32 / total as f32) * 100.0, &name);

            extract_with_passwords(id.0, archive, &dest, &passwords).await?;
        }

        for path in &loose {
            let target = dest.join(path.file_name().unwrap_or_default());
            move_path(path, &target)?;
        }

        self.state.set_extraction_progress(id, 100.0, "");

        if let Err(e) = tokio::fs::remove_dir_all(&source).await {
            // Leftover incomplete data is untidy, not fatal
            warn!(
                download_id = id.0,
                error = %e,
                "failed to clean up incomplete directory"
            );
        }

        Ok(dest)
    }
}

/// `.part02.rar` and up: continuation volumes of a multi-part set whose
/// extraction starts at `.part01.rar`.
fn is_later_rar_volume(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();

    let Some(stem) = name.strip_suffix(".rar") else {
        return false;
    };
    let Some(idx) = stem.rfind(".part") else {
        return false;
    };

    let number = &stem[idx + 5..];
    !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
        && number.parse::<u32>().map(|n| n > 1).unwrap_or(false)
}

/// Move a file or directory, falling back to copy+remove across devices.
fn move_path(source: &Path, dest: &Path) -> Result<()> {
    if std::fs::rename(source, dest).is_ok() {
        return Ok(());
    }

    if source.is_dir() {
        copy_dir(source, dest)?;
        std::fs::remove_dir_all(source).map_err(Error::Io)?;
    } else {
        std::fs::copy(source, dest).map_err(|e| {
            Error::PostProcess(PostProcessError::MoveFailed {
                source_path: source.to_path_buf(),
                dest_path: dest.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
        std::fs::remove_file(source).map_err(Error::Io)?;
    }

    Ok(())
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(Error::Io)?;
    for entry in std::fs::read_dir(source).map_err(Error::Io)? {
        let entry = entry.map_err(Error::Io)?;
        let target = dest.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(Error::Io)?;
        }
    }
    Ok(())
}

/// Try each password in order against one archive.
///
/// Wrong-password failures move to the next candidate; any other failure is
/// final. Extraction runs on the blocking pool: the unrar/zip/7z crates are
/// synchronous.
pub(crate) async fn extract_with_passwords(
    download_id: i64,
    archive_path: &Path,
    dest_path: &Path,
    passwords: &[String],
) -> Result<Vec<PathBuf>> {
    let archive_type = detect_archive_type(archive_path).ok_or_else(|| {
        Error::PostProcess(PostProcessError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason: "unknown archive type".to_string(),
        })
    })?;

    for (i, password) in passwords.iter().enumerate() {
        debug!(
            download_id,
            attempt = i + 1,
            total = passwords.len(),
            ?archive_path,
            "trying extraction password"
        );

        let archive = archive_path.to_path_buf();
        let dest = dest_path.to_path_buf();
        let password = password.clone();

        let result = spawn_blocking(move || match archive_type {
            ArchiveType::Rar => RarExtractor::try_extract(&archive, &password, &dest),
            ArchiveType::SevenZip => SevenZipExtractor::try_extract(&archive, &password, &dest),
            ArchiveType::Zip => ZipExtractor::try_extract(&archive, &password, &dest),
        })
        .await
        .map_err(|e| {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: format!("extraction task panicked: {e}"),
            })
        })?;

        match result {
            Ok(files) => {
                info!(
                    download_id,
                    ?archive_path,
                    extracted = files.len(),
                    "archive extracted"
                );
                return Ok(files);
            }
            Err(Error::PostProcess(PostProcessError::WrongPassword { .. })) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(Error::PostProcess(PostProcessError::AllPasswordsFailed {
        archive: archive_path.to_path_buf(),
        count: passwords.len(),
    }))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DownloadId;
    use std::io::Write;

    fn job_with_path(dir: &Path, password: Option<&str>) -> Download {
        Download {
            id: 9,
            name: "job-name".to_string(),
            category: None,
            status: crate::types::Status::Processing.to_i32(),
            total_bytes: 0,
            downloaded_bytes: 0,
            total_segments: 0,
            done_segments: 0,
            path: Some(dir.to_string_lossy().into_owned()),
            raw_nzb: Vec::new(),
            password: password.map(str::to_string),
            error_msg: None,
            created_at: 0,
            completed_at: None,
        }
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        let options = ::zip::write::FileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn later_rar_volumes_are_recognized() {
        assert!(is_later_rar_volume(Path::new("set.part02.rar")));
        assert!(is_later_rar_volume(Path::new("Set.PART10.RAR")));
        assert!(!is_later_rar_volume(Path::new("set.part01.rar")));
        assert!(!is_later_rar_volume(Path::new("set.rar")));
        assert!(!is_later_rar_volume(Path::new("set.partial.rar")));
        assert!(!is_later_rar_volume(Path::new("set.part02.zip")));
    }

    #[test]
    fn archive_types_detect_by_extension() {
        assert_eq!(detect_archive_type(Path::new("a.rar")), Some(ArchiveType::Rar));
        assert_eq!(detect_archive_type(Path::new("a.r00")), Some(ArchiveType::Rar));
        assert_eq!(detect_archive_type(Path::new("a.ZIP")), Some(ArchiveType::Zip));
        assert_eq!(detect_archive_type(Path::new("a.7z")), Some(ArchiveType::SevenZip));
        assert_eq!(detect_archive_type(Path::new("a.mkv")), None);
        assert_eq!(detect_archive_type(Path::new("noext")), None);
    }

    #[tokio::test]
    async fn loose_files_are_moved_to_the_completion_directory() {
        let root = tempfile::tempdir().unwrap();
        let incomplete = root.path().join("incomplete").join("job-name");
        let complete = root.path().join("complete");
        std::fs::create_dir_all(&incomplete).unwrap();
        std::fs::write(incomplete.join("movie.mkv"), b"video bytes").unwrap();

        let state = Arc::new(RuntimeState::new());
        let extractor = ArchiveExtractor::new(complete.clone(), Arc::clone(&state));
        let job = job_with_path(&incomplete, None);

        let dest = extractor.process(&job).await.unwrap();
        assert_eq!(dest, complete.join("job-name"));
        assert_eq!(
            std::fs::read(dest.join("movie.mkv")).unwrap(),
            b"video bytes"
        );
        assert!(!incomplete.exists(), "incomplete directory is cleaned up");
    }

    #[tokio::test]
    async fn zip_archives_are_extracted_into_the_destination() {
        let root = tempfile::tempdir().unwrap();
        let incomplete = root.path().join("incomplete").join("job-name");
        let complete = root.path().join("complete");
        std::fs::create_dir_all(&incomplete).unwrap();
        write_zip(
            &incomplete.join("bundle.zip"),
            &[("inner.txt", b"zipped payload")],
        );

        let state = Arc::new(RuntimeState::new());
        let extractor = ArchiveExtractor::new(complete.clone(), Arc::clone(&state));
        let job = job_with_path(&incomplete, None);

        let dest = extractor.process(&job).await.unwrap();
        assert_eq!(
            std::fs::read(dest.join("inner.txt")).unwrap(),
            b"zipped payload"
        );
    }

    #[tokio::test]
    async fn extraction_progress_is_published_and_finishes_at_100() {
        let root = tempfile::tempdir().unwrap();
        let incomplete = root.path().join("incomplete").join("job-name");
        let complete = root.path().join("complete");
        std::fs::create_dir_all(&incomplete).unwrap();
        write_zip(&incomplete.join("bundle.zip"), &[("a.txt", b"a")]);

        let state = Arc::new(RuntimeState::new());
        let extractor = ArchiveExtractor::new(complete, Arc::clone(&state));
        let job = job_with_path(&incomplete, None);

        extractor.process(&job).await.unwrap();
        let (percent, _file) = state.extraction_progress(DownloadId::new(9)).unwrap();
        assert_eq!(percent, 100.0);
    }

    #[tokio::test]
    async fn corrupt_archive_fails_the_job() {
        let root = tempfile::tempdir().unwrap();
        let incomplete = root.path().join("incomplete").join("job-name");
        let complete = root.path().join("complete");
        std::fs::create_dir_all(&incomplete).unwrap();
        std::fs::write(incomplete.join("bad.zip"), b"this is not a zip").unwrap();

        let state = Arc::new(RuntimeState::new());
        let extractor = ArchiveExtractor::new(complete, state);
        let job = job_with_path(&incomplete, None);

        let err = extractor.process(&job).await.unwrap_err();
        assert!(
            matches!(err, Error::PostProcess(_)),
            "got: {err}"
        );
    }

    #[test]
    fn password_candidates_put_the_nzb_password_first() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_with_path(dir.path(), Some("secret"));
        assert_eq!(
            ArchiveExtractor::password_candidates(&job),
            vec!["secret".to_string(), String::new()]
        );

        let job = job_with_path(dir.path(), None);
        assert_eq!(
            ArchiveExtractor::password_candidates(&job),
            vec![String::new()]
        );
    }
}
