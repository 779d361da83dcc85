//! Utility functions: disk space, job names, SABnzbd display formatting.

use std::path::Path;

/// Get available disk space for a given path.
///
/// Uses statvfs on Unix. The preflight check compares this against a job's
/// total bytes before the download starts.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid null-terminated C string, stat is zeroed
        // before the call, and the struct is only read after a 0 return.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is what unprivileged users may actually allocate
            let available = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available)
        }
    }

    #[cfg(not(unix))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "disk space checking is not supported on this platform",
        ))
    }
}

/// Make a job name safe to use as a directory component.
///
/// Path separators and parent references would let an NZB name escape the
/// incomplete root.
pub fn sanitize_job_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derive a job name from an NZB download response.
///
/// Prefers the `Content-Disposition` filename (plain or RFC 5987 encoded),
/// falls back to the URL's last path segment, then to "download". The
/// `.nzb` extension is stripped either way.
pub fn extract_filename_from_response(response: &reqwest::Response, url: &str) -> String {
    if let Some(disposition) = response.headers().get("content-disposition")
        && let Ok(value) = disposition.to_str()
    {
        for part in value.split(';') {
            let part = part.trim();
            if let Some(filename) = part.strip_prefix("filename=") {
                let filename = filename.trim_matches('"');
                if let Some(stem) = Path::new(filename).file_stem().and_then(|s| s.to_str()) {
                    return stem.to_string();
                }
                return filename.to_string();
            }
            if let Some(encoded) = part.strip_prefix("filename*=") {
                // RFC 5987: charset'lang'percent-encoded-name
                if let Some(idx) = encoded.rfind('\'')
                    && let Ok(decoded) = urlencoding::decode(&encoded[idx + 1..])
                {
                    if let Some(stem) =
                        Path::new(decoded.as_ref()).file_stem().and_then(|s| s.to_str())
                    {
                        return stem.to_string();
                    }
                    return decoded.to_string();
                }
            }
        }
    }

    if let Ok(parsed) = url::Url::parse(url)
        && let Some(mut segments) = parsed.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        if let Some(stem) = Path::new(last).file_stem().and_then(|s| s.to_str()) {
            return stem.to_string();
        }
        return last.to_string();
    }

    "download".to_string()
}

/// Human-readable size the way SABnzbd renders it ("1.4 GB", "523.0 KB").
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Time-left string the way SABnzbd renders it ("0:07:31").
pub fn format_timeleft(remaining_bytes: u64, speed_bps: u64) -> String {
    if speed_bps == 0 {
        return "0:00:00".to_string();
    }

    let seconds = remaining_bytes / speed_bps;
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn available_space_is_positive_for_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let available = get_available_space(dir.path()).unwrap();
        assert!(available > 0);
    }

    #[cfg(unix)]
    #[test]
    fn available_space_errors_for_a_missing_path() {
        assert!(get_available_space(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn job_names_lose_path_separators() {
        assert_eq!(sanitize_job_name("My.Show.S01"), "My.Show.S01");
        assert_eq!(sanitize_job_name("evil/../escape"), "evil_.._escape");
        assert_eq!(sanitize_job_name("back\\slash"), "back_slash");
    }

    #[test]
    fn dot_only_or_empty_names_fall_back() {
        assert_eq!(sanitize_job_name(""), "download");
        assert_eq!(sanitize_job_name("..."), "download");
        assert_eq!(sanitize_job_name("  .hidden. "), "hidden");
    }

    #[test]
    fn sizes_format_like_sabnzbd() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_468_006_400), "1.4 GB");
    }

    #[test]
    fn timeleft_formats_hours_minutes_seconds() {
        assert_eq!(format_timeleft(0, 0), "0:00:00");
        assert_eq!(format_timeleft(1000, 0), "0:00:00");
        assert_eq!(format_timeleft(4_510_000, 10_000), "0:07:31");
        assert_eq!(format_timeleft(72_000_000, 10_000), "2:00:00");
    }

    // -----------------------------------------------------------------------
    // extract_filename_from_response
    // -----------------------------------------------------------------------

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_response(
        path_str: &str,
        template: ResponseTemplate,
    ) -> (reqwest::Response, String) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(path_str))
            .respond_with(template)
            .mount(&server)
            .await;

        let url = format!("{}{}", server.uri(), path_str);
        let resp = reqwest::get(&url).await.unwrap();
        (resp, url)
    }

    #[tokio::test]
    async fn filename_from_content_disposition_strips_extension() {
        let (resp, url) = mock_response(
            "/download/123",
            ResponseTemplate::new(200).insert_header(
                "Content-Disposition",
                r#"attachment; filename="Show.S01E01.nzb""#,
            ),
        )
        .await;

        assert_eq!(extract_filename_from_response(&resp, &url), "Show.S01E01");
    }

    #[tokio::test]
    async fn filename_from_rfc5987_encoded_header() {
        let (resp, url) = mock_response(
            "/download/456",
            ResponseTemplate::new(200).insert_header(
                "Content-Disposition",
                "attachment; filename*=UTF-8''with%20spaces.nzb",
            ),
        )
        .await;

        assert_eq!(extract_filename_from_response(&resp, &url), "with spaces");
    }

    #[tokio::test]
    async fn filename_falls_back_to_url_path_then_download() {
        let (resp, url) = mock_response("/files/Some.Post.nzb", ResponseTemplate::new(200)).await;
        assert_eq!(extract_filename_from_response(&resp, &url), "Some.Post");

        let (resp, _url) = mock_response("/", ResponseTemplate::new(200)).await;
        assert_eq!(
            extract_filename_from_response(&resp, "http://example.com/"),
            "download"
        );
        assert_eq!(
            extract_filename_from_response(&resp, "not a url"),
            "download"
        );
    }
}
