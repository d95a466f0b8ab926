//! Input resolution: turn a user-supplied path or URL into a [`Document`].
//!
//! The whole document is held in memory: inspection reports are a few pages
//! and pdfium can load straight from a byte slice, so no temp file is needed.
//! The declared media type is taken, in order, from an explicit override, the
//! HTTP `Content-Type` header, and the file extension. The classifier checks
//! it against the bytes later.

use crate::error::ScannoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// The accepted document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Jpeg,
    Png,
}

impl MediaType {
    /// Parse a MIME type, bare format name, or file extension.
    ///
    /// Case-insensitive; MIME parameters and a leading dot are ignored.
    /// Returns `None` for anything outside pdf, jpg, jpeg, png.
    pub fn parse(hint: &str) -> Option<Self> {
        let essence = hint.split(';').next().unwrap_or("").trim();
        let essence = essence.trim_start_matches('.').to_ascii_lowercase();
        match essence.as_str() {
            "pdf" | "application/pdf" | "application/x-pdf" => Some(MediaType::Pdf),
            "jpg" | "jpeg" | "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(MediaType::Jpeg),
            "png" | "image/png" => Some(MediaType::Png),
            _ => None,
        }
    }

    /// Detect the media type from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(MediaType::parse)
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, MediaType::Jpeg | MediaType::Png)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// An uploaded inspection document: raw bytes plus the declared media type.
///
/// The declared type is kept verbatim; [`crate::pipeline::classify`] decides
/// whether it is acceptable. Bytes are shared, so cloning is cheap and the
/// blocking PDF stages can take ownership of a handle.
#[derive(Clone)]
pub struct Document {
    bytes: Arc<[u8]>,
    declared_type: String,
    name: Option<String>,
}

impl Document {
    pub fn new(bytes: impl Into<Arc<[u8]>>, declared_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            declared_type: declared_type.into(),
            name: None,
        }
    }

    /// Attach a display name (file name or URL) used in logs and output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for log lines: the display name, else `"<document>"`.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<document>")
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("declared_type", &self.declared_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an in-memory [`Document`].
///
/// `media_override` replaces whatever type the extension or server declares.
pub async fn resolve_input(
    input: &str,
    media_override: Option<&str>,
    timeout_secs: u64,
) -> Result<Document, ScannoError> {
    if input.trim().is_empty() {
        return Err(ScannoError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, media_override, timeout_secs).await
    } else {
        read_local(input, media_override).await
    }
}

/// Read a local file, mapping I/O failures to input errors.
async fn read_local(path_str: &str, media_override: Option<&str>) -> Result<Document, ScannoError> {
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ScannoError::FileNotFound { path: path.clone() },
        std::io::ErrorKind::PermissionDenied => {
            ScannoError::PermissionDenied { path: path.clone() }
        }
        _ if path.is_dir() => ScannoError::InvalidInput {
            input: path_str.to_string(),
        },
        _ => ScannoError::FileNotFound { path: path.clone() },
    })?;

    let declared = match media_override {
        Some(m) => m.to_string(),
        None => path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string(),
    };

    debug!("Read local document: {} ({} bytes, declared '{}')", path.display(), bytes.len(), declared);
    Ok(Document::new(bytes, declared).with_name(path_str))
}

/// Download a URL into memory.
async fn download_url(
    url: &str,
    media_override: Option<&str>,
    timeout_secs: u64,
) -> Result<Document, ScannoError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ScannoError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| download_error(url, timeout_secs, e))?;

    if !response.status().is_success() {
        return Err(ScannoError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let declared = declared_type_for_url(url, media_override, &response);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_error(url, timeout_secs, e))?;

    info!("Downloaded {} bytes (declared '{}')", bytes.len(), declared);
    Ok(Document::new(bytes.to_vec(), declared).with_name(url))
}

/// The client timeout covers both the request and the body read.
fn download_error(url: &str, timeout_secs: u64, e: reqwest::Error) -> ScannoError {
    if e.is_timeout() {
        ScannoError::DownloadTimeout {
            url: url.to_string(),
            secs: timeout_secs,
        }
    } else {
        ScannoError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Pick the declared type for a download: override, then a recognised
/// `Content-Type`, then the URL path's extension.
fn declared_type_for_url(url: &str, media_override: Option<&str>, response: &reqwest::Response) -> String {
    if let Some(m) = media_override {
        return m.to_string();
    }

    let header = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if let Some(ct) = header {
        if MediaType::parse(ct).is_some() {
            return ct.to_string();
        }
    }

    extension_from_url(url)
        .or_else(|| header.map(str::to_string))
        .unwrap_or_default()
}

/// Extension of the last path segment of a URL, if it has one.
fn extension_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?.to_string();
    Path::new(&last)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/report.pdf"));
        assert!(is_url("http://example.com/report.jpg"));
        assert!(!is_url("/tmp/report.pdf"));
        assert!(!is_url("report.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn media_type_parse_accepts_mime_names_and_extensions() {
        assert_eq!(MediaType::parse("application/pdf"), Some(MediaType::Pdf));
        assert_eq!(MediaType::parse("PDF"), Some(MediaType::Pdf));
        assert_eq!(MediaType::parse(".pdf"), Some(MediaType::Pdf));
        assert_eq!(MediaType::parse("image/jpeg"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::parse("jpg"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::parse("JPEG"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::parse("image/png; charset=binary"), Some(MediaType::Png));
        assert_eq!(MediaType::parse("image/gif"), None);
        assert_eq!(MediaType::parse("docx"), None);
        assert_eq!(MediaType::parse(""), None);
    }

    #[test]
    fn media_type_from_path() {
        assert_eq!(
            MediaType::from_path(Path::new("/x/Report.PNG")),
            Some(MediaType::Png)
        );
        assert_eq!(MediaType::from_path(Path::new("report")), None);
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(
            extension_from_url("https://example.com/a/b/report.jpeg?x=1"),
            Some("jpeg".to_string())
        );
        assert_eq!(extension_from_url("https://example.com/download"), None);
    }

    #[tokio::test]
    async fn local_file_uses_extension_as_declared_type() {
        let mut tmp = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        tmp.write_all(b"%PDF-1.7 fake").unwrap();
        let path = tmp.path().to_string_lossy().to_string();

        let doc = resolve_input(&path, None, 5).await.unwrap();
        assert_eq!(doc.declared_type(), "pdf");
        assert_eq!(doc.bytes(), b"%PDF-1.7 fake");
        assert_eq!(doc.name(), Some(path.as_str()));
    }

    #[tokio::test]
    async fn override_replaces_extension() {
        let mut tmp = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        tmp.write_all(b"data").unwrap();
        let path = tmp.path().to_string_lossy().to_string();

        let doc = resolve_input(&path, Some("image/png"), 5).await.unwrap();
        assert_eq!(doc.declared_type(), "image/png");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", None, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ScannoError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn blank_input_is_invalid() {
        let err = resolve_input("  ", None, 5).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn stalled_body_is_a_download_timeout() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            // Headers promise 1000 bytes; only four ever arrive.
            sock.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: 1000\r\n\r\n%PDF",
            )
            .await
            .unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        });

        let url = format!("http://{addr}/inspection.pdf");
        let err = resolve_input(&url, None, 1).await.unwrap_err();
        assert_eq!(err.code(), "download_timeout", "got: {err}");
    }
}
