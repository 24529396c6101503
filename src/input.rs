//! Input resolution: turn a user-supplied path or URL into a [`PdfFile`].
//!
//! A `PdfFile` is what a browser hands over after a file picker: a name, a
//! declared MIME type and the raw bytes. The MIME type is sniffed from the
//! content first (`%PDF` magic) and from the extension second, so a `.pdf`
//! that is really a text file is reported as `application/octet-stream` and
//! rejected by the upload controller instead of being sent to the backend.

use crate::error::ChatError;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// MIME type accepted by the ingestion endpoint.
pub const PDF_MIME: &str = "application/pdf";

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A document selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PdfFile {
    /// Build a file with an explicit MIME type.
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Build a file whose MIME type is sniffed from its name and content.
    pub fn sniffed(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = sniff_mime(&file_name, &bytes).to_string();
        Self {
            file_name,
            mime_type,
            bytes,
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == PDF_MIME
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an in-memory file.
///
/// URLs are downloaded with the given timeout; anything else is read from
/// the local file system.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<PdfFile, ChatError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

/// Guess the MIME type of a file the way a browser file picker would.
pub fn sniff_mime(file_name: &str, bytes: &[u8]) -> &'static str {
    if bytes.starts_with(PDF_MAGIC) {
        return PDF_MIME;
    }
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        // Claims to be a PDF but the magic bytes say otherwise.
        Some("pdf") => "application/octet-stream",
        Some("txt") | Some("md") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        _ => "application/octet-stream",
    }
}

async fn read_local(path: &Path) -> Result<PdfFile, ChatError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ChatError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => ChatError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ChatError::Internal(format!("Failed to read {}: {}", path.display(), e)),
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    debug!("Read local file: {} ({} bytes)", path.display(), bytes.len());
    Ok(PdfFile::sniffed(file_name, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<PdfFile, ChatError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ChatError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ChatError::RequestTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ChatError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ChatError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let file_name = filename_from_url(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ChatError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes as '{}'", bytes.len(), file_name);
    Ok(PdfFile::sniffed(file_name, bytes.to_vec()))
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
