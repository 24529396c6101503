//! Error type for the pdfchat library.
//!
//! Every fallible operation returns [`ChatError`]. Most of them never reach
//! the caller of [`crate::ChatSession`] though: failures of the asynchronous
//! upload, question and export work are terminal at the controller that owns
//! them. They are logged, forwarded to the configured
//! [`crate::SessionObserver`], and show up only as a state that does not
//! advance (an upload stuck in `Failed`, a question that never enters the
//! transcript).
//!
//! Errors that *are* returned synchronously are the validation failures a
//! user interface has to react to immediately: wrong file type, empty
//! question, asking before the document is ingested.

use std::any::Any;
use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the pdfchat library.
#[derive(Debug, Error)]
pub enum ChatError {
    // ── Input / validation errors ─────────────────────────────────────────
    /// The selected file is not a PDF. Nothing was uploaded.
    #[error("'{file_name}' is not a PDF (detected type: {mime_type})\nPlease select a PDF file.")]
    NotAPdf { file_name: String, mime_type: String },

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but the download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// The question was empty or whitespace only.
    #[error("Question is empty")]
    EmptyQuestion,

    // ── Session policy errors ─────────────────────────────────────────────
    /// Questions are only accepted once the document is ingested.
    #[error("No document is ready yet (upload status: {status})\nUpload a PDF and wait for ingestion to finish.")]
    DocumentNotReady { status: String },

    /// `retry` was called while no failed upload is pending.
    #[error("Nothing to retry: the last upload has not failed")]
    NothingToRetry,

    // ── Backend errors ────────────────────────────────────────────────────
    /// The request never produced an HTTP response.
    #[error("Backend at '{url}' is unreachable: {reason}")]
    BackendUnreachable { url: String, reason: String },

    /// The backend answered with a non-success status.
    #[error("Backend rejected the request with HTTP {status}: {message}")]
    BackendRejected { status: u16, message: String },

    /// The request did not complete within the configured timeout.
    #[error("Request to '{url}' timed out after {secs}s")]
    RequestTimeout { url: String, secs: u64 },

    /// The response body did not have the expected shape.
    #[error("Malformed backend response: {detail}")]
    MalformedResponse { detail: String },

    // ── Export errors ─────────────────────────────────────────────────────
    /// The transcript could not be turned into a bitmap.
    #[error("Rasterisation failed: {detail}")]
    RasterisationFailed { detail: String },

    /// The bitmap could not be assembled into a PDF document.
    #[error("PDF assembly failed: {detail}")]
    DocumentAssemblyFailed { detail: String },

    /// Could not create or write the exported document.
    #[error("Failed to write export file '{path}': {source}")]
    ExportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Whether a user-facing layer should present this error as a blocking
    /// alert (as opposed to a diagnostic that only goes to the log).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::NotAPdf { .. }
                | ChatError::EmptyQuestion
                | ChatError::DocumentNotReady { .. }
                | ChatError::NothingToRetry
        )
    }

    /// Turn the payload of a caught panic into an [`ChatError::Internal`].
    pub(crate) fn from_panic(what: &str, payload: Box<dyn Any + Send>) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        ChatError::Internal(format!("{what} panicked: {detail}"))
    }
}
