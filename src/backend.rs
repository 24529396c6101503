//! The remote question-answering service.
//!
//! The backend is opaque: it exposes one ingestion endpoint and one question
//! endpoint and nothing else. [`Backend`] is the seam the controllers talk
//! to, so tests can script answers and resolution order without a network.
//! [`HttpBackend`] is the production implementation on top of `reqwest`.
//!
//! ## Wire format
//!
//! ```text
//! POST {base}/upload_pdf/     multipart: file=<pdf bytes>      → 2xx {"message": "..."}
//! POST {base}/ask_question/   multipart: question=<text>       → 2xx {"answer": "..."}
//! any failure                                                  → 4xx/5xx {"error": "..."}
//! ```

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::input::PdfFile;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Acknowledgement of a successful ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Human-readable status line, when the backend sent one.
    pub message: Option<String>,
}

/// The two operations the client needs from the remote service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Send `file` for ingestion. Returns once the backend has indexed it.
    async fn upload_pdf(&self, file: &PdfFile) -> Result<UploadReceipt, ChatError>;

    /// Ask a question about the ingested document and return the answer text.
    async fn ask_question(&self, question: &str) -> Result<String, ChatError>;
}

/// [`Backend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    upload_url: String,
    question_url: String,
    upload_timeout_secs: u64,
    question_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct AnswerBody {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpBackend {
    /// Build a client with the shared request configuration from `config`.
    pub fn new(config: &ChatConfig) -> Result<Self, ChatError> {
        let mut headers = HeaderMap::new();
        if let Some(ref origin) = config.frontend_origin {
            let value = HeaderValue::from_str(origin).map_err(|e| {
                ChatError::InvalidConfig(format!("frontend origin '{origin}': {e}"))
            })?;
            headers.insert(
                HeaderName::from_static("access-control-allow-origin"),
                value,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("pdfchat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            upload_url: config.upload_url(),
            question_url: config.question_url(),
            upload_timeout_secs: config.upload_timeout_secs,
            question_timeout_secs: config.question_timeout_secs,
        })
    }

    async fn post_form(
        &self,
        url: &str,
        form: Form,
        timeout_secs: u64,
    ) -> Result<Vec<u8>, ChatError> {
        let response = self
            .client
            .post(url)
            .multipart(form)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| transport_error(url, timeout_secs, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, timeout_secs, e))?;

        if !status.is_success() {
            return Err(ChatError::BackendRejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn upload_pdf(&self, file: &PdfFile) -> Result<UploadReceipt, ChatError> {
        info!(
            "Uploading '{}' ({} bytes) to {}",
            file.file_name,
            file.bytes.len(),
            self.upload_url
        );

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| ChatError::Internal(format!("Invalid MIME type: {e}")))?;
        let form = Form::new().part("file", part);

        let body = self
            .post_form(&self.upload_url, form, self.upload_timeout_secs)
            .await?;

        let message = serde_json::from_slice::<MessageBody>(&body)
            .ok()
            .and_then(|b| b.message);
        debug!("Upload acknowledged: {:?}", message);
        Ok(UploadReceipt { message })
    }

    async fn ask_question(&self, question: &str) -> Result<String, ChatError> {
        debug!("Asking question ({} chars)", question.chars().count());
        let form = Form::new().text("question", question.to_string());

        let body = self
            .post_form(&self.question_url, form, self.question_timeout_secs)
            .await?;

        parse_answer(&body)
    }
}

/// Extract `answer` from a question response body.
fn parse_answer(body: &[u8]) -> Result<String, ChatError> {
    serde_json::from_slice::<AnswerBody>(body)
        .map(|b| b.answer)
        .map_err(|e| ChatError::MalformedResponse {
            detail: format!("expected {{\"answer\": string}}: {e}"),
        })
}

/// Best-effort human-readable reason from an error response body.
fn error_message(body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        return parsed.error;
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "no details".to_string()
    } else {
        text.chars().take(200).collect()
    }
}

fn transport_error(url: &str, timeout_secs: u64, e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::RequestTimeout {
            url: url.to_string(),
            secs: timeout_secs,
        }
    } else {
        ChatError::BackendUnreachable {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}
