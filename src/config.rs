//! Configuration types for a chat session.
//!
//! Every knob lives in [`ChatConfig`], built through [`ChatConfigBuilder`].
//! The builder clamps numeric values into their valid range and `build()`
//! rejects the combinations that can never work (unparseable backend URL,
//! endpoint paths without a leading slash).

use crate::error::ChatError;
use crate::observer::ObserverRef;
use crate::transcript::DEFAULT_GREETING;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a [`crate::ChatSession`].
///
/// # Example
/// ```rust
/// use pdfchat::{AnswerOrdering, ChatConfig, QuestionPolicy};
///
/// let config = ChatConfig::builder()
///     .backend_url("https://pdf-qa.example.com")
///     .question_policy(QuestionPolicy::RequireReady)
///     .answer_ordering(AnswerOrdering::Submission)
///     .build()
///     .unwrap();
/// assert_eq!(config.upload_path, "/upload_pdf/");
/// ```
#[derive(Clone)]
pub struct ChatConfig {
    /// Base URL of the question-answering backend. Default: `http://127.0.0.1:8000`.
    pub backend_url: String,

    /// Path of the ingestion endpoint. Default: `/upload_pdf/`.
    pub upload_path: String,

    /// Path of the question endpoint. Default: `/ask_question/`.
    pub question_path: String,

    /// Value sent as `Access-Control-Allow-Origin` on every request.
    ///
    /// Has no effect on server-side CORS enforcement; only kept for backends
    /// that log it. Default: None (header not sent).
    pub frontend_origin: Option<String>,

    /// Timeout for one upload request in seconds. Default: 300.
    ///
    /// Ingestion embeds the whole document before answering, so this is far
    /// longer than the question timeout.
    pub upload_timeout_secs: u64,

    /// Timeout for one question request in seconds. Default: 120.
    pub question_timeout_secs: u64,

    /// Whether questions are accepted before the document is ingested.
    pub question_policy: QuestionPolicy,

    /// How concurrently resolving answers are ordered in the transcript.
    pub answer_ordering: AnswerOrdering,

    /// First assistant message of the transcript.
    pub greeting: String,

    /// Upscale factor applied when rasterising the transcript. Range 1–4. Default: 2.
    pub export_scale: u32,

    /// Name of the exported document. Default: `chat.pdf`.
    pub export_file_name: String,

    /// Directory the export is written to.
    ///
    /// None means the platform download directory, or the current directory
    /// when the platform has none.
    pub export_dir: Option<PathBuf>,

    /// Logical width of the rendered transcript in pixels, before scaling.
    /// Range 240–2000. Default: 600.
    pub render_width: u32,

    /// Receives upload, transcript and export events.
    pub observer: Option<ObserverRef>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            upload_path: "/upload_pdf/".to_string(),
            question_path: "/ask_question/".to_string(),
            frontend_origin: None,
            upload_timeout_secs: 300,
            question_timeout_secs: 120,
            question_policy: QuestionPolicy::default(),
            answer_ordering: AnswerOrdering::default(),
            greeting: DEFAULT_GREETING.to_string(),
            export_scale: 2,
            export_file_name: "chat.pdf".to_string(),
            export_dir: None,
            render_width: 600,
            observer: None,
        }
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("backend_url", &self.backend_url)
            .field("upload_path", &self.upload_path)
            .field("question_path", &self.question_path)
            .field("frontend_origin", &self.frontend_origin)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("question_timeout_secs", &self.question_timeout_secs)
            .field("question_policy", &self.question_policy)
            .field("answer_ordering", &self.answer_ordering)
            .field("export_scale", &self.export_scale)
            .field("export_file_name", &self.export_file_name)
            .field("export_dir", &self.export_dir)
            .field("render_width", &self.render_width)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn SessionObserver>"))
            .finish()
    }
}

impl ChatConfig {
    /// Create a new builder for `ChatConfig`.
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder {
            config: Self::default(),
        }
    }

    /// Full URL of the ingestion endpoint.
    pub fn upload_url(&self) -> String {
        join_url(&self.backend_url, &self.upload_path)
    }

    /// Full URL of the question endpoint.
    pub fn question_url(&self) -> String {
        join_url(&self.backend_url, &self.question_path)
    }

    /// Directory the export is written to, after applying the fallbacks.
    pub fn resolved_export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Builder for [`ChatConfig`].
#[derive(Debug)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    pub fn upload_path(mut self, path: impl Into<String>) -> Self {
        self.config.upload_path = path.into();
        self
    }

    pub fn question_path(mut self, path: impl Into<String>) -> Self {
        self.config.question_path = path.into();
        self
    }

    pub fn frontend_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.frontend_origin = Some(origin.into());
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs.max(1);
        self
    }

    pub fn question_timeout_secs(mut self, secs: u64) -> Self {
        self.config.question_timeout_secs = secs.max(1);
        self
    }

    pub fn question_policy(mut self, policy: QuestionPolicy) -> Self {
        self.config.question_policy = policy;
        self
    }

    pub fn answer_ordering(mut self, ordering: AnswerOrdering) -> Self {
        self.config.answer_ordering = ordering;
        self
    }

    pub fn greeting(mut self, greeting: impl Into<String>) -> Self {
        self.config.greeting = greeting.into();
        self
    }

    pub fn export_scale(mut self, scale: u32) -> Self {
        self.config.export_scale = scale.clamp(1, 4);
        self
    }

    pub fn export_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.export_file_name = name.into();
        self
    }

    pub fn export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.export_dir = Some(dir.into());
        self
    }

    pub fn render_width(mut self, px: u32) -> Self {
        self.config.render_width = px.clamp(240, 2000);
        self
    }

    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ChatConfig, ChatError> {
        let c = &self.config;
        let url = reqwest::Url::parse(&c.backend_url).map_err(|e| {
            ChatError::InvalidConfig(format!("backend URL '{}': {}", c.backend_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::InvalidConfig(format!(
                "backend URL must be http or https, got '{}'",
                url.scheme()
            )));
        }
        for (name, path) in [("upload", &c.upload_path), ("question", &c.question_path)] {
            if !path.starts_with('/') {
                return Err(ChatError::InvalidConfig(format!(
                    "{name} path must start with '/', got '{path}'"
                )));
            }
        }
        if c.export_file_name.trim().is_empty()
            || c.export_file_name.contains(['/', '\\'])
        {
            return Err(ChatError::InvalidConfig(format!(
                "export file name must be a bare file name, got '{}'",
                c.export_file_name
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Whether questions may be sent before the uploaded document is ready.
///
/// | Policy | Behaviour |
/// |--------|-----------|
/// | `Permissive` | Always forward; the backend decides (it answers HTTP 400 without a document). Default. |
/// | `RequireReady` | Reject client-side with [`ChatError::DocumentNotReady`] unless the upload status is `Ready`. |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuestionPolicy {
    #[default]
    Permissive,
    RequireReady,
}

/// How answers of concurrently in-flight questions enter the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnswerOrdering {
    /// Append each answer as soon as it resolves. Two racing questions may
    /// appear in the opposite order from how they were asked.
    Resolution,
    /// Append answers strictly in the order the questions were submitted.
    /// Requests still run concurrently. (default)
    #[default]
    Submission,
    /// Only the latest submitted question may produce an exchange; answers
    /// to superseded questions are discarded.
    LatestOnly,
}
