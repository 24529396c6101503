//! The chat session: one document, one transcript, one backend.
//!
//! [`ChatSession`] wires the transcript, the two controllers and the
//! exporter together and is the surface a front end talks to. It owns the
//! checks that sit between user input and the controllers: empty questions
//! and the [`QuestionPolicy`].

use crate::backend::{Backend, HttpBackend};
use crate::config::{ChatConfig, QuestionPolicy};
use crate::error::ChatError;
use crate::export::{DocumentSink, ExportReport, Rasterizer, TranscriptExporter};
use crate::input::{resolve_input, PdfFile};
use crate::question::{PendingQuestion, QuestionController};
use crate::transcript::{Exchange, Message, TranscriptStore};
use crate::upload::{PendingUpload, UploadController, UploadState};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// A chat about one uploaded PDF.
///
/// All methods that dispatch work need a tokio runtime.
///
/// # Example
/// ```rust,no_run
/// use pdfchat::{ChatConfig, ChatSession};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = ChatSession::new(ChatConfig::default())?;
///
/// let state = session.select_path("report.pdf").await?.settled().await;
/// println!("upload: {}", state.status);
///
/// if let Some(exchange) = session.ask("What is the summary?").await? {
///     println!("{}", exchange.answer);
/// }
/// session.export().await;
/// # Ok(())
/// # }
/// ```
pub struct ChatSession {
    config: ChatConfig,
    store: TranscriptStore,
    uploads: UploadController,
    questions: QuestionController,
    exporter: TranscriptExporter,
}

impl ChatSession {
    /// Session talking to the HTTP backend described by `config`.
    pub fn new(config: ChatConfig) -> Result<Self, ChatError> {
        let backend = HttpBackend::new(&config)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Session over any [`Backend`].
    pub fn with_backend(config: ChatConfig, backend: Arc<dyn Backend>) -> Self {
        let store = TranscriptStore::new(config.greeting.clone());
        let observer = config.observer.clone();

        let uploads = UploadController::new(Arc::clone(&backend), observer.clone());
        let questions = QuestionController::new(
            backend,
            store.clone(),
            config.answer_ordering,
            observer,
        );
        let exporter = TranscriptExporter::from_config(&config);

        debug!("Session created: {:?}", config);
        Self {
            config,
            store,
            uploads,
            questions,
            exporter,
        }
    }

    /// Replace the export rasteriser.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.exporter = self.exporter.with_rasterizer(rasterizer);
        self
    }

    /// Replace where exports are written.
    pub fn with_sink(mut self, sink: Arc<dyn DocumentSink>) -> Self {
        self.exporter = self.exporter.with_sink(sink);
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    // ── Upload ───────────────────────────────────────────────────────────

    /// Validate and upload `file`. See [`UploadController::select_file`].
    pub fn select_file(&self, file: PdfFile) -> Result<PendingUpload, ChatError> {
        self.uploads.select_file(file)
    }

    /// Read a local path or download a URL, then upload it.
    pub async fn select_path(&self, input: &str) -> Result<PendingUpload, ChatError> {
        let file = resolve_input(input, self.config.upload_timeout_secs).await?;
        self.select_file(file)
    }

    /// Re-send the last file after a failed upload.
    pub fn retry_upload(&self) -> Result<PendingUpload, ChatError> {
        self.uploads.retry()
    }

    pub fn upload_state(&self) -> UploadState {
        self.uploads.current_state()
    }

    pub fn subscribe_upload(&self) -> watch::Receiver<UploadState> {
        self.uploads.subscribe()
    }

    // ── Questions ────────────────────────────────────────────────────────

    /// Dispatch a question without waiting for the answer.
    ///
    /// # Errors
    /// - [`ChatError::EmptyQuestion`] for blank input.
    /// - [`ChatError::DocumentNotReady`] under [`QuestionPolicy::RequireReady`]
    ///   while the upload is not `Ready`.
    pub fn submit(&self, question: &str) -> Result<PendingQuestion, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        if self.config.question_policy == QuestionPolicy::RequireReady {
            let state = self.uploads.current_state();
            if !state.is_ready() {
                return Err(ChatError::DocumentNotReady {
                    status: state.status.to_string(),
                });
            }
        }

        Ok(self.questions.submit(question))
    }

    /// Submit `question` and wait for it to resolve.
    ///
    /// `Ok(None)` means the request failed or its answer was discarded; the
    /// failure has already been logged and reported to the observer.
    pub async fn ask(&self, question: &str) -> Result<Option<Exchange>, ChatError> {
        Ok(self.submit(question)?.settled().await)
    }

    // ── Transcript ───────────────────────────────────────────────────────

    pub fn transcript(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    /// Export the current transcript; failures are only logged and observed.
    pub async fn export(&self) {
        self.exporter.export(self.store.snapshot()).await
    }

    pub async fn try_export(&self) -> Result<ExportReport, ChatError> {
        self.exporter.try_export(self.store.snapshot()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UploadReceipt;
    use async_trait::async_trait;

    struct EchoBackend;

    #[async_trait]
    impl Backend for EchoBackend {
        async fn upload_pdf(&self, _file: &PdfFile) -> Result<UploadReceipt, ChatError> {
            Ok(UploadReceipt::default())
        }

        async fn ask_question(&self, question: &str) -> Result<String, ChatError> {
            Ok(format!("echo: {question}"))
        }
    }

    fn session(policy: QuestionPolicy) -> ChatSession {
        let config = ChatConfig::builder()
            .question_policy(policy)
            .build()
            .unwrap();
        ChatSession::with_backend(config, Arc::new(EchoBackend))
    }

    #[tokio::test]
    async fn blank_questions_are_rejected() {
        let s = session(QuestionPolicy::Permissive);
        for blank in ["", "   ", "\n\t"] {
            assert!(matches!(s.submit(blank), Err(ChatError::EmptyQuestion)));
        }
        assert_eq!(s.transcript().len(), 1);
    }

    #[tokio::test]
    async fn question_is_trimmed() {
        let s = session(QuestionPolicy::Permissive);
        let exchange = s.ask("  hello  ").await.unwrap().unwrap();
        assert_eq!(exchange.question, "hello");
        assert_eq!(s.transcript()[1], Message::user("hello"));
    }

    #[tokio::test]
    async fn require_ready_blocks_until_ingested() {
        let s = session(QuestionPolicy::RequireReady);
        let err = s.submit("too early?").unwrap_err();
        assert!(matches!(err, ChatError::DocumentNotReady { ref status } if status == "idle"));

        let state = s
            .select_file(PdfFile::sniffed("report.pdf", b"%PDF-1.4".to_vec()))
            .unwrap()
            .settled()
            .await;
        assert!(state.is_ready());
        assert!(s.ask("now?").await.unwrap().is_some());
    }
}
