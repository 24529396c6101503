//! # pdfchat
//!
//! Chat with a PDF: upload one document to a question-answering backend, ask
//! questions about it, keep the transcript and export it as a PDF.
//!
//! The backend does the heavy lifting (ingestion, retrieval, answering) and
//! is treated as opaque. This crate is the client-side orchestration: it
//! coordinates three asynchronous, order-sensitive activities against it.
//!
//! ## Session Overview
//!
//! ```text
//! ChatSession
//!  │
//!  ├─ Upload     validate → POST /upload_pdf/ → Idle/Reading/Ready/Failed
//!  ├─ Question   POST /ask_question/ → Exchange → ordered append
//!  ├─ Transcript append-only messages, seeded with a greeting
//!  └─ Export     rasterise → A4 PDF (lopdf) → chat.pdf (spawn_blocking)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfchat::{ChatConfig, ChatSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChatConfig::builder()
//!         .backend_url("http://127.0.0.1:8000")
//!         .build()?;
//!     let session = ChatSession::new(config)?;
//!
//!     session.select_path("report.pdf").await?.settled().await;
//!     if let Some(exchange) = session.ask("What is the summary?").await? {
//!         println!("{}", exchange.answer);
//!     }
//!     let report = session.try_export().await?;
//!     eprintln!("saved {}", report.path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfchat` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfchat = { version = "0.1", default-features = false }
//! ```
//!
//! ## Answer Ordering
//!
//! | [`AnswerOrdering`] | Transcript order when questions race |
//! |--------------------|--------------------------------------|
//! | `Submission` | order the questions were asked (default) |
//! | `Resolution` | order the answers arrived |
//! | `LatestOnly` | only the newest question's answer is kept |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod export;
pub mod input;
pub mod observer;
pub mod question;
pub mod session;
pub mod transcript;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{Backend, HttpBackend, UploadReceipt};
pub use config::{AnswerOrdering, ChatConfig, ChatConfigBuilder, QuestionPolicy};
pub use error::ChatError;
pub use export::{
    BitmapRasterizer, DirectorySink, DocumentSink, ExportReport, Rasterizer, TranscriptExporter,
};
pub use input::{resolve_input, PdfFile, PDF_MIME};
pub use observer::{NoopObserver, ObserverRef, SessionObserver};
pub use question::{PendingQuestion, QuestionController, RequestId};
pub use session::ChatSession;
pub use transcript::{Exchange, Message, Sender, TranscriptStore, DEFAULT_GREETING};
pub use upload::{PendingUpload, UploadController, UploadEvent, UploadState, UploadStatus};
