//! Observer trait for session events.
//!
//! Inject an [`Arc<dyn SessionObserver>`] via
//! [`crate::config::ChatConfigBuilder::observer`] to be told whenever the
//! upload state changes, an exchange lands in the transcript, or one of the
//! asynchronous operations fails.
//!
//! Failures of background work never propagate to the caller as typed
//! errors; this trait is the only channel through which a front end learns
//! about them besides the log.
//!
//! # Example
//!
//! ```rust
//! use pdfchat::{ChatConfig, Exchange, SessionObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     appended: AtomicUsize,
//! }
//!
//! impl SessionObserver for CountingObserver {
//!     fn on_exchange_appended(&self, _exchange: &Exchange, transcript_len: usize) {
//!         self.appended.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("transcript now has {transcript_len} messages");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { appended: AtomicUsize::new(0) });
//!
//! let config = ChatConfig::builder()
//!     .observer(observer as Arc<dyn SessionObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::question::RequestId;
use crate::transcript::Exchange;
use crate::upload::UploadState;
use std::path::Path;
use std::sync::Arc;

/// Receives session events. All methods default to no-ops.
///
/// # Thread safety
///
/// Upload and question resolutions run on tokio worker threads, so methods
/// may be called concurrently. Protect shared mutable state accordingly.
/// No controller lock is held during a call, so an observer may call back
/// into the session (for example `retry_upload` on a failed upload).
pub trait SessionObserver: Send + Sync {
    /// The upload state machine moved to `state`.
    fn on_upload_state(&self, state: &UploadState) {
        let _ = state;
    }

    /// `exchange` was appended; the transcript now holds `transcript_len` messages.
    fn on_exchange_appended(&self, exchange: &Exchange, transcript_len: usize) {
        let _ = (exchange, transcript_len);
    }

    /// The request for `question` failed and produced no exchange.
    fn on_question_failed(&self, id: RequestId, question: &str, error: &str) {
        let _ = (id, question, error);
    }

    /// An answer arrived for a request that is no longer the latest one.
    fn on_answer_discarded(&self, id: RequestId, exchange: &Exchange) {
        let _ = (id, exchange);
    }

    /// The transcript was exported to `path` as a `pages`-page document.
    fn on_export_complete(&self, path: &Path, pages: usize) {
        let _ = (path, pages);
    }

    /// Export failed; no file was written.
    fn on_export_failed(&self, error: &str) {
        let _ = error;
    }
}

/// Observer that ignores every event. Used when none is configured.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ChatConfig`].
pub type ObserverRef = Arc<dyn SessionObserver>;
