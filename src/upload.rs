//! Document upload and ingestion tracking.
//!
//! ## State machine
//!
//! ```text
//!            select_file            success
//!   Idle ───────────────▶ Reading ──────────▶ Ready
//!                          │  ▲                 │
//!                  failure │  │ retry           │ select_file (new file)
//!                          ▼  │                 │
//!                         Failed ◀──────────────┘ … back to Reading
//! ```
//!
//! `select_file` is accepted from every state and restarts the machine for
//! the new file. In-flight uploads are never cancelled. Each dispatch carries
//! a generation number instead, and a completion only applies if its
//! generation is still the active one, so a slow upload of an old file can
//! never mark a newer file `Ready` (or `Failed`).

use crate::backend::Backend;
use crate::error::ChatError;
use crate::input::PdfFile;
use crate::observer::ObserverRef;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Ingestion status of the selected document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadStatus {
    /// Nothing selected yet.
    #[default]
    Idle,
    /// Upload dispatched, waiting for the backend to ingest it.
    Reading,
    /// The backend accepted and indexed the document.
    Ready,
    /// The last upload failed; `retry` re-sends the same file.
    Failed { reason: String },
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Idle => f.write_str("idle"),
            UploadStatus::Reading => f.write_str("reading"),
            UploadStatus::Ready => f.write_str("ready"),
            UploadStatus::Failed { .. } => f.write_str("failed"),
        }
    }
}

/// Upload state of a session. Exactly one exists per session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadState {
    pub file_name: Option<String>,
    #[serde(flatten)]
    pub status: UploadStatus,
}

/// Inputs to the upload state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Selected { file_name: String },
    Ingested,
    Failed { reason: String },
    Retried,
}

impl UploadState {
    /// Pure transition function. Events that do not apply to the current
    /// status leave the state unchanged.
    pub fn transition(&self, event: &UploadEvent) -> UploadState {
        match (&self.status, event) {
            (_, UploadEvent::Selected { file_name }) => UploadState {
                file_name: Some(file_name.clone()),
                status: UploadStatus::Reading,
            },
            (UploadStatus::Reading, UploadEvent::Ingested) => UploadState {
                file_name: self.file_name.clone(),
                status: UploadStatus::Ready,
            },
            (UploadStatus::Reading, UploadEvent::Failed { reason }) => UploadState {
                file_name: self.file_name.clone(),
                status: UploadStatus::Failed {
                    reason: reason.clone(),
                },
            },
            (UploadStatus::Failed { .. }, UploadEvent::Retried) => UploadState {
                file_name: self.file_name.clone(),
                status: UploadStatus::Reading,
            },
            _ => self.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == UploadStatus::Ready
    }
}

/// Validates documents, uploads them and tracks ingestion.
///
/// Cheap to clone; clones share one state machine. Must be used from within
/// a tokio runtime because uploads run as spawned tasks.
#[derive(Clone)]
pub struct UploadController {
    inner: Arc<UploadInner>,
}

struct UploadInner {
    backend: Arc<dyn Backend>,
    observer: Option<ObserverRef>,
    state: watch::Sender<UploadState>,
    active: Mutex<ActiveUpload>,
}

#[derive(Default)]
struct ActiveUpload {
    generation: u64,
    file: Option<Arc<PdfFile>>,
}

/// Handle to a dispatched upload.
#[derive(Debug)]
pub struct PendingUpload {
    generation: u64,
    handle: JoinHandle<()>,
    state: watch::Receiver<UploadState>,
}

impl PendingUpload {
    /// Dispatch number of this upload; increases with every select or retry.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for this upload's request to resolve and return the state
    /// afterwards. If a newer upload was started meanwhile, the returned
    /// state belongs to that one.
    pub async fn settled(self) -> UploadState {
        if let Err(e) = self.handle.await {
            warn!("Upload task {} did not finish: {}", self.generation, e);
        }
        self.state.borrow().clone()
    }
}

impl UploadController {
    pub fn new(backend: Arc<dyn Backend>, observer: Option<ObserverRef>) -> Self {
        let (state, _) = watch::channel(UploadState::default());
        Self {
            inner: Arc::new(UploadInner {
                backend,
                observer,
                state,
                active: Mutex::new(ActiveUpload::default()),
            }),
        }
    }

    /// Validate `file` and start uploading it.
    ///
    /// # Errors
    /// [`ChatError::NotAPdf`] when the MIME type is not `application/pdf`.
    /// The state is left untouched in that case.
    pub fn select_file(&self, file: PdfFile) -> Result<PendingUpload, ChatError> {
        if !file.is_pdf() {
            warn!(
                "Rejected '{}': not a PDF ({})",
                file.file_name, file.mime_type
            );
            return Err(ChatError::NotAPdf {
                file_name: file.file_name,
                mime_type: file.mime_type,
            });
        }

        let file = Arc::new(file);
        let (generation, changed) = {
            let mut active = self.inner.lock_active();
            active.generation += 1;
            active.file = Some(Arc::clone(&file));
            let changed = self.inner.apply(&UploadEvent::Selected {
                file_name: file.file_name.clone(),
            });
            (active.generation, changed)
        };
        self.inner.notify(changed);

        info!("Selected '{}' (upload #{})", file.file_name, generation);
        Ok(self.dispatch(generation, file))
    }

    /// Re-send the last selected file after a failed upload.
    ///
    /// # Errors
    /// [`ChatError::NothingToRetry`] unless the status is `Failed`.
    pub fn retry(&self) -> Result<PendingUpload, ChatError> {
        let (generation, file, changed) = {
            let mut active = self.inner.lock_active();
            let failed = matches!(self.inner.state.borrow().status, UploadStatus::Failed { .. });
            let file = match (failed, active.file.clone()) {
                (true, Some(file)) => file,
                _ => return Err(ChatError::NothingToRetry),
            };
            active.generation += 1;
            let changed = self.inner.apply(&UploadEvent::Retried);
            (active.generation, file, changed)
        };
        self.inner.notify(changed);

        info!("Retrying '{}' (upload #{})", file.file_name, generation);
        Ok(self.dispatch(generation, file))
    }

    /// Current state, read synchronously.
    pub fn current_state(&self) -> UploadState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.inner.state.subscribe()
    }

    fn dispatch(&self, generation: u64, file: Arc<PdfFile>) -> PendingUpload {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let request = AssertUnwindSafe(inner.backend.upload_pdf(&file));
            let result = match request.catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(ChatError::from_panic("upload request", payload)),
            };
            inner.resolve(generation, &file.file_name, result);
        });

        PendingUpload {
            generation,
            handle,
            state: self.inner.state.subscribe(),
        }
    }
}

impl UploadInner {
    fn lock_active(&self) -> MutexGuard<'_, ActiveUpload> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `event` and return the new state if it changed.
    ///
    /// Called with `active` held. The observer is told afterwards through
    /// [`UploadInner::notify`], once the guard is dropped, so it may call
    /// back into the controller.
    fn apply(&self, event: &UploadEvent) -> Option<UploadState> {
        let mut next = None;
        self.state.send_if_modified(|state| {
            let candidate = state.transition(event);
            if candidate == *state {
                return false;
            }
            *state = candidate.clone();
            next = Some(candidate);
            true
        });
        if let Some(ref state) = next {
            debug!("Upload state → {} ({:?})", state.status, state.file_name);
        }
        next
    }

    fn notify(&self, changed: Option<UploadState>) {
        if let (Some(state), Some(obs)) = (changed, self.observer.as_ref()) {
            obs.on_upload_state(&state);
        }
    }

    fn resolve<T: fmt::Debug>(&self, generation: u64, file_name: &str, result: Result<T, ChatError>) {
        let changed = {
            let active = self.lock_active();
            if active.generation != generation {
                debug!(
                    "Ignoring result of superseded upload #{} ('{}'); active is #{}",
                    generation, file_name, active.generation
                );
                return;
            }

            match result {
                Ok(receipt) => {
                    info!("Ingested '{}': {:?}", file_name, receipt);
                    self.apply(&UploadEvent::Ingested)
                }
                Err(e) => {
                    warn!("Upload of '{}' failed: {}", file_name, e);
                    self.apply(&UploadEvent::Failed {
                        reason: e.to_string(),
                    })
                }
            }
        };
        self.notify(changed);
    }
}
