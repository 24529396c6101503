//! Question submission and answer ordering.
//!
//! Every call to [`QuestionController::submit`] spawns one request and hands
//! back a [`PendingQuestion`]. Requests always run concurrently; what
//! [`AnswerOrdering`] controls is how their answers enter the transcript:
//!
//! | Ordering     | Appended when                                         |
//! |--------------|-------------------------------------------------------|
//! | `Resolution` | the answer arrives                                    |
//! | `Submission` | every earlier request has resolved (reorder buffer)   |
//! | `LatestOnly` | the request is still the latest one; otherwise dropped |
//!
//! A failed request produces no exchange. Under `Submission` it still
//! releases its slot so later answers are not held back. A backend that
//! panics counts as a failed request.

use crate::backend::Backend;
use crate::config::AnswerOrdering;
use crate::error::ChatError;
use crate::observer::ObserverRef;
use crate::transcript::{Exchange, TranscriptStore};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sequence number of a submitted question. The first is `RequestId(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sends questions to the backend and forwards answers to the transcript.
///
/// Does not validate the question text; [`crate::ChatSession`] does.
#[derive(Clone)]
pub struct QuestionController {
    inner: Arc<QuestionInner>,
}

struct QuestionInner {
    backend: Arc<dyn Backend>,
    store: TranscriptStore,
    observer: Option<ObserverRef>,
    ordering: AnswerOrdering,
    next_id: AtomicU64,
    reorder: Mutex<ReorderBuffer>,
}

/// Handle to an in-flight question.
#[derive(Debug)]
pub struct PendingQuestion {
    id: RequestId,
    handle: JoinHandle<Option<Exchange>>,
}

impl PendingQuestion {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the request to resolve.
    ///
    /// Returns the exchange the backend produced, or `None` when the request
    /// failed or its answer was discarded. Under `Submission` ordering the
    /// exchange may still be parked behind an earlier request when this
    /// returns.
    pub async fn settled(self) -> Option<Exchange> {
        match self.handle.await {
            Ok(exchange) => exchange,
            Err(e) => {
                warn!("Question task {} did not finish: {}", self.id, e);
                None
            }
        }
    }
}

impl QuestionController {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: TranscriptStore,
        ordering: AnswerOrdering,
        observer: Option<ObserverRef>,
    ) -> Self {
        Self {
            inner: Arc::new(QuestionInner {
                backend,
                store,
                observer,
                ordering,
                next_id: AtomicU64::new(1),
                reorder: Mutex::new(ReorderBuffer::new(1)),
            }),
        }
    }

    pub fn ordering(&self) -> AnswerOrdering {
        self.inner.ordering
    }

    /// Dispatch `question` and return immediately.
    pub fn submit(&self, question: impl Into<String>) -> PendingQuestion {
        let question = question.into();
        let id = RequestId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(
            "Submitting question {} ({} chars)",
            id,
            question.chars().count()
        );

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let request = AssertUnwindSafe(inner.backend.ask_question(&question));
            let result = match request.catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(ChatError::from_panic("question request", payload)),
            };
            inner.resolve(id, question, result)
        });

        PendingQuestion { id, handle }
    }
}

impl QuestionInner {
    fn latest_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst).saturating_sub(1)
    }

    fn resolve(
        &self,
        id: RequestId,
        question: String,
        result: Result<String, ChatError>,
    ) -> Option<Exchange> {
        let exchange = match result {
            Ok(answer) => Some(Exchange::new(question, answer)),
            Err(e) => {
                warn!("Question {} failed: {}", id, e);
                if let Some(ref obs) = self.observer {
                    obs.on_question_failed(id, &question, &e.to_string());
                }
                None
            }
        };

        match self.ordering {
            AnswerOrdering::Resolution => {
                if let Some(ref exchange) = exchange {
                    self.commit(id, exchange.clone());
                }
            }
            AnswerOrdering::LatestOnly => {
                if let Some(ref ex) = exchange {
                    let latest = self.latest_id();
                    if id.0 != latest {
                        info!("Discarding answer to {}: superseded by #{}", id, latest);
                        if let Some(ref obs) = self.observer {
                            obs.on_answer_discarded(id, ex);
                        }
                        return None;
                    }
                    self.commit(id, ex.clone());
                }
            }
            AnswerOrdering::Submission => {
                // Commit under the buffer lock so two resolvers cannot drain
                // consecutive runs and append them out of order.
                let mut buffer = self.reorder.lock().unwrap_or_else(PoisonError::into_inner);
                let parked = buffer.len();
                for (ready_id, ready) in buffer.release(id.0, exchange.clone()) {
                    self.commit(RequestId(ready_id), ready);
                }
                if buffer.len() > parked {
                    debug!("Parked answer to {} behind #{}", id, buffer.next());
                }
            }
        }

        exchange
    }

    fn commit(&self, id: RequestId, exchange: Exchange) {
        self.store.append(exchange.clone());
        let len = self.store.len();
        debug!("Appended exchange {}; transcript has {} messages", id, len);
        if let Some(ref obs) = self.observer {
            obs.on_exchange_appended(&exchange, len);
        }
    }
}

// ── Reorder buffer ───────────────────────────────────────────────────────

/// Releases resolved slots in sequence order.
///
/// A slot holding `None` is a failed request: it advances the sequence
/// without yielding an exchange.
#[derive(Debug)]
struct ReorderBuffer {
    next: u64,
    parked: BTreeMap<u64, Option<Exchange>>,
}

impl ReorderBuffer {
    fn new(first: u64) -> Self {
        Self {
            next: first,
            parked: BTreeMap::new(),
        }
    }

    fn next(&self) -> u64 {
        self.next
    }

    fn len(&self) -> usize {
        self.parked.len()
    }

    /// Record the outcome of `seq` and return every exchange that is now
    /// in order, lowest first.
    fn release(&mut self, seq: u64, outcome: Option<Exchange>) -> Vec<(u64, Exchange)> {
        self.parked.insert(seq, outcome);
        let mut ready = Vec::new();
        while let Some(slot) = self.parked.remove(&self.next) {
            if let Some(exchange) = slot {
                ready.push((self.next, exchange));
            }
            self.next += 1;
        }
        ready
    }
}
