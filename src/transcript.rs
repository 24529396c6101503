//! The chat transcript: an append-only, ordered list of messages.
//!
//! Insertion order is the only index. There are no message ids and no
//! timestamps; position `0` is always the seeded greeting, and every
//! [`Exchange`] contributes exactly two adjacent messages after it.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Greeting shown as the first assistant message of every session.
pub const DEFAULT_GREETING: &str = "Hello! I’m AiPlanet’s PDF Analyzer Bot. I’m here to \
assist you with insights and queries about any PDF you upload. Simply upload a PDF file to get \
started.";

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One line of the transcript. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub body: String,
    pub sender: Sender,
}

impl Message {
    pub fn user(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            sender: Sender::User,
        }
    }

    pub fn assistant(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            sender: Sender::Assistant,
        }
    }
}

/// A question paired with the answer the backend produced for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

impl Exchange {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Shared handle to the session transcript.
///
/// Cloning is cheap; all clones see the same history.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl TranscriptStore {
    /// Create a transcript seeded with one assistant greeting.
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            messages: Arc::new(RwLock::new(vec![Message::assistant(greeting)])),
        }
    }

    /// Append the two messages of `exchange`: the question, then the answer.
    ///
    /// Both are pushed under one write lock, so messages of concurrent
    /// appends never interleave.
    pub fn append(&self, exchange: Exchange) {
        let mut messages = self
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        messages.push(Message::user(exchange.question));
        messages.push(Message::assistant(exchange.answer));
    }

    /// Copy of every message appended so far, in order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Always `false`: the greeting is never removed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new(DEFAULT_GREETING)
    }
}
