//! Session-level tests against a scripted in-process backend.
//!
//! The backend answers from a script keyed by question text (or file name
//! for uploads). Replies can be immediate or deferred behind a oneshot
//! channel, which lets each test decide the order in which requests resolve.

use async_trait::async_trait;
use image::RgbImage;
use pdfchat::{
    AnswerOrdering, Backend, BitmapRasterizer, ChatConfig, ChatError, ChatSession, DocumentSink,
    Exchange, Message, PdfFile, QuestionPolicy, Rasterizer, RequestId, Sender, SessionObserver,
    UploadReceipt, UploadState, UploadStatus,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

// ── Test helpers ─────────────────────────────────────────────────────────────

type Outcome = Result<String, String>;

enum Reply {
    Now(Outcome),
    Later(oneshot::Receiver<Outcome>),
}

impl Reply {
    async fn resolve(self) -> Outcome {
        match self {
            Reply::Now(outcome) => outcome,
            Reply::Later(rx) => rx.await.unwrap_or_else(|_| Err("gate dropped".into())),
        }
    }
}

#[derive(Default)]
struct ScriptedBackend {
    answers: Mutex<HashMap<String, Reply>>,
    uploads: Mutex<HashMap<String, Vec<Reply>>>,
    panics: Mutex<HashSet<String>>,
    upload_calls: AtomicUsize,
}

impl ScriptedBackend {
    fn answer(&self, question: &str, answer: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(question.into(), Reply::Now(Ok(answer.into())));
    }

    fn defer_answer(&self, question: &str) -> oneshot::Sender<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.answers
            .lock()
            .unwrap()
            .insert(question.into(), Reply::Later(rx));
        tx
    }

    /// Panic instead of replying to this question or file name.
    fn panic_on(&self, key: &str) {
        self.panics.lock().unwrap().insert(key.into());
    }

    fn should_panic(&self, key: &str) -> bool {
        self.panics.lock().unwrap().contains(key)
    }

    fn fail_upload(&self, file_name: &str, reason: &str) {
        self.push_upload(file_name, Reply::Now(Err(reason.into())));
    }

    fn defer_upload(&self, file_name: &str) -> oneshot::Sender<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.push_upload(file_name, Reply::Later(rx));
        tx
    }

    fn push_upload(&self, file_name: &str, reply: Reply) {
        self.uploads
            .lock()
            .unwrap()
            .entry(file_name.into())
            .or_default()
            .push(reply);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn upload_pdf(&self, file: &PdfFile) -> Result<UploadReceipt, ChatError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_panic(&file.file_name) {
            panic!("scripted panic uploading {}", file.file_name);
        }
        let reply = {
            let mut uploads = self.uploads.lock().unwrap();
            uploads
                .get_mut(&file.file_name)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };
        match reply {
            None => Ok(UploadReceipt::default()),
            Some(reply) => reply
                .resolve()
                .await
                .map(|message| UploadReceipt {
                    message: Some(message),
                })
                .map_err(|message| ChatError::BackendRejected {
                    status: 500,
                    message,
                }),
        }
    }

    async fn ask_question(&self, question: &str) -> Result<String, ChatError> {
        if self.should_panic(question) {
            panic!("scripted panic answering {question}");
        }
        let reply = self.answers.lock().unwrap().remove(question);
        match reply {
            None => Err(ChatError::BackendRejected {
                status: 400,
                message: "Vector database not initialized. Please upload a PDF first.".into(),
            }),
            Some(reply) => reply.resolve().await.map_err(|message| {
                ChatError::BackendRejected {
                    status: 500,
                    message,
                }
            }),
        }
    }
}

#[derive(Default)]
struct RecordingObserver {
    states: Mutex<Vec<UploadState>>,
    failed: Mutex<Vec<(RequestId, String)>>,
    discarded: Mutex<Vec<RequestId>>,
    exports: AtomicUsize,
}

impl SessionObserver for RecordingObserver {
    fn on_upload_state(&self, state: &UploadState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn on_question_failed(&self, id: RequestId, question: &str, _error: &str) {
        self.failed.lock().unwrap().push((id, question.to_string()));
    }

    fn on_answer_discarded(&self, id: RequestId, _exchange: &Exchange) {
        self.discarded.lock().unwrap().push(id);
    }

    fn on_export_complete(&self, _path: &Path, _pages: usize) {
        self.exports.fetch_add(1, Ordering::SeqCst);
    }
}

/// Re-sends the upload the first time it fails.
#[derive(Default)]
struct RetryingObserver {
    session: OnceLock<Weak<ChatSession>>,
    retries: AtomicUsize,
}

impl SessionObserver for RetryingObserver {
    fn on_upload_state(&self, state: &UploadState) {
        if !matches!(state.status, UploadStatus::Failed { .. }) {
            return;
        }
        if self.retries.fetch_add(1, Ordering::SeqCst) > 0 {
            return;
        }
        if let Some(session) = self.session.get().and_then(Weak::upgrade) {
            session.retry_upload().unwrap();
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    saved: Mutex<Vec<(String, Vec<u8>)>>,
}

impl DocumentSink for RecordingSink {
    fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ChatError> {
        self.saved
            .lock()
            .unwrap()
            .push((file_name.to_string(), bytes.to_vec()));
        Ok(PathBuf::from("/virtual").join(file_name))
    }
}

/// Delegates to the real rasteriser and remembers the image size.
#[derive(Default)]
struct MeasuringRasterizer {
    inner: BitmapRasterizer,
    sizes: Mutex<Vec<(u32, u32)>>,
}

impl Rasterizer for MeasuringRasterizer {
    fn rasterize(&self, messages: &[Message], scale: u32) -> Result<RgbImage, ChatError> {
        let image = self.inner.rasterize(messages, scale)?;
        self.sizes.lock().unwrap().push(image.dimensions());
        Ok(image)
    }
}

struct Harness {
    session: ChatSession,
    backend: Arc<ScriptedBackend>,
    observer: Arc<RecordingObserver>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness(ordering: AnswerOrdering, policy: QuestionPolicy) -> Harness {
    init_tracing();
    let backend = Arc::new(ScriptedBackend::default());
    let observer = Arc::new(RecordingObserver::default());
    let config = ChatConfig::builder()
        .answer_ordering(ordering)
        .question_policy(policy)
        .greeting("Hello! Upload a PDF to get started.")
        .observer(observer.clone())
        .build()
        .unwrap();
    let session = ChatSession::with_backend(config, backend.clone());
    Harness {
        session,
        backend,
        observer,
    }
}

fn default_harness() -> Harness {
    harness(AnswerOrdering::default(), QuestionPolicy::default())
}

fn pdf(name: &str) -> PdfFile {
    PdfFile::new(name, "application/pdf", b"%PDF-1.4\n%%EOF\n".to_vec())
}

fn bodies(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.body.as_str()).collect()
}

// ── Transcript ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn transcript_starts_with_the_greeting() {
    let h = default_harness();
    assert_eq!(
        h.session.transcript(),
        vec![Message::assistant("Hello! Upload a PDF to get started.")]
    );
}

#[tokio::test]
async fn each_exchange_adds_two_adjacent_messages() {
    let h = default_harness();
    for i in 0..5 {
        h.backend.answer(&format!("q{i}"), &format!("a{i}"));
        assert!(h.session.ask(&format!("q{i}")).await.unwrap().is_some());
    }

    let transcript = h.session.transcript();
    assert_eq!(transcript.len(), 1 + 2 * 5);
    for (i, pair) in transcript[1..].chunks(2).enumerate() {
        assert_eq!(pair[0], Message::user(format!("q{i}")));
        assert_eq!(pair[1], Message::assistant(format!("a{i}")));
    }
}

#[tokio::test]
async fn summary_question_scenario() {
    let h = default_harness();
    h.backend.answer("What is the summary?", "This is a summary.");

    h.session.ask("What is the summary?").await.unwrap();

    let transcript = h.session.transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[1].sender, Sender::User);
    assert_eq!(transcript[1].body, "What is the summary?");
    assert_eq!(transcript[2].sender, Sender::Assistant);
    assert_eq!(transcript[2].body, "This is a summary.");
}

// ── Questions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_question_sends_nothing() {
    let h = default_harness();
    let err = h.session.submit("   ").unwrap_err();
    assert!(matches!(err, ChatError::EmptyQuestion));
    assert!(err.is_validation());
    assert_eq!(h.session.transcript().len(), 1);
}

#[tokio::test]
async fn failed_question_leaves_transcript_unchanged() {
    let h = default_harness();
    let before = h.session.transcript();

    let result = h.session.ask("What is the summary?").await.unwrap();

    assert!(result.is_none());
    assert_eq!(h.session.transcript(), before);
    let failed = h.observer.failed.lock().unwrap();
    assert_eq!(failed.as_slice(), &[(RequestId(1), "What is the summary?".to_string())]);
}

#[tokio::test]
async fn panicking_request_releases_its_slot() {
    let h = default_harness();
    h.backend.panic_on("boom");
    h.backend.answer("next", "ans next");

    assert!(h.session.ask("boom").await.unwrap().is_none());
    let exchange = h.session.ask("next").await.unwrap();
    assert_eq!(exchange, Some(Exchange::new("next", "ans next")));

    let transcript = h.session.transcript();
    assert_eq!(bodies(&transcript[1..]), vec!["next", "ans next"]);
    let failed = h.observer.failed.lock().unwrap();
    assert_eq!(failed.as_slice(), &[(RequestId(1), "boom".to_string())]);
}

#[tokio::test]
async fn resolution_ordering_follows_arrival() {
    let h = harness(AnswerOrdering::Resolution, QuestionPolicy::Permissive);
    let first = h.backend.defer_answer("first?");
    let second = h.backend.defer_answer("second?");

    let p1 = h.session.submit("first?").unwrap();
    let p2 = h.session.submit("second?").unwrap();

    second.send(Ok("two".into())).unwrap();
    p2.settled().await.unwrap();
    first.send(Ok("one".into())).unwrap();
    p1.settled().await.unwrap();

    assert_eq!(
        bodies(&h.session.transcript()[1..]),
        vec!["second?", "two", "first?", "one"]
    );
}

#[tokio::test]
async fn submission_ordering_holds_back_early_answers() {
    let h = harness(AnswerOrdering::Submission, QuestionPolicy::Permissive);
    let first = h.backend.defer_answer("first?");
    let second = h.backend.defer_answer("second?");

    let p1 = h.session.submit("first?").unwrap();
    let p2 = h.session.submit("second?").unwrap();

    second.send(Ok("two".into())).unwrap();
    let parked = p2.settled().await.unwrap();
    assert_eq!(parked.answer, "two");
    assert_eq!(h.session.transcript().len(), 1);

    first.send(Ok("one".into())).unwrap();
    p1.settled().await.unwrap();

    assert_eq!(
        bodies(&h.session.transcript()[1..]),
        vec!["first?", "one", "second?", "two"]
    );
}

#[tokio::test]
async fn submission_ordering_skips_failed_requests() {
    let h = harness(AnswerOrdering::Submission, QuestionPolicy::Permissive);
    let first = h.backend.defer_answer("first?");
    h.backend.answer("second?", "two");

    let p1 = h.session.submit("first?").unwrap();
    let p2 = h.session.submit("second?").unwrap();
    p2.settled().await.unwrap();

    first.send(Err("HTTP 500".into())).unwrap();
    assert!(p1.settled().await.is_none());

    assert_eq!(bodies(&h.session.transcript()[1..]), vec!["second?", "two"]);
}

#[tokio::test]
async fn latest_only_discards_superseded_answers() {
    let h = harness(AnswerOrdering::LatestOnly, QuestionPolicy::Permissive);
    let first = h.backend.defer_answer("first?");
    h.backend.answer("second?", "two");

    let p1 = h.session.submit("first?").unwrap();
    let p2 = h.session.submit("second?").unwrap();
    p2.settled().await.unwrap();

    first.send(Ok("one".into())).unwrap();
    assert!(p1.settled().await.is_none());

    assert_eq!(bodies(&h.session.transcript()[1..]), vec!["second?", "two"]);
    assert_eq!(h.observer.discarded.lock().unwrap().as_slice(), &[RequestId(1)]);
}

#[tokio::test]
async fn require_ready_rejects_before_ingestion() {
    let h = harness(AnswerOrdering::Submission, QuestionPolicy::RequireReady);
    let gate = h.backend.defer_upload("report.pdf");
    h.backend.answer("Summary?", "Short.");

    let pending = h.session.select_file(pdf("report.pdf")).unwrap();
    let err = h.session.submit("Summary?").unwrap_err();
    assert!(matches!(err, ChatError::DocumentNotReady { ref status } if status == "reading"));

    gate.send(Ok("ingested".into())).unwrap();
    assert!(pending.settled().await.is_ready());
    assert!(h.session.ask("Summary?").await.unwrap().is_some());
}

#[tokio::test]
async fn permissive_policy_forwards_before_ingestion() {
    let h = default_harness();
    h.backend.answer("Summary?", "Short.");
    assert_eq!(h.session.upload_state(), UploadState::default());
    assert!(h.session.ask("Summary?").await.unwrap().is_some());
}

// ── Upload ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_moves_through_reading_to_ready() {
    let h = default_harness();
    let gate = h.backend.defer_upload("report.pdf");

    let pending = h.session.select_file(pdf("report.pdf")).unwrap();
    assert_eq!(
        h.session.upload_state(),
        UploadState {
            file_name: Some("report.pdf".into()),
            status: UploadStatus::Reading,
        }
    );

    gate.send(Ok("PDF uploaded and processed".into())).unwrap();
    let state = pending.settled().await;
    assert_eq!(state.file_name.as_deref(), Some("report.pdf"));
    assert_eq!(state.status, UploadStatus::Ready);

    let seen: Vec<UploadStatus> = h
        .observer
        .states
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.status.clone())
        .collect();
    assert_eq!(seen, vec![UploadStatus::Reading, UploadStatus::Ready]);
}

#[tokio::test]
async fn non_pdf_is_rejected_without_state_change() {
    let h = default_harness();
    let err = h
        .session
        .select_file(PdfFile::new("notes.txt", "text/plain", b"hello".to_vec()))
        .err()
        .unwrap();

    assert!(matches!(err, ChatError::NotAPdf { ref mime_type, .. } if mime_type == "text/plain"));
    assert_eq!(h.session.upload_state(), UploadState::default());
    assert_eq!(h.backend.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn superseded_upload_cannot_overwrite_newer_file() {
    let h = default_harness();
    let slow = h.backend.defer_upload("a.pdf");

    let first = h.session.select_file(pdf("a.pdf")).unwrap();
    let second = h.session.select_file(pdf("b.pdf")).unwrap();
    assert!(second.generation() > first.generation());

    let state = second.settled().await;
    assert_eq!(state.file_name.as_deref(), Some("b.pdf"));
    assert!(state.is_ready());

    slow.send(Err("timed out".into())).unwrap();
    first.settled().await;
    let state = h.session.upload_state();
    assert_eq!(state.file_name.as_deref(), Some("b.pdf"));
    assert_eq!(state.status, UploadStatus::Ready);
}

#[tokio::test]
async fn stale_success_does_not_mark_new_file_ready() {
    let h = default_harness();
    let slow_a = h.backend.defer_upload("a.pdf");
    let slow_b = h.backend.defer_upload("b.pdf");

    let first = h.session.select_file(pdf("a.pdf")).unwrap();
    let _second = h.session.select_file(pdf("b.pdf")).unwrap();

    slow_a.send(Ok("done".into())).unwrap();
    first.settled().await;
    assert_eq!(
        h.session.upload_state(),
        UploadState {
            file_name: Some("b.pdf".into()),
            status: UploadStatus::Reading,
        }
    );
    drop(slow_b);
}

#[tokio::test]
async fn failed_upload_can_be_retried() {
    let h = default_harness();
    h.backend.fail_upload("report.pdf", "embedding service down");

    let state = h.session.select_file(pdf("report.pdf")).unwrap().settled().await;
    assert!(matches!(
        state.status,
        UploadStatus::Failed { ref reason } if reason.contains("embedding service down")
    ));

    let retry = h.session.retry_upload().unwrap();
    assert_eq!(h.session.upload_state().status, UploadStatus::Reading);
    let state = retry.settled().await;
    assert!(state.is_ready());
    assert_eq!(h.backend.upload_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_upload_ends_in_failed() {
    let h = default_harness();
    h.backend.panic_on("report.pdf");

    let state = h.session.select_file(pdf("report.pdf")).unwrap().settled().await;
    assert!(matches!(
        state.status,
        UploadStatus::Failed { ref reason } if reason.contains("panicked")
    ));
}

#[tokio::test]
async fn observer_can_retry_a_failed_upload() {
    init_tracing();
    let backend = Arc::new(ScriptedBackend::default());
    backend.fail_upload("report.pdf", "transient");
    let observer = Arc::new(RetryingObserver::default());
    let config = ChatConfig::builder()
        .observer(observer.clone())
        .build()
        .unwrap();
    let session = Arc::new(ChatSession::with_backend(config, backend.clone()));
    observer.session.set(Arc::downgrade(&session)).unwrap();

    let mut rx = session.subscribe_upload();
    session.select_file(pdf("report.pdf")).unwrap();
    let ready = tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| s.is_ready()))
        .await
        .is_ok_and(|r| r.is_ok());

    assert!(ready, "retry issued from the observer never completed");
    assert_eq!(backend.upload_calls.load(Ordering::SeqCst), 2);
    assert_eq!(observer.retries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_without_failure_is_rejected() {
    let h = default_harness();
    assert!(matches!(h.session.retry_upload(), Err(ChatError::NothingToRetry)));

    h.session.select_file(pdf("report.pdf")).unwrap().settled().await;
    assert!(matches!(h.session.retry_upload(), Err(ChatError::NothingToRetry)));
}

#[tokio::test]
async fn subscribers_see_the_final_state() {
    let h = default_harness();
    let mut rx = h.session.subscribe_upload();

    h.session.select_file(pdf("report.pdf")).unwrap();
    let state = rx
        .wait_for(|s| s.is_ready())
        .await
        .map(|s| s.clone())
        .unwrap();
    assert_eq!(state.file_name.as_deref(), Some("report.pdf"));
}

#[tokio::test]
async fn select_path_reads_and_uploads_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paper.pdf");
    std::fs::write(&path, b"%PDF-1.7\n%%EOF\n").unwrap();

    let h = default_harness();
    let state = h
        .session
        .select_path(path.to_str().unwrap())
        .await
        .unwrap()
        .settled()
        .await;
    assert_eq!(state.file_name.as_deref(), Some("paper.pdf"));
    assert!(state.is_ready());
}

// ── Export ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn export_hands_one_pdf_to_the_sink() {
    let h = default_harness();
    h.backend.answer("What is the summary?", "This is a summary.");
    h.session.ask("What is the summary?").await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let rasterizer = Arc::new(MeasuringRasterizer::default());
    let session = h
        .session
        .with_rasterizer(rasterizer.clone())
        .with_sink(sink.clone());

    let report = session.try_export().await.unwrap();
    assert_eq!(report.path, PathBuf::from("/virtual/chat.pdf"));
    assert!(report.pages >= 1);

    let saved = sink.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "chat.pdf");
    assert!(saved[0].1.starts_with(b"%PDF"));

    let doc = lopdf::Document::load_mem(&saved[0].1).unwrap();
    assert_eq!(doc.get_pages().len(), report.pages);

    let sizes = rasterizer.sizes.lock().unwrap();
    assert_eq!(sizes.len(), 1);
    assert!(sizes[0].0 > 0 && sizes[0].1 > 0);
    assert_eq!(h.observer.exports.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn export_writes_chat_pdf_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = ChatConfig::builder()
        .export_dir(dir.path())
        .build()
        .unwrap();
    let session = ChatSession::with_backend(config, Arc::new(ScriptedBackend::default()));

    session.export().await;

    let bytes = std::fs::read(dir.path().join("chat.pdf")).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}
