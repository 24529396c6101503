//! CLI binary for pdfchat.
//!
//! A thin shim over the library crate that maps CLI flags to `ChatConfig`,
//! uploads the document, and then either answers `-q` questions in one shot
//! or runs an interactive prompt.

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use pdfchat::{
    AnswerOrdering, ChatConfig, ChatSession, Exchange, Message, QuestionPolicy, RequestId, Sender,
    SessionObserver, UploadState, UploadStatus,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer ─────────────────────────────────────────────────────────────

/// Prints background events (upload outcome, failed questions) above any
/// active spinner. Export results are printed by the caller instead.
struct CliObserver {
    multi: MultiProgress,
    quiet: bool,
}

impl CliObserver {
    fn line(&self, text: String) {
        self.multi.suspend(|| eprintln!("{text}"));
    }
}

impl SessionObserver for CliObserver {
    fn on_upload_state(&self, state: &UploadState) {
        let name = state.file_name.as_deref().unwrap_or("document");
        match &state.status {
            UploadStatus::Ready if !self.quiet => {
                self.line(format!("{} {} is ready for questions", green("✔"), bold(name)));
            }
            UploadStatus::Failed { reason } => {
                self.line(format!(
                    "{} Upload of {} failed: {}  {}",
                    red("✘"),
                    bold(name),
                    red(reason),
                    dim("(/retry to try again)")
                ));
            }
            _ => {}
        }
    }

    fn on_question_failed(&self, id: RequestId, _question: &str, error: &str) {
        let msg = if error.chars().count() > 120 {
            format!("{}\u{2026}", error.chars().take(119).collect::<String>())
        } else {
            error.to_string()
        };
        self.line(format!("{} Question {} failed: {}", red("✗"), id, red(&msg)));
    }

    fn on_answer_discarded(&self, id: RequestId, _exchange: &Exchange) {
        if !self.quiet {
            self.line(format!("{} Dropped answer to {}: a newer question is pending", dim("…"), id));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Upload a document and chat interactively
  pdfchat report.pdf

  # One-shot questions (sent concurrently, printed in the order asked)
  pdfchat report.pdf -q "What is the summary?" -q "Who are the authors?"

  # Download from a URL, ask, export the transcript to ./chat.pdf
  pdfchat https://arxiv.org/pdf/1706.03762.pdf -q "What is attention?" --export --export-dir .

  # Transcript as JSON
  pdfchat report.pdf -q "Summarise section 2" --json > chat.json

INTERACTIVE COMMANDS:
  /upload <path|url>   upload another document
  /retry               re-send the last document after a failed upload
  /status              show the upload state
  /history             print the transcript
  /export              export the transcript to chat.pdf
  /quit                leave

ENVIRONMENT VARIABLES:
  PDFCHAT_BACKEND       Backend base URL (default http://127.0.0.1:8000)
  PDFCHAT_ORIGIN        Value for the Access-Control-Allow-Origin request header
  PDFCHAT_EXPORT_DIR    Export directory (default: the download directory)
  RUST_LOG              Override log filter (e.g. pdfchat=debug)
"#;

/// Chat with a PDF through a question-answering backend.
#[derive(Parser, Debug)]
#[command(
    name = "pdfchat",
    version,
    about = "Upload a PDF to a question-answering backend and chat about it",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF to upload first: local file path or HTTP/HTTPS URL.
    input: Option<String>,

    /// Backend base URL.
    #[arg(short, long, env = "PDFCHAT_BACKEND", default_value = "http://127.0.0.1:8000")]
    backend: String,

    /// Path of the ingestion endpoint.
    #[arg(long, env = "PDFCHAT_UPLOAD_PATH", default_value = "/upload_pdf/")]
    upload_path: String,

    /// Path of the question endpoint.
    #[arg(long, env = "PDFCHAT_QUESTION_PATH", default_value = "/ask_question/")]
    question_path: String,

    /// Access-Control-Allow-Origin value sent with every request.
    #[arg(long, env = "PDFCHAT_ORIGIN")]
    origin: Option<String>,

    /// Ask this question and exit instead of starting the prompt (repeatable).
    #[arg(short = 'q', long = "question", value_name = "QUESTION")]
    questions: Vec<String>,

    /// Transcript order for concurrent answers: submission, resolution, latest.
    #[arg(long, env = "PDFCHAT_ORDERING", value_enum, default_value = "submission")]
    ordering: OrderingArg,

    /// Refuse questions until the document has been ingested.
    #[arg(long, env = "PDFCHAT_REQUIRE_READY")]
    require_ready: bool,

    /// Export the transcript before exiting.
    #[arg(long)]
    export: bool,

    /// Directory for the exported chat.pdf.
    #[arg(long, env = "PDFCHAT_EXPORT_DIR")]
    export_dir: Option<PathBuf>,

    /// Export upscale factor (1–4).
    #[arg(long, env = "PDFCHAT_EXPORT_SCALE", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(1..=4))]
    scale: u32,

    /// Upload (ingestion) timeout in seconds.
    #[arg(long, env = "PDFCHAT_UPLOAD_TIMEOUT", default_value_t = 300)]
    upload_timeout: u64,

    /// Per-question timeout in seconds.
    #[arg(long, env = "PDFCHAT_QUESTION_TIMEOUT", default_value_t = 120)]
    question_timeout: u64,

    /// Print the final transcript as JSON on stdout.
    #[arg(long, env = "PDFCHAT_JSON")]
    json: bool,

    /// Disable spinners.
    #[arg(long, env = "PDFCHAT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFCHAT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and answers.
    #[arg(long, env = "PDFCHAT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OrderingArg {
    Submission,
    Resolution,
    Latest,
}

impl From<OrderingArg> for AnswerOrdering {
    fn from(v: OrderingArg) -> Self {
        match v {
            OrderingArg::Submission => AnswerOrdering::Submission,
            OrderingArg::Resolution => AnswerOrdering::Resolution,
            OrderingArg::Latest => AnswerOrdering::LatestOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Spinners and observer lines cover what the user needs; library INFO
    // logs only show up with spinners disabled.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let multi = if show_progress {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };

    let observer = Arc::new(CliObserver {
        multi: multi.clone(),
        quiet: cli.quiet,
    });
    let config = build_config(&cli, observer)?;
    let session = ChatSession::new(config).context("Failed to create chat session")?;

    if let Some(ref input) = cli.input {
        upload(&session, &multi, input).await?;
    }

    if cli.questions.is_empty() {
        repl(&session, &multi, cli.quiet).await?;
    } else {
        ask_all(&session, &multi, &cli.questions, !cli.json).await?;
    }

    if cli.export {
        export(&session, &multi, cli.quiet).await?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&session.transcript())
            .context("Failed to serialise transcript")?;
        println!("{json}");
    }

    Ok(())
}

/// Map CLI args to `ChatConfig`.
fn build_config(cli: &Cli, observer: Arc<CliObserver>) -> Result<ChatConfig> {
    let mut builder = ChatConfig::builder()
        .backend_url(cli.backend.clone())
        .upload_path(cli.upload_path.clone())
        .question_path(cli.question_path.clone())
        .upload_timeout_secs(cli.upload_timeout)
        .question_timeout_secs(cli.question_timeout)
        .answer_ordering(cli.ordering.clone().into())
        .question_policy(if cli.require_ready {
            QuestionPolicy::RequireReady
        } else {
            QuestionPolicy::Permissive
        })
        .export_scale(cli.scale)
        .observer(observer);

    if let Some(ref origin) = cli.origin {
        builder = builder.frontend_origin(origin.clone());
    }
    if let Some(ref dir) = cli.export_dir {
        builder = builder.export_dir(dir.clone());
    }

    builder.build().context("Invalid configuration")
}

fn spinner(multi: &MultiProgress, prefix: &str, msg: String) -> ProgressBar {
    let bar = multi.add(ProgressBar::new_spinner());
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix(prefix.to_string());
    bar.set_message(msg);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

async fn upload(session: &ChatSession, multi: &MultiProgress, input: &str) -> Result<UploadState> {
    let pending = session
        .select_path(input)
        .await
        .with_context(|| format!("Cannot upload {input}"))?;

    let bar = spinner(multi, "Reading", format!("{input}…"));
    let state = pending.settled().await;
    bar.finish_and_clear();
    Ok(state)
}

async fn ask_all(
    session: &ChatSession,
    multi: &MultiProgress,
    questions: &[String],
    print: bool,
) -> Result<()> {
    let pending = questions
        .iter()
        .map(|q| session.submit(q))
        .collect::<Result<Vec<_>, _>>()
        .context("Question rejected")?;

    let bar = spinner(multi, "Asking", format!("{} question(s)…", pending.len()));
    join_all(pending.into_iter().map(|p| p.settled())).await;
    bar.finish_and_clear();

    if print {
        for message in session.transcript().iter().skip(1) {
            print_message(message);
        }
    }
    Ok(())
}

async fn export(session: &ChatSession, multi: &MultiProgress, quiet: bool) -> Result<()> {
    let bar = spinner(multi, "Exporting", "rendering transcript…".to_string());
    let result = session.try_export().await;
    bar.finish_and_clear();

    let report = result.context("Export failed")?;
    if !quiet {
        eprintln!(
            "{} {} message(s), {} page(s)  →  {}",
            green("✔"),
            session.transcript().len(),
            report.pages,
            bold(&report.path.display().to_string())
        );
    }
    Ok(())
}

// ── Interactive prompt ───────────────────────────────────────────────────────

async fn repl(session: &ChatSession, multi: &MultiProgress, quiet: bool) -> Result<()> {
    if let Some(greeting) = session.transcript().first() {
        print_message(greeting);
    }
    if !quiet {
        eprintln!("{}", dim("Type a question, or /help for commands."));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", bold("›"));
        io::stderr().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };

        match cmd {
            "/quit" | "/exit" => break,
            "/help" => eprintln!("{}", AFTER_HELP),
            "/upload" if arg.is_empty() => alert("usage: /upload <path-or-url>"),
            "/upload" => {
                if let Err(e) = upload(session, multi, arg).await {
                    alert(&format!("{e:#}"));
                }
            }
            "/retry" => match session.retry_upload() {
                Ok(pending) => {
                    let bar = spinner(multi, "Reading", "retrying upload…".to_string());
                    pending.settled().await;
                    bar.finish_and_clear();
                }
                Err(e) => alert(&e.to_string()),
            },
            "/status" => print_status(&session.upload_state()),
            "/history" => {
                for message in session.transcript() {
                    print_message(&message);
                }
            }
            "/export" => {
                if let Err(e) = export(session, multi, quiet).await {
                    alert(&format!("{e:#}"));
                }
            }
            _ if cmd.starts_with('/') => alert(&format!("unknown command {cmd}; try /help")),
            _ => match session.submit(line) {
                Ok(pending) => {
                    let bar = spinner(multi, "Thinking", dim(line));
                    let exchange = pending.settled().await;
                    bar.finish_and_clear();
                    if let Some(exchange) = exchange {
                        print_message(&Message::assistant(exchange.answer));
                    }
                }
                Err(e) => alert(&e.to_string()),
            },
        }
    }
    Ok(())
}

fn alert(msg: &str) {
    eprintln!("{} {}", cyan("⚠"), msg);
}

fn print_message(message: &Message) {
    match message.sender {
        Sender::User => println!("{} {}", bold(&cyan("You:")), message.body),
        Sender::Assistant => println!("{} {}\n", bold(&green("Bot:")), message.body),
    }
}

fn print_status(state: &UploadState) {
    let name = state.file_name.as_deref().unwrap_or("(no document)");
    let status = match &state.status {
        UploadStatus::Idle => dim("idle"),
        UploadStatus::Reading => cyan("reading…"),
        UploadStatus::Ready => green("ready"),
        UploadStatus::Failed { reason } => red(&format!("failed: {reason}")),
    };
    eprintln!("{}  {}", bold(name), status);
}
