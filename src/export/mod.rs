//! Transcript export: messages → bitmap → A4 PDF → `chat.pdf`.
//!
//! ```text
//! Vec<Message>
//!  ├─ 1. Rasterise   chat bubbles at the export scale        (raster)
//!  ├─ 2. Assemble    JPEG slices on A4 portrait pages        (document)
//!  └─ 3. Persist     atomic write under the export file name (sink)
//! ```
//!
//! All three stages are blocking and run together inside `spawn_blocking`.
//! The rasteriser and the sink are trait objects so front ends can swap in
//! their own renderer or destination.

pub mod document;
pub mod font;
pub mod raster;
pub mod sink;

pub use document::{assemble_pdf, AssembledDocument};
pub use raster::{BitmapRasterizer, Rasterizer};
pub use sink::{DirectorySink, DocumentSink};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::observer::ObserverRef;
use crate::transcript::Message;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Outcome of a successful export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub pages: usize,
    /// Size of the rasterised transcript in pixels.
    pub image_width: u32,
    pub image_height: u32,
    pub bytes: usize,
}

/// Renders a transcript snapshot into a paginated document.
#[derive(Clone)]
pub struct TranscriptExporter {
    rasterizer: Arc<dyn Rasterizer>,
    sink: Arc<dyn DocumentSink>,
    scale: u32,
    file_name: String,
    observer: Option<ObserverRef>,
}

impl TranscriptExporter {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        sink: Arc<dyn DocumentSink>,
        scale: u32,
        file_name: impl Into<String>,
        observer: Option<ObserverRef>,
    ) -> Self {
        Self {
            rasterizer,
            sink,
            scale,
            file_name: file_name.into(),
            observer,
        }
    }

    /// Default pipeline for `config`: [`BitmapRasterizer`] into a
    /// [`DirectorySink`] at the resolved export directory.
    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(
            Arc::new(BitmapRasterizer::new(config.render_width)),
            Arc::new(DirectorySink::new(config.resolved_export_dir())),
            config.export_scale,
            config.export_file_name.clone(),
            config.observer.clone(),
        )
    }

    /// Replace the rasteriser, keeping everything else.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Replace the sink, keeping everything else.
    pub fn with_sink(mut self, sink: Arc<dyn DocumentSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Export `transcript`, swallowing failures.
    ///
    /// Errors are logged and reported through the observer; nothing is
    /// returned to the caller and no partial file is left behind.
    pub async fn export(&self, transcript: Vec<Message>) {
        if let Err(e) = self.try_export(transcript).await {
            error!("Export failed: {}", e);
        }
    }

    /// Export `transcript` and return the typed outcome.
    pub async fn try_export(&self, transcript: Vec<Message>) -> Result<ExportReport, ChatError> {
        let this = self.clone();
        let result = tokio::task::spawn_blocking(move || this.export_blocking(&transcript))
            .await
            .map_err(|e| ChatError::Internal(format!("Export task panicked: {e}")))
            .and_then(|r| r);

        if let Some(ref obs) = self.observer {
            match &result {
                Ok(report) => obs.on_export_complete(&report.path, report.pages),
                Err(e) => obs.on_export_failed(&e.to_string()),
            }
        }
        result
    }

    /// Synchronous export on the calling thread.
    pub fn export_blocking(&self, transcript: &[Message]) -> Result<ExportReport, ChatError> {
        let start = Instant::now();
        let image = self.rasterizer.rasterize(transcript, self.scale)?;
        let document = assemble_pdf(&image)?;
        let path = self.sink.save(&self.file_name, &document.bytes)?;

        info!(
            "Exported {} messages to {} ({} pages, {} ms)",
            transcript.len(),
            path.display(),
            document.pages,
            start.elapsed().as_millis()
        );

        Ok(ExportReport {
            path,
            pages: document.pages,
            image_width: image.width(),
            image_height: image.height(),
            bytes: document.bytes.len(),
        })
    }
}
