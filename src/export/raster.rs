//! Transcript rasterisation: messages → chat-bubble bitmap.
//!
//! Layout happens in logical pixels at scale 1 and drawing multiplies every
//! coordinate by the export scale, so a 2× export is pixel-identical to the
//! 1× one, only sharper when printed.

use super::font::{self, ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH, LINE_HEIGHT};
use crate::error::ChatError;
use crate::transcript::{Message, Sender};
use image::{Rgb, RgbImage};
use tracing::debug;

/// Turns a transcript into a bitmap.
pub trait Rasterizer: Send + Sync {
    /// Render `messages` in order, each logical pixel drawn as a
    /// `scale`×`scale` block.
    fn rasterize(&self, messages: &[Message], scale: u32) -> Result<RgbImage, ChatError>;
}

const MARGIN: u32 = 16;
const PAD: u32 = 8;
const GAP: u32 = 10;
/// Guard against transcripts whose bitmap would not fit in memory.
const MAX_CANVAS_PIXELS: u64 = 120_000_000;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const ASSISTANT_BUBBLE: Rgb<u8> = Rgb([241, 243, 245]);
const USER_BUBBLE: Rgb<u8> = Rgb([220, 248, 198]);
const TEXT: Rgb<u8> = Rgb([33, 37, 41]);
const LABEL: Rgb<u8> = Rgb([134, 142, 150]);

/// Default [`Rasterizer`]: assistant bubbles on the left, user bubbles on
/// the right, each with a small sender label above it.
#[derive(Debug, Clone)]
pub struct BitmapRasterizer {
    width: u32,
}

impl BitmapRasterizer {
    /// `width` is the logical canvas width before scaling.
    pub fn new(width: u32) -> Self {
        Self { width }
    }

    fn columns(&self) -> usize {
        let bubble_max = self.width * 3 / 4;
        (bubble_max.saturating_sub(2 * PAD) / ADVANCE).max(1) as usize
    }

    fn layout(&self, messages: &[Message]) -> (Vec<Block>, u32) {
        let cols = self.columns();
        let mut blocks = Vec::with_capacity(messages.len());
        let mut y = MARGIN;

        for message in messages {
            let lines = wrap(&message.body, cols);
            let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
            let w = (longest * ADVANCE).saturating_sub(1).max(GLYPH_WIDTH) + 2 * PAD;
            let h = lines.len() as u32 * LINE_HEIGHT - (LINE_HEIGHT - GLYPH_HEIGHT) + 2 * PAD;
            let x = match message.sender {
                Sender::Assistant => MARGIN,
                Sender::User => self.width.saturating_sub(MARGIN + w),
            };

            let label = label_for(message.sender);
            let label_w = label.len() as u32 * ADVANCE;
            let label_x = match message.sender {
                Sender::Assistant => x,
                Sender::User => (x + w).saturating_sub(label_w),
            };

            blocks.push(Block {
                label,
                label_at: (label_x, y),
                bubble: Rect { x, y: y + LINE_HEIGHT, w, h },
                colour: match message.sender {
                    Sender::Assistant => ASSISTANT_BUBBLE,
                    Sender::User => USER_BUBBLE,
                },
                lines,
            });
            y += LINE_HEIGHT + h + GAP;
        }

        let height = y.saturating_sub(GAP).max(MARGIN) + MARGIN;
        (blocks, height)
    }
}

impl Default for BitmapRasterizer {
    fn default() -> Self {
        Self::new(600)
    }
}

impl Rasterizer for BitmapRasterizer {
    fn rasterize(&self, messages: &[Message], scale: u32) -> Result<RgbImage, ChatError> {
        if scale == 0 {
            return Err(ChatError::RasterisationFailed {
                detail: "scale must be at least 1".into(),
            });
        }

        let (blocks, height) = self.layout(messages);
        let pixels = u64::from(self.width) * u64::from(height) * u64::from(scale).pow(2);
        if pixels > MAX_CANVAS_PIXELS {
            return Err(ChatError::RasterisationFailed {
                detail: format!(
                    "transcript too long to render: {}x{} px at {}x",
                    self.width, height, scale
                ),
            });
        }

        let mut canvas = Canvas {
            image: RgbImage::from_pixel(self.width * scale, height * scale, BACKGROUND),
            scale,
        };

        for block in &blocks {
            canvas.text(block.label_at.0, block.label_at.1, block.label, LABEL);
            canvas.fill(block.bubble, block.colour);
            for (i, line) in block.lines.iter().enumerate() {
                canvas.text(
                    block.bubble.x + PAD,
                    block.bubble.y + PAD + i as u32 * LINE_HEIGHT,
                    line,
                    TEXT,
                );
            }
        }

        debug!(
            "Rasterised {} messages → {}x{} px",
            messages.len(),
            canvas.image.width(),
            canvas.image.height()
        );
        Ok(canvas.image)
    }
}

fn label_for(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "You",
        Sender::Assistant => "PDF Analyzer Bot",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

struct Block {
    label: &'static str,
    label_at: (u32, u32),
    bubble: Rect,
    colour: Rgb<u8>,
    lines: Vec<String>,
}

struct Canvas {
    image: RgbImage,
    scale: u32,
}

impl Canvas {
    fn fill(&mut self, rect: Rect, colour: Rgb<u8>) {
        let s = self.scale;
        let x_end = ((rect.x + rect.w) * s).min(self.image.width());
        let y_end = ((rect.y + rect.h) * s).min(self.image.height());
        for py in rect.y * s..y_end {
            for px in rect.x * s..x_end {
                self.image.put_pixel(px, py, colour);
            }
        }
    }

    fn text(&mut self, x: u32, y: u32, line: &str, colour: Rgb<u8>) {
        for (i, c) in line.chars().enumerate() {
            let cx = x + i as u32 * ADVANCE;
            for (col, bits) in font::glyph(c).iter().enumerate() {
                for row in 0..GLYPH_HEIGHT {
                    if (bits >> row) & 1 == 1 {
                        let dot = Rect {
                            x: cx + col as u32,
                            y: y + row,
                            w: 1,
                            h: 1,
                        };
                        self.fill(dot, colour);
                    }
                }
            }
        }
    }
}

/// Greedy word wrap to at most `cols` characters per line.
///
/// Explicit newlines start a new line; words longer than a line are split.
/// Always returns at least one line.
pub fn wrap(text: &str, cols: usize) -> Vec<String> {
    let cols = cols.max(1);
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let paragraph = paragraph.trim_end_matches('\r');
        let mut line = String::new();
        let mut len = 0;

        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > cols {
                if len > 0 {
                    lines.push(std::mem::take(&mut line));
                    len = 0;
                }
                let rest = word.split_off(cols);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            if len > 0 && len + 1 + word.len() > cols {
                lines.push(std::mem::take(&mut line));
                len = 0;
            }
            if len > 0 {
                line.push(' ');
                len += 1;
            }
            len += word.len();
            line.extend(word);
        }
        lines.push(line);
    }

    lines
}
