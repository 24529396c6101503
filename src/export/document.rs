//! Document assembly: transcript bitmap → A4 portrait PDF.
//!
//! The bitmap is scaled to the full page width and cut into page-height
//! slices; each slice becomes one JPEG image XObject on its own page, drawn
//! from the top edge. The last page is usually only partly filled.
//!
//! ## Why JPEG?
//!
//! PDF embeds JPEG data as-is through the `DCTDecode` filter, so no
//! re-encoding or compression pass is needed inside the document. The chat
//! bitmap is mostly flat colour, which keeps artefacts invisible at the
//! quality used here.

use crate::error::ChatError;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tracing::debug;

/// A4 width in PDF points.
pub const A4_WIDTH_PT: f32 = 595.28;
/// A4 height in PDF points.
pub const A4_HEIGHT_PT: f32 = 841.89;

const JPEG_QUALITY: u8 = 90;

/// A finished PDF in memory.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub bytes: Vec<u8>,
    pub pages: usize,
}

/// Vertical `(top, height)` pixel ranges of each page for an image of the
/// given size once scaled to the A4 page width.
pub fn page_slices(width: u32, height: u32) -> Vec<(u32, u32)> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let page_px = ((width as f32) * A4_HEIGHT_PT / A4_WIDTH_PT).round().max(1.0) as u32;
    (0..height)
        .step_by(page_px as usize)
        .map(|top| (top, page_px.min(height - top)))
        .collect()
}

/// Embed `image` into a new multi-page A4 document.
pub fn assemble_pdf(image: &RgbImage) -> Result<AssembledDocument, ChatError> {
    let (width, height) = image.dimensions();
    let slices = page_slices(width, height);
    if slices.is_empty() {
        return Err(ChatError::DocumentAssemblyFailed {
            detail: format!("cannot embed an empty {width}x{height} image"),
        });
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(slices.len());

    for &(top, slice_h) in &slices {
        let slice = image::imageops::crop_imm(image, 0, top, width, slice_h).to_image();
        let jpeg = encode_jpeg(&slice)?;

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(i64::from(width)),
                "Height" => Object::Integer(i64::from(slice_h)),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let draw_h = slice_h as f32 * A4_WIDTH_PT / width as f32;
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(A4_WIDTH_PT),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(draw_h),
                        Object::Real(0.0),
                        Object::Real(A4_HEIGHT_PT - draw_h),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| ChatError::DocumentAssemblyFailed {
                detail: format!("content stream: {e}"),
            })?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(A4_WIDTH_PT),
                Object::Real(A4_HEIGHT_PT),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(slices.len() as i64),
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| ChatError::DocumentAssemblyFailed {
            detail: format!("serialise: {e}"),
        })?;

    debug!(
        "Assembled {}-page PDF from {}x{} px image ({} bytes)",
        slices.len(),
        width,
        height,
        bytes.len()
    );
    Ok(AssembledDocument {
        bytes,
        pages: slices.len(),
    })
}

/// Encode an RGB bitmap as baseline JPEG.
pub fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>, ChatError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .map_err(|e| ChatError::DocumentAssemblyFailed {
            detail: format!("JPEG encode: {e}"),
        })?;
    Ok(buf)
}
