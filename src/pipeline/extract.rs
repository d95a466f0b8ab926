//! Extraction: produce the payload the model will see.
//!
//! | Classification | Payload |
//! |----------------|---------|
//! | `TextPdf`      | page texts joined with single newlines |
//! | `ScannedPdf`   | first `max_pages` pages rendered to PNG |
//! | `Image`        | the uploaded bytes, base64-encoded as-is |
//!
//! Scanned documents longer than `max_pages` are cut, and the cut is
//! recorded in the `truncated` flag of [`ExtractionResult::Image`] and logged rather than
//! happening silently.

use crate::error::ScannoError;
use crate::pipeline::classify::{Classification, DocumentKind};
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::input::Document;
use crate::pipeline::pdf::{self, PdfEngine, TextLayer};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Content handed to the model invoker.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    /// Embedded text of a text-bearing PDF, or pre-extracted text.
    Text { content: String },
    /// One or more images for the vision path.
    Image {
        images: Vec<EncodedImage>,
        /// Pages in the source document (1 for an uploaded image).
        total_pages: usize,
        /// `true` when fewer than `total_pages` images are attached.
        truncated: bool,
    },
}

impl ExtractionResult {
    /// Pages whose content is carried by this payload.
    pub fn pages_included(&self, text_pages: usize) -> usize {
        match self {
            ExtractionResult::Text { .. } => text_pages,
            ExtractionResult::Image { images, .. } => images.len(),
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, ExtractionResult::Image { truncated: true, .. })
    }
}

/// Limits for the scanned-PDF path.
#[derive(Debug, Clone, Copy)]
pub struct RenderLimits {
    pub max_pages: usize,
    pub max_pixels: u32,
}

/// Build the payload for a classified document.
///
/// # Errors
/// * [`ScannoError::EmptyExtraction`]: a text PDF whose joined text is
///   empty, or a scanned PDF that yielded no pages
/// * [`ScannoError::CorruptDocument`]: rendering failed
pub async fn extract(
    document: &Document,
    classification: &Classification,
    engine: Arc<dyn PdfEngine>,
    limits: RenderLimits,
    password: Option<&str>,
) -> Result<ExtractionResult, ScannoError> {
    match classification.kind {
        DocumentKind::Image => {
            let image = encode::encode_raw(document.bytes(), classification.media_type.mime());
            debug!("{}: image payload, {} bytes", document.label(), document.bytes().len());
            Ok(ExtractionResult::Image {
                images: vec![image],
                total_pages: 1,
                truncated: false,
            })
        }
        DocumentKind::TextPdf => {
            let content = match classification.text_layer.as_ref() {
                Some(layer) => join_pages(layer),
                None => String::new(),
            };
            if content.is_empty() {
                return Err(ScannoError::EmptyExtraction {
                    detail: "text-bearing PDF produced no text".into(),
                });
            }
            info!("{}: text payload, {} chars", document.label(), content.len());
            Ok(ExtractionResult::Text { content })
        }
        DocumentKind::ScannedPdf => {
            extract_scanned(document, engine, limits, password).await
        }
    }
}

async fn extract_scanned(
    document: &Document,
    engine: Arc<dyn PdfEngine>,
    limits: RenderLimits,
    password: Option<&str>,
) -> Result<ExtractionResult, ScannoError> {
    let max_pages = limits.max_pages.max(1);
    let rendered = pdf::render_pages(
        engine,
        document.shared_bytes(),
        password.map(str::to_string),
        max_pages,
        limits.max_pixels,
    )
    .await?;

    if rendered.images.is_empty() {
        return Err(ScannoError::EmptyExtraction {
            detail: format!("scanned PDF has {} renderable pages", rendered.total_pages),
        });
    }

    let images = rendered
        .images
        .iter()
        .enumerate()
        .map(|(idx, img)| {
            encode::encode_page(img).map_err(|e| ScannoError::CorruptDocument {
                detail: format!("page {} could not be encoded: {}", idx + 1, e),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let truncated = rendered.total_pages > images.len();
    if truncated {
        warn!(
            "{}: only the first {} of {} pages will be analysed",
            document.label(),
            images.len(),
            rendered.total_pages
        );
    } else {
        info!("{}: {} page image(s) rendered", document.label(), images.len());
    }

    Ok(ExtractionResult::Image {
        images,
        total_pages: rendered.total_pages,
        truncated,
    })
}

/// Join page texts in order: each page trimmed, line endings normalised,
/// blank pages dropped, one newline between pages.
pub fn join_pages(layer: &TextLayer) -> String {
    layer
        .pages()
        .iter()
        .map(|p| normalise_line_endings(p))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_preserves_order_and_uses_single_newlines() {
        let layer = TextLayer::new(vec![
            "Engine oil low.\r\n".into(),
            "   ".into(),
            "\nBrake pads 20%.\n\n".into(),
            "Tire tread 3mm.".into(),
        ]);
        assert_eq!(
            join_pages(&layer),
            "Engine oil low.\nBrake pads 20%.\nTire tread 3mm."
        );
    }

    #[test]
    fn join_of_blank_layer_is_empty() {
        let layer = TextLayer::new(vec!["\n".into(), " ".into()]);
        assert!(join_pages(&layer).is_empty());
    }

    #[test]
    fn truncation_flag_helpers() {
        let r = ExtractionResult::Image {
            images: vec![],
            total_pages: 5,
            truncated: true,
        };
        assert!(r.is_truncated());
        assert!(!ExtractionResult::Text {
            content: "x".into()
        }
        .is_truncated());
        assert_eq!(
            ExtractionResult::Text {
                content: "x".into()
            }
            .pages_included(4),
            4
        );
    }
}
