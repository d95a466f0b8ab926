//! Content classification: image, text-bearing PDF, or scanned PDF.
//!
//! A PDF counts as text-bearing when its average non-whitespace characters
//! per page reaches the configured density threshold (inclusive). The text
//! layer read for that check is kept in the [`Classification`] so the
//! extractor never parses the document twice.

use crate::error::ScannoError;
use crate::pipeline::input::{Document, MediaType};
use crate::pipeline::pdf::{self, PdfEngine, TextLayer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Which extraction path a document takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// A JPEG or PNG photo/scan; forwarded as-is to the vision path.
    Image,
    /// A PDF with a usable text layer; its text goes to the text path.
    TextPdf,
    /// A PDF without enough text; its pages are rendered for the vision path.
    ScannedPdf,
}

/// Outcome of [`classify`].
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: DocumentKind,
    /// For images, the format sniffed from the bytes; for PDFs, `Pdf`.
    pub media_type: MediaType,
    /// The text pass output. `None` for images.
    pub text_layer: Option<TextLayer>,
}

impl Classification {
    /// Pages in the source document (1 for images).
    pub fn total_pages(&self) -> usize {
        self.text_layer.as_ref().map_or(1, TextLayer::page_count)
    }
}

/// Decide between `TextPdf` and `ScannedPdf` from a text layer.
///
/// `density >= threshold` is `TextPdf`, so a document exactly at the
/// threshold is text-bearing.
pub fn decide(layer: &TextLayer, threshold: f64) -> DocumentKind {
    if layer.page_count() > 0 && layer.density() >= threshold {
        DocumentKind::TextPdf
    } else {
        DocumentKind::ScannedPdf
    }
}

/// Classify a document from its declared media type and its bytes.
///
/// # Errors
/// * [`ScannoError::UnsupportedFormat`]: declared type is not pdf/jpg/jpeg/png
/// * [`ScannoError::CorruptDocument`]: bytes do not match the declared family
///   or the PDF cannot be parsed
pub async fn classify(
    document: &Document,
    engine: Arc<dyn PdfEngine>,
    threshold: f64,
    password: Option<&str>,
) -> Result<Classification, ScannoError> {
    let declared = MediaType::parse(document.declared_type()).ok_or_else(|| {
        ScannoError::UnsupportedFormat {
            media_type: document.declared_type().to_string(),
        }
    })?;

    if declared.is_image() {
        let media_type = sniff_image(document.bytes())?;
        if media_type != declared {
            debug!(
                "{}: declared {} but bytes are {}; using the sniffed type",
                document.label(),
                declared,
                media_type
            );
        }
        info!("{}: classified as image ({})", document.label(), media_type);
        return Ok(Classification {
            kind: DocumentKind::Image,
            media_type,
            text_layer: None,
        });
    }

    if !document.bytes().starts_with(b"%PDF") {
        let magic: Vec<u8> = document.bytes().iter().take(4).copied().collect();
        return Err(ScannoError::CorruptDocument {
            detail: format!("declared PDF but the file starts with {:?}", magic),
        });
    }

    let layer = pdf::text_layer(
        engine,
        document.shared_bytes(),
        password.map(str::to_string),
    )
    .await?;
    let kind = decide(&layer, threshold);

    info!(
        "{}: {} pages, {:.1} chars/page (threshold {:.1}) → {:?}",
        document.label(),
        layer.page_count(),
        layer.density(),
        threshold,
        kind
    );

    Ok(Classification {
        kind,
        media_type: MediaType::Pdf,
        text_layer: Some(layer),
    })
}

/// Identify the image format from its magic bytes.
fn sniff_image(bytes: &[u8]) -> Result<MediaType, ScannoError> {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => Ok(MediaType::Png),
        Ok(image::ImageFormat::Jpeg) => Ok(MediaType::Jpeg),
        Ok(other) => Err(ScannoError::CorruptDocument {
            detail: format!("declared image is actually {:?}", other),
        }),
        Err(e) => Err(ScannoError::CorruptDocument {
            detail: format!("not a PNG or JPEG image: {}", e),
        }),
    }
}
