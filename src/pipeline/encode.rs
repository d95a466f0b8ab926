//! Image encoding: rendered pages and uploaded photos → base64 payloads.
//!
//! Rendered pages are PNG-encoded: lossless compression keeps small print on
//! inspection checklists legible. Uploaded photos are passed through
//! untouched; re-encoding a JPEG would only add artefacts.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// A base64-encoded image ready for the vision path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    /// Standard base64 (with padding), no data-URI prefix.
    pub data: String,
    pub mime_type: String,
}

impl EncodedImage {
    /// `data:` URI form, for APIs that take images as URLs.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page → {} bytes base64", b64.len());

    Ok(EncodedImage {
        data: b64,
        mime_type: "image/png".to_string(),
    })
}

/// Wrap already-encoded image bytes (an uploaded JPEG or PNG) without re-encoding.
pub fn encode_raw(bytes: &[u8], mime_type: &str) -> EncodedImage {
    EncodedImage {
        data: STANDARD.encode(bytes),
        mime_type: mime_type.to_string(),
    }
}
