//! PDF backend: text-layer extraction and page rasterisation.
//!
//! The pipeline talks to PDFs only through the [`PdfEngine`] trait so the
//! classifier and extractor can be exercised against a stub in tests. The
//! production implementation, [`PdfiumEngine`], wraps `pdfium-render`.
//!
//! ## Blocking
//!
//! pdfium is a C++ library with thread-local state and no async API. Engine
//! methods are synchronous; callers run them inside
//! `tokio::task::spawn_blocking` (see [`text_layer`] and [`render_pages`]).

use crate::error::ScannoError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable naming the directory that holds the pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Text extracted from every page of a PDF, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextLayer {
    pages: Vec<String>,
}

impl TextLayer {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Non-whitespace characters across all pages.
    pub fn char_count(&self) -> usize {
        self.pages
            .iter()
            .map(|p| p.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }

    /// Average non-whitespace characters per page. 0.0 for a document
    /// without pages.
    pub fn density(&self) -> f64 {
        if self.pages.is_empty() {
            0.0
        } else {
            self.char_count() as f64 / self.pages.len() as f64
        }
    }
}

/// The first pages of a PDF rendered to images.
#[derive(Debug, Clone)]
pub struct RenderedPages {
    /// Rendered pages, in order. At most the requested count.
    pub images: Vec<DynamicImage>,
    /// Pages in the whole document.
    pub total_pages: usize,
}

/// Access to PDF contents.
///
/// Implementations must report unparseable input as
/// [`ScannoError::CorruptDocument`].
pub trait PdfEngine: Send + Sync {
    /// Extract the text of every page.
    fn extract_text(&self, bytes: &[u8], password: Option<&str>)
        -> Result<TextLayer, ScannoError>;

    /// Render the first `max_pages` pages, longest edge capped at `max_pixels`.
    fn render(
        &self,
        bytes: &[u8],
        password: Option<&str>,
        max_pages: usize,
        max_pixels: u32,
    ) -> Result<RenderedPages, ScannoError>;
}

/// Run [`PdfEngine::extract_text`] on the blocking pool.
pub async fn text_layer(
    engine: Arc<dyn PdfEngine>,
    bytes: Arc<[u8]>,
    password: Option<String>,
) -> Result<TextLayer, ScannoError> {
    tokio::task::spawn_blocking(move || engine.extract_text(&bytes, password.as_deref()))
        .await
        .map_err(|e| ScannoError::Internal(format!("Text extraction task panicked: {}", e)))?
}

/// Run [`PdfEngine::render`] on the blocking pool.
pub async fn render_pages(
    engine: Arc<dyn PdfEngine>,
    bytes: Arc<[u8]>,
    password: Option<String>,
    max_pages: usize,
    max_pixels: u32,
) -> Result<RenderedPages, ScannoError> {
    tokio::task::spawn_blocking(move || {
        engine.render(&bytes, password.as_deref(), max_pages, max_pixels)
    })
    .await
    .map_err(|e| ScannoError::Internal(format!("Render task panicked: {}", e)))?
}

/// [`PdfEngine`] backed by the pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    lib_dir: Option<PathBuf>,
}

impl PdfiumEngine {
    /// Bind to the pdfium library in `lib_dir`, falling back to
    /// `PDFIUM_LIB_PATH` and then to the system library.
    pub fn new(lib_dir: Option<PathBuf>) -> Self {
        Self { lib_dir }
    }

    fn bind(&self) -> Result<Pdfium, ScannoError> {
        let dir = self
            .lib_dir
            .clone()
            .or_else(|| std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from));

        let bindings = match dir {
            Some(dir) => {
                let lib = Pdfium::pdfium_platform_library_name_at_path(&dir);
                Pdfium::bind_to_library(&lib)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ScannoError::PdfiumBindingFailed(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }
}

fn open_error(e: PdfiumError, password: Option<&str>) -> ScannoError {
    let err_str = format!("{:?}", e);
    let detail = if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            "wrong password for encrypted PDF".to_string()
        } else {
            "PDF is encrypted and requires a password".to_string()
        }
    } else {
        err_str
    };
    ScannoError::CorruptDocument { detail }
}

impl PdfEngine for PdfiumEngine {
    fn extract_text(
        &self,
        bytes: &[u8],
        password: Option<&str>,
    ) -> Result<TextLayer, ScannoError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, password)
            .map_err(|e| open_error(e, password))?;

        let mut pages = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let text = page
                .text()
                .map_err(|e| ScannoError::CorruptDocument {
                    detail: format!("text layer of page {} unreadable: {:?}", idx + 1, e),
                })?
                .all();
            debug!("Page {}: {} chars of text", idx + 1, text.len());
            pages.push(text);
        }

        info!("PDF loaded: {} pages", pages.len());
        Ok(TextLayer::new(pages))
    }

    fn render(
        &self,
        bytes: &[u8],
        password: Option<&str>,
        max_pages: usize,
        max_pixels: u32,
    ) -> Result<RenderedPages, ScannoError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, password)
            .map_err(|e| open_error(e, password))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut images = Vec::with_capacity(max_pages.min(total_pages));
        for idx in 0..total_pages.min(max_pages) {
            let page = pages
                .get(idx as u16)
                .map_err(|e| ScannoError::CorruptDocument {
                    detail: format!("page {} unreadable: {:?}", idx + 1, e),
                })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ScannoError::CorruptDocument {
                    detail: format!("page {} could not be rendered: {:?}", idx + 1, e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }

        Ok(RenderedPages {
            images,
            total_pages,
        })
    }
}
