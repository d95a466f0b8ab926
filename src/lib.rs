//! # scanno
//!
//! Analyse vehicle inspection documents (PDFs and photos) with a multimodal
//! language model and get back a validated, structured condition report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document (path / URL / bytes)
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Classify  image, text-bearing PDF, or scanned PDF (chars per page)
//!  ├─ 3. Extract   joined page text, or PNG/JPEG payloads (pdfium, spawn_blocking)
//!  ├─ 4. Invoke    text or vision call with bounded retry + backoff
//!  └─ 5. Validate  strict JSON schema → InspectionReport
//! ```
//!
//! Text-bearing PDFs go to the model as text, which is cheaper and more
//! accurate than vision. Scanned PDFs have their first pages rendered and
//! sent as images, and photos are sent as they are.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanno::{analyze, AnalysisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = AnalysisConfig::default();
//!     let output = analyze("inspection.pdf", None, &config).await?;
//!     println!("{}", output.report.to_json_pretty());
//!     eprintln!("risk: {}, attempts: {}",
//!         output.report.risk_level(),
//!         output.stats.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanno` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! scanno = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{
    analyze, analyze_bytes, analyze_document, analyze_many, analyze_sync, analyze_text,
    analyze_to_file, resolve_capability, write_report,
};
pub use config::{AnalysisConfig, AnalysisConfigBuilder};
pub use error::{CapabilityError, ScannoError};
pub use output::{AnalysisOutput, AnalysisStats, InspectionReport, RiskLevel, SourceInfo};
pub use pipeline::classify::{Classification, DocumentKind};
pub use pipeline::encode::EncodedImage;
pub use pipeline::extract::ExtractionResult;
pub use pipeline::input::{Document, MediaType};
pub use pipeline::llm::{
    AnalysisCapability, AnalysisRequest, CapabilityResponse, InvocationMode, LlmCapability,
    ModelResponse, RetryPolicy,
};
pub use pipeline::pdf::{PdfEngine, PdfiumEngine, RenderedPages, TextLayer};
pub use pipeline::validate::validate;
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
