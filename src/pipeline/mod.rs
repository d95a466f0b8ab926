//! Pipeline stages for inspection-document analysis.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own against stub engines and capabilities.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ classify ──▶ extract ──▶ llm ──▶ validate
//! (path/URL) (density)   (text|png)  (retry)  (schema)
//!                 │           │
//!                 └── pdf ────┤
//!                          encode
//! ```
//!
//! 1. [`input`]   : load a local file or download a URL into a [`input::Document`]
//! 2. [`classify`]: image, text-bearing PDF, or scanned PDF
//! 3. [`extract`] : joined page text, or base64 images for the vision path
//! 4. [`llm`]     : call the analysis capability with bounded retries; the
//!    only stage with network I/O besides URL downloads
//! 5. [`validate`]: parse the model's JSON into an `InspectionReport`
//!
//! [`pdf`] is the pdfium backend used by stages 2 and 3; it runs in
//! `spawn_blocking` because pdfium is not async-safe. [`encode`] turns
//! rendered pages and uploaded photos into base64 payloads.

pub mod classify;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod pdf;
pub mod validate;
