//! Error types for the scanno library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ScannoError`]: **Fatal**: no report can be produced for this
//!   document (unsupported format, corrupt file, model unreachable after all
//!   attempts, response that does not match the report schema). Returned as
//!   `Err(ScannoError)` from every `analyze*` entry point.
//!
//! * [`CapabilityError`]: **Per attempt**: one call to the analysis
//!   capability failed. The invoker inspects [`CapabilityError::is_retryable`]
//!   to decide whether to back off and try again or to give up at once; only
//!   the last one survives, inside [`ScannoError::ModelUnavailable`].
//!
//! Every [`ScannoError`] has a stable machine-readable [`ScannoError::code`]
//! so callers can branch on the category without parsing messages.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the scanno library.
#[derive(Debug, Error)]
pub enum ScannoError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Document errors ───────────────────────────────────────────────────
    /// The declared media type is not one of pdf, jpg, jpeg, png.
    #[error("Unsupported format '{media_type}'. Upload a PDF, JPEG or PNG document.")]
    UnsupportedFormat { media_type: String },

    /// The bytes could not be parsed or rendered as the declared format.
    #[error("Document is corrupt or unreadable: {detail}")]
    CorruptDocument { detail: String },

    /// Extraction produced nothing to send to the model.
    #[error("Nothing could be extracted from the document: {detail}")]
    EmptyExtraction { detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// Every attempt failed with a transient error.
    #[error("Analysis model unavailable after {attempts} attempt(s). Last error: {last_error}")]
    ModelUnavailable {
        attempts: u32,
        #[source]
        last_error: CapabilityError,
    },

    /// The model endpoint rejected the credentials; retrying will not help.
    #[error("Analysis model rejected the credentials: {detail}")]
    ModelAuthFailure { detail: String },

    /// The model endpoint rejected the request itself (bad payload, bad model name).
    #[error("Analysis model rejected the request: {detail}")]
    ModelRequestRejected { detail: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Response errors ───────────────────────────────────────────────────
    /// The model output could not be parsed as a JSON object.
    #[error("Model response is not valid JSON: {detail}")]
    MalformedResponse { detail: String, raw: String },

    /// The model output parsed, but a required field is missing or invalid.
    #[error("Model response violates the report schema at '{field}': {detail}")]
    SchemaViolation { field: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the report file.
    #[error("Failed to write report file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Scanned and text PDFs are read with pdfium. Either:\n\
  • install libpdfium where the system loader can find it, or\n\
  • set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium (or pass --pdfium-lib).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScannoError {
    /// Stable category string for this failure, suitable for JSON output
    /// and for matching in callers.
    pub fn code(&self) -> &'static str {
        match self {
            ScannoError::FileNotFound { .. } => "file_not_found",
            ScannoError::PermissionDenied { .. } => "permission_denied",
            ScannoError::InvalidInput { .. } => "invalid_input",
            ScannoError::DownloadFailed { .. } => "download_failed",
            ScannoError::DownloadTimeout { .. } => "download_timeout",
            ScannoError::UnsupportedFormat { .. } => "unsupported_format",
            ScannoError::CorruptDocument { .. } => "corrupt_document",
            ScannoError::EmptyExtraction { .. } => "empty_extraction",
            ScannoError::ModelUnavailable { .. } => "model_unavailable",
            ScannoError::ModelAuthFailure { .. } => "model_auth_failure",
            ScannoError::ModelRequestRejected { .. } => "model_request_rejected",
            ScannoError::ProviderNotConfigured { .. } => "provider_not_configured",
            ScannoError::MalformedResponse { .. } => "malformed_response",
            ScannoError::SchemaViolation { .. } => "schema_violation",
            ScannoError::OutputWriteFailed { .. } => "output_write_failed",
            ScannoError::InvalidConfig(_) => "invalid_config",
            ScannoError::PdfiumBindingFailed(_) => "pdfium_binding_failed",
            ScannoError::Internal(_) => "internal",
        }
    }
}

/// A single failed call to the analysis capability.
///
/// Retriable variants (`Network`, `Timeout`, `RateLimited`, `Server`) let the
/// invoker back off and try again; `Auth` and `InvalidRequest` abort the
/// retry loop on the spot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Connection refused, DNS failure, reset mid-response.
    #[error("network error: {0}")]
    Network(String),

    /// The attempt did not complete in time. `secs` is the per-call limit when
    /// the invoker's own timer fired; provider-side timeouts carry none.
    #[error("call timed out{}", timeout_suffix(.secs))]
    Timeout { secs: Option<u64> },

    /// HTTP 429 or an equivalent quota signal.
    #[error("rate limited{}", retry_after_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 5xx or an overloaded backend.
    #[error("server error: {0}")]
    Server(String),

    /// HTTP 401/403, missing or invalid API key.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request cannot succeed as sent: HTTP 400-class rejection, unknown
    /// model, oversized input, unsupported feature or missing configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CapabilityError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapabilityError::Network(_)
                | CapabilityError::Timeout { .. }
                | CapabilityError::RateLimited { .. }
                | CapabilityError::Server(_)
        )
    }

    /// Convert a non-retriable failure into the fatal error surfaced to callers.
    ///
    /// Retriable variants only reach the caller wrapped in
    /// [`ScannoError::ModelUnavailable`]; this maps them there with a single
    /// attempt for completeness.
    pub fn into_fatal(self) -> ScannoError {
        match self {
            CapabilityError::Auth(detail) => ScannoError::ModelAuthFailure { detail },
            CapabilityError::InvalidRequest(detail) => {
                ScannoError::ModelRequestRejected { detail }
            }
            other => ScannoError::ModelUnavailable {
                attempts: 1,
                last_error: other,
            },
        }
    }
}

fn timeout_suffix(secs: &Option<u64>) -> String {
    match secs {
        Some(secs) => format!(" after {secs}s"),
        None => String::new(),
    }
}

fn retry_after_suffix(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(" (retry after {secs}s)"),
        None => String::new(),
    }
}
