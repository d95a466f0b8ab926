//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as a document moves through classification, model invocation and
//! validation.
//!
//! # Example
//!
//! ```rust
//! use scanno::{AnalysisConfig, AnalysisProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! struct RetryCounter {
//!     failures: AtomicU32,
//! }
//!
//! impl AnalysisProgressCallback for RetryCounter {
//!     fn on_attempt_failed(&self, _doc: &str, attempt: u32, error: &str, will_retry: bool) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("attempt {attempt} failed ({error}), retrying: {will_retry}");
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(Arc::new(RetryCounter { failures: AtomicU32::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::classify::DocumentKind;
use std::sync::Arc;

/// Called by the pipeline at each stage boundary.
///
/// Implementations must be `Send + Sync`: [`crate::analyze::analyze_many`]
/// runs several documents at once and every run reports through the same
/// callback. All methods have default no-op implementations. `doc` is the
/// document's display name (path, URL or `"<text>"`).
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before the document is classified.
    fn on_analysis_start(&self, doc: &str) {
        let _ = doc;
    }

    /// Called after classification.
    ///
    /// # Arguments
    /// * `kind`       : the extraction path chosen
    /// * `total_pages`: pages in the document (1 for images)
    fn on_classified(&self, doc: &str, kind: DocumentKind, total_pages: usize) {
        let _ = (doc, kind, total_pages);
    }

    /// Called just before each call to the analysis model (1-indexed).
    fn on_attempt_start(&self, doc: &str, attempt: u32, max_attempts: u32) {
        let _ = (doc, attempt, max_attempts);
    }

    /// Called when a model call fails. `will_retry` is `false` on the last
    /// attempt and for non-retriable failures.
    fn on_attempt_failed(&self, doc: &str, attempt: u32, error: &str, will_retry: bool) {
        let _ = (doc, attempt, error, will_retry);
    }

    /// Called once when a validated report is available.
    fn on_analysis_complete(&self, doc: &str, risk_level: &str) {
        let _ = (doc, risk_level);
    }

    /// Called once when the run ends in an error.
    fn on_analysis_error(&self, doc: &str, code: &str, message: &str) {
        let _ = (doc, code, message);
    }
}

/// A no-op implementation, usable as a placeholder.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience type alias used in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl AnalysisProgressCallback for Recorder {
        fn on_classified(&self, doc: &str, kind: DocumentKind, total_pages: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{doc}:{kind:?}:{total_pages}"));
        }
    }

    #[test]
    fn default_methods_are_noops() {
        let cb = NoopProgressCallback;
        cb.on_analysis_start("a.pdf");
        cb.on_attempt_failed("a.pdf", 1, "timeout", true);
        cb.on_analysis_error("a.pdf", "corrupt_document", "bad");
    }

    #[test]
    fn overridden_method_receives_arguments() {
        let rec = Recorder::default();
        rec.on_classified("scan.pdf", DocumentKind::ScannedPdf, 4);
        rec.on_analysis_start("ignored");
        assert_eq!(*rec.events.lock().unwrap(), vec!["scan.pdf:ScannedPdf:4"]);
    }

    #[test]
    fn callback_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopProgressCallback>();
        let _cb: ProgressCallback = Arc::new(NoopProgressCallback);
    }
}
