//! Integration tests for the analysis pipeline.
//!
//! The model and the PDF backend are replaced by in-process stubs, so these
//! tests need neither an API key nor a pdfium library.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use scanno::{
    analyze, analyze_bytes, analyze_many, analyze_text, analyze_to_file, AnalysisCapability,
    AnalysisConfig, AnalysisProgressCallback, CapabilityError, CapabilityResponse, DocumentKind,
    EncodedImage, MediaType, PdfEngine, RenderedPages, RiskLevel, ScannoError, TextLayer,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::fmt::MakeWriter;

// ── Test helpers ─────────────────────────────────────────────────────────────

const CANONICAL: &str = r#"{
  "summary": "The vehicle needs routine service soon.",
  "risk_level": "Medium",
  "issues": ["Engine oil level low", "Brake pads at 20%"],
  "maintenance": ["Top up engine oil", "Replace front brake pads"],
  "recommendation": "Service within two weeks; tires are fine at 3mm."
}"#;

/// What the stub model saw on one call.
#[derive(Debug, Clone)]
struct Call {
    vision: bool,
    user_prompt: String,
    images: Vec<EncodedImage>,
}

/// Scripted model: replays `replies` in order and records every call.
struct StubModel {
    replies: Mutex<Vec<Result<String, CapabilityError>>>,
    calls: Mutex<Vec<Call>>,
}

impl StubModel {
    fn new(replies: Vec<Result<String, CapabilityError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn answering(reply: &str) -> Arc<Self> {
        Self::new(vec![Ok(reply.to_string())])
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, call: Call) -> Result<CapabilityResponse, CapabilityError> {
        self.calls.lock().unwrap().push(call);
        let mut replies = self.replies.lock().unwrap();
        let next = if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies[0].clone()
        };
        next.map(|content| CapabilityResponse {
            content,
            input_tokens: 100,
            output_tokens: 40,
        })
    }
}

#[async_trait]
impl AnalysisCapability for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn analyze_text(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CapabilityResponse, CapabilityError> {
        self.respond(Call {
            vision: false,
            user_prompt: user_prompt.to_string(),
            images: Vec::new(),
        })
    }

    async fn analyze_images(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        images: &[EncodedImage],
    ) -> Result<CapabilityResponse, CapabilityError> {
        self.respond(Call {
            vision: true,
            user_prompt: user_prompt.to_string(),
            images: images.to_vec(),
        })
    }
}

/// PDF backend with fixed page texts; renders blank pages on demand.
struct StubPdf {
    pages: Vec<String>,
    text_calls: AtomicUsize,
    render_calls: AtomicUsize,
}

impl StubPdf {
    fn new(pages: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.iter().map(|p| p.to_string()).collect(),
            text_calls: AtomicUsize::new(0),
            render_calls: AtomicUsize::new(0),
        })
    }

    fn touched(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst) + self.render_calls.load(Ordering::SeqCst)
    }
}

impl PdfEngine for StubPdf {
    fn extract_text(&self, _: &[u8], _: Option<&str>) -> Result<TextLayer, ScannoError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TextLayer::new(self.pages.clone()))
    }

    fn render(
        &self,
        _: &[u8],
        _: Option<&str>,
        max_pages: usize,
        max_pixels: u32,
    ) -> Result<RenderedPages, ScannoError> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        let side = max_pixels.min(16);
        let images = (0..self.pages.len().min(max_pages))
            .map(|_| DynamicImage::ImageRgba8(RgbaImage::from_pixel(side, side, Rgba([255; 4]))))
            .collect();
        Ok(RenderedPages {
            images,
            total_pages: self.pages.len(),
        })
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl AnalysisProgressCallback for EventLog {
    fn on_analysis_start(&self, _doc: &str) {
        self.0.lock().unwrap().push("start".into());
    }
    fn on_classified(&self, _doc: &str, kind: DocumentKind, total_pages: usize) {
        self.0
            .lock()
            .unwrap()
            .push(format!("classified {kind:?} {total_pages}"));
    }
    fn on_attempt_start(&self, _doc: &str, attempt: u32, _max: u32) {
        self.0.lock().unwrap().push(format!("attempt {attempt}"));
    }
    fn on_attempt_failed(&self, _doc: &str, attempt: u32, _error: &str, will_retry: bool) {
        self.0
            .lock()
            .unwrap()
            .push(format!("failed {attempt} retry={will_retry}"));
    }
    fn on_analysis_complete(&self, _doc: &str, risk_level: &str) {
        self.0.lock().unwrap().push(format!("complete {risk_level}"));
    }
    fn on_analysis_error(&self, _doc: &str, code: &str, _message: &str) {
        self.0.lock().unwrap().push(format!("error {code}"));
    }
}

fn config(model: Arc<StubModel>, pdf: Arc<StubPdf>) -> scanno::AnalysisConfigBuilder {
    AnalysisConfig::builder()
        .capability(model)
        .pdf_engine(pdf)
        .retry_backoff_ms(1)
        .max_backoff_ms(2)
}

fn png_bytes() -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7\n%stub\n".to_vec()
}

/// Collects formatted log lines so tests can assert on warnings.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ── Text path ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_pdf_goes_to_text_mode_and_validates() {
    let model = StubModel::answering(CANONICAL);
    let pdf = StubPdf::new(&["Engine oil low. Brake pads 20%. Tire tread 3mm."]);
    let cfg = config(model.clone(), pdf.clone()).build().unwrap();
    assert_eq!(cfg.density_threshold, AnalysisConfig::default().density_threshold);

    let out = analyze_bytes(pdf_bytes(), "application/pdf", None, &cfg)
        .await
        .unwrap();

    assert_eq!(out.report.risk_level(), RiskLevel::Medium);
    assert_eq!(out.report.issues().len(), 2);
    assert_eq!(out.source.kind, Some(DocumentKind::TextPdf));
    assert_eq!(out.source.media_type, Some(MediaType::Pdf));
    assert!(!out.source.truncated);
    assert_eq!(out.stats.attempts, 1);
    assert_eq!(out.stats.input_tokens, 100);

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].vision);
    assert!(calls[0]
        .user_prompt
        .contains("Engine oil low. Brake pads 20%. Tire tread 3mm."));
    // The text layer is read once, by the classifier, and reused.
    assert_eq!(pdf.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pdf.render_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn query_is_forwarded_with_the_report() {
    let model = StubModel::answering(CANONICAL);
    let pdf = StubPdf::new(&[]);
    let cfg = config(model.clone(), pdf).build().unwrap();

    analyze_text("Brake pads 20%.", Some("Is it safe for a long trip?"), &cfg)
        .await
        .unwrap();

    let calls = model.calls();
    assert!(calls[0]
        .user_prompt
        .contains("User question: Is it safe for a long trip?"));
}

#[tokio::test]
async fn blank_text_pdf_is_empty_extraction() {
    let model = StubModel::answering(CANONICAL);
    let pdf = StubPdf::new(&["   ", "\n"]);
    let cfg = config(model.clone(), pdf).density_threshold(0.0).build().unwrap();

    let err = analyze_bytes(pdf_bytes(), "pdf", None, &cfg)
        .await
        .unwrap_err();

    assert!(matches!(err, ScannoError::EmptyExtraction { .. }));
    assert!(model.calls().is_empty());
}

// ── Vision path ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_goes_to_vision_without_pdf_work() {
    let model = StubModel::answering(CANONICAL);
    let pdf = StubPdf::new(&["should never be read"]);
    let cfg = config(model.clone(), pdf.clone()).build().unwrap();

    let out = analyze_bytes(png_bytes(), "image/png", None, &cfg)
        .await
        .unwrap();

    assert_eq!(out.source.kind, Some(DocumentKind::Image));
    assert_eq!(out.source.total_pages, 1);
    assert_eq!(pdf.touched(), 0);

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].vision);
    assert_eq!(calls[0].images.len(), 1);
    assert_eq!(calls[0].images[0].mime_type, "image/png");
}

#[tokio::test]
async fn scanned_pdf_is_truncated_and_says_so() {
    let model = StubModel::answering(CANONICAL);
    let pdf = StubPdf::new(&["", "", "", "", ""]);
    let cfg = config(model.clone(), pdf.clone()).build().unwrap();

    let out = analyze_bytes(pdf_bytes(), "pdf", None, &cfg).await.unwrap();

    assert_eq!(out.source.kind, Some(DocumentKind::ScannedPdf));
    assert!(out.source.truncated);
    assert_eq!(out.source.total_pages, 5);
    assert_eq!(out.source.pages_analyzed, 3);

    let calls = model.calls();
    assert!(calls[0].vision);
    assert_eq!(calls[0].images.len(), 3);
    assert!(calls[0].images.iter().all(|i| i.mime_type == "image/png"));
    assert!(calls[0].user_prompt.contains("first 3 of 5 pages"));
}

#[tokio::test]
async fn truncation_is_logged_as_a_warning() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let cfg = config(StubModel::answering(CANONICAL), StubPdf::new(&["", "", "", ""]))
        .build()
        .unwrap();
    assert_ok!(analyze_bytes(pdf_bytes(), "pdf", None, &cfg).await);

    let out = logs.contents();
    assert!(out.contains("WARN"), "{out}");
    assert!(out.contains("only the first 3 of 4 pages"), "{out}");
}

#[tokio::test]
async fn short_scan_is_not_truncated() {
    let model = StubModel::answering(CANONICAL);
    let pdf = StubPdf::new(&["", ""]);
    let cfg = config(model.clone(), pdf).build().unwrap();

    let out = assert_ok!(analyze_bytes(pdf_bytes(), "pdf", None, &cfg).await);

    assert!(!out.source.truncated);
    assert_eq!(model.calls()[0].images.len(), 2);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_type_fails_before_the_model() {
    let model = StubModel::answering(CANONICAL);
    let cfg = config(model.clone(), StubPdf::new(&[])).build().unwrap();

    let err = assert_err!(analyze_bytes(b"GIF89a".to_vec(), "image/gif", None, &cfg).await);

    assert_eq!(err.code(), "unsupported_format");
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn corrupt_pdf_fails_before_the_model() {
    let model = StubModel::answering(CANONICAL);
    let pdf = StubPdf::new(&["text"]);
    let cfg = config(model.clone(), pdf.clone()).build().unwrap();

    let err = analyze_bytes(b"PK\x03\x04zip".to_vec(), "pdf", None, &cfg)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "corrupt_document");
    assert_eq!(pdf.touched(), 0);
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let model = StubModel::new(vec![
        Err(CapabilityError::Server("503".into())),
        Err(CapabilityError::Timeout { secs: Some(60) }),
        Ok(CANONICAL.to_string()),
    ]);
    let events = Arc::new(EventLog::default());
    let cfg = config(model.clone(), StubPdf::new(&[]))
        .progress_callback(events.clone())
        .build()
        .unwrap();

    let out = analyze_text("Engine oil low.", None, &cfg).await.unwrap();

    assert_eq!(out.stats.attempts, 3);
    assert_eq!(model.calls().len(), 3);
    assert_eq!(
        events.events(),
        [
            "start",
            "attempt 1",
            "failed 1 retry=true",
            "attempt 2",
            "failed 2 retry=true",
            "attempt 3",
            "complete Medium",
        ]
    );
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let model = StubModel::new(vec![
        Err(CapabilityError::Auth("401 Unauthorized".into())),
        Ok(CANONICAL.to_string()),
    ]);
    let events = Arc::new(EventLog::default());
    let cfg = config(model.clone(), StubPdf::new(&[]))
        .progress_callback(events.clone())
        .build()
        .unwrap();

    let err = analyze_text("Engine oil low.", None, &cfg)
        .await
        .unwrap_err();

    assert!(matches!(err, ScannoError::ModelAuthFailure { .. }));
    assert_eq!(model.calls().len(), 1);
    assert_eq!(
        events.events().last().map(String::as_str),
        Some("error model_auth_failure")
    );
}

#[tokio::test]
async fn exhausted_retries_are_model_unavailable() {
    let model = StubModel::new(vec![Err(CapabilityError::RateLimited {
        retry_after_secs: Some(1),
    })]);
    let cfg = config(model.clone(), StubPdf::new(&[]))
        .max_attempts(2)
        .build()
        .unwrap();

    let err = analyze_text("Engine oil low.", None, &cfg)
        .await
        .unwrap_err();

    assert!(matches!(err, ScannoError::ModelUnavailable { attempts: 2, .. }));
    assert_eq!(model.calls().len(), 2);
}

#[tokio::test]
async fn schema_violation_reaches_the_caller() {
    let model = StubModel::answering(
        r#"{"summary":"s","issues":[],"maintenance":[],"recommendation":"r"}"#,
    );
    let cfg = config(model, StubPdf::new(&[])).build().unwrap();

    let err = analyze_text("Engine oil low.", None, &cfg)
        .await
        .unwrap_err();

    match err {
        ScannoError::SchemaViolation { field, .. } => assert_eq!(field, "risk_level"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn repair_round_trip_is_opt_in() {
    let replies = || {
        vec![
            Ok("Sure! The car is mostly fine.".to_string()),
            Ok(CANONICAL.to_string()),
        ]
    };

    let off = config(StubModel::new(replies()), StubPdf::new(&[]))
        .build()
        .unwrap();
    let err = analyze_text("Engine oil low.", None, &off)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "malformed_response");

    let model = StubModel::new(replies());
    let on = config(model.clone(), StubPdf::new(&[]))
        .repair_malformed(true)
        .build()
        .unwrap();
    let out = analyze_text("Engine oil low.", None, &on).await.unwrap();
    assert!(out.stats.repaired);
    let calls = model.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[1].vision);
    assert!(calls[1].user_prompt.contains("Sure! The car is mostly fine."));
}

// ── Files and batches ────────────────────────────────────────────────────────

#[tokio::test]
async fn analyze_many_keeps_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let photo = dir.path().join("front.png");
    std::fs::write(&photo, png_bytes()).unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, "Engine oil low.").unwrap();
    let missing = dir.path().join("missing.pdf");

    let cfg = config(StubModel::answering(CANONICAL), StubPdf::new(&[]))
        .concurrency(3)
        .build()
        .unwrap();
    let inputs = [
        photo.to_string_lossy().to_string(),
        missing.to_string_lossy().to_string(),
        notes.to_string_lossy().to_string(),
    ];

    let results = analyze_many(&inputs, None, &cfg).await;

    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].as_ref().unwrap().source.name.as_deref(),
        Some(inputs[0].as_str())
    );
    assert_eq!(results[1].as_ref().unwrap_err().code(), "file_not_found");
    assert_eq!(results[2].as_ref().unwrap_err().code(), "unsupported_format");
}

#[tokio::test]
async fn analyze_to_file_writes_the_wire_report() {
    let dir = tempfile::tempdir().unwrap();
    let photo = dir.path().join("dash.png");
    std::fs::write(&photo, png_bytes()).unwrap();
    let out_path = dir.path().join("reports").join("dash.report.json");

    let cfg = config(StubModel::answering(CANONICAL), StubPdf::new(&[]))
        .build()
        .unwrap();
    let out = analyze_to_file(photo.to_string_lossy(), &out_path, None, &cfg)
        .await
        .unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(written["risk_level"], "Medium");
    assert_eq!(written["issues"].as_array().unwrap().len(), 2);
    assert_eq!(
        written.as_object().unwrap().len(),
        5,
        "only the five report fields are written"
    );
    assert_eq!(out.report.summary(), written["summary"]);
}

#[tokio::test]
async fn missing_file_is_reported_with_its_code() {
    let cfg = config(StubModel::answering(CANONICAL), StubPdf::new(&[]))
        .build()
        .unwrap();
    let err = analyze("/definitely/not/here/report.pdf", None, &cfg)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "file_not_found");
}
