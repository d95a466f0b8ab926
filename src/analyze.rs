//! Analysis entry points.
//!
//! Every entry point funnels into the same run: resolve the capability,
//! classify, extract, invoke the model, validate. A run yields a complete
//! [`AnalysisOutput`] or an error, never a partial report.

use crate::config::AnalysisConfig;
use crate::error::ScannoError;
use crate::output::{AnalysisOutput, AnalysisStats, InspectionReport, SourceInfo};
use crate::pipeline::classify;
use crate::pipeline::extract::{self, ExtractionResult, RenderLimits};
use crate::pipeline::input::{self, Document};
use crate::pipeline::llm::{self, AnalysisCapability, AnalysisRequest, LlmCapability, RetryPolicy};
use crate::pipeline::pdf::{PdfEngine, PdfiumEngine};
use crate::pipeline::validate;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model used when a provider is chosen without one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Analyse an inspection document from a local path or HTTP/HTTPS URL.
///
/// The media type is taken from the file extension, or for URLs from the
/// `Content-Type` header first. Use [`input::resolve_input`] with an override
/// and [`analyze_document`] when the name is misleading.
///
/// # Errors
/// Any [`ScannoError`]: input errors, classification/extraction failures,
/// model failures after retries, or validation failures.
pub async fn analyze(
    input_str: impl AsRef<str>,
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, ScannoError> {
    let input_str = input_str.as_ref();
    info!("Starting analysis: {}", input_str);

    report_outcome(input_str, config, async {
        let document =
            input::resolve_input(input_str, None, config.download_timeout_secs).await?;
        run_document(&document, query, config).await
    })
    .await
}

/// Analyse a document already held in memory.
pub async fn analyze_document(
    document: &Document,
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, ScannoError> {
    let label = document.label().to_string();
    report_outcome(&label, config, run_document(document, query, config)).await
}

/// Analyse raw bytes with a declared media type (`"application/pdf"`,
/// `"png"`, `".jpg"`, ...).
///
/// # Example
/// ```rust,no_run
/// use scanno::{analyze_bytes, AnalysisConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("inspection.pdf")?;
/// let output = analyze_bytes(bytes, "application/pdf", None, &AnalysisConfig::default()).await?;
/// println!("{}", output.report.risk_level());
/// # Ok(())
/// # }
/// ```
pub async fn analyze_bytes(
    bytes: impl Into<Arc<[u8]>>,
    media_type: &str,
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, ScannoError> {
    let document = Document::new(bytes, media_type);
    analyze_document(&document, query, config).await
}

/// Analyse pre-extracted report text, skipping classification and extraction.
///
/// This is the mode for callers that already ran OCR or hold the report as
/// plain text. The model is always called in text mode.
///
/// # Errors
/// [`ScannoError::EmptyExtraction`] when `text` is blank, otherwise as
/// [`analyze`].
pub async fn analyze_text(
    text: &str,
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, ScannoError> {
    const LABEL: &str = "<text>";
    report_outcome(LABEL, config, async {
        let total_start = Instant::now();
        let content = text.trim();
        if content.is_empty() {
            return Err(ScannoError::EmptyExtraction {
                detail: "no report text supplied".into(),
            });
        }

        let source = SourceInfo {
            name: None,
            kind: None,
            media_type: None,
            total_pages: 1,
            pages_analyzed: 1,
            truncated: false,
        };
        let payload = ExtractionResult::Text {
            content: content.to_string(),
        };
        run_model(payload, source, LABEL, query, config, total_start, 0).await
    })
    .await
}

/// Analyse several inputs, up to `config.concurrency` at a time.
///
/// Results come back in input order. One failing document never affects
/// another.
pub async fn analyze_many<S: AsRef<str>>(
    inputs: &[S],
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Vec<Result<AnalysisOutput, ScannoError>> {
    info!(
        "Analysing {} documents ({} at a time)",
        inputs.len(),
        config.concurrency
    );
    stream::iter(inputs.iter().map(|i| analyze(i.as_ref(), query, config)))
        .buffered(config.concurrency.max(1))
        .collect()
        .await
}

/// Analyse a document and write the report JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn analyze_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, ScannoError> {
    let output = analyze(input_str, query, config).await?;
    write_report(&output.report, output_path.as_ref()).await?;
    Ok(output)
}

/// Write a report as pretty-printed JSON, creating parent directories.
///
/// Writes to `<path>.tmp` first and renames, so readers never see a
/// half-written file.
pub async fn write_report(report: &InspectionReport, path: &Path) -> Result<(), ScannoError> {
    let write_err = |e| ScannoError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut json = report.to_json_pretty();
    json.push('\n');

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Report written to {}", path.display());
    Ok(())
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(
    input_str: impl AsRef<str>,
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, ScannoError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ScannoError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(input_str, query, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Await a run and fire the matching completion or error callback.
async fn report_outcome(
    label: &str,
    config: &AnalysisConfig,
    run: impl std::future::Future<Output = Result<AnalysisOutput, ScannoError>>,
) -> Result<AnalysisOutput, ScannoError> {
    if let Some(ref cb) = config.progress_callback {
        cb.on_analysis_start(label);
    }

    let result = run.await;

    if let Some(ref cb) = config.progress_callback {
        match &result {
            Ok(output) => cb.on_analysis_complete(label, output.report.risk_level().as_str()),
            Err(e) => cb.on_analysis_error(label, e.code(), &e.to_string()),
        }
    }
    if let Err(ref e) = result {
        warn!("{}: analysis failed [{}]: {}", label, e.code(), e);
    }
    result
}

async fn run_document(
    document: &Document,
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, ScannoError> {
    let total_start = Instant::now();
    let label = document.label();

    // ── Step 1: Classify ─────────────────────────────────────────────────
    let engine = resolve_pdf_engine(config);
    let extract_start = Instant::now();
    let classification = classify::classify(
        document,
        Arc::clone(&engine),
        config.density_threshold,
        config.password.as_deref(),
    )
    .await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_classified(label, classification.kind, classification.total_pages());
    }

    // ── Step 2: Extract ──────────────────────────────────────────────────
    let limits = RenderLimits {
        max_pages: config.max_vision_pages,
        max_pixels: config.max_rendered_pixels,
    };
    let payload = extract::extract(
        document,
        &classification,
        engine,
        limits,
        config.password.as_deref(),
    )
    .await?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    info!(
        "{}: classified and extracted in {}ms",
        label, extract_duration_ms
    );

    let total_pages = match &payload {
        ExtractionResult::Image { total_pages, .. } => *total_pages,
        ExtractionResult::Text { .. } => classification.total_pages(),
    };
    let source = SourceInfo {
        name: document.name().map(str::to_string),
        kind: Some(classification.kind),
        media_type: Some(classification.media_type),
        total_pages,
        pages_analyzed: payload.pages_included(classification.total_pages()),
        truncated: payload.is_truncated(),
    };

    // ── Steps 3 and 4: Invoke and validate ───────────────────────────────
    run_model(
        payload,
        source,
        label,
        query,
        config,
        total_start,
        extract_duration_ms,
    )
    .await
}

/// Resolve the capability, then invoke and validate.
///
/// Resolution happens here, after the document has been read, so that input
/// errors surface even when no provider is configured.
async fn run_model(
    payload: ExtractionResult,
    source: SourceInfo,
    label: &str,
    query: Option<&str>,
    config: &AnalysisConfig,
    total_start: Instant,
    extract_duration_ms: u64,
) -> Result<AnalysisOutput, ScannoError> {
    let capability = resolve_capability(config)?;
    let policy = config.retry_policy();
    let system_prompt = config.effective_system_prompt();
    let progress = config.progress_callback.as_ref();
    let request = AnalysisRequest::new(payload, system_prompt, query.map(str::to_string));

    let llm_start = Instant::now();
    let response = llm::invoke(capability.as_ref(), &request, &policy, label, progress).await?;

    let mut stats = AnalysisStats {
        attempts: response.attempts,
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        extract_duration_ms,
        ..Default::default()
    };

    let report = match validate::validate(&response.content) {
        Ok(report) => report,
        Err(ScannoError::MalformedResponse { detail, raw }) if config.repair_malformed => {
            warn!("{}: model answer is not JSON ({}); asking once for a repair", label, detail);
            debug!("{}: unrepaired answer: {}", label, raw);

            let repair = AnalysisRequest::repair(system_prompt, &raw);
            let single = RetryPolicy {
                max_attempts: 1,
                ..policy
            };
            let repaired =
                llm::invoke(capability.as_ref(), &repair, &single, label, progress).await?;

            stats.attempts += repaired.attempts;
            stats.input_tokens += repaired.input_tokens;
            stats.output_tokens += repaired.output_tokens;
            stats.repaired = true;
            validate::validate(&repaired.content)?
        }
        Err(e) => return Err(e),
    };

    stats.llm_duration_ms = llm_start.elapsed().as_millis() as u64;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "{}: analysis complete: {} risk, {} issues, {}ms total",
        label,
        report.risk_level(),
        report.issues().len(),
        stats.total_duration_ms
    );

    Ok(AnalysisOutput {
        report,
        source,
        stats,
    })
}

fn resolve_pdf_engine(config: &AnalysisConfig) -> Arc<dyn PdfEngine> {
    match config.pdf_engine {
        Some(ref engine) => Arc::clone(engine),
        None => Arc::new(PdfiumEngine::new(config.pdfium_lib_path.clone())),
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ScannoError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ScannoError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn llm_capability(
    provider: Arc<dyn LLMProvider>,
    name: String,
    config: &AnalysisConfig,
) -> Arc<dyn AnalysisCapability> {
    Arc::new(LlmCapability::new(
        provider,
        name,
        config.temperature,
        config.max_tokens,
    ))
}

/// Resolve the analysis capability, from most-specific to least-specific.
///
/// 1. **Injected capability** (`config.capability`), used as-is.
/// 2. **Pre-built provider** (`config.provider`), wrapped in [`LlmCapability`].
/// 3. **Named provider + model** (`config.provider_name`, `config.model`).
/// 4. **Environment pair** (`SCANNO_PROVIDER` + `SCANNO_MODEL`), both set.
/// 5. **OpenAI** when `OPENAI_API_KEY` is set, with `config.model` or
///    [`DEFAULT_MODEL`].
/// 6. **Auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_capability(
    config: &AnalysisConfig,
) -> Result<Arc<dyn AnalysisCapability>, ScannoError> {
    if let Some(ref capability) = config.capability {
        return Ok(Arc::clone(capability));
    }

    if let Some(ref provider) = config.provider {
        return Ok(llm_capability(Arc::clone(provider), "custom".into(), config));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        let provider = create_provider(name, model)?;
        return Ok(llm_capability(provider, format!("{name}/{model}"), config));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("SCANNO_PROVIDER"),
        std::env::var("SCANNO_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            let provider = create_provider(&prov, &env_model)?;
            return Ok(llm_capability(
                provider,
                format!("{prov}/{env_model}"),
                config,
            ));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let provider = create_provider("openai", model)?;
            return Ok(llm_capability(provider, format!("openai/{model}"), config));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ScannoError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_capability(llm_provider, "auto".into(), config))
}
