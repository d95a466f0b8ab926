//! Configuration types for vehicle inspection analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. One struct for every knob makes it easy to
//! share a config across concurrent runs and to log it next to a result.

use crate::error::ScannoError;
use crate::pipeline::llm::{AnalysisCapability, RetryPolicy};
use crate::pipeline::pdf::PdfEngine;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for analysing inspection documents.
///
/// Built via [`AnalysisConfig::builder()`] or using
/// [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use scanno::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .max_attempts(3)
///     .density_threshold(40.0)
///     .max_vision_pages(2)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Minimum non-whitespace characters per page for a PDF to count as
    /// text-bearing. Inclusive. Default: 10.0.
    ///
    /// Scanned PDFs often carry a few stray characters (a producer stamp, a
    /// page number from a scanner's OCR-less text layer); a page number alone
    /// must not route a scan down the text path, while a one-line report must.
    pub density_threshold: f64,

    /// Maximum pages of a scanned PDF forwarded to the vision path. Default: 3.
    ///
    /// Inspection reports put the verdict and the defect list up front; the
    /// trailing pages are usually photos or signatures. Every attached page
    /// costs image tokens and upload size.
    pub max_vision_pages: usize,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Total model calls allowed per request, first attempt included. Default: 3.
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds. Default: 4000.
    ///
    /// Doubles for each later attempt, capped at `max_backoff_ms`.
    pub retry_backoff_ms: u64,

    /// Upper bound on a single backoff delay, in milliseconds. Default: 10000.
    pub max_backoff_ms: u64,

    /// Per-attempt model call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Documents analysed in parallel by [`crate::analyze::analyze_many`]. Default: 4.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses "gpt-4o".
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed analysis capability. Takes precedence over everything
    /// else; used by tests and by callers with their own model client.
    pub capability: Option<Arc<dyn AnalysisCapability>>,

    /// PDF backend. If None, a pdfium engine is bound on demand.
    pub pdf_engine: Option<Arc<dyn PdfEngine>>,

    /// Directory containing the pdfium shared library. If None, falls back
    /// to `PDFIUM_LIB_PATH`, then to the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 800.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Re-ask the model once when its answer is not valid JSON. Default: false.
    pub repair_malformed: bool,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            density_threshold: 10.0,
            max_vision_pages: 3,
            max_rendered_pixels: 2000,
            max_attempts: 3,
            retry_backoff_ms: 4000,
            max_backoff_ms: 10_000,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            capability: None,
            pdf_engine: None,
            pdfium_lib_path: None,
            password: None,
            temperature: 0.2,
            max_tokens: 800,
            system_prompt: None,
            repair_malformed: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("density_threshold", &self.density_threshold)
            .field("max_vision_pages", &self.max_vision_pages)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "capability",
                &self.capability.as_ref().map(|c| c.name().to_string()),
            )
            .field("pdf_engine", &self.pdf_engine.as_ref().map(|_| "<dyn PdfEngine>"))
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("repair_malformed", &self.repair_malformed)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// The system prompt in effect: the override if set, else the default.
    pub fn effective_system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    /// Retry settings for the model invoker.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms.max(1)),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.retry_backoff_ms)),
            attempt_timeout: Duration::from_secs(self.api_timeout_secs.max(1)),
        }
    }
}

/// Builder for [`AnalysisConfig`].
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl fmt::Debug for AnalysisConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl AnalysisConfigBuilder {
    pub fn density_threshold(mut self, chars_per_page: f64) -> Self {
        self.config.density_threshold = chars_per_page;
        self
    }

    pub fn max_vision_pages(mut self, n: usize) -> Self {
        self.config.max_vision_pages = n.max(1);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    /// Zero is raised to 1 ms: retries never fire back-to-back.
    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms.max(1);
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn capability(mut self, capability: Arc<dyn AnalysisCapability>) -> Self {
        self.config.capability = Some(capability);
        self
    }

    pub fn pdf_engine(mut self, engine: Arc<dyn PdfEngine>) -> Self {
        self.config.pdf_engine = Some(engine);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn repair_malformed(mut self, v: bool) -> Self {
        self.config.repair_malformed = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, ScannoError> {
        let c = &self.config;
        if !c.density_threshold.is_finite() || c.density_threshold < 0.0 {
            return Err(ScannoError::InvalidConfig(format!(
                "density threshold must be a finite number ≥ 0, got {}",
                c.density_threshold
            )));
        }
        if c.max_tokens == 0 {
            return Err(ScannoError::InvalidConfig(
                "max tokens must be ≥ 1".into(),
            ));
        }
        if c.max_backoff_ms < c.retry_backoff_ms {
            return Err(ScannoError::InvalidConfig(format!(
                "max backoff ({}ms) is below the initial backoff ({}ms)",
                c.max_backoff_ms, c.retry_backoff_ms
            )));
        }
        Ok(self.config)
    }
}
