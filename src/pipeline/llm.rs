//! Model interaction: the analysis capability seam and the retry loop around it.
//!
//! The pipeline never talks to an LLM client directly. It calls an
//! [`AnalysisCapability`], which has exactly two modes (text and vision)
//! and reports each failure as a classified [`CapabilityError`].
//! [`LlmCapability`] adapts any `edgequake_llm` provider to that trait; tests
//! plug in scripted stubs.
//!
//! ## Retry Strategy
//!
//! [`invoke`] makes at most `max_attempts` calls. Network failures, timeouts,
//! rate limiting and 5xx errors are retried after an exponential backoff
//! (`backoff · 2^(attempt−2)`, capped at `max_backoff`); with the defaults of
//! 4 s and 10 s the waits are 4 s → 8 s. A rate limiter's `retry after` hint
//! stretches the next wait, still capped at `max_backoff`. Authentication
//! failures and rejected requests abort at once.

use crate::error::{CapabilityError, ScannoError};
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::extract::ExtractionResult;
use crate::progress::ProgressCallback;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Successful output of one capability call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilityResponse {
    /// Free-form model output, expected to be JSON.
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// An external model able to analyse either text or images.
#[async_trait]
pub trait AnalysisCapability: Send + Sync {
    /// Short identifier for logs, e.g. `"openai/gpt-4o"`.
    fn name(&self) -> &str;

    /// Text mode: system prompt + a user message carrying the report text.
    async fn analyze_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CapabilityResponse, CapabilityError>;

    /// Vision mode: system prompt + a user message with attached images.
    async fn analyze_images(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        images: &[EncodedImage],
    ) -> Result<CapabilityResponse, CapabilityError>;
}

/// Which capability method a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    Text,
    Vision,
}

/// Everything sent to the model for one analysis. Immutable once built.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    payload: ExtractionResult,
    system_prompt: String,
    query: Option<String>,
    user_prompt: String,
}

impl AnalysisRequest {
    pub fn new(
        payload: ExtractionResult,
        system_prompt: impl Into<String>,
        query: Option<String>,
    ) -> Self {
        let user_prompt = match &payload {
            ExtractionResult::Text { content } => prompts::text_prompt(content, query.as_deref()),
            ExtractionResult::Image {
                images,
                total_pages,
                truncated,
            } => prompts::vision_prompt(images.len(), *total_pages, *truncated, query.as_deref()),
        };
        Self {
            payload,
            system_prompt: system_prompt.into(),
            query,
            user_prompt,
        }
    }

    /// A text-mode request asking the model to re-emit `previous_output` as JSON.
    pub fn repair(system_prompt: impl Into<String>, previous_output: &str) -> Self {
        Self {
            payload: ExtractionResult::Text {
                content: previous_output.to_string(),
            },
            system_prompt: system_prompt.into(),
            query: None,
            user_prompt: prompts::repair_prompt(previous_output),
        }
    }

    pub fn mode(&self) -> InvocationMode {
        match self.payload {
            ExtractionResult::Text { .. } => InvocationMode::Text,
            ExtractionResult::Image { .. } => InvocationMode::Vision,
        }
    }

    pub fn payload(&self) -> &ExtractionResult {
        &self.payload
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }
}

/// Bounds on the invoker's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed, first attempt included. At least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub backoff: Duration,
    /// Cap on any single delay.
    pub max_backoff: Duration,
    /// Limit on a single call.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before the given 1-indexed attempt. Zero for the first.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 2).min(16);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Delay before `attempt` given the failure that preceded it.
    ///
    /// A `RateLimited` hint raises the delay to the requested wait, never
    /// beyond `max_backoff`.
    pub fn delay_before(&self, attempt: u32, last_error: Option<&CapabilityError>) -> Duration {
        let base = self.backoff_before(attempt);
        match last_error {
            Some(CapabilityError::RateLimited {
                retry_after_secs: Some(secs),
            }) if attempt > 1 => base.max(Duration::from_secs(*secs).min(self.max_backoff)),
            _ => base,
        }
    }
}

/// The raw model output together with what it cost to obtain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    pub content: String,
    /// Calls made, including the successful one.
    pub attempts: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Send `request` to the capability, retrying transient failures.
///
/// `label` names the document in logs and progress events.
///
/// # Errors
/// * [`ScannoError::ModelAuthFailure`]: credentials rejected; one call made
/// * [`ScannoError::ModelRequestRejected`]: request rejected; one call made
/// * [`ScannoError::ModelUnavailable`]: every attempt failed transiently
///
/// Dropping the returned future abandons the in-flight call and starts no
/// further attempts.
pub async fn invoke(
    capability: &dyn AnalysisCapability,
    request: &AnalysisRequest,
    policy: &RetryPolicy,
    label: &str,
    progress: Option<&ProgressCallback>,
) -> Result<ModelResponse, ScannoError> {
    let max_attempts = policy.max_attempts.max(1);
    let mode = request.mode();
    let start = Instant::now();
    let mut last_err: Option<CapabilityError> = None;

    for attempt in 1..=max_attempts {
        let backoff = policy.delay_before(attempt, last_err.as_ref());
        if !backoff.is_zero() {
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt,
                max_attempts,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        if let Some(cb) = progress {
            cb.on_attempt_start(label, attempt, max_attempts);
        }
        debug!(
            "{}: {:?} call {} via {}",
            label,
            mode,
            attempt,
            capability.name()
        );

        let call = async {
            match request.payload() {
                ExtractionResult::Text { .. } => {
                    capability
                        .analyze_text(request.system_prompt(), request.user_prompt())
                        .await
                }
                ExtractionResult::Image { images, .. } => {
                    capability
                        .analyze_images(request.system_prompt(), request.user_prompt(), images)
                        .await
                }
            }
        };

        let outcome = match timeout(policy.attempt_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout {
                secs: Some(policy.attempt_timeout.as_secs()),
            }),
        };

        match outcome {
            Ok(response) => {
                info!(
                    "{}: model responded in {:?} ({} in / {} out tokens, attempt {})",
                    label,
                    start.elapsed(),
                    response.input_tokens,
                    response.output_tokens,
                    attempt
                );
                return Ok(ModelResponse {
                    content: response.content,
                    attempts: attempt,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                });
            }
            Err(e) => {
                let will_retry = e.is_retryable() && attempt < max_attempts;
                warn!("{}: attempt {} failed: {}", label, attempt, e);
                if let Some(cb) = progress {
                    cb.on_attempt_failed(label, attempt, &e.to_string(), will_retry);
                }
                if !e.is_retryable() {
                    return Err(e.into_fatal());
                }
                last_err = Some(e);
            }
        }
    }

    Err(ScannoError::ModelUnavailable {
        attempts: max_attempts,
        last_error: last_err
            .unwrap_or_else(|| CapabilityError::Server("no attempt was made".to_string())),
    })
}

// ── edgequake-llm adapter ────────────────────────────────────────────────────

/// [`AnalysisCapability`] backed by an `edgequake_llm` provider.
pub struct LlmCapability {
    provider: Arc<dyn LLMProvider>,
    name: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmCapability {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        name: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            provider,
            name: name.into(),
            temperature,
            max_tokens,
        }
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        mode: InvocationMode,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let options = build_options(self.temperature, self.max_tokens, mode);
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_llm_error(&e))?;

        Ok(CapabilityResponse {
            content: response.content.trim().to_string(),
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

#[async_trait]
impl AnalysisCapability for LlmCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ];
        self.chat(messages, InvocationMode::Text).await
    }

    async fn analyze_images(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        images: &[EncodedImage],
    ) -> Result<CapabilityResponse, CapabilityError> {
        let images = images
            .iter()
            .map(|img| ImageData::new(img.data.clone(), img.mime_type.clone()).with_detail("high"))
            .collect();
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(user_prompt, images),
        ];
        self.chat(messages, InvocationMode::Vision).await
    }
}

/// Build `CompletionOptions` for an analysis call.
///
/// Text calls ask for JSON mode; vision calls rely on the prompt alone.
fn build_options(temperature: f32, max_tokens: usize, mode: InvocationMode) -> CompletionOptions {
    let response_format = match mode {
        InvocationMode::Text => Some("json_object".to_string()),
        InvocationMode::Vision => None,
    };
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        response_format,
        ..Default::default()
    }
}

/// Map a typed provider error onto the invoker's retry taxonomy.
///
/// Permanent failures (bad credentials, unsupported features, oversized
/// input, missing configuration) abort the retry loop. Free-form API and
/// provider messages fall back to [`classify_provider_error`].
pub fn classify_llm_error(err: &LlmError) -> CapabilityError {
    let msg = err.to_string();
    match err {
        LlmError::AuthError(_) => CapabilityError::Auth(msg),
        LlmError::InvalidRequest(_)
        | LlmError::ModelNotFound(_)
        | LlmError::TokenLimitExceeded { .. }
        | LlmError::NotSupported(_)
        | LlmError::ConfigError(_) => CapabilityError::InvalidRequest(msg),
        LlmError::RateLimited(detail) => CapabilityError::RateLimited {
            retry_after_secs: retry_after(detail),
        },
        LlmError::NetworkError(_) => CapabilityError::Network(msg),
        LlmError::Timeout => CapabilityError::Timeout { secs: None },
        LlmError::ApiError(_)
        | LlmError::ProviderError(_)
        | LlmError::SerializationError(_)
        | LlmError::Unknown(_) => classify_provider_error(&msg),
    }
}

fn retry_after(message: &str) -> Option<u64> {
    RE_RETRY_AFTER
        .captures(message)
        .and_then(|c| c[1].parse().ok())
}

static RE_AUTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(401|403)\b|unauthori[sz]ed|forbidden|invalid[ _-]?api[ _-]?key|incorrect api key|authentication|api key (is )?missing")
        .unwrap()
});
static RE_INVALID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(400|404|413|422)\b|bad request|invalid[ _]request|content[ _]filter|model not found|does not exist|context length|too large")
        .unwrap()
});
static RE_RATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ _-]?limit|too many requests|quota").unwrap()
});
static RE_SERVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b5\d\d\b|internal server error|bad gateway|service unavailable|overloaded|server error")
        .unwrap()
});
static RE_NETWORK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timed? ?out|timeout|connect|network|dns|reset|broken pipe|unexpected eof|error sending request")
        .unwrap()
});
static RE_RETRY_AFTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry[ -]after:?\s*(\d+)").unwrap());

/// Classify a free-form provider error message.
///
/// `ApiError` and `ProviderError` carry the HTTP failure as text, so the
/// status code and well-known phrases are matched. Credentials and
/// request-shape problems are checked first. Anything unrecognised is
/// treated as a transient server failure.
pub fn classify_provider_error(message: &str) -> CapabilityError {
    let msg = message.to_string();
    if RE_AUTH.is_match(message) {
        CapabilityError::Auth(msg)
    } else if RE_RATE.is_match(message) {
        CapabilityError::RateLimited {
            retry_after_secs: retry_after(message),
        }
    } else if RE_INVALID.is_match(message) {
        CapabilityError::InvalidRequest(msg)
    } else if RE_SERVER.is_match(message) {
        CapabilityError::Server(msg)
    } else if RE_NETWORK.is_match(message) {
        CapabilityError::Network(msg)
    } else {
        CapabilityError::Server(msg)
    }
}
