//! CLI binary for scanno.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AnalysisConfig` and prints reports.

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use scanno::pipeline::input;
use scanno::{
    analyze_document, analyze_text, write_report, AnalysisConfig, AnalysisOutput,
    AnalysisProgressCallback, DocumentKind, ProgressCallback, ScannoError,
};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

fn risk_colour(risk: &str) -> String {
    match risk {
        "Low" => green(risk),
        "Medium" => yellow(risk),
        _ => red(risk),
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner for the whole run plus a log line per
/// document. Documents may finish out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.set_message("starting…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, doc: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(doc))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_analysis_start(&self, doc: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(doc.to_string(), Instant::now());
        }
        self.bar.set_message(format!("{doc}: reading"));
    }

    fn on_classified(&self, doc: &str, kind: DocumentKind, total_pages: usize) {
        let kind = match kind {
            DocumentKind::Image => "image",
            DocumentKind::TextPdf => "text PDF",
            DocumentKind::ScannedPdf => "scanned PDF",
        };
        self.bar.set_message(format!("{doc}: {kind}, {total_pages} page(s)"));
    }

    fn on_attempt_start(&self, doc: &str, attempt: u32, max_attempts: u32) {
        self.bar
            .set_message(format!("{doc}: asking the model ({attempt}/{max_attempts})"));
    }

    fn on_attempt_failed(&self, doc: &str, attempt: u32, error: &str, will_retry: bool) {
        let msg = if error.len() > 80 {
            let cut = error
                .char_indices()
                .nth(79)
                .map_or(error.len(), |(i, _)| i);
            format!("{}\u{2026}", &error[..cut])
        } else {
            error.to_string()
        };
        let tail = if will_retry { "retrying" } else { "giving up" };
        self.bar.println(format!(
            "  {} {}  attempt {}  {}  {}",
            yellow("⚠"),
            doc,
            attempt,
            dim(&msg),
            dim(tail),
        ));
    }

    fn on_analysis_complete(&self, doc: &str, risk_level: &str) {
        let secs = self.elapsed_secs(doc);
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            doc,
            risk_colour(risk_level),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_analysis_error(&self, doc: &str, code: &str, _message: &str) {
        let secs = self.elapsed_secs(doc);
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            doc,
            red(&format!("error[{code}]")),
            dim(&format!("{secs:.1}s")),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse one report, print the JSON report
  scanno inspection.pdf

  # Save the report
  scanno inspection.pdf -o report.json

  # Ask a question alongside the report
  scanno --query "Is it safe for a 500 km trip?" inspection.pdf

  # A photo of a paper checklist
  scanno checklist.jpg

  # A URL whose name says nothing about its type
  scanno --media-type pdf "https://example.com/download?id=42"

  # Several documents, two at a time, one report file each
  scanno -c 2 --output-dir reports/ a.pdf b.pdf c.png

  # Report text that was already extracted elsewhere
  cat report.txt | scanno --text -

  # Full output with source info and token usage
  scanno --json inspection.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (default provider, model gpt-4o)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  SCANNO_PROVIDER         Provider (openai, anthropic, gemini, ollama, ...)
  SCANNO_MODEL            Model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, overrides -v / -q

A .env file in the working directory is loaded at startup.

EXIT STATUS:
  0 every document was analysed, 1 otherwise. Failures print
  error[<code>]: <message> on stderr (or a JSON error object with --json).
"#;

/// Analyse vehicle inspection reports with multimodal language models.
#[derive(Parser, Debug)]
#[command(
    name = "scanno",
    version,
    about = "Analyse vehicle inspection reports (PDF or image) with multimodal LLMs",
    long_about = "Analyse vehicle inspection documents (text PDFs, scanned PDFs, or photos) and \
print a structured JSON condition report: summary, risk level, issues, maintenance and a \
recommendation. Text PDFs are sent as text; scans and photos go to the model's vision input.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files (PDF, JPEG, PNG) or HTTP/HTTPS URLs.
    #[arg(required_unless_present = "text", conflicts_with = "text")]
    inputs: Vec<String>,

    /// Analyse pre-extracted report text from FILE ("-" for stdin).
    #[arg(long, value_name = "FILE|-")]
    text: Option<String>,

    /// Question forwarded to the model with the report.
    #[arg(long, env = "SCANNO_QUERY")]
    query: Option<String>,

    /// Override the media type (pdf, jpeg, png, or a MIME type).
    #[arg(long, value_name = "TYPE")]
    media_type: Option<String>,

    /// Write the report JSON to this file instead of stdout (single input).
    #[arg(short, long, env = "SCANNO_OUTPUT", conflicts_with = "output_dir")]
    output: Option<PathBuf>,

    /// Write <stem>.report.json for each input into this directory.
    #[arg(long, env = "SCANNO_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Print the full AnalysisOutput (report, source, stats) as JSON.
    #[arg(long, env = "SCANNO_JSON")]
    json: bool,

    /// LLM model ID (default gpt-4o).
    #[arg(long, env = "SCANNO_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "SCANNO_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Model calls allowed per document, first attempt included.
    #[arg(long, env = "SCANNO_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Delay before the first retry in ms; doubles per retry, capped at 10 s.
    #[arg(long, env = "SCANNO_RETRY_BACKOFF_MS", default_value_t = 4000)]
    retry_backoff_ms: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "SCANNO_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "SCANNO_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Non-whitespace characters per page for a PDF to count as text.
    #[arg(long, env = "SCANNO_DENSITY_THRESHOLD", default_value_t = 10.0)]
    density_threshold: f64,

    /// Pages of a scanned PDF sent to the model.
    #[arg(long, env = "SCANNO_MAX_VISION_PAGES", default_value_t = 3)]
    max_vision_pages: usize,

    /// Longest edge of a rendered page, in pixels.
    #[arg(long, env = "SCANNO_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SCANNO_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "SCANNO_MAX_TOKENS", default_value_t = 800)]
    max_tokens: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SCANNO_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "SCANNO_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Ask the model once more when its answer is not valid JSON.
    #[arg(long, env = "SCANNO_REPAIR")]
    repair: bool,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Documents analysed in parallel.
    #[arg(short, long, env = "SCANNO_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Also write logs (without colours) to this file.
    #[arg(long, env = "SCANNO_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCANNO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCANNO_QUIET")]
    quiet: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "SCANNO_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Progress and log lines both go to stderr; with the spinner active only
    // errors are logged there.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let _guard = init_logging(&cli, show_progress)?;

    if cli.output.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("--output takes a single input; use --output-dir for several");
    }

    let progress = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as ProgressCallback),
    )
    .await?;

    // ── Run analyses ─────────────────────────────────────────────────────
    let results: Vec<(String, Result<AnalysisOutput, ScannoError>)> =
        if let Some(ref source) = cli.text {
            let text = read_text(source).await?;
            let result = analyze_text(&text, cli.query.as_deref(), &config).await;
            vec![(source.clone(), result)]
        } else {
            let query = cli.query.as_deref();
            let media_type = cli.media_type.as_deref();
            let config = &config;
            stream::iter(cli.inputs.iter().map(|input| async move {
                let result = run_input(input, media_type, query, config).await;
                (input.clone(), result)
            }))
            .buffered(cli.concurrency.max(1))
            .collect()
            .await
        };

    if let Some(ref cb) = progress {
        cb.finish();
    }

    // ── Emit ─────────────────────────────────────────────────────────────
    let mut failed = 0usize;
    for (input, result) in &results {
        match result {
            Ok(output) => emit_output(&cli, input, output).await?,
            Err(e) => {
                failed += 1;
                emit_error(&cli, input, e)?;
            }
        }
    }

    if !cli.quiet && !cli.json && results.len() > 1 {
        let ok = results.len() - failed;
        eprintln!(
            "{} {}/{} documents analysed",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&ok.to_string()),
            results.len()
        );
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// Install the stderr layer and, with `--log-file`, a plain-text file layer.
fn init_logging(cli: &Cli, show_progress: bool) -> Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_level = if show_progress && !cli.verbose {
        LevelFilter::ERROR
    } else {
        LevelFilter::TRACE
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(stderr_level);

    let (file_layer, guard) = match cli.log_file {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory: {}", parent.display()))?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("create log file: {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .density_threshold(cli.density_threshold)
        .max_vision_pages(cli.max_vision_pages)
        .max_rendered_pixels(cli.max_pixels)
        .max_attempts(cli.max_attempts)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .max_backoff_ms(cli.retry_backoff_ms.max(10_000))
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .concurrency(cli.concurrency)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .repair_malformed(cli.repair);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn run_input(
    input_str: &str,
    media_type: Option<&str>,
    query: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, ScannoError> {
    let document =
        input::resolve_input(input_str, media_type, config.download_timeout_secs).await?;
    analyze_document(&document, query, config).await
}

async fn read_text(source: &str) -> Result<String> {
    if source == "-" {
        tokio::task::spawn_blocking(|| {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map(|_| buf)
                .context("Failed to read report text from stdin")
        })
        .await
        .context("stdin reader panicked")?
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read report text from {source}"))
    }
}

/// `<dir>/<stem>.report.json` for an input path or URL.
fn report_path(dir: &Path, input: &str) -> PathBuf {
    let last = input
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(input);
    let stem = Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    dir.join(format!("{stem}.report.json"))
}

async fn emit_output(cli: &Cli, input: &str, output: &AnalysisOutput) -> Result<()> {
    let target = match (&cli.output, &cli.output_dir) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(dir)) => Some(report_path(dir, input)),
        (None, None) => None,
    };

    match target {
        Some(path) => {
            write_report(&output.report, &path)
                .await
                .with_context(|| format!("Failed to save report for {input}"))?;
            if !cli.quiet {
                eprintln!(
                    "{}  {}  {}  →  {}",
                    green("✔"),
                    input,
                    risk_colour(output.report.risk_level().as_str()),
                    bold(&path.display().to_string()),
                );
                eprintln!(
                    "   {} tokens in  /  {} tokens out  /  {} attempt(s)  /  {}ms",
                    dim(&output.stats.input_tokens.to_string()),
                    dim(&output.stats.output_tokens.to_string()),
                    output.stats.attempts,
                    output.stats.total_duration_ms,
                );
            }
        }
        None if cli.json => {
            let json =
                serde_json::to_string_pretty(output).context("Failed to serialise output")?;
            println!("{json}");
        }
        None => println!("{}", output.report.to_json_pretty()),
    }

    if output.source.truncated && !cli.quiet {
        eprintln!(
            "   {} only the first {} of {} pages of {} were analysed",
            yellow("⚠"),
            output.source.pages_analyzed,
            output.source.total_pages,
            input
        );
    }
    Ok(())
}

fn emit_error(cli: &Cli, input: &str, e: &ScannoError) -> Result<()> {
    if cli.json {
        let obj = serde_json::json!({
            "input": input,
            "error": { "code": e.code(), "message": e.to_string() },
        });
        let json = serde_json::to_string_pretty(&obj).context("Failed to serialise error")?;
        println!("{json}");
    } else {
        eprintln!("{}: {}", red(&format!("error[{}]", e.code())), e);
        if cli.inputs.len() > 1 {
            eprintln!("   {}", dim(input));
        }
    }
    Ok(())
}
