//! CLI binary for image-insight.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AnalysisConfig` and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use image_insight::{
    AnalysisConfig, AnalysisProgressCallback, AnalysisResult, ImageAnalyzer, ImageInput,
    PipelineMode, ProgressCallback, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner with one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
    stage_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Decoding image…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            stage_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn stage_elapsed(&self) -> f64 {
        self.stage_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn stage_label(stage: Stage, total: usize) -> &'static str {
    if total == 1 {
        "analysis"
    } else {
        stage.field_name()
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_analysis_start(&self, total_stages: usize) {
        self.bar.set_prefix("Analysing");
        let calls = if total_stages == 1 { "call" } else { "calls" };
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting analysis ({total_stages} model {calls})…"))
        ));
    }

    fn on_stage_start(&self, stage: Stage, index: usize, total: usize) {
        if let Ok(mut t) = self.stage_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar
            .set_message(format!("{} {index}/{total}", stage_label(stage, total)));
    }

    fn on_stage_complete(&self, stage: Stage, index: usize, total: usize, text_len: usize) {
        self.bar.println(format!(
            "  {} {:<8} {}/{}  {:<8}  {}",
            green("✓"),
            stage_label(stage, total),
            index,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{:.1}s", self.stage_elapsed())),
        ));
    }

    fn on_stage_error(&self, stage: Stage, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<8} {}/{}  {}  {}",
            red("✗"),
            stage_label(stage, total),
            index,
            total,
            red(&msg),
            dim(&format!("{:.1}s", self.stage_elapsed())),
        ));
    }

    fn on_analysis_complete(&self, total_stages: usize, completed: usize) {
        self.bar.finish_and_clear();
        if self.errors.load(Ordering::SeqCst) == 0 {
            eprintln!("{} analysis complete", green("✔"));
        } else {
            eprintln!(
                "{} {}/{} model calls succeeded",
                red("✘"),
                bold(&completed.to_string()),
                total_stages
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a photo (sectioned report on stdout)
  image-insight photo.jpg

  # JSON record, as an HTTP service would return it
  image-insight --json photo.png > result.json

  # Five separate calls instead of one JSON call
  image-insight --mode staged photo.webp

  # Base64 input from a file or stdin (data-URI header allowed)
  image-insight --base64 payload.txt
  base64 photo.png | image-insight --base64 -

  # Another provider through edgequake-llm
  image-insight --provider anthropic --model claude-sonnet-4-20250514 photo.jpg

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY             API key for the built-in OpenAI-compatible client
  OPENAI_BASE_URL            Endpoint of an OpenAI-compatible server
  IMAGE_INSIGHT_MODEL        Vision model ID (default: gpt-4o)
  IMAGE_INSIGHT_PROVIDER     edgequake-llm provider (anthropic, gemini, ollama, …)
  IMAGE_INSIGHT_MODE         consolidated | staged
  ANTHROPIC_API_KEY, GEMINI_API_KEY, …  read by the matching provider

EXIT STATUS:
  0  all five fields produced
  1  invalid input or configuration
  2  image accepted but the model call or parsing failed (record still printed)
"#;

/// Describe an image with a vision LLM: caption, summary, objects, mood, story.
#[derive(Parser, Debug)]
#[command(
    name = "image-insight",
    version,
    about = "Caption, summarise and narrate an image using a vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file (png, jpg, jpeg, webp, gif).
    #[arg(required_unless_present = "base64", conflicts_with = "base64")]
    input: Option<PathBuf>,

    /// Read base64 image text from FILE, or from stdin with `-`.
    #[arg(long, value_name = "FILE|-")]
    base64: Option<String>,

    /// Write the output to this file instead of stdout.
    #[arg(short, long, env = "IMAGE_INSIGHT_OUTPUT")]
    output: Option<PathBuf>,

    /// Pipeline mode.
    #[arg(long, env = "IMAGE_INSIGHT_MODE", value_enum, default_value = "consolidated")]
    mode: ModeArg,

    /// Vision model ID.
    #[arg(long, env = "IMAGE_INSIGHT_MODEL", default_value = image_insight::config::DEFAULT_MODEL)]
    model: String,

    /// edgequake-llm provider; omit to use the built-in OpenAI-compatible client.
    #[arg(long, env = "IMAGE_INSIGHT_PROVIDER")]
    provider: Option<String>,

    /// API key for the built-in client.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = image_insight::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Longest edge sent to the model, in pixels.
    #[arg(long, env = "IMAGE_INSIGHT_MAX_DIMENSION", default_value_t = 2048)]
    max_dimension: u32,

    /// Largest accepted input, in bytes.
    #[arg(long, env = "IMAGE_INSIGHT_MAX_BYTES", default_value_t = 10 * 1024 * 1024)]
    max_bytes: u64,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "IMAGE_INSIGHT_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max tokens generated per call.
    #[arg(long, env = "IMAGE_INSIGHT_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// Attempts per model call, including the first.
    #[arg(long, env = "IMAGE_INSIGHT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Delay before the first retry, doubled after each further failure.
    #[arg(long, env = "IMAGE_INSIGHT_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Per-call timeout in seconds.
    #[arg(long, env = "IMAGE_INSIGHT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Output the JSON record instead of a report.
    #[arg(long, env = "IMAGE_INSIGHT_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "IMAGE_INSIGHT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMAGE_INSIGHT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMAGE_INSIGHT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ModeArg {
    Consolidated,
    Staged,
}

impl From<ModeArg> for PipelineMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Consolidated => PipelineMode::Consolidated,
            ModeArg::Staged => PipelineMode::Staged,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports progress; keep library logs out of its way.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build analyser ───────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let analyzer = ImageAnalyzer::new(config).context("Failed to set up the vision client")?;

    // ── Run analysis ─────────────────────────────────────────────────────
    let result = match (&cli.input, &cli.base64) {
        (_, Some(source)) => {
            let text = read_base64_source(source)?;
            analyzer.process_base64_image(&text).await
        }
        (Some(path), None) => {
            let mut file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            analyzer.process_image(ImageInput::stream(&mut file)).await
        }
        (None, None) => anyhow::bail!("an image path or --base64 is required"),
    }
    .context("Image rejected")?;

    // ── Emit ─────────────────────────────────────────────────────────────
    let rendered = if cli.json {
        serde_json::to_string_pretty(&result).context("Failed to serialise result")?
    } else {
        render_report(&result)
    };

    match cli.output {
        Some(ref path) => {
            tokio::fs::write(path, format!("{rendered}\n"))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            writeln!(handle, "{rendered}").context("Failed to write to stdout")?;
        }
    }

    if let Some(ref err) = result.error {
        if !cli.quiet {
            eprintln!("{} {}", red("error:"), err);
        }
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .mode(cli.mode.clone().into())
        .model(cli.model.as_str())
        .base_url(cli.base_url.as_str())
        .max_dimension(cli.max_dimension)
        .max_image_bytes(cli.max_bytes)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.as_str());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.as_str());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn read_base64_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read base64 from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read {source}"))
    }
}

fn render_report(result: &AnalysisResult) -> String {
    let mut out = String::new();
    for stage in Stage::ALL {
        let title = match stage {
            Stage::Caption => "Caption",
            Stage::Summary => "Summary",
            Stage::Objects => "Objects",
            Stage::Mood => "Mood",
            Stage::Story => "Story",
        };
        let body = result.field(stage);
        out.push_str(&format!("## {title}\n\n"));
        out.push_str(if body.is_empty() { "(not produced)" } else { body });
        out.push_str("\n\n");
    }
    out.push_str(&format!(
        "---\n{}x{} {}",
        result.metadata.width(),
        result.metadata.height(),
        result.metadata.image_mode
    ));
    out
}
