//! CLI binary for paper-analyzer.
//!
//! A thin shim over [`PaperService`]: maps flags to `AnalyzerConfig`, runs
//! one operation and prints the result. Error kinds map to exit codes
//! (2 = bad input or inaccessible paper, 1 = internal failure).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use paper_analyzer::{
    AnalysisMode, AnalyzerConfig, PaperAnalysis, PaperError, PaperMetadata, PaperService,
    PipelineObserver, Stage,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
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

// ── Spinner observer ─────────────────────────────────────────────────────────

/// Spinner on stderr, one line per finished stage.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style =
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Working");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_cache_hit(&self, paper_id: &str) {
        self.bar
            .println(format!("{} paper {paper_id} served from storage", green("✔")));
    }

    fn on_stage_start(&self, paper_id: &str, stage: Stage) {
        self.bar.set_prefix(format!("Paper {paper_id}"));
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, _paper_id: &str, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "{} {stage}  {}",
            green("✔"),
            dim(&format!("{elapsed_ms}ms"))
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Summary and main results table of a PubMed paper
  paper-analyzer analyze https://pubmed.ncbi.nlm.nih.gov/31452104/

  # Same, as JSON
  paper-analyzer --json analyze https://pubmed.ncbi.nlm.nih.gov/31452104/

  # Title and abstract only (no API key needed)
  paper-analyzer metadata https://pubmed.ncbi.nlm.nih.gov/31452104/

  # Save the PDF
  paper-analyzer download https://pubmed.ncbi.nlm.nih.gov/31452104/ -o paper.pdf

  # Preview page 3 as PNG
  paper-analyzer render-page https://pubmed.ncbi.nlm.nih.gov/31452104/ 3 -o page3.png

  # Let a vision model read the rendered pages instead of extracted text
  paper-analyzer --analysis-mode images analyze https://pubmed.ncbi.nlm.nih.gov/31452104/

  # Everything analysed or downloaded so far
  paper-analyzer list

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  NCBI_EMAIL              Contact e-mail sent to NCBI E-utilities
  NCBI_API_KEY            NCBI API key (higher rate limit)
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)

A .env file in the working directory is loaded before flags are parsed.
"#;

/// Summarise academic papers and extract their main results table.
#[derive(Parser, Debug)]
#[command(
    name = "paper-analyzer",
    version,
    about = "Summarise academic papers and extract their main results table with LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding stored papers, metadata and analyses.
    #[arg(long, global = true, env = "PAPER_ANALYZER_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "PAPER_ANALYZER_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, global = true, env = "PAPER_ANALYZER_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Attempts per LLM call before giving up on malformed JSON.
    #[arg(long, global = true, env = "PAPER_ANALYZER_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// What the model sees: extracted page text, or rendered page images
    /// (needs a vision-capable model).
    #[arg(long, global = true, env = "PAPER_ANALYZER_ANALYSIS_MODE",
          value_enum, default_value = "text")]
    analysis_mode: AnalysisModeArg,

    /// Delay before the first resubmission in ms, doubled each time.
    #[arg(long, global = true, env = "PAPER_ANALYZER_RETRY_BACKOFF_MS", default_value_t = 0)]
    retry_backoff_ms: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "PAPER_ANALYZER_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Contact e-mail for NCBI E-utilities.
    #[arg(long, global = true, env = "NCBI_EMAIL")]
    ncbi_email: Option<String>,

    /// NCBI API key.
    #[arg(long, global = true, env = "NCBI_API_KEY", hide_env_values = true)]
    ncbi_api_key: Option<String>,

    /// Path to libpdfium (file or containing directory).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// HTTP timeout for the paper source in seconds.
    #[arg(long, global = true, env = "PAPER_ANALYZER_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "PAPER_ANALYZER_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,

    /// Output JSON instead of human-readable text.
    #[arg(long, global = true, env = "PAPER_ANALYZER_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "PAPER_ANALYZER_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPER_ANALYZER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, global = true, env = "PAPER_ANALYZER_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summary and main results table (cached after the first run).
    Analyze { url: String },

    /// Title and abstract, downloading the paper if needed.
    Metadata { url: String },

    /// Download the PDF; write it to a file when `--output` is given.
    Download {
        url: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List stored papers.
    List,

    /// Render one page (1-based) as PNG.
    RenderPage {
        url: String,
        page: usize,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

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

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start runtime: {e}", red("error"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&cli, show_progress)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err, cli.verbose),
    }
}

/// Print an error without leaking internals and pick the exit code.
fn report(err: &anyhow::Error, verbose: bool) -> ExitCode {
    match err.chain().find_map(|e| e.downcast_ref::<PaperError>()) {
        Some(paper_err) => {
            eprintln!(
                "{} [{}] {}",
                red("error"),
                paper_err.status_code(),
                paper_err.public_message()
            );
            if verbose || !paper_err.is_user_facing() {
                eprintln!("{}", dim(&format!("{err:#}")));
            }
            if paper_err.is_user_facing() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
        None => {
            eprintln!("{} {err:#}", red("error"));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let observer = show_progress.then(CliObserver::new);
    let config = build_config(cli, observer.clone()).await?;
    let service = PaperService::from_config(&config).context("Failed to initialise")?;

    let result = dispatch(cli, &service).await;
    if let Some(observer) = observer {
        observer.finish();
    }
    result
}

async fn dispatch(cli: &Cli, service: &PaperService) -> Result<()> {
    match &cli.command {
        Command::Analyze { url } => {
            let analysis = service.get_analysis(url).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print_analysis(&analysis);
            }
        }
        Command::Metadata { url } => {
            let metadata = service.get_metadata(url).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            } else {
                print_metadata(&metadata);
            }
        }
        Command::Download { url, output } => {
            let mut stream = service.stream_document(url).await?;
            let mut total: u64 = 0;
            let mut file = match output {
                Some(path) => Some(
                    tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("Failed to create {}", path.display()))?,
                ),
                None => None,
            };
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                total += chunk.len() as u64;
                if let Some(f) = file.as_mut() {
                    f.write_all(&chunk).await.context("Failed to write PDF")?;
                }
            }
            if let Some(mut f) = file {
                f.flush().await.context("Failed to write PDF")?;
            }
            if !cli.quiet {
                let dest = output
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "storage".to_string());
                eprintln!("{} {total} bytes  →  {}", green("✔"), bold(&dest));
            }
        }
        Command::List => {
            let papers = service.list_papers().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&papers)?);
            } else if papers.is_empty() {
                eprintln!("{}", dim("no stored papers"));
            } else {
                for p in &papers {
                    let analysed = service.store().is_analysis_complete(&p.id).await;
                    let mark = if analysed { green("●") } else { dim("○") };
                    println!("{mark} {:>10}  {}", p.id, p.title);
                }
            }
        }
        Command::RenderPage { url, page, output } => {
            let image = service.render_page(url, *page).await?;
            tokio::fs::write(output, &image.bytes)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} page {page} ({}, {} bytes)  →  {}",
                    green("✔"),
                    image.mime_type,
                    image.bytes.len(),
                    bold(&output.display().to_string())
                );
            }
        }
    }
    Ok(())
}

fn print_metadata(metadata: &PaperMetadata) {
    println!("{}", bold(&metadata.title));
    println!("{}", dim(&metadata.url));
    println!();
    println!("{}", metadata.abstract_text);
}

fn print_analysis(analysis: &PaperAnalysis) {
    print_metadata(&analysis.metadata);
    println!();
    println!("{}", bold("Summary"));
    println!("{}", analysis.summary);
    if let Some(ref table) = analysis.main_table {
        println!();
        println!("{}", bold("Main table"));
        println!("{}", table.description);
        println!();
        println!("{}", table.csv_content.trim_end());
        if !table.footnotes.is_empty() {
            println!();
            println!("{}", dim(&table.footnotes));
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum AnalysisModeArg {
    Text,
    Images,
}

impl From<AnalysisModeArg> for AnalysisMode {
    fn from(v: AnalysisModeArg) -> Self {
        match v {
            AnalysisModeArg::Text => AnalysisMode::PageText,
            AnalysisModeArg::Images => AnalysisMode::PageImages,
        }
    }
}

/// Map CLI args to `AnalyzerConfig`.
async fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<AnalyzerConfig> {
    let mut builder = AnalyzerConfig::builder()
        .storage_root(&cli.data_dir)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_attempts(cli.max_attempts)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .analysis_mode(cli.analysis_mode.clone().into());

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref email) = cli.ncbi_email {
        builder = builder.ncbi_email(email);
    }
    if let Some(ref key) = cli.ncbi_api_key {
        builder = builder.ncbi_api_key(key);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(observer) = observer {
        builder = builder.observer(observer);
    }

    builder.build().context("Invalid configuration")
}
