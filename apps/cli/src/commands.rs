//! CLI command definitions, routing, and tracing setup.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use senseindex_core::{BatchOutcome, BatchProgress, FieldFanoutProcessor, normalize, run_batch};
use senseindex_engine::{BridgeEngineFactory, EngineHandlePool, NoEngine};
use senseindex_shared::{
    AppConfig, Document, FilterConfig, init_config, load_config, load_config_from,
    load_properties_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SenseIndex: document field enrichment for search indexing.
#[derive(Parser)]
#[command(
    name = "senseindex",
    version,
    about = "Normalize URL/path fields and disambiguate text fields of documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.senseindex/senseindex.toml).
    #[arg(long, global = true, env = "SENSEINDEX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print the phrase derived from each URL or path (empty line if none).
    Normalize {
        /// URLs or filesystem paths.
        #[arg(required = true)]
        inputs: Vec<String>,
    },

    /// Process a JSON-lines file of documents.
    Process {
        /// Input documents, one JSON object per line.
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of workers (defaults to `[workers] count`).
        #[arg(short, long)]
        workers: Option<usize>,

        /// Host property file overriding the `[filter]` section.
        #[arg(long)]
        properties: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "senseindex=info",
        1 => "senseindex=debug",
        _ => "senseindex=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Normalize { inputs } => cmd_normalize(&inputs).await,
        Command::Process {
            input,
            output,
            workers,
            properties,
        } => {
            let app = resolve_config(config_path.as_deref())?;
            cmd_process(&app, &input, output.as_deref(), workers, properties.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_normalize(inputs: &[String]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for input in inputs {
        writeln!(out, "{}", normalize(input).unwrap_or_default())?;
    }
    Ok(())
}

async fn cmd_process(
    app: &AppConfig,
    input: &Path,
    output: Option<&Path>,
    workers: Option<usize>,
    properties: Option<&Path>,
) -> Result<()> {
    let filter = match properties {
        Some(path) => load_properties_from(path)?,
        None => FilterConfig::from_section(&app.filter)?,
    };
    let workers = workers.unwrap_or(app.workers.count);

    let documents = read_documents(input)?;
    let processor = Arc::new(FieldFanoutProcessor::from_config(&filter));
    info!(
        input = %input.display(),
        documents = documents.len(),
        workers,
        preprocess = processor.fields().preprocess.len(),
        disambiguate = processor.fields().disambiguate.len(),
        "processing documents"
    );

    let progress = Arc::new(CliProgress::new(documents.len()));

    let outcome = if filter.needs_engine() {
        let pool = EngineHandlePool::open(&filter, |dir| BridgeEngineFactory::open(&app.bridge, dir))?;
        run_batch(processor, pool, documents, workers, progress.clone()).await?
    } else {
        info!("no fields to disambiguate, running without an engine");
        let pool = EngineHandlePool::new(NoEngine);
        run_batch(processor, pool, documents, workers, progress.clone()).await?
    };
    progress.finish();

    let written = write_documents(output, &outcome)?;

    eprintln!();
    eprintln!("  Processed: {}", outcome.results.len());
    eprintln!("  Written:   {written}");
    eprintln!("  Failed:    {}", outcome.failed());
    eprintln!("  Time:      {:.1}s", outcome.elapsed.as_secs_f64());
    eprintln!();

    if outcome.failed() > 0 {
        return Err(eyre!(
            "{} of {} documents failed",
            outcome.failed(),
            outcome.results.len()
        ));
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Document I/O
// ---------------------------------------------------------------------------

fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let file = File::open(path).wrap_err_with(|| format!("cannot open {}", path.display()))?;

    let mut documents = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.wrap_err_with(|| format!("cannot read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc = Document::from_json_line(&line)
            .wrap_err_with(|| format!("{}:{}", path.display(), n + 1))?;
        documents.push(doc);
    }
    Ok(documents)
}

/// Write every successful document as one JSON line; log the failures.
/// Returns the number of documents written.
fn write_documents(output: Option<&Path>, outcome: &BatchOutcome) -> Result<usize> {
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).wrap_err_with(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut written = 0;
    for (index, result) in outcome.results.iter().enumerate() {
        match result {
            Ok(doc) => {
                serde_json::to_writer(&mut out, doc)?;
                out.write_all(b"\n")?;
                written += 1;
            }
            Err(e) => error!(document = index, error = %e, "document not written"),
        }
    }
    out.flush()?;
    Ok(written)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Batch progress bar on stderr.
struct CliProgress {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self {
            bar,
            failed: AtomicUsize::new(0),
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchProgress for CliProgress {
    fn document_done(&self, completed: usize, _total: usize, failed: bool) {
        self.bar.set_position(completed as u64);
        if failed {
            let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
            self.bar.set_message(format!("{failed} failed"));
        }
    }
}
