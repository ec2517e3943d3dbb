use std::fs::File;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use refverify_core::config_file::load_config;
use refverify_core::{Config, CoreError, ProgressEvent, Reference};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod output;

use output::Printer;

/// Reference verifier - check bibliographic references against metadata sources
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./.refverify.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify references from a JSON array ("-" reads stdin)
    Check(CheckArgs),
    /// Build the offline index from a JSON-lines dump (optionally .gz)
    BuildIndex {
        input: PathBuf,
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct CheckArgs {
    input: PathBuf,

    /// Write results as JSON to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print progress events as JSON lines instead of a progress bar
    #[arg(long)]
    events: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// OpenAlex API key
    #[arg(long)]
    openalex_key: Option<String>,

    /// Semantic Scholar API key
    #[arg(long)]
    s2_api_key: Option<String>,

    /// Contact address for the CrossRef and OpenAlex polite pools
    #[arg(long)]
    crossref_mailto: Option<String>,

    /// Path to the offline index
    #[arg(long)]
    local_index: Option<PathBuf>,

    /// Comma-separated list of sources to disable
    #[arg(long, value_delimiter = ',')]
    disable_sources: Vec<String>,

    /// Number of references checked concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Per-reference timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Do not retry sources that failed on the first pass
    #[arg(long)]
    no_retry: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log.as_deref())?;

    match cli.command {
        Command::Check(args) => check(args, cli.config.as_deref()).await,
        Command::BuildIndex { input, output } => build_index(&input, &output).await,
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init(),
    }
    Ok(())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{name} must be a number, got '{v}'")),
        None => Ok(None),
    }
}

/// Resolve configuration: flags > env vars > config file > defaults.
fn resolve_config(args: &CheckArgs, config_path: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();
    if let Some(file) = load_config(config_path)? {
        file.apply(&mut config);
    }

    if let Some(v) = env_string("S2_API_KEY") {
        config.s2_api_key = Some(v);
    }
    if let Some(v) = env_string("OPENALEX_KEY") {
        config.openalex_key = Some(v);
    }
    if let Some(v) = env_string("CROSSREF_MAILTO") {
        config.crossref_mailto = Some(v);
    }
    if let Some(v) = env_string("LOCAL_INDEX_PATH") {
        config.local_index_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env_parse("REF_TIMEOUT")? {
        config.ref_timeout_secs = v;
    }
    if let Some(v) = env_parse("DB_TIMEOUT")? {
        config.db_timeout_secs = v;
    }
    if let Some(v) = env_parse("NUM_WORKERS")? {
        config.max_concurrent_refs = v;
    }

    if let Some(v) = &args.s2_api_key {
        config.s2_api_key = Some(v.clone());
    }
    if let Some(v) = &args.openalex_key {
        config.openalex_key = Some(v.clone());
    }
    if let Some(v) = &args.crossref_mailto {
        config.crossref_mailto = Some(v.clone());
    }
    if let Some(v) = &args.local_index {
        if !v.exists() {
            bail!(
                "offline index not found at {}; build it with `refverify build-index`",
                v.display()
            );
        }
        config.local_index_path = Some(v.clone());
    }
    if !args.disable_sources.is_empty() {
        config.disabled_sources = args.disable_sources.clone();
    }
    if let Some(v) = args.workers {
        config.max_concurrent_refs = v.max(1);
    }
    if let Some(v) = args.timeout {
        config.ref_timeout_secs = v;
    }
    if args.no_retry {
        config.retry_failed_sources = false;
    }
    Ok(config)
}

fn read_references(input: &Path) -> Result<Vec<Reference>> {
    let text = if input.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("cannot read {}", input.display()))?
    };
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of references", input.display()))
}

async fn check(args: CheckArgs, config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(&args, config_path)?;
    let refs = read_references(&args.input)?;
    tracing::info!(references = refs.len(), "starting check");

    let color = !args.no_color && io::stdout().is_terminal();
    let printer = Arc::new(Printer::new(color));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let bar = if args.events {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(refs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    };

    let progress = {
        let bar = bar.clone();
        let printer = Arc::clone(&printer);
        let events = args.events;
        move |event: ProgressEvent| {
            if events {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
                return;
            }
            match event {
                ProgressEvent::Checking { title, .. } => bar.set_message(title),
                ProgressEvent::Result {
                    index,
                    total,
                    result,
                } => bar.println(printer.result(index, total, &result)),
                ProgressEvent::Warning { message, .. } => {
                    tracing::warn!("{message}");
                }
                ProgressEvent::Progress { current, .. } => bar.set_position(current as u64),
                ProgressEvent::Completed { .. } | ProgressEvent::Cancelled { .. } => {
                    bar.finish_and_clear();
                }
                ProgressEvent::Error { message } => {
                    bar.abandon_with_message(message);
                }
                ProgressEvent::SummaryUpdate { .. } => {}
            }
        }
    };

    let metrics = Arc::clone(&config.metrics);
    let report = match refverify_core::check_references(refs, config, progress, cancel).await {
        Ok(report) => report,
        Err(CoreError::Cancelled) => bail!("check cancelled"),
        Err(e) => return Err(e.into()),
    };

    for (source, stat) in metrics.snapshot() {
        tracing::info!(
            source = %source,
            ok = stat.success_count,
            failed = stat.failure_count,
            avg_ms = stat.average_latency.as_millis() as u64,
            "source statistics"
        );
    }
    if !args.events {
        println!("{}", printer.summary(&report.summary));
    }
    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&report.results)?;
        std::fs::write(path, json)
            .with_context(|| format!("cannot write {}", path.display()))?;
        tracing::info!("results written to {}", path.display());
    }
    Ok(())
}

async fn build_index(input: &Path, output: &Path) -> Result<()> {
    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(format!("importing {}", input.display()));

    let (src, dst) = (input.to_path_buf(), output.to_path_buf());
    let reporter = bar.clone();
    let count = tokio::task::spawn_blocking(move || {
        refverify_index::build_index(&src, &dst, |n| {
            reporter.set_message(format!("{n} records imported"));
        })
    })
    .await
    .context("index build task failed")??;

    bar.finish_and_clear();
    println!("Built index at {} with {count} records", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CheckArgs {
        let mut argv = vec!["refverify", "check", "refs.json"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Check(args) => args,
            Command::BuildIndex { .. } => unreachable!(),
        }
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "num_workers = 2\nref_timeout_secs = 30\n").unwrap();

        let config = resolve_config(
            &args(&["--workers", "8", "--disable-sources", "scholar,openalex"]),
            Some(&path),
        )
        .unwrap();
        assert_eq!(config.max_concurrent_refs, 8);
        assert_eq!(config.ref_timeout_secs, 30);
        assert_eq!(config.disabled_sources, vec!["scholar", "openalex"]);
    }

    #[test]
    fn missing_local_index_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        let missing = dir.path().join("index.db");
        let err = resolve_config(
            &args(&["--local-index", missing.to_str().unwrap()]),
            Some(&path),
        )
        .unwrap_err();
        assert!(err.to_string().contains("build-index"));
    }

    #[test]
    fn references_parse_from_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        std::fs::write(
            &path,
            r#"[{"title": "Attention Is All You Need", "authors": ["Ashish Vaswani"], "year": 2017}]"#,
        )
        .unwrap();
        let refs = read_references(&path).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].year, Some(2017));
    }
}
