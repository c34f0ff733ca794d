// Docksight CLI - analyze container logs with a language model

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use docksight_core::{
    capture_container_logs, pipeline_from_config, read_log_file, render_report, save_report, AnalysisReport,
    AnalysisResult, CaptureOptions, Config, FilterSet, KnowledgeBase, LogRecord, OutputFormat, Pipeline,
    PipelineError, PipelineOverrides, ReportMetadata, RetentionPolicy,
};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq)]
enum ReportFormat {
    Markdown,
    Json,
}

impl From<ReportFormat> for OutputFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Markdown => OutputFormat::Markdown,
            ReportFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "docksight")]
#[command(about = "AI-assisted analysis of Docker container logs", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./.docksight.toml, then ~/.config/docksight/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze the logs of one or more containers
    Analyze(AnalyzeArgs),

    /// Write a configuration file with the default settings
    InitConfig {
        /// Destination (defaults to ~/.config/docksight/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show which lines from stdin a container's filters would keep
    CheckFilters {
        container: String,
    },

    /// List past analyses of a container
    Knowledge {
        container: String,

        #[arg(long, default_value = "5")]
        limit: usize,
    },
}

#[derive(clap::Args, Debug)]
struct AnalyzeArgs {
    /// Container names or ids
    #[arg(required = true)]
    containers: Vec<String>,

    /// Read logs from a file instead of `docker logs` (one container only)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Number of lines to fetch from the end of the log
    #[arg(long)]
    tail: Option<usize>,

    /// Only fetch logs newer than this (e.g. 10m, 2024-05-01T00:00:00Z)
    #[arg(long)]
    since: Option<String>,

    /// AI provider: openrouter, openai, claude or mock
    #[arg(short, long, env = "DOCKSIGHT_PROVIDER")]
    provider: Option<String>,

    #[arg(short, long)]
    model: Option<String>,

    /// Model context window in tokens
    #[arg(long)]
    context_limit: Option<usize>,

    #[arg(long, value_enum)]
    format: Option<ReportFormat>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not record the analysis in the knowledge base
    #[arg(long)]
    no_knowledge: bool,

    /// Per-request timeout in seconds; 0 disables it
    #[arg(long)]
    timeout: Option<u64>,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    for directive in [format!("docksight={}", level), format!("docksight_core={}", level)] {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {}: {}", directive, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // init-config never reads an existing config file
    if let Commands::InitConfig { path, force } = &cli.command {
        return run_init_config(path.clone(), *force);
    }

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze(args) => run_analyze(&config, args).await,
        Commands::CheckFilters { container } => run_check_filters(&config, &container),
        Commands::Knowledge { container, limit } => run_knowledge(&config, &container, limit),
        Commands::InitConfig { .. } => Ok(()),
    }
}

struct ContainerRun {
    index: usize,
    container: String,
    input_source: String,
    result: Result<AnalysisResult>,
}

async fn run_analyze(config: &Config, args: AnalyzeArgs) -> Result<()> {
    if args.file.is_some() && args.containers.len() > 1 {
        bail!("--file reads a single log; pass exactly one container name with it");
    }

    let pipeline = pipeline_from_config(
        config,
        PipelineOverrides {
            provider: args.provider.clone(),
            model: args.model.clone(),
            context_limit: args.context_limit,
            request_timeout_secs: args.timeout,
        },
    )?;

    let cancel = pipeline.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight requests");
            cancel.cancel();
        }
    });

    let capture = CaptureOptions {
        tail: args.tail.or_else(|| config.tail()),
        since: args.since.clone(),
    };

    info!("Analyzing {} container(s)", args.containers.len());
    let mut runs = JoinSet::new();
    for (index, container) in args.containers.iter().cloned().enumerate() {
        let pipeline = pipeline.clone();
        let capture = capture.clone();
        let file = args.file.clone();
        runs.spawn(async move {
            let (input_source, result) = analyze_container(&pipeline, &container, file.as_deref(), &capture).await;
            ContainerRun {
                index,
                container,
                input_source,
                result,
            }
        });
    }

    let mut finished = Vec::with_capacity(args.containers.len());
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(run) => finished.push(run),
            Err(e) => error!("Analysis task failed: {}", e),
        }
    }
    finished.sort_by_key(|run| run.index);

    let knowledge = (!args.no_knowledge && config.knowledge_enabled()).then(|| {
        KnowledgeBase::new(config.knowledge_dir()).with_policy(RetentionPolicy {
            max_entries: config.knowledge.max_entries.unwrap_or(20),
            max_age_days: config.knowledge.max_age_days,
        })
    });

    let format = args
        .format
        .map(OutputFormat::from)
        .or_else(|| args.output.as_deref().and_then(OutputFormat::from_path))
        .unwrap_or_default();
    let multiple = args.containers.len() > 1;
    let mut failures = args.containers.len() - finished.len();

    for run in finished {
        let result = match run.result {
            Ok(result) => result,
            Err(e) => {
                failures += 1;
                eprintln!("✗ {}: {}", run.container, describe_failure(&e));
                continue;
            }
        };

        if let Some(kb) = &knowledge {
            if result.chunks_used > 0 {
                if let Err(e) = kb.record(&run.container, &result) {
                    warn!("Could not update knowledge base for {}: {:#}", run.container, e);
                }
            }
        }

        let metadata = ReportMetadata::now(
            &run.container,
            pipeline.provider_name(),
            pipeline.model_limit(),
            &run.input_source,
        );
        let content = render_report(&AnalysisReport::new(metadata, result), format)?;

        match &args.output {
            Some(base) => {
                let path = output_path_for(base, &run.container, multiple, format);
                save_report(&content, &path)?;
                eprintln!("✓ {}: report written to {}", run.container, path.display());
            }
            None => println!("{}", content),
        }
    }

    if failures > 0 {
        bail!("{} of {} analyses failed", failures, args.containers.len());
    }
    Ok(())
}

async fn analyze_container(
    pipeline: &Pipeline,
    container: &str,
    file: Option<&Path>,
    capture: &CaptureOptions,
) -> (String, Result<AnalysisResult>) {
    let input_source = match file {
        Some(path) => path.display().to_string(),
        None => "docker logs".to_string(),
    };

    let load = async {
        match file {
            Some(path) => read_log_file(path).await,
            None => capture_container_logs(container, capture).await,
        }
    };
    let records: Vec<LogRecord> = tokio::select! {
        _ = pipeline.cancellation_token().cancelled() => {
            return (input_source, Err(anyhow::anyhow!("cancelled while reading logs")));
        }
        loaded = load => match loaded {
            Ok(records) => records,
            Err(e) => return (input_source, Err(e)),
        },
    };

    debug!("Loaded {} records for {}", records.len(), container);
    let result = pipeline
        .analyze(container, records)
        .await
        .with_context(|| format!("Analysis of {} failed", container));
    (input_source, result)
}

/// One line naming the failure, with the provider error category when
/// there is one.
fn describe_failure(err: &anyhow::Error) -> String {
    let category = err
        .downcast_ref::<PipelineError>()
        .and_then(|e| e.ai_error())
        .map(|e| format!(" [{}]", e.category()));
    format!("{:#}{}", err, category.unwrap_or_default())
}

/// With several containers, each report gets the container name appended to
/// the file stem.
fn output_path_for(base: &Path, container: &str, multiple: bool, format: OutputFormat) -> PathBuf {
    if !multiple {
        return base.to_path_buf();
    }

    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    let extension = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| format.file_extension().to_string());
    base.with_file_name(format!("{}-{}.{}", stem, container, extension))
}

fn run_init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path.or_else(Config::user_config_path) {
        Some(path) => path,
        None => PathBuf::from(docksight_core::config::PROJECT_CONFIG_FILE),
    };

    if path.exists() && !force {
        bail!("{} already exists; use --force to overwrite it", path.display());
    }

    Config::default().save_to_path(&path)?;
    println!("✓ Configuration written to {}", path.display());
    println!("  Set an API key with OPENROUTER_API_KEY (or OPENAI_API_KEY / CLAUDE_API_KEY),");
    println!("  or under [providers.<name>] api_key in the file.");
    Ok(())
}

fn run_check_filters(config: &Config, container: &str) -> Result<()> {
    let filters: FilterSet = config.build_filter_set().context("Invalid filter configuration")?;
    match filters.get(container) {
        Some(filter) => eprintln!("{} filter patterns configured for {}", filter.pattern_count(), container),
        None => eprintln!("No filters configured for {}; every line is kept", container),
    }

    let stdin = io::stdin();
    let mut records = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        records.push(LogRecord::primary(line));
    }

    let (kept, outcome) = filters.apply(container, records);
    for record in &kept {
        println!("{}", record.message);
    }
    eprintln!(
        "{} lines read, {} excluded, {} kept",
        outcome.total_lines, outcome.excluded_lines, outcome.kept_lines
    );
    Ok(())
}

fn run_knowledge(config: &Config, container: &str, limit: usize) -> Result<()> {
    let kb = KnowledgeBase::new(config.knowledge_dir());
    let entries = kb.recent(container, limit)?;

    if entries.is_empty() {
        println!("No recorded analyses for {} in {}", container, kb.dir().display());
        return Ok(());
    }

    for entry in entries {
        println!(
            "## {} ({} records, {} chunks, ~{} tokens)",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.processed_count,
            entry.chunks_used,
            entry.tokens_used
        );
        println!();
        println!("{}", entry.analysis.trim_end());
        println!();
    }
    Ok(())
}
