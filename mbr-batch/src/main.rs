//! mbr-batch - MIDI batch renderer
//!
//! Subcommands:
//! - `run`: process eligible records (`--dry-run` only checks collaborators)
//! - `stats`: count eligible records
//! - `import`: load JSON Lines documents into the store
//! - `reset`: return failed/processing records to unset
//!
//! Exit codes: 0 success, 1 some record failed, 2 configuration or batch
//! error, 130 interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mbr_batch::config::ConfigOverrides;
use mbr_batch::import::import_jsonl;
use mbr_batch::models::ProcessingStatus;
use mbr_batch::store::RecordFilter;
use mbr_batch::{BatchConfig, BatchContext, BatchError};
use mbr_common::write_json_lines;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_FAILURES: u8 = 1;
const EXIT_ERROR: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "mbr-batch")]
#[command(about = "Render MIDI records to loudness-normalized, tagged MP3 files")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite record store
    #[arg(long, global = true, env = "MBR_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "MBR_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process eligible records
    Run(RunArgs),
    /// Print the number of eligible records
    Stats(FilterArgs),
    /// Import JSON Lines documents into the store
    Import {
        /// File with one JSON document per line
        file: PathBuf,
    },
    /// Reset records in the given statuses back to unset
    Reset {
        #[arg(long, value_enum, required = true)]
        status: Vec<ResetStatus>,
    },
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// Extra predicate term `field=value` (repeatable)
    #[arg(long = "filter", value_name = "FIELD=VALUE")]
    filters: Vec<String>,

    /// Also exclude records already marked failed
    #[arg(long, env = "MBR_SKIP_FAILED")]
    skip_failed: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    filter: FilterArgs,

    /// Validate configuration and collaborators without processing
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of records to process
    #[arg(long)]
    limit: Option<u64>,

    /// Stream run events to stdout as JSON lines instead of the summary
    #[arg(long)]
    events: bool,

    /// Maximum simultaneous pipeline executions
    #[arg(long, env = "MBR_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Store connection pool size
    #[arg(long, env = "MBR_POOL_SIZE")]
    pool_size: Option<u32>,

    /// Retries after the first failed attempt
    #[arg(long, env = "MBR_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Root of the artist/album/title output tree
    #[arg(long, env = "MBR_OUTPUT_ROOT")]
    output_root: Option<PathBuf>,

    /// Scratch directory for intermediate files
    #[arg(long, env = "MBR_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// SoundFont used by the renderer
    #[arg(long, env = "MBR_SOUNDFONT")]
    soundfont: Option<PathBuf>,

    /// fluidsynth executable
    #[arg(long, env = "MBR_FLUIDSYNTH")]
    fluidsynth: Option<PathBuf>,

    /// ffmpeg executable (normalize and encode)
    #[arg(long, env = "MBR_FFMPEG")]
    ffmpeg: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ResetStatus {
    Failed,
    Processing,
    Completed,
}

impl From<ResetStatus> for ProcessingStatus {
    fn from(status: ResetStatus) -> Self {
        match status {
            ResetStatus::Failed => ProcessingStatus::Failed,
            ResetStatus::Processing => ProcessingStatus::Processing,
            ResetStatus::Completed => ProcessingStatus::Completed,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mbr_batch=info,mbr_common=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let base = BatchConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides {
        database_path: cli.database.clone(),
        ..Default::default()
    };
    match &cli.command {
        Command::Run(args) => {
            overrides.concurrency = args.concurrency;
            overrides.pool_size = args.pool_size;
            overrides.max_retries = args.max_retries;
            overrides.output_root = args.output_root.clone();
            overrides.work_dir = args.work_dir.clone();
            overrides.soundfont = args.soundfont.clone();
            overrides.fluidsynth_path = args.fluidsynth.clone();
            overrides.ffmpeg_path = args.ffmpeg.clone();
            apply_filter_args(&mut overrides, &args.filter)?;
        }
        Command::Stats(args) => apply_filter_args(&mut overrides, args)?,
        Command::Import { .. } | Command::Reset { .. } => {}
    }
    let config = base.apply_overrides(overrides);

    let context = BatchContext::open(config)
        .await
        .context("Failed to open batch context")?;

    let result = dispatch(&context, cli.command).await;
    context.close().await;
    result
}

fn apply_filter_args(overrides: &mut ConfigOverrides, args: &FilterArgs) -> Result<()> {
    overrides.skip_failed = args.skip_failed;
    for term in &args.filters {
        let (field, value) = RecordFilter::parse_term(term)
            .map_err(|e| anyhow::anyhow!(BatchError::Configuration(e)))?;
        overrides.filter_terms.push((field, value));
    }
    Ok(())
}

async fn dispatch(context: &BatchContext, command: Command) -> Result<ExitCode> {
    match command {
        Command::Run(args) if args.dry_run => {
            let report = context.dry_run(&context.config().record_filter()).await?;
            for check in &report.checks {
                match &check.detail {
                    Ok(detail) => println!("ok      {:<20} {}", check.component, detail),
                    Err(reason) => println!("FAILED  {:<20} {}", check.component, reason),
                }
            }
            println!("eligible records: {}", report.matching);
            report.into_result()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => {
            let cancel = CancellationToken::new();
            let signal_task = tokio::spawn(cancel_on_signal(cancel.clone()));

            let event_task = args.events.then(|| {
                tokio::spawn(write_json_lines(context.events().subscribe(), tokio::io::stdout()))
            });

            let options = context.default_options(args.limit);
            let stats = context.run_batch(options, cancel).await;
            signal_task.abort();

            match event_task {
                // RunFinished ends the stream once the run got underway
                Some(task) if stats.is_ok() => match task.await {
                    Ok(Ok(lines)) => info!(lines, "Event stream closed"),
                    Ok(Err(e)) => warn!(error = %e, "Event stream failed"),
                    Err(e) => warn!(error = %e, "Event stream task failed"),
                },
                Some(task) => task.abort(),
                None => {}
            }
            let stats = stats?;

            if !args.events {
                for line in stats.display_lines() {
                    println!("{}", line);
                }
            }

            if stats.interrupted {
                warn!("Run interrupted");
                Ok(ExitCode::from(EXIT_INTERRUPTED))
            } else if stats.has_failures() {
                Ok(ExitCode::from(EXIT_FAILURES))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Stats(_) => {
            let count = context.stats_only(&context.config().record_filter()).await?;
            println!("{}", count);
            Ok(ExitCode::SUCCESS)
        }
        Command::Import { file } => {
            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let summary = import_jsonl(context.store(), tokio::io::BufReader::new(handle)).await?;

            info!(imported = summary.imported, rejected = summary.rejected.len(), "Import finished");
            println!("imported: {}", summary.imported);
            for (line, reason) in &summary.rejected {
                println!("rejected line {}: {}", line, reason);
            }
            if summary.rejected.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_FAILURES))
            }
        }
        Command::Reset { status } => {
            let statuses: Vec<ProcessingStatus> = status.into_iter().map(Into::into).collect();
            let reset = context.store().reset_status(&statuses).await?;
            info!(reset, "Reset record statuses");
            println!("reset: {}", reset);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Cancel the run on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping batch");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping batch");
        },
    }
    cancel.cancel();
}
