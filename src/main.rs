use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use apply_engine::AuthSuccess;
use autoapply_cli::app;
use autoapply_cli::config::AppConfig;
use autoapply_core_types::SearchQuery;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    output: OutputFormat,

    /// Also append JSON logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one search-and-apply batch
    Run(RunArgs),

    /// Probe the stored login session, refreshing it when stale
    Login,

    /// Inspect the application ledger
    Ledger(LedgerArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Search keywords, in ranking order
    #[arg(short, long, required = true, num_args = 1..)]
    keywords: Vec<String>,

    /// Search location
    #[arg(short = 'L', long)]
    location: String,

    /// Stop after this many confirmed applications
    #[arg(long)]
    cap: Option<usize>,

    /// Attach to a running browser over CDP instead of launching one
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,
}

#[derive(Args)]
struct LedgerArgs {
    #[command(subcommand)]
    command: LedgerCommand,
}

#[derive(Subcommand)]
enum LedgerCommand {
    /// Print recorded applications
    List,

    /// Print the resolved ledger file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log_level, cli.debug, cli.log_file.as_deref())?;

    info!("autoapply v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args, &mut config, &cli.output).await,
        Commands::Login => cmd_login(&config, &cli.output).await,
        Commands::Ledger(args) => cmd_ledger(args, &config, &cli.output),
    };

    match result {
        Ok(()) => {
            info!("command completed");
            Ok(())
        }
        Err(err) => {
            error!("command failed: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Console logs go to stderr so stdout stays parseable; the optional file
/// layer writes JSON lines.
fn init_logging(
    level: &str,
    debug: bool,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("invalid log level")?
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("could not open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

async fn cmd_run(args: RunArgs, config: &mut AppConfig, output: &OutputFormat) -> Result<()> {
    if let Some(ws_url) = args.ws_url {
        config.browser.websocket_url = Some(ws_url);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; the posting in flight will finish its cleanup");
            interrupt.cancel();
        }
    });

    let query = SearchQuery::new(args.keywords, args.location);
    let report = app::run_application_batch(config, query, args.cap, cancel).await?;

    match output {
        OutputFormat::Human => {
            println!("batch {}", report.batch);
            println!("auth: {}", report.auth.as_str());
            println!("postings found: {}", report.postings_found);
            println!(
                "applied {}  partial {}  skipped {}  failed {}",
                report.summary.applied,
                report.summary.partial,
                report.summary.skipped,
                report.summary.failed
            );
            if report.summary.ledger_write_failures > 0 {
                println!(
                    "warning: {} application(s) could not be written to the ledger",
                    report.summary.ledger_write_failures
                );
            }
        }
        OutputFormat::Json => {
            let value = json!({
                "batch": report.batch.to_string(),
                "auth": report.auth.as_str(),
                "postings_found": report.postings_found,
                "summary": {
                    "applied": report.summary.applied,
                    "partial": report.summary.partial,
                    "skipped": report.summary.skipped,
                    "failed": report.summary.failed,
                    "ledger_write_failures": report.summary.ledger_write_failures,
                },
            });
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        }
    }
    Ok(())
}

async fn cmd_login(config: &AppConfig, output: &OutputFormat) -> Result<()> {
    let auth = app::refresh_login(config).await?;
    match output {
        OutputFormat::Human => match auth {
            AuthSuccess::ReusedSession => println!("stored session is still valid"),
            AuthSuccess::FreshLogin => println!("logged in with credentials; session stored"),
        },
        OutputFormat::Json => {
            println!("{}", json!({ "auth": auth.as_str() }));
        }
    }
    Ok(())
}

fn cmd_ledger(args: LedgerArgs, config: &AppConfig, output: &OutputFormat) -> Result<()> {
    match args.command {
        LedgerCommand::Path => {
            println!("{}", config.storage.ledger_path().display());
        }
        LedgerCommand::List => {
            let ledger = app::load_ledger(config);
            match output {
                OutputFormat::Human => {
                    if ledger.is_empty() {
                        println!("no applications recorded");
                    } else {
                        for record in ledger.records() {
                            println!(
                                "{}  {:<7}  {}",
                                record.recorded_at.to_rfc3339(),
                                record.status.as_str(),
                                record.url
                            );
                        }
                    }
                }
                OutputFormat::Json => {
                    let entries: Vec<_> = ledger
                        .records()
                        .iter()
                        .map(|record| {
                            json!({
                                "posting_id": record.posting_id.as_str(),
                                "url": record.url,
                                "status": record.status.as_str(),
                                "recorded_at": record.recorded_at.to_rfc3339(),
                            })
                        })
                        .collect();
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&entries).unwrap_or_default()
                    );
                }
            }
        }
    }
    Ok(())
}
