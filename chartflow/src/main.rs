//! `chartflow` command line.

use anyhow::{bail, Context, Result};
use chartflow::charts::{build_chart_graph, render_graph, ChartComponents};
use chartflow::config::{ChartflowConfig, ConfigScope};
use chartflow::container::EcsClient;
use chartflow::context::{PipelineContext, RunIdentity};
use chartflow::events::LoggingEventSink;
use chartflow::extract::{Extractor, SpotifyClient};
use chartflow::observability::{init_logging, LogFormat};
use chartflow::pipeline::RunState;
use chartflow::storage::{ObjectStorage, ObjectStoreStorage};
use chartflow::tasks::{ExtractLauncher, InProcessLauncher, SubprocessLauncher};
use chartflow::warehouse::RedshiftWarehouse;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "chartflow", version, about = "Chart extraction and staging pipeline")]
struct Cli {
    /// Configuration file (defaults to ./chartflow.toml when present).
    #[arg(long, global = true, env = "CHARTFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pull the chart and audio features and upload both CSVs.
    Extract {
        /// Date partition to write (defaults to today, UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run the whole task graph for one date.
    Run {
        /// Logical run date (defaults to today, UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Run the extractor inside this process instead of a child process.
        #[arg(long)]
        in_process: bool,
    },
    /// Print the tasks, their kinds, trigger rules and upstream tasks.
    Graph,
    /// Report configuration problems and exit non-zero if there are any.
    CheckConfig {
        /// Check only what the extractor needs.
        #[arg(long)]
        extract_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    let config = ChartflowConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Extract { date } => extract(&config, date.unwrap_or_else(today)).await,
        Command::Run { date, in_process } => {
            run(&config, cli.config, date.unwrap_or_else(today), in_process).await
        }
        Command::Graph => {
            let components = ChartComponents::detached(&config.storage.bucket);
            let graph = build_chart_graph(&config, &components)?;
            print!("{}", render_graph(&graph));
            Ok(())
        }
        Command::CheckConfig { extract_only } => {
            let scope = if extract_only {
                ConfigScope::Extract
            } else {
                ConfigScope::Run
            };
            check_config(&config, scope)
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn storage(config: &ChartflowConfig) -> Result<Arc<dyn ObjectStorage>> {
    let storage = ObjectStoreStorage::from_config(&config.storage, &config.aws)
        .await
        .context("opening object storage")?;
    Ok(Arc::new(storage))
}

fn extractor(config: &ChartflowConfig, storage: Arc<dyn ObjectStorage>) -> Result<Extractor> {
    let client = SpotifyClient::new(config.spotify.clone()).context("building HTTP client")?;
    Ok(Extractor::new(client, storage, config.storage.clone()))
}

async fn extract(config: &ChartflowConfig, date: NaiveDate) -> Result<()> {
    config.validate(ConfigScope::Extract)?;
    let extractor = extractor(config, storage(config).await?)?;

    let report = extractor.run(date).await?;
    info!(
        %date,
        tracks = report.tracks,
        features = report.features,
        "Extraction finished"
    );
    Ok(())
}

async fn run(
    config: &ChartflowConfig,
    config_path: Option<PathBuf>,
    date: NaiveDate,
    in_process: bool,
) -> Result<()> {
    config.validate(ConfigScope::Run)?;

    let storage = storage(config).await?;
    let launcher: Arc<dyn ExtractLauncher> = if in_process {
        Arc::new(InProcessLauncher::new(extractor(config, storage.clone())?))
    } else {
        Arc::new(SubprocessLauncher::from_config(config)?.with_config_path(config_path))
    };
    let components = ChartComponents {
        launcher,
        storage,
        warehouse: Arc::new(RedshiftWarehouse::connect_lazy(&config.warehouse, &config.aws)?),
        platform: Arc::new(EcsClient::from_config(config)?),
    };

    let graph = build_chart_graph(config, &components)?;
    let ctx = Arc::new(
        PipelineContext::new(RunIdentity::new(date))
            .with_topology(graph.name())
            .with_event_sink(Arc::new(LoggingEventSink)),
    );

    let result = graph.execute(ctx).await?;
    match result.state {
        RunState::Succeeded => {
            info!(%date, duration_ms = result.duration_ms, "Run succeeded");
            Ok(())
        }
        RunState::Failed { reason } => {
            error!(%date, %reason, "Run failed");
            bail!("run for {date} failed: {reason}")
        }
    }
}

fn check_config(config: &ChartflowConfig, scope: ConfigScope) -> Result<()> {
    let problems = config.problems(scope);
    if problems.is_empty() {
        info!(?scope, "Configuration is complete");
        return Ok(());
    }
    for problem in &problems {
        warn!("{problem}");
    }
    bail!("{} configuration problem(s)", problems.len())
}
