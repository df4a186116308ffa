mod config;

use crate::config::{CommonConfig, Config, ConfigError, Secrets};
use catalog::{CachedCatalog, Database, DataflowCatalog, StoreError};
use clap::{Parser, Subcommand};
use gateway::GatewayRunError;
use gateway::handlers::AppState;
use gateway::refresh::{self, RefreshError};
use gateway::templates::{TemplateError, Templates};
use gateway::upstream::{PlotService, StatisticsApi, UpstreamError};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(version, about = "ABS statistics visualiser gateway")]
struct Cli {
    /// Path to the config file (YAML or JSON)
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone, Copy, Debug, Default)]
enum CliCommand {
    /// Serve pages and proxy plot requests (default)
    #[default]
    Serve,
    /// Reload every dataflow stub from the statistics API into the store
    RefreshDataflows,
    /// Import the CPI series into the store
    ImportCpi,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid sentry DSN: {0}")]
    SentryDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Gateway(#[from] GatewayRunError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let _sentry = match init_logging(&config.common) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match start(cli.command.unwrap_or_default(), config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "visualiser exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn start(command: CliCommand, config: Config) -> Result<(), StartupError> {
    init_metrics(&config.common)?;
    let secrets = Secrets::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(command, config, secrets))
}

/// Installs the fmt subscriber and, when a DSN is configured, Sentry.
fn init_logging(common: &CommonConfig) -> Result<Option<sentry::ClientInitGuard>, StartupError> {
    let guard = match &common.logging {
        Some(logging) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(logging.sentry_dsn.parse()?),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    Ok(guard)
}

fn init_metrics(common: &CommonConfig) -> Result<(), StartupError> {
    let Some(metrics_config) = &common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(metrics_config.statsd_host.clone(), metrics_config.statsd_port)
        .build(Some("visualiser"))
        .map_err(|e| StartupError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| StartupError::Metrics(e.to_string()))?;

    describe_all(gateway::metrics_defs::ALL_METRICS);
    describe_all(catalog::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "exporting metrics to statsd"
    );
    Ok(())
}

async fn run(command: CliCommand, config: Config, secrets: Secrets) -> Result<(), StartupError> {
    let db = Database::connect(&secrets.database_url, config.database.max_connections).await?;
    db.ensure_schema().await?;

    let client = reqwest::Client::builder().build()?;
    let api_config = &config.gateway.statistics_api;
    let statistics_api = StatisticsApi::new(client.clone(), api_config, secrets.abs_api_key);

    let result = match command {
        CliCommand::Serve => serve(config, db.clone(), client, statistics_api).await,
        CliCommand::RefreshDataflows => {
            let snapshot = api_config.dataflow_snapshot.as_deref();
            refresh::refresh_dataflows(&statistics_api, &db, snapshot)
                .await
                .map(|written| tracing::info!(written, "dataflow refresh complete"))
                .map_err(StartupError::from)
        }
        CliCommand::ImportCpi => {
            refresh::import_cpi(
                &statistics_api,
                &db,
                &api_config.cpi_dataflow,
                &api_config.cpi_key,
            )
            .await
            .map(|written| tracing::info!(written, "CPI import complete"))
            .map_err(StartupError::from)
        }
    };

    db.close().await;
    result
}

async fn serve(
    config: Config,
    db: Database,
    client: reqwest::Client,
    statistics_api: StatisticsApi,
) -> Result<(), StartupError> {
    let gateway_config = Arc::new(config.gateway);
    let templates = Arc::new(Templates::load(&gateway_config.html_templates)?);
    let plot_service = PlotService::new(client, &gateway_config.plot_service)?;

    let cache = &gateway_config.dataflow_cache;
    let catalog: Arc<dyn DataflowCatalog> = if cache.ttl_secs == 0 {
        tracing::info!("dataflow cache disabled");
        Arc::new(db)
    } else {
        Arc::new(CachedCatalog::new(
            db,
            cache.max_capacity,
            Duration::from_secs(cache.ttl_secs),
        ))
    };

    let state = AppState {
        config: gateway_config.clone(),
        templates,
        catalog,
        plot_service,
        statistics_api,
    };

    let shutdown = CancellationToken::new();
    shared::shutdown::cancel_on_signal(shutdown.clone());

    tracing::info!(
        host = %gateway_config.listener.host,
        port = gateway_config.listener.port,
        plot_service = %state.plot_service.base_url(),
        "starting visualiser"
    );
    gateway::run(state, shutdown).await?;
    Ok(())
}
