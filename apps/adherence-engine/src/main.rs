use adherence_engine::alerts::TracingAlertSink;
use adherence_engine::cli::{Cli, Commands};
use adherence_engine::config::Config;
use adherence_engine::scheduler::BatchDetectionService;
use adherence_engine::service::AdherenceService;
use adherence_engine::source::{read_log_file, JsonDirLogSource, LogSource};
use adherence_engine::store::{open_backend, BaselineStore};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,adherence_engine=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_logs(path: &Path) -> Result<Vec<adherence_engine::DoseEvent>> {
    read_log_file(path).map_err(|reason| anyhow!(reason))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    init_tracing()?;

    if let Some(store) = cli.store {
        config.store = store;
    }
    if let Some(data_dir) = cli.data_dir {
        if std::env::var_os("ADHERENCE_LOGS_DIR").is_none() {
            config.logs_dir = data_dir.join("logs");
        }
        config.data_dir = data_dir;
    }

    let backend = open_backend(config.store, &config.data_dir)
        .with_context(|| format!("failed to open {:?} store at {}", config.store, config.data_dir.display()))?;
    let store = Arc::new(BaselineStore::from_boxed(backend));
    let service = Arc::new(AdherenceService::new(
        store,
        Arc::new(TracingAlertSink),
        config.policy(),
    ));
    let source: Arc<dyn LogSource> = Arc::new(JsonDirLogSource::new(config.logs_dir.clone()));
    let now = Utc::now().naive_utc();

    match cli.command {
        Commands::Train(args) => {
            let sensitivity = args.sensitivity.as_deref();
            let summary = match args.logs {
                Some(path) => service.train(args.patient, &load_logs(&path)?, sensitivity)?,
                None => service.train_from_source(args.patient, source.as_ref(), sensitivity, now)?,
            };
            print_json(&summary)?;
        }
        Commands::Detect(args) => {
            let result = match args.logs {
                Some(path) => service.detect(args.patient, &load_logs(&path)?)?,
                None => service.detect_from_source(args.patient, source.as_ref(), now)?,
            };
            print_json(&result)?;
        }
        Commands::History(args) => print_json(&service.history(args.patient)?)?,
        Commands::Configure(args) => {
            print_json(&service.configure(args.patient, &args.sensitivity)?)?
        }
        Commands::Batch => print_json(&service.batch_detect(source.as_ref(), now)?)?,
        Commands::Run => {
            let cancel = CancellationToken::new();
            tracing::info!(
                store = ?config.store,
                data_dir = %config.data_dir.display(),
                logs_dir = %config.logs_dir.display(),
                interval_seconds = config.batch_interval.as_secs(),
                "adherence-engine batch service starting"
            );
            let handle = BatchDetectionService::new(service, source, config.batch_interval)
                .start(cancel.clone());
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown signal received");
            cancel.cancel();
            handle.await?;
        }
    }

    Ok(())
}
