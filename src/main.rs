use anyhow::Result;
use log::{error, info, warn};
use plate_tracker::api::rest::RestApi;
use plate_tracker::config;
use plate_tracker::db::{DatabaseService, PlateStore};
use plate_tracker::recorder::VideoCaptureManager;
use plate_tracker::registry;
use plate_tracker::sensor::HomeAssistantSensor;
use plate_tracker::services::{DetectionIngestor, IngestSettings, PollingLoop};
use plate_tracker::PlateNormalizer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// First CLI argument, else `PLATE_TRACKER_CONFIG`
fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("PLATE_TRACKER_CONFIG"))
        .map(PathBuf::from)
}

async fn run_app() -> Result<()> {
    let config = config::load_config(config_path().as_deref())?;

    // RUST_LOG still wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting plate tracker v{}", env!("CARGO_PKG_VERSION"));

    let database = DatabaseService::new(&config.database).await?;
    let store: Arc<dyn PlateStore> = Arc::new(database.plates());

    let registry = registry::from_config(&config.registry)?;
    let video = VideoCaptureManager::from_config(&config.video)?;
    if config.video.capture_enabled && !video.has_source() {
        warn!("Clip capture is enabled but no camera is configured");
    }

    let ingestor = Arc::new(DetectionIngestor::new(
        PlateNormalizer::new(&config.ingest.plate),
        store.clone(),
        registry,
        video,
        IngestSettings::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();

    if config.sensor.enabled {
        let sensor = Arc::new(HomeAssistantSensor::new(&config.sensor)?);
        let poller = PollingLoop::new(sensor, ingestor.clone(), config.sensor.poll_interval());
        tasks.spawn(poller.run(shutdown.clone()));
    } else {
        info!("Sensor polling disabled; accepting pushed detections only");
    }

    let api = RestApi::new(&config.api, ingestor, store, tasks.clone());
    let mut server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { api.run(shutdown).await })
    };

    let server_done = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
            false
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => error!("API server failed: {:#}", e),
                Err(e) => error!("API server task failed: {}", e),
            }
            true
        }
    };

    shutdown.cancel();
    if !server_done {
        if let Ok(Err(e)) = server.await {
            error!("API server failed during shutdown: {:#}", e);
        }
    }

    // let in-flight ingestions commit or roll back
    tasks.close();
    tasks.wait().await;
    info!("All ingestions finished");

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
