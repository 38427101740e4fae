use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use metrics_exporter_prometheus::PrometheusBuilder;
use rand::RngCore;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod api;
mod config;
mod db;
mod error;
mod ingestion;
mod service;
mod storage;

use crate::config::{RuntimeConfig, load_static_config};
use crate::db::Database;
use crate::ingestion::{FormatExtractor, OcrStage, PdfiumRasterizer, TesseractCli};
use crate::service::{DocVaultService, NoopStageHook, WorkQueue};
use crate::storage::{FilesystemStore, UrlSigner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting DocVault service v{}", env!("CARGO_PKG_VERSION"));

    // Load static configuration (server binding, storage path, workers)
    // We need to load this first to know where the database is
    let static_config = load_static_config()?;

    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        data_dir = %static_config.storage.data_dir.display(),
        "Static configuration loaded"
    );

    // Ensure data directory exists
    std::fs::create_dir_all(&static_config.storage.data_dir)?;

    let signing_secret = if static_config.storage.signing_secret.is_empty() {
        warn!("No storage.signing_secret configured; download URLs will not survive a restart");
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        URL_SAFE_NO_PAD.encode(secret)
    } else {
        static_config.storage.signing_secret.clone()
    };
    let signer = UrlSigner::new(
        signing_secret.as_bytes(),
        &static_config.storage.public_base_url,
    )?;

    // Initialize database
    let db_path = static_config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    // Load runtime config (static + dynamic with DB overrides)
    let runtime_config = Arc::new(RuntimeConfig::load(static_config, &db)?);
    info!("Runtime configuration loaded with DB settings");

    // Object store; fail fast if the directory is not writable
    let objects_dir = runtime_config.static_config.storage.objects_dir();
    let store = FilesystemStore::new(objects_dir.clone(), signer.clone());
    store.validate().await?;
    info!(path = %objects_dir.display(), "Object store ready");

    // Extraction and OCR collaborators
    let tesseract = TesseractCli::new(runtime_config.static_config.ocr.tesseract_cmd.clone());
    if !tesseract.is_available() {
        warn!(
            command = %tesseract.command(),
            "Tesseract not available; OCR will produce no text"
        );
    }
    if let Err(e) = ingestion::pdf::create_pdfium() {
        warn!(error = %e, "Pdfium not available; PDF text and OCR will be skipped");
    }
    let ocr = Arc::new(OcrStage::new(Arc::new(tesseract), Arc::new(PdfiumRasterizer)));

    // Prometheus recorder backing GET /metrics
    let metrics = PrometheusBuilder::new().install_recorder()?;

    // Initialize the service
    let (queue, receiver) = WorkQueue::new(runtime_config.static_config.worker.queue_capacity);
    let service = Arc::new(DocVaultService::new(
        db,
        runtime_config.clone(),
        Arc::new(store),
        Arc::new(FormatExtractor),
        ocr,
        Arc::new(NoopStageHook),
        queue,
    ));

    // Start the workers before the sweep so re-enqueueing cannot fill the
    // queue with nobody draining it
    DocVaultService::start_worker_pool(service.clone(), receiver);

    let report = service.recover_interrupted().await?;
    if report.interrupted > 0 || !report.requeued.is_empty() {
        info!(
            interrupted = report.interrupted,
            requeued = report.requeued.len(),
            "Recovered documents from previous run"
        );
    }

    // Build the router
    let app = api::router(service.clone(), signer, metrics);

    // Start the server
    let addr = format!(
        "{}:{}",
        runtime_config.static_config.server.host, runtime_config.static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docvault_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
