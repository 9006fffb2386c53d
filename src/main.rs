use anyhow::{Context, Result};
use axum::Router;
use capture_sync::{
    config::{AppConfig, RunMode},
    routes,
    services::{
        local_blobstore::LocalBlobStore,
        record_store::SqliteRecordStore,
        sync_engine::SyncEngine,
        upload_driver::SyncState,
        uploader::{MultipartUploader, Uploader},
    },
    state::AppState,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting capture-sync with config: {:?}", cfg);

    // --- Ensure directories exist ---
    for dir in [Path::new(&cfg.blob_dir), cfg.sync.data_dir.as_path()] {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory {}", dir.display());
        }
    }

    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // --- Open record store (applies the schema) ---
    let store = SqliteRecordStore::open(&cfg.database_url)
        .await
        .with_context(|| format!("opening database `{}`", cfg.database_url))?;

    if mode == RunMode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let db = store.db.clone();
    let blobstore = Arc::new(LocalBlobStore::new(&cfg.blob_dir));
    let engine = Arc::new(SyncEngine::new(
        Arc::new(store),
        blobstore.clone(),
        cfg.sync.clone(),
    ));
    let uploader: Arc<dyn Uploader> =
        Arc::new(MultipartUploader::new(blobstore.clone(), &cfg.sync));
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal_token.cancel();
        }
    });

    if mode == RunMode::SyncOnce {
        return sync_once(&engine, &*uploader, &shutdown).await;
    }

    // --- Build router ---
    let state = AppState {
        engine,
        uploader,
        db,
        blobstore,
        shutdown: shutdown.clone(),
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Run one sync pass, logging progress as it goes.
async fn sync_once(
    engine: &SyncEngine,
    uploader: &dyn Uploader,
    cancel: &CancellationToken,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let logger = tokio::spawn(async move {
        while let Some(state) = rx.recv().await {
            match state {
                SyncState::Started { total_requests } => {
                    tracing::info!(total_requests, "sync started")
                }
                SyncState::InProgress {
                    request_id,
                    bytes_uploaded,
                    file_size,
                } => tracing::debug!(%request_id, bytes_uploaded, file_size, "upload progress"),
                SyncState::Failed { request_id, error } => {
                    tracing::warn!(%request_id, %error, "upload failed")
                }
                SyncState::Completed { report } => {
                    tracing::info!(processed = report.processed(), "sync completed")
                }
                SyncState::NoOp => tracing::info!("nothing to upload"),
            }
        }
    });

    let report = engine.sync_upload(uploader, cancel, Some(&tx)).await?;
    drop(tx);
    let _ = logger.await;

    if !report.failed.is_empty() {
        tracing::warn!(failed = ?report.failed, "some uploads failed");
    }
    Ok(())
}
