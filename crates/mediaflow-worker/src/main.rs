use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use mediaflow_core::models::MediaKind;
use mediaflow_core::Config;
use mediaflow_db::{EnrichmentRepository, JobRepository, MediaRepository};
use mediaflow_infra::{init_telemetry, LogFormat};
use mediaflow_processing::video::VideoTranscoderOptions;
use mediaflow_processing::{ImageDerivativeOptions, SystemCommandRunner, VideoTranscoder};
use mediaflow_services::{OllamaClient, QdrantIndex, VectorIndex};
use mediaflow_storage::{LocalStorage, Storage};
use mediaflow_worker::{
    AiStage, AiStageConfig, EmbeddingStage, EmbeddingStageConfig, ImageJobHandler, JobRunner,
    MediaJobHandler, Scheduler, VideoJobHandler, WorkerPool, WorkerPoolConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_telemetry(LogFormat::from_env()).context("Failed to initialize telemetry")?;
    config.validate().context("Configuration validation failed")?;
    tracing::info!(environment = %config.environment, "Configuration loaded and validated successfully");

    let pool = mediaflow_db::connect(&config).await?;
    let media = Arc::new(MediaRepository::new(pool.clone()));
    let enrichments = Arc::new(EnrichmentRepository::new(pool.clone()));
    let jobs = Arc::new(JobRepository::new(pool.clone()));

    let storage: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(&config.storage_root)
            .await
            .context("Failed to initialize storage")?,
    );

    let ollama = Arc::new(OllamaClient::from_config(&config)?);
    let qdrant = Arc::new(QdrantIndex::from_config(&config)?);
    qdrant
        .ensure_collection()
        .await
        .context("Failed to prepare vector collection")?;

    let image_handler: Arc<dyn MediaJobHandler> = Arc::new(ImageJobHandler::new(
        media.clone(),
        storage.clone(),
        ImageDerivativeOptions::from_config(&config),
    ));
    let video_timeout = Duration::from_secs(config.video_job_timeout_secs);
    let video_handler: Arc<dyn MediaJobHandler> = Arc::new(VideoJobHandler::new(
        media.clone(),
        storage.clone(),
        VideoTranscoder::new(
            Arc::new(SystemCommandRunner::new(video_timeout)),
            VideoTranscoderOptions::from_config(&config),
        ),
    ));

    let mut pools = Vec::new();
    for (kind, handler) in [(MediaKind::Image, image_handler), (MediaKind::Video, video_handler)] {
        let pool_config = WorkerPoolConfig::for_kind(&config, kind);
        let runner = JobRunner::new(jobs.clone(), handler, pool_config.job_timeout);
        pools.push(WorkerPool::start(runner, pool_config, Some(pool.clone())));
    }

    let ai = Arc::new(AiStage::new(
        enrichments.clone(),
        storage.clone(),
        ollama.clone(),
        AiStageConfig::from_config(&config),
    ));
    let embedding = Arc::new(EmbeddingStage::new(
        enrichments,
        ollama,
        qdrant,
        EmbeddingStageConfig::from_config(&config),
    ));
    let scheduler =
        Scheduler::for_stages(ai, embedding, config.cron_interval(), config.embedding_stagger());

    shutdown_signal().await?;

    scheduler.shutdown();
    for worker_pool in &pools {
        worker_pool.shutdown().await;
    }
    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
