//! Failure paths across the worker pool, the AI stages and intake.

use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use mediaflow_core::models::{AiStatus, JobStatus, MediaKind, ProcessingStatus, RetryPolicy};
use mediaflow_db::test_helpers::InMemoryStore;
use mediaflow_db::{JobStore, MediaStore, STALE_JOB_ERROR};
use mediaflow_processing::test_helpers::ScriptedRunner;
use mediaflow_processing::video::VideoTranscoderOptions;
use mediaflow_processing::{ImageDerivativeOptions, VideoTranscoder};
use mediaflow_services::test_helpers::{
    InMemoryVectorIndex, ScriptedEmbeddingModel, ScriptedVisionModel,
};
use mediaflow_storage::{LocalStorage, Storage};
use mediaflow_worker::{
    AiStage, AiStageConfig, EmbeddingStage, EmbeddingStageConfig, ImageJobHandler, IntakeService,
    JobOutcome, JobRunner, QueueBroker, Upload,
};
use tempfile::TempDir;

const VALID_ANSWER: &str = r#"{"desc": "A quiet harbour at dusk", "tags": ["harbour", "dusk"]}"#;

async fn setup() -> (TempDir, InMemoryStore, Arc<LocalStorage>, IntakeService) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
    let store = InMemoryStore::new();
    let intake = IntakeService::new(
        Arc::new(store.clone()),
        storage.clone(),
        QueueBroker::new(Arc::new(store.clone()), RetryPolicy::default()),
        VideoTranscoder::new(
            Arc::new(ScriptedRunner::default()),
            VideoTranscoderOptions::default(),
        ),
        600.0,
    );
    (dir, store, storage, intake)
}

fn png_upload(data: Vec<u8>) -> Upload {
    Upload {
        owner_id: "owner-1".to_string(),
        file_name: "harbour.png".to_string(),
        mime_type: "image/png".to_string(),
        data,
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 120, 30, 255]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

fn ai_stage(store: &InMemoryStore, storage: &Arc<LocalStorage>, model: ScriptedVisionModel) -> AiStage {
    AiStage::new(
        Arc::new(store.clone()),
        storage.clone(),
        Arc::new(model),
        AiStageConfig::default(),
    )
}

#[tokio::test]
async fn test_corrupt_image_fails_after_three_attempts() {
    let (_dir, store, storage, intake) = setup().await;
    let item = intake
        .submit(png_upload(b"definitely not a png".to_vec()))
        .await
        .unwrap();

    let runner = JobRunner::new(
        Arc::new(store.clone()),
        Arc::new(ImageJobHandler::new(
            Arc::new(store.clone()),
            storage.clone(),
            ImageDerivativeOptions::default(),
        )),
        Duration::from_secs(30),
    );
    let job_id = store.jobs_on(MediaKind::Image.queue_name())[0].id;

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(runner.run_next().await.unwrap());
        store.make_job_due(job_id);
    }
    assert_eq!(
        outcomes,
        vec![
            Some(JobOutcome::Retrying { delay: Duration::from_millis(3000) }),
            Some(JobOutcome::Retrying { delay: Duration::from_millis(6000) }),
            Some(JobOutcome::Failed),
        ]
    );
    // Nothing left to claim once the job is terminal.
    assert_eq!(runner.run_next().await.unwrap(), None);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.attempts_made, 3);
    assert_eq!(job.status, JobStatus::Failed);

    let item = store.media(item.id).unwrap();
    assert_eq!(item.processing_status, ProcessingStatus::Failed);
    assert!(item.error_message.is_some_and(|m| !m.is_empty()));
    assert!(item.thumbnail_path.is_none());
}

#[tokio::test]
async fn test_stale_job_on_last_attempt_fails_its_media_item() {
    let (_dir, store, storage, intake) = setup().await;
    let item = intake
        .submit(png_upload(b"definitely not a png".to_vec()))
        .await
        .unwrap();
    let runner = JobRunner::new(
        Arc::new(store.clone()),
        Arc::new(ImageJobHandler::new(
            Arc::new(store.clone()),
            storage.clone(),
            ImageDerivativeOptions::default(),
        )),
        Duration::from_secs(30),
    );
    let queue = MediaKind::Image.queue_name();
    let job_id = store.jobs_on(queue)[0].id;
    for _ in 0..2 {
        runner.run_next().await.unwrap();
        store.make_job_due(job_id);
    }

    // Third attempt: the worker picks the job up, then the process dies.
    let job = store.claim_next(queue).await.unwrap().unwrap();
    assert_eq!(job.attempts_made, 3);
    assert!(store.mark_processing(item.id).await.unwrap());
    store.backdate_job_lock(job_id, Duration::from_secs(2 * 3600));

    let reaped = runner.reap_stale(Duration::from_secs(60)).await.unwrap();
    assert_eq!(reaped.exhausted.len(), 1);

    let job = store.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts_made, 3);
    let item = store.media(item.id).unwrap();
    assert_eq!(item.processing_status, ProcessingStatus::Failed);
    assert_eq!(item.error_message.as_deref(), Some(STALE_JOB_ERROR));
}

#[tokio::test]
async fn test_malformed_model_output_is_retried_on_the_next_tick() {
    let (_dir, store, storage, intake) = setup().await;
    let item = intake.submit(png_upload(png(64, 64))).await.unwrap();

    let model = ScriptedVisionModel::answering(VALID_ANSWER)
        .then_answer("```json\n{\"desc\": \"fenced\", \"tags\": []}\n```");
    let stage = ai_stage(&store, &storage, model.clone());

    let first = stage.run_batch().await.unwrap();
    assert_eq!((first.claimed, first.failed), (1, 1));
    let row = store.enrichment_for(item.id).unwrap();
    assert_eq!(row.status, AiStatus::Failed);
    assert_eq!(row.attempts, 1);
    assert!(row.error.is_some());
    assert!(row.description.is_none());

    let second = stage.run_batch().await.unwrap();
    assert_eq!((second.claimed, second.completed), (1, 1));
    let row = store.enrichment_for(item.id).unwrap();
    assert_eq!(row.status, AiStatus::Completed);
    assert_eq!(row.description.as_deref(), Some("A quiet harbour at dusk"));
    assert_eq!(row.attempts, 1);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_embedding_succeeds_on_third_attempt() {
    let (_dir, store, storage, intake) = setup().await;
    let item = intake.submit(png_upload(png(64, 64))).await.unwrap();
    ai_stage(&store, &storage, ScriptedVisionModel::answering(VALID_ANSWER))
        .run_batch()
        .await
        .unwrap();

    let model = ScriptedEmbeddingModel::failing_first(768, 2);
    let index = InMemoryVectorIndex::new();
    let stage = EmbeddingStage::new(
        Arc::new(store.clone()),
        Arc::new(model.clone()),
        Arc::new(index.clone()),
        EmbeddingStageConfig::default(),
    );

    for expected_attempts in 1..=2 {
        let report = stage.run_batch().await.unwrap();
        assert_eq!(report.failed, 1);
        let row = store.enrichment_for(item.id).unwrap();
        assert_eq!(row.embedding_status, AiStatus::Failed);
        assert_eq!(row.embedding_attempts, expected_attempts);
        assert!(index.is_empty());
    }

    let report = stage.run_batch().await.unwrap();
    assert_eq!(report.completed, 1);

    let row = store.enrichment_for(item.id).unwrap();
    assert_eq!(row.embedding_status, AiStatus::Completed);
    assert_eq!(row.embedding_attempts, 2);
    assert!(row.embedding_completed_at.is_some());
    let point = index.point(row.id).unwrap();
    assert_eq!(point.vector.len(), 768);
    assert_eq!(point.payload["description"], "A quiet harbour at dusk");
    assert_eq!(model.calls(), 3);

    // A completed row is never embedded again.
    assert_eq!(stage.run_batch().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn test_failed_enqueue_rolls_the_upload_back() {
    let (_dir, store, storage, intake) = setup().await;
    store.set_fail_enqueue(true);

    let err = intake.submit(png_upload(png(32, 32))).await.unwrap_err();
    assert!(!err.is_client_error());

    let items = store.all_media();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.processing_status, ProcessingStatus::Failed);
    assert!(item
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("enqueue")));
    assert!(!storage.exists(&item.file_path).await.unwrap());
    assert!(store.jobs_on(MediaKind::Image.queue_name()).is_empty());
}
