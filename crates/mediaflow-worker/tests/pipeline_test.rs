//! End-to-end runs of the pipeline against in-memory stores and a temp storage root.

use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;

use mediaflow_core::models::{AiStatus, MediaKind, ProcessingStatus, RetryPolicy};
use mediaflow_db::test_helpers::InMemoryStore;
use mediaflow_processing::test_helpers::{probe_json, ScriptedRunner};
use mediaflow_processing::video::VideoTranscoderOptions;
use mediaflow_processing::{ImageDerivativeOptions, VideoTranscoder};
use mediaflow_services::test_helpers::{
    InMemoryVectorIndex, ScriptedEmbeddingModel, ScriptedVisionModel,
};
use mediaflow_storage::keys::{hls_dir_key, placeholder_key, thumbnail_key, video_poster_key};
use mediaflow_storage::{LocalStorage, Storage};
use mediaflow_worker::{
    AiStage, AiStageConfig, EmbeddingStage, EmbeddingStageConfig, ImageJobHandler, IntakeService,
    JobOutcome, JobRunner, QueueBroker, StatusService, Upload, VideoJobHandler,
};
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    store: InMemoryStore,
    storage: Arc<LocalStorage>,
    runner: ScriptedRunner,
    intake: IntakeService,
}

impl Harness {
    async fn new(probe: Vec<u8>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let store = InMemoryStore::new();
        let runner = ScriptedRunner::with_probe(probe);
        let intake = IntakeService::new(
            Arc::new(store.clone()),
            storage.clone(),
            QueueBroker::new(Arc::new(store.clone()), RetryPolicy::default()),
            transcoder(&runner),
            600.0,
        );
        Self {
            _dir: dir,
            store,
            storage,
            runner,
            intake,
        }
    }

    fn image_runner(&self) -> JobRunner {
        JobRunner::new(
            Arc::new(self.store.clone()),
            Arc::new(ImageJobHandler::new(
                Arc::new(self.store.clone()),
                self.storage.clone(),
                ImageDerivativeOptions::default(),
            )),
            Duration::from_secs(30),
        )
    }

    fn video_runner(&self) -> JobRunner {
        JobRunner::new(
            Arc::new(self.store.clone()),
            Arc::new(VideoJobHandler::new(
                Arc::new(self.store.clone()),
                self.storage.clone(),
                transcoder(&self.runner),
            )),
            Duration::from_secs(30),
        )
    }
}

fn transcoder(runner: &ScriptedRunner) -> VideoTranscoder {
    VideoTranscoder::new(Arc::new(runner.clone()), VideoTranscoderOptions::default())
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([40, 90, 200, 255]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

#[tokio::test]
async fn test_image_upload_flows_through_every_stage() {
    let h = Harness::new(Vec::new()).await;
    let item = h
        .intake
        .submit(Upload {
            owner_id: "owner-1".to_string(),
            file_name: "harbour.png".to_string(),
            mime_type: "image/png".to_string(),
            data: png(1200, 600),
        })
        .await
        .unwrap();

    // The AI stage picks up items while they are still queued.
    let vision = ScriptedVisionModel::answering(
        r#"{"desc": "A blue square", "tags": ["blue", "square"]}"#,
    );
    let ai = AiStage::new(
        Arc::new(h.store.clone()),
        h.storage.clone(),
        Arc::new(vision),
        AiStageConfig::default(),
    );
    let report = ai.run_batch().await.unwrap();
    assert_eq!(report.completed, 1);

    assert_eq!(
        h.image_runner().run_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );

    let index = InMemoryVectorIndex::new();
    let embedding = EmbeddingStage::new(
        Arc::new(h.store.clone()),
        Arc::new(ScriptedEmbeddingModel::new(768)),
        Arc::new(index.clone()),
        EmbeddingStageConfig::default(),
    );
    assert_eq!(embedding.run_batch().await.unwrap().completed, 1);

    let status = StatusService::new(Arc::new(h.store.clone()), Arc::new(h.store.clone()))
        .get(item.id)
        .await
        .unwrap();
    assert_eq!(status.item.processing_status, ProcessingStatus::Completed);
    assert_eq!(status.item.thumbnail_path, Some(thumbnail_key(item.id)));
    assert_eq!(status.item.placeholder_path, Some(placeholder_key(item.id)));
    assert!(h.storage.exists(&thumbnail_key(item.id)).await.unwrap());

    let enrichment = status.enrichment.unwrap();
    assert_eq!(enrichment.status, AiStatus::Completed);
    assert_eq!(enrichment.embedding_status, AiStatus::Completed);
    assert_eq!(enrichment.embedding_attempts, 0);
    let point = index.point(enrichment.id).unwrap();
    assert_eq!(point.payload["media_type"], "image");
}

#[tokio::test]
async fn test_rotated_video_produces_three_variants_and_poster() {
    let h = Harness::new(probe_json(30.0, Some(90), true)).await;
    let item = h
        .intake
        .submit(Upload {
            owner_id: "owner-1".to_string(),
            file_name: "clip.mp4".to_string(),
            mime_type: "video/mp4".to_string(),
            data: b"not really an mp4".to_vec(),
        })
        .await
        .unwrap();
    assert_eq!(item.media_type, MediaKind::Video);

    assert_eq!(
        h.video_runner().run_next().await.unwrap(),
        Some(JobOutcome::Completed)
    );

    let item = h.store.media(item.id).unwrap();
    assert_eq!(item.processing_status, ProcessingStatus::Completed);
    assert_eq!(item.hls_dir, Some(hls_dir_key(item.id)));
    assert_eq!(item.video_thumb_path, Some(video_poster_key(item.id)));

    let hls_root = h.storage.base_path().join(hls_dir_key(item.id));
    for variant in ["v0", "v1", "v2"] {
        assert!(hls_root.join(variant).is_dir());
    }

    // ffprobe at intake, then ffprobe, poster and HLS in the worker.
    let calls = h.runner.calls();
    assert_eq!(calls.len(), 4);
    let poster = &calls[2].1;
    let at = poster.iter().position(|a| a == "-ss").unwrap();
    assert_eq!(poster[at + 1], "1.500");
    assert!(poster.last().unwrap().ends_with("thumb.jpg"));

    let hls = &calls[3].1;
    let filter = hls
        .iter()
        .position(|a| a == "-filter_complex")
        .map(|i| hls[i + 1].clone())
        .unwrap();
    assert_eq!(filter.matches("transpose=1").count(), 3);
    for size in ["scale=640:360", "scale=1280:720", "scale=1920:1080"] {
        assert!(filter.contains(size), "{size} missing from {filter}");
    }
    assert!(hls.contains(&"master.m3u8".to_string()));

    // Video is never enriched.
    let ai = AiStage::new(
        Arc::new(h.store.clone()),
        h.storage.clone(),
        Arc::new(ScriptedVisionModel::answering(r#"{"desc": "x", "tags": []}"#)),
        AiStageConfig::default(),
    );
    assert_eq!(ai.run_batch().await.unwrap().claimed, 0);
    assert!(h.store.enrichment_for(item.id).is_none());
}
