//! Scripted models and an in-memory vector index for testing

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::traits::{EmbeddingModel, VectorIndex, VectorPoint, VisionModel};

/// Vision model that replays queued answers; once the queue is empty it returns
/// `fallback`.
#[derive(Clone, Default)]
pub struct ScriptedVisionModel {
    answers: Arc<Mutex<VecDeque<Result<String, String>>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedVisionModel {
    pub fn answering(output: &str) -> Self {
        Self {
            fallback: Some(output.to_string()),
            ..Default::default()
        }
    }

    /// Queue a raw model output.
    pub fn then_answer(self, output: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .push_back(Ok(output.to_string()));
        self
    }

    /// Queue a transport-level failure.
    pub fn then_fail(self, message: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    /// Sleep before answering, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl VisionModel for ScriptedVisionModel {
    fn model_name(&self) -> &str {
        "scripted-vision"
    }

    async fn describe_image(&self, _prompt: &str, _image: &[u8]) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.answers.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow!(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("no scripted answer left")),
        }
    }
}

/// Embedding model that fails a fixed number of times, then returns constant vectors.
#[derive(Clone)]
pub struct ScriptedEmbeddingModel {
    dimension: usize,
    failures_left: Arc<Mutex<u32>>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self::failing_first(dimension, 0)
    }

    pub fn failing_first(dimension: usize, failures: u32) -> Self {
        Self {
            dimension,
            failures_left: Arc::new(Mutex::new(failures)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EmbeddingModel for ScriptedEmbeddingModel {
    fn model_name(&self) -> &str {
        "scripted-embedding"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        *self.calls.lock().unwrap() += 1;
        let mut failures_left = self.failures_left.lock().unwrap();
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(anyhow!("embedding backend unavailable"));
        }
        Ok(vec![0.25; self.dimension])
    }
}

#[derive(Clone, Default)]
pub struct InMemoryVectorIndex {
    points: Arc<Mutex<HashMap<Uuid, VectorPoint>>>,
    collection_ready: Arc<Mutex<bool>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point(&self, id: Uuid) -> Option<VectorPoint> {
        self.points.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.points.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collection_ready(&self) -> bool {
        *self.collection_ready.lock().unwrap()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self) -> Result<()> {
        *self.collection_ready.lock().unwrap() = true;
        Ok(())
    }

    async fn upsert(&self, point: VectorPoint) -> Result<()> {
        self.points.lock().unwrap().insert(point.id, point);
        Ok(())
    }
}
