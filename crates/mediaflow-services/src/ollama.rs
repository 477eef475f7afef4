//! Ollama HTTP client for vision description and text embeddings.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::traits::{EmbeddingModel, VisionModel};

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    vision_model: String,
    embedding_model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    think: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    /// `timeout` bounds every request end to end.
    pub fn new(
        base_url: String,
        vision_model: String,
        embedding_model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            vision_model,
            embedding_model,
            client,
        })
    }

    pub fn from_config(config: &mediaflow_core::Config) -> Result<Self> {
        Self::new(
            config.ollama_url.clone(),
            config.vision_model.clone(),
            config.embedding_model.clone(),
            config.model_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send Ollama request to {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Ollama {} failed with status {}: {}",
                path,
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Ollama {} response", path))
    }
}

#[async_trait]
impl VisionModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.vision_model
    }

    #[tracing::instrument(skip(self, prompt, image), fields(model = %self.vision_model, image_bytes = image.len()))]
    async fn describe_image(&self, prompt: &str, image: &[u8]) -> Result<String> {
        let body = GenerateRequest {
            model: &self.vision_model,
            prompt,
            images: vec![STANDARD.encode(image)],
            stream: false,
            think: false,
        };
        let parsed: GenerateResponse = self.post("/api/generate", &body).await?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl EmbeddingModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    #[tracing::instrument(skip(self, text), fields(model = %self.embedding_model))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbedRequest {
            model: &self.embedding_model,
            input: text,
        };
        let parsed: EmbedResponse = self.post("/api/embed", &body).await?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Ollama returned no embeddings"))
    }
}
