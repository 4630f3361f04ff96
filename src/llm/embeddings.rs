// src/llm/embeddings.rs
// Embedding client used for dense search queries and semantic cache keys.

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
}

/// OpenAI-compatible `/embeddings` HTTP client.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbeddingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build reqwest client"),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        }
    }

    fn parse_embedding(value: &serde_json::Value) -> anyhow::Result<Vec<f32>> {
        value
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("invalid embedding response"))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow::anyhow!("embedding value was not a number"))
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
                "dimensions": self.dimensions,
            }))
            .send()
            .await?;

        let json: serde_json::Value = response.json().await?;
        Self::parse_embedding(&json["data"][0]["embedding"])
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
                "dimensions": self.dimensions,
            }))
            .send()
            .await?;

        let json: serde_json::Value = response.json().await?;
        let items = json["data"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("invalid embedding response"))?;

        items
            .iter()
            .map(|item| Self::parse_embedding(&item["embedding"]))
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
