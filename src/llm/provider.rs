// src/llm/provider.rs
// Generic LLM provider used for query expansion, summarization and the
// reranker's JSON-array fallback. Callers depend only on the trait; which
// concrete HTTP backend answers it is a deployment detail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub model: String,
    pub tokens: TokenUsage,
}

/// Universal LLM provider interface. Implementations must never propagate
/// transient HTTP failures as panics — callers (query expansion, the
/// reranker fallback, summarization) decide how to degrade.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat(&self, messages: Vec<Message>, system: String) -> anyhow::Result<Response>;
}

/// OpenAI-compatible chat-completions HTTP client. Works against any
/// provider exposing the same wire format (OpenAI, DeepSeek, local vLLM).
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build reqwest client"),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn name(&self) -> &'static str {
        "http_chat_completions"
    }

    async fn chat(&self, messages: Vec<Message>, system: String) -> anyhow::Result<Response> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            wire_messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &messages {
            wire_messages.push(serde_json::json!({"role": m.role, "content": m.content}));
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": wire_messages,
            }))
            .send()
            .await?;

        let json: serde_json::Value = resp.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("LLM response missing content"))?
            .to_string();

        let tokens = TokenUsage {
            prompt_tokens: json["usage"]["prompt_tokens"].as_i64().unwrap_or(0),
            completion_tokens: json["usage"]["completion_tokens"].as_i64().unwrap_or(0),
        };

        Ok(Response {
            content,
            model: self.model.clone(),
            tokens,
        })
    }
}
