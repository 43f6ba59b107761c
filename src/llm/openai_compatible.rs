use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CompletionOptions, Embedder, LlmClient, Message};
use crate::config::LlmConfig;

/// Client for any provider speaking `/chat/completions`. Temperature and the
/// web search hint are chosen per call.
pub struct OpenAICompatibleClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search_options: Option<WebSearchOptions<'a>>,
}

#[derive(Serialize)]
struct WebSearchOptions<'a> {
    search_context_size: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAICompatibleClient {
    pub fn new(config: &LlmConfig, base_url: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAICompatibleClient {
    async fn complete(
        &self,
        messages: Vec<Message>,
        options: &CompletionOptions,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: options.temperature,
            web_search_options: options
                .web_search_context_size
                .as_deref()
                .map(|size| WebSearchOptions {
                    search_context_size: size,
                }),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to call {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error ({}): {}", status, body);
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Empty response from LLM"))
    }
}

/// `/embeddings` on the same family of providers.
pub struct OpenAICompatibleEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAICompatibleEmbedder {
    pub fn new(base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAICompatibleEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .with_context(|| format!("Failed to call {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        into_vectors(body, texts.len())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Put vectors back in input order and check none went missing.
fn into_vectors(mut body: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if body.data.len() != expected {
        anyhow::bail!(
            "Embedding API returned {} vectors for {expected} inputs",
            body.data.len()
        );
    }
    body.data.sort_by_key(|d| d.index);
    Ok(body.data.into_iter().map(|d| d.embedding).collect())
}
