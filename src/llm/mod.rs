pub mod openai_compatible;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{FactsConfig, LlmConfig};

// --- Message ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// --- Per-request knobs ---

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f64,
    /// Providers that support web search use this as `search_context_size`.
    pub web_search_context_size: Option<String>,
}

impl CompletionOptions {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            web_search_context_size: config.web_search_context_size.clone(),
        }
    }

    /// Low-temperature, no-search options for structured extraction.
    pub fn precise() -> Self {
        Self {
            temperature: 0.1,
            web_search_context_size: None,
        }
    }
}

// --- LLM Client trait ---

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: Vec<Message>, options: &CompletionOptions)
    -> Result<String>;
}

/// Turns text into vectors for similarity search. One vector per input, in
/// input order.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    /// Identifies the vector space; stored vectors from another model are stale.
    fn model(&self) -> &str;
}

// --- Factory ---

pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let api_key = config
        .api_key
        .clone()
        .context("No LLM API key: set [llm] api_key or MONARCH_LLM_API_KEY")?;
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| default_base_url(&config.provider).to_string());
    Ok(Arc::new(openai_compatible::OpenAICompatibleClient::new(
        config, &base_url, api_key,
    )?))
}

/// Embeddings reuse the chat provider's endpoint and key unless `[facts]`
/// names its own.
pub fn create_embedder(facts: &FactsConfig, llm: &LlmConfig) -> Result<Arc<dyn Embedder>> {
    let api_key = facts
        .embedding_api_key
        .clone()
        .or_else(|| llm.api_key.clone())
        .context("No embedding API key: set [facts] embedding_api_key or [llm] api_key")?;
    let base_url = match (&facts.embedding_base_url, &facts.embedding_provider) {
        (Some(url), _) => url.clone(),
        (None, Some(provider)) => default_base_url(provider).to_string(),
        (None, None) => llm
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(&llm.provider).to_string()),
    };
    Ok(Arc::new(openai_compatible::OpenAICompatibleEmbedder::new(
        &base_url,
        api_key,
        &facts.embedding_model,
    )))
}

fn default_base_url(provider: &str) -> &str {
    match provider {
        "openai" => "https://api.openai.com/v1",
        "minimax" => "https://api.minimaxi.chat/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        _ => "https://api.openai.com/v1",
    }
}
