//! Ollama HTTP backend
//!
//! Uses the blocking ureq agent like the rest of the engine's remote calls.
//! Generation is requested non-streaming so one response carries the text.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ureq::Agent;

use super::{AiError, EmbeddingProvider, TextGenerator, normalize};
use crate::config::OllamaConfig;

// -- Ollama API wire types --

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

#[derive(Serialize)]
struct GenRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenOptions,
}

#[derive(Serialize)]
struct GenOptions {
    temperature: f64,
}

#[derive(Deserialize)]
struct GenResponse {
    response: Option<String>,
}

/// Connection to one Ollama server
#[derive(Clone)]
pub struct OllamaClient {
    agent: Agent,
    base_url: String,
}

impl OllamaClient {
    pub fn new(url: &str, timeout_secs: u64) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .build()
            .into();
        Self {
            agent,
            base_url: url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &OllamaConfig) -> Self {
        Self::new(&config.url, config.timeout_secs)
    }

    fn post<B, T>(&self, path: &str, body: &B) -> Result<T, AiError>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut response = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|e| AiError::Unavailable {
                message: format!("{}: {}", url, e),
            })?;
        response
            .body_mut()
            .read_json()
            .map_err(|e| AiError::InvalidResponse {
                message: format!("{}: {}", url, e),
            })
    }
}

/// Embeddings from `/api/embeddings`
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        let response: EmbeddingResponse = self.client.post(
            "/api/embeddings",
            &EmbeddingRequest {
                model: &self.model,
                prompt: text,
            },
        )?;

        match response.embedding {
            Some(embedding) if !embedding.is_empty() => Ok(normalize(embedding)),
            _ => Err(AiError::InvalidResponse {
                message: "empty embedding".to_string(),
            }),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Completions from `/api/generate`
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
}

impl OllamaGenerator {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl TextGenerator for OllamaGenerator {
    fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let response: GenResponse = self.client.post(
            "/api/generate",
            &GenRequest {
                model: &self.model,
                prompt,
                stream: false,
                options: GenOptions { temperature: 0.2 },
            },
        )?;

        response.response.ok_or_else(|| AiError::InvalidResponse {
            message: "missing response field".to_string(),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
