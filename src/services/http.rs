use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::ServiceArgs;

use super::{ChatMessage, CompletionClient, EmbeddingClient, ServiceError, ServiceResult};

/// Minimal OpenAI-compatible JSON client shared by the embedding and
/// completion clients.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_args(service: &ServiceArgs) -> Result<Self> {
        Self::new(
            &service.api_base,
            service.resolved_api_key(),
            Duration::from_secs(service.request_timeout_seconds.max(1)),
        )
    }

    fn post_json<Req, Res>(
        &self,
        service: &'static str,
        endpoint: &str,
        body: &Req,
    ) -> ServiceResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.http.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|err| ServiceError::Transient {
            service,
            message: format!("request to {url} failed: {err}"),
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Res>().map_err(|err| ServiceError::InvalidResponse {
                service,
                message: err.to_string(),
            });
        }

        let error_text = response
            .text()
            .unwrap_or_else(|_| "unknown error".to_string());
        let message = serde_json::from_str::<ApiErrorBody>(&error_text)
            .map(|body| body.error.message)
            .unwrap_or(error_text);
        debug!(service, status = status.as_u16(), %message, "service returned error status");

        if is_retryable_status(status) {
            Err(ServiceError::Transient {
                service,
                message: format!("status {}: {message}", status.as_u16()),
            })
        } else {
            Err(ServiceError::Rejected {
                service,
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Debug)]
pub struct HttpEmbeddingClient {
    api: ApiClient,
    model: String,
}

impl HttpEmbeddingClient {
    pub fn new(api: ApiClient, model: &str) -> Self {
        Self {
            api,
            model: model.to_string(),
        }
    }
}

impl EmbeddingClient for HttpEmbeddingClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[&str]) -> ServiceResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbeddingResponse = self.api.post_json("embedding", "embeddings", &request)?;
        order_embeddings(response.data, texts.len())
    }
}

/// Places each returned vector at its declared `index`, falling back to
/// response order when the service omits indices.
fn order_embeddings(data: Vec<EmbeddingData>, expected: usize) -> ServiceResult<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(ServiceError::InvalidResponse {
            service: "embedding",
            message: format!("expected {expected} embeddings, received {}", data.len()),
        });
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, item) in data.into_iter().enumerate() {
        let index = item.index.unwrap_or(position);
        let Some(slot) = slots.get_mut(index) else {
            return Err(ServiceError::InvalidResponse {
                service: "embedding",
                message: format!("embedding index {index} out of range"),
            });
        };
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| ServiceError::InvalidResponse {
                service: "embedding",
                message: format!("missing embedding for input {index}"),
            })
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug)]
pub struct HttpCompletionClient {
    api: ApiClient,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(api: ApiClient, model: &str) -> Self {
        Self {
            api,
            model: model.to_string(),
        }
    }
}

impl CompletionClient for HttpCompletionClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn complete(&self, messages: &[ChatMessage], temperature: f32) -> ServiceResult<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature,
        };
        let response: ChatCompletionResponse =
            self.api.post_json("completion", "chat/completions", &request)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::InvalidResponse {
                service: "completion",
                message: "response contained no message content".to_string(),
            })
    }
}
