//! Clients for the external embedding and completion services.
//!
//! Everything above this module talks to the two traits defined here, so the
//! retrieval and evaluation code can be exercised with in-process fakes.

mod cache;
mod http;
mod local;
mod retry;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::{ServiceArgs, is_local_embedding_model};
use crate::semantic::DEFAULT_EMBEDDING_DIM;

pub use cache::{EmbeddingMemo, EmbeddingStore};
pub use http::{ApiClient, HttpCompletionClient, HttpEmbeddingClient};
pub use local::LocalHashEmbedder;
pub use retry::{RetryPolicy, RetryingEmbedder};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} request failed transiently: {message}")]
    Transient {
        service: &'static str,
        message: String,
    },
    #[error("{service} rejected the request with status {status}: {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

pub trait EmbeddingClient: Send + Sync {
    fn model_id(&self) -> &str;

    /// Embeds every text, returning vectors in input order.
    fn embed_batch(&self, texts: &[&str]) -> ServiceResult<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| ServiceError::InvalidResponse {
                service: "embedding",
                message: "no vector returned for single input".to_string(),
            })
    }
}

impl<E: EmbeddingClient + ?Sized> EmbeddingClient for Box<E> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn embed_batch(&self, texts: &[&str]) -> ServiceResult<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }

    fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        (**self).embed(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
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

pub trait CompletionClient: Send + Sync {
    fn model_id(&self) -> &str;

    fn complete(&self, messages: &[ChatMessage], temperature: f32) -> ServiceResult<String>;
}

impl RetryPolicy {
    pub fn from_args(service: &ServiceArgs) -> Self {
        Self {
            max_attempts: service.max_attempts.max(1),
            backoff: Duration::from_millis(service.retry_backoff_ms),
        }
    }
}

/// Resolves an embedding model id to a retrying, memoised client. The offline
/// `local-hash-v1` id never touches the network.
pub fn build_embedding_client(
    model_id: &str,
    service: &ServiceArgs,
    cache_path: Option<&Path>,
) -> Result<EmbeddingMemo<RetryingEmbedder<Box<dyn EmbeddingClient>>>> {
    let base: Box<dyn EmbeddingClient> = if is_local_embedding_model(model_id) {
        Box::new(LocalHashEmbedder::new(DEFAULT_EMBEDDING_DIM))
    } else {
        let api = ApiClient::from_args(service)?;
        Box::new(HttpEmbeddingClient::new(api, model_id))
    };

    let retrying = RetryingEmbedder::new(base, RetryPolicy::from_args(service));
    let store = match cache_path {
        Some(path) => Some(EmbeddingStore::open(path)?),
        None => None,
    };

    Ok(EmbeddingMemo::new(retrying, store))
}

pub fn build_completion_client(
    model_id: &str,
    service: &ServiceArgs,
) -> Result<HttpCompletionClient> {
    let api = ApiClient::from_args(service)?;
    Ok(HttpCompletionClient::new(api, model_id))
}
