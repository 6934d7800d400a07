//! The seam between the relay and the hosted model service. Handlers
//! only ever see `dyn Gateway` so tests can swap in a scripted fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CompletionOptions, DeltaStream, Message, completion, completion_stream};
use crate::core::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request to model gateway failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model gateway responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid completion chunk {payload}: {source}")]
    Decode {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("completion stream is not valid utf-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("completion stream ended part way through an event")]
    Truncated,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send the conversation to the model. The returned stream is
    /// single pass and ends when the model is done or on the first
    /// error. Nothing is retried.
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream, GatewayError>;
}

pub type SharedGateway = Arc<dyn Gateway + 'static>;

/// Gateway for OpenAI compatible chat completion APIs.
pub struct OpenAiGateway {
    client: reqwest::Client,
    api_hostname: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiGateway {
    pub fn new(api_hostname: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_hostname: api_hostname.to_string(),
            api_key: api_key.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.openai_api_hostname,
            &config.openai_api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl Gateway for OpenAiGateway {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream, GatewayError> {
        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            stream = options.stream,
            "Requesting chat completion"
        );

        if options.stream {
            completion_stream(
                &self.client,
                messages,
                options,
                &self.api_hostname,
                &self.api_key,
                self.timeout,
            )
            .await
        } else {
            completion(
                &self.client,
                messages,
                options,
                &self.api_hostname,
                &self.api_key,
                self.timeout,
            )
            .await
        }
    }
}
