//! Test utilities for integration tests
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{Router, body::Body};
use futures::stream::{self, StreamExt};

use auditor::api::AppState;
use auditor::api::app;
use auditor::core::AppConfig;
use auditor::openai::{
    CompletionDelta, CompletionOptions, DeltaStream, Gateway, GatewayError, Message,
};

pub type Script = Vec<Result<CompletionDelta, GatewayError>>;

/// A stand-in for the hosted model. Each call pops the next scripted
/// completion and records the conversation it was sent.
#[derive(Default)]
pub struct FakeGateway {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl FakeGateway {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<DeltaStream, GatewayError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        match self.scripts.lock().unwrap().pop_front() {
            Some(script) => Ok(stream::iter(script).boxed()),
            None => Err(GatewayError::Status {
                status: 401,
                body: String::from("Incorrect API key provided"),
            }),
        }
    }
}

pub fn text(s: &str) -> Result<CompletionDelta, GatewayError> {
    Ok(CompletionDelta::Content(s.to_string()))
}

pub fn function_call(name: &str, contract_code: &str) -> Result<CompletionDelta, GatewayError> {
    Ok(CompletionDelta::FunctionCall {
        name: Some(name.to_string()),
        arguments: serde_json::json!({ "contractCode": contract_code }).to_string(),
    })
}

pub fn test_config() -> AppConfig {
    AppConfig {
        openai_model: String::from("gpt-4-1106-preview"),
        openai_api_hostname: String::from("https://api.openai.com"),
        openai_api_key: String::from("test-api-key"),
        max_continuation_depth: 2,
        request_timeout_secs: 5,
        format_marker: String::from(".format."),
        format_min_length: 100,
        format_instruction: String::from(
            ", all responses should be formatted in html using h1,p,ul,li make sure not to use backticks indicating codeblocks.",
        ),
    }
}

/// Creates a test application router backed by `gateway`.
pub fn test_app(gateway: Arc<FakeGateway>) -> Router {
    let app_state = AppState::new(&test_config(), gateway);
    app(Arc::new(app_state))
}

pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
