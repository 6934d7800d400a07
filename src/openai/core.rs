use std::time::Duration;

use async_stream::try_stream;
use futures::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::GatewayError;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

#[derive(Clone, Serialize)]
pub struct Property {
    pub r#type: String,
    pub description: String,
}

#[derive(Clone, Serialize)]
pub struct Parameters<Props: Serialize> {
    pub r#type: String,
    pub properties: Props,
    pub required: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
}

/// A function the model is allowed to call, declared with a JSON
/// schema describing its arguments.
#[derive(Clone, Serialize)]
pub struct Function<Props: Serialize> {
    pub name: String,
    pub description: String,
    pub parameters: Parameters<Props>,
}

/// Per-call options sent along with the conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub functions: Option<Vec<Value>>,
    pub stream: bool,
}

impl CompletionOptions {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            functions: None,
            stream: true,
        }
    }

    pub fn with_functions<Props: Serialize>(mut self, functions: &[Function<Props>]) -> Self {
        self.functions = Some(functions.iter().map(|f| json!(f)).collect());
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// An incremental piece of a completion. Function calls arrive as
/// fragments: the first usually carries the name and the rest carry
/// pieces of the JSON encoded arguments.
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionDelta {
    Content(String),
    FunctionCall {
        name: Option<String>,
        arguments: String,
    },
}

pub type DeltaStream = BoxStream<'static, Result<CompletionDelta, GatewayError>>;

fn request_payload(messages: &[Message], options: &CompletionOptions) -> Value {
    let mut payload = json!({
        "model": options.model,
        "messages": messages,
        "stream": options.stream,
    });
    if let Some(functions) = &options.functions {
        payload["functions"] = json!(functions);
    }
    payload
}

async fn send(
    client: &reqwest::Client,
    messages: &[Message],
    options: &CompletionOptions,
    api_hostname: &str,
    api_key: &str,
    timeout: Duration,
) -> Result<reqwest::Response, GatewayError> {
    let payload = request_payload(messages, options);
    let url = format!("{}/v1/chat/completions", api_hostname.trim_end_matches("/"));
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .timeout(timeout)
        .json(&payload)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// Request a completion in one shot and replay it as a short stream
/// so callers don't need to care which mode was used.
pub async fn completion(
    client: &reqwest::Client,
    messages: &[Message],
    options: &CompletionOptions,
    api_hostname: &str,
    api_key: &str,
    timeout: Duration,
) -> Result<DeltaStream, GatewayError> {
    let response: Value = send(client, messages, options, api_hostname, api_key, timeout)
        .await?
        .json()
        .await?;

    let message = &response["choices"][0]["message"];
    let mut deltas = Vec::new();
    if let Some(content) = message["content"].as_str() {
        deltas.push(CompletionDelta::Content(content.to_string()));
    }
    if message["function_call"].is_object() {
        let call = &message["function_call"];
        deltas.push(CompletionDelta::FunctionCall {
            name: call["name"].as_str().map(String::from),
            arguments: call["arguments"].as_str().unwrap_or_default().to_string(),
        });
    }

    Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
}

pub async fn completion_stream(
    client: &reqwest::Client,
    messages: &[Message],
    options: &CompletionOptions,
    api_hostname: &str,
    api_key: &str,
    timeout: Duration,
) -> Result<DeltaStream, GatewayError> {
    let response = send(client, messages, options, api_hostname, api_key, timeout).await?;
    Ok(delta_stream(response.bytes_stream()).boxed())
}

/// Accumulates raw bytes and hands out complete server-sent events.
/// Events can be split across network chunks (and multi-byte
/// characters across events) so nothing is decoded until a full
/// event is available. Events end with a blank line, written as
/// either `\n\n` or `\r\n\r\n`.
#[derive(Debug, Default)]
pub struct EventBuffer {
    buf: Vec<u8>,
    // Bytes already searched for a separator without finding one
    scanned: usize,
}

impl EventBuffer {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_event(&mut self) -> Result<Option<String>, GatewayError> {
        // A separator may straddle the previous scan boundary
        let start = self.scanned.saturating_sub(3);
        let Some((end, separator_len)) = find_event_end(&self.buf, start) else {
            self.scanned = self.buf.len();
            return Ok(None);
        };
        let event: Vec<u8> = self.buf.drain(..end + separator_len).collect();
        self.scanned = 0;
        let event = std::str::from_utf8(&event[..end])?;
        Ok(Some(event.to_string()))
    }

    /// True when the buffer holds the start of an event that never
    /// got its terminating blank line.
    pub fn has_partial_event(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }
}

fn find_event_end(buf: &[u8], start: usize) -> Option<(usize, usize)> {
    (start..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

/// Extract the payload of a `data:` line, ignoring comments and other
/// fields.
fn event_data(event: &str) -> Option<&str> {
    event
        .lines()
        .find_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
}

#[derive(Debug, Deserialize)]
struct FunctionCallChunk {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    function_call: Option<FunctionCallChunk>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChunkChoice>,
}

fn chunk_deltas(data: &str) -> Result<Vec<CompletionDelta>, GatewayError> {
    let chunk = serde_json::from_str::<CompletionChunk>(data).map_err(|source| {
        tracing::error!("Parsing completion chunk failed for {}\nError:{}", data, source);
        GatewayError::Decode {
            payload: data.to_string(),
            source,
        }
    })?;

    let mut deltas = Vec::new();
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(deltas);
    };
    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
        deltas.push(CompletionDelta::Content(content));
    }
    if let Some(call) = choice.delta.function_call {
        deltas.push(CompletionDelta::FunctionCall {
            name: call.name.filter(|n| !n.is_empty()),
            arguments: call.arguments.unwrap_or_default(),
        });
    }
    Ok(deltas)
}

/// Turn a raw SSE byte stream from the chat completions endpoint into
/// completion deltas. Ends at `[DONE]` or when the body ends. A body
/// that ends part way through an event is reported as
/// `GatewayError::Truncated` so a cut off reply never looks complete.
pub fn delta_stream<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<CompletionDelta, GatewayError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<GatewayError> + Send + 'static,
{
    try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer = EventBuffer::default();
        let mut done = false;

        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Into::<GatewayError>::into)?;
            buffer.extend(chunk.as_ref());

            while let Some(event) = buffer.next_event()? {
                let Some(data) = event_data(&event) else {
                    continue;
                };
                if data == "[DONE]" {
                    done = true;
                    break 'outer;
                }
                for delta in chunk_deltas(data)? {
                    yield delta;
                }
            }
        }

        if !done && buffer.has_partial_event() {
            tracing::error!("Completion stream ended part way through an event");
            Err::<(), _>(GatewayError::Truncated)?;
        }
    }
}
