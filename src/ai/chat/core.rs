use async_stream::try_stream;
use futures::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::Serialize;

use super::models::PendingFunctionCall;
use crate::ai::tools::{AuditFunction, declarations};
use crate::core::AppConfig;
use crate::openai::{
    CompletionDelta, CompletionOptions, DeltaStream, Function, GatewayError, Message,
    SharedGateway,
};

const DEFAULT_MAX_DEPTH: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("malformed function call: {0}")]
    MalformedFunctionCall(String),
    #[error("model called unregistered function `{0}`")]
    UnknownFunction(String),
    #[error("function call `{0}` did not include the contract code")]
    MissingContractCode(String),
    #[error("gave up after {0} function call continuations")]
    ContinuationDepthExceeded(usize),
}

pub type RelayStream = BoxStream<'static, Result<String, RelayError>>;

/// Relays a conversation to the model and streams the text of the
/// reply.
///
/// When the model calls one of the audit functions the rest of that
/// completion is dropped and the model is asked again with the
/// function's contract code appended as a user turn. Its reply is
/// streamed in place of the original. This repeats for nested calls
/// up to `max_depth` times, after which the stream ends in an error.
///
/// A `Relay` holds no per-conversation state and can be shared across
/// requests. Use `Relay::builder()` to construct one.
pub struct Relay {
    gateway: SharedGateway,
    options: CompletionOptions,
    max_depth: usize,
}

impl Relay {
    pub fn builder(gateway: SharedGateway, model: &str) -> RelayBuilder {
        RelayBuilder::new(gateway, model)
    }

    /// A streaming relay with the audit functions registered.
    pub fn from_config(gateway: SharedGateway, config: &AppConfig) -> Self {
        Self::builder(gateway, &config.openai_model)
            .functions(&declarations())
            .max_depth(config.max_continuation_depth)
            .build()
    }

    pub fn options(&self) -> &CompletionOptions {
        &self.options
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Issue the first completion request. Failures here happen
    /// before any output is produced so they are returned directly
    /// rather than through the stream.
    pub async fn start(&self, conversation: Vec<Message>) -> Result<RelayStream, GatewayError> {
        let primary = self.gateway.complete(&conversation, &self.options).await?;

        Ok(splice(
            self.gateway.clone(),
            self.options.clone(),
            self.max_depth,
            conversation,
            primary,
        )
        .boxed())
    }
}

pub struct RelayBuilder {
    gateway: SharedGateway,
    options: CompletionOptions,
    max_depth: usize,
}

impl RelayBuilder {
    pub fn new(gateway: SharedGateway, model: &str) -> Self {
        Self {
            gateway,
            options: CompletionOptions::new(model),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn functions<Props: Serialize>(mut self, functions: &[Function<Props>]) -> Self {
        self.options = self.options.with_functions(functions);
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn build(self) -> Relay {
        Relay {
            gateway: self.gateway,
            options: self.options,
            max_depth: self.max_depth,
        }
    }
}

/// Validate a finished function call and build the message that
/// continues the conversation.
fn next_continuation(
    pending: PendingFunctionCall,
    depth: usize,
    max_depth: usize,
) -> Result<Message, RelayError> {
    let call = pending.finish()?;
    let function = AuditFunction::from_name(&call.name)
        .ok_or_else(|| RelayError::UnknownFunction(call.name.clone()))?;

    if depth > max_depth {
        tracing::warn!(%function, depth, "Function call continuation limit reached");
        return Err(RelayError::ContinuationDepthExceeded(max_depth));
    }

    tracing::info!(%function, depth, "Continuing chat after function call");
    call.continuation_message()
}

fn splice(
    gateway: SharedGateway,
    options: CompletionOptions,
    max_depth: usize,
    mut conversation: Vec<Message>,
    primary: DeltaStream,
) -> impl Stream<Item = Result<String, RelayError>> + Send + 'static {
    try_stream! {
        let mut current = primary;
        let mut depth: usize = 0;

        loop {
            let mut pending: Option<PendingFunctionCall> = None;

            while let Some(delta) = current.next().await {
                match delta.map_err(RelayError::from)? {
                    CompletionDelta::Content(text) => {
                        // Text after a function call starts is abandoned
                        if pending.is_none() {
                            yield text;
                        }
                    }
                    CompletionDelta::FunctionCall { name, arguments } => {
                        pending
                            .get_or_insert_with(PendingFunctionCall::default)
                            .push(name.as_deref(), &arguments);
                    }
                }
            }

            let pending = match pending {
                Some(pending) => pending,
                None => break,
            };

            depth += 1;
            let message = next_continuation(pending, depth, max_depth)?;
            conversation.push(message);
            current = gateway
                .complete(&conversation, &options)
                .await
                .map_err(RelayError::from)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::openai::{Gateway, Role};

    type Script = Vec<Result<CompletionDelta, GatewayError>>;

    /// Replays scripted completions and records every conversation it
    /// receives.
    #[derive(Default)]
    struct FakeGateway {
        scripts: Mutex<VecDeque<Script>>,
        looping: Option<Vec<CompletionDelta>>,
        calls: Mutex<Vec<(Vec<Message>, CompletionOptions)>>,
    }

    impl FakeGateway {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                ..Default::default()
            })
        }

        fn looping(deltas: Vec<CompletionDelta>) -> Arc<Self> {
            Arc::new(Self {
                looping: Some(deltas),
                ..Default::default()
            })
        }

        fn calls(&self) -> Vec<(Vec<Message>, CompletionOptions)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Gateway for FakeGateway {
        async fn complete(
            &self,
            messages: &[Message],
            options: &CompletionOptions,
        ) -> Result<DeltaStream, GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push((messages.to_vec(), options.clone()));

            if let Some(deltas) = &self.looping {
                return Ok(stream::iter(deltas.clone().into_iter().map(Ok)).boxed());
            }

            match self.scripts.lock().unwrap().pop_front() {
                Some(script) => Ok(stream::iter(script).boxed()),
                None => Err(GatewayError::Status {
                    status: 500,
                    body: String::from("no scripted completion"),
                }),
            }
        }
    }

    fn text(s: &str) -> Result<CompletionDelta, GatewayError> {
        Ok(CompletionDelta::Content(s.to_string()))
    }

    fn call(name: Option<&str>, arguments: &str) -> Result<CompletionDelta, GatewayError> {
        Ok(CompletionDelta::FunctionCall {
            name: name.map(String::from),
            arguments: arguments.to_string(),
        })
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::new(Role::System, "You are a smart contract auditor."),
            Message::new(Role::User, "please find vulnerabilities in this smart contract"),
        ]
    }

    fn relay(gateway: Arc<FakeGateway>, max_depth: usize) -> Relay {
        Relay::builder(gateway, "gpt-4-test")
            .functions(&declarations())
            .max_depth(max_depth)
            .build()
    }

    async fn run(relay: &Relay, conversation: Vec<Message>) -> (String, Option<RelayError>) {
        let mut stream = relay.start(conversation).await.unwrap();
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => out.push_str(&text),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    #[tokio::test]
    async fn test_text_passes_through_in_order() {
        let gateway = FakeGateway::new(vec![vec![text("Re"), text("entrancy"), text(" found.")]]);
        let relay = relay(gateway.clone(), 4);

        let (out, err) = run(&relay, conversation()).await;

        assert!(err.is_none());
        assert_eq!(out, "Reentrancy found.");
        assert_eq!(gateway.calls().len(), 1);
        assert_eq!(gateway.calls()[0].0, conversation());
    }

    #[tokio::test]
    async fn test_request_options() {
        let gateway = FakeGateway::new(vec![vec![text("ok")]]);
        let relay = relay(gateway.clone(), 4);
        run(&relay, conversation()).await;

        let calls = gateway.calls();
        let (_, options) = &calls[0];
        assert_eq!(options.model, "gpt-4-test");
        assert!(options.stream);
        let functions = options.functions.as_ref().unwrap();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0]["name"], "analyseContract");
        assert_eq!(functions[1]["name"], "findVulnerabilities");
    }

    #[tokio::test]
    async fn test_analyse_contract_continuation() {
        let gateway = FakeGateway::new(vec![
            vec![
                call(Some("analyseContract"), ""),
                call(None, r#"{"contractCode":"#),
                call(None, r#""X"}"#),
            ],
            vec![text("<h1>Overview</h1>"), text("<p>Token contract.</p>")],
        ]);
        let relay = relay(gateway.clone(), 4);

        let (out, err) = run(&relay, conversation()).await;

        assert!(err.is_none());
        assert_eq!(out, "<h1>Overview</h1><p>Token contract.</p>");

        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        let mut expected = conversation();
        expected.push(Message::new(Role::User, "X"));
        assert_eq!(calls[1].0, expected);
        assert_eq!(calls[1].1, calls[0].1);
    }

    #[tokio::test]
    async fn test_find_vulnerabilities_continuation() {
        let gateway = FakeGateway::new(vec![
            vec![call(
                Some("findVulnerabilities"),
                r#"{"contractCode":"contract Vault {}"}"#,
            )],
            vec![text("Unchecked external call")],
        ]);
        let relay = relay(gateway.clone(), 4);

        let (out, err) = run(&relay, conversation()).await;

        assert!(err.is_none());
        assert_eq!(out, "Unchecked external call");
        let calls = gateway.calls();
        assert_eq!(
            calls[1].0.last(),
            Some(&Message::new(Role::User, "contract Vault {}"))
        );
        assert_eq!(calls[1].0.len(), conversation().len() + 1);
    }

    #[tokio::test]
    async fn test_primary_is_abandoned_after_function_call() {
        let gateway = FakeGateway::new(vec![
            vec![
                text("Let me look. "),
                call(Some("analyseContract"), r#"{"contractCode":"C"}"#),
                text("never shown"),
            ],
            vec![text("Done.")],
        ]);
        let relay = relay(gateway.clone(), 4);

        let (out, err) = run(&relay, conversation()).await;

        assert!(err.is_none());
        assert_eq!(out, "Let me look. Done.");
    }

    #[tokio::test]
    async fn test_nested_continuations_extend_conversation() {
        let gateway = FakeGateway::new(vec![
            vec![call(Some("analyseContract"), r#"{"contractCode":"A"}"#)],
            vec![call(Some("findVulnerabilities"), r#"{"contractCode":"B"}"#)],
            vec![text("final")],
        ]);
        let relay = relay(gateway.clone(), 4);

        let (out, err) = run(&relay, conversation()).await;

        assert!(err.is_none());
        assert_eq!(out, "final");
        let calls = gateway.calls();
        assert_eq!(calls.len(), 3);
        let mut expected = conversation();
        expected.push(Message::new(Role::User, "A"));
        expected.push(Message::new(Role::User, "B"));
        assert_eq!(calls[2].0, expected);
    }

    #[tokio::test]
    async fn test_continuation_depth_is_capped() {
        let gateway = FakeGateway::looping(vec![
            CompletionDelta::Content("again ".to_string()),
            CompletionDelta::FunctionCall {
                name: Some("analyseContract".to_string()),
                arguments: r#"{"contractCode":"loop"}"#.to_string(),
            },
        ]);
        let relay = relay(gateway.clone(), 2);

        let (out, err) = run(&relay, conversation()).await;

        assert!(matches!(err, Some(RelayError::ContinuationDepthExceeded(2))));
        assert_eq!(out, "again again again ");
        // The primary request plus two continuations
        assert_eq!(gateway.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_zero_depth_disables_continuations() {
        let gateway = FakeGateway::new(vec![vec![call(
            Some("analyseContract"),
            r#"{"contractCode":"C"}"#,
        )]]);
        let relay = relay(gateway.clone(), 0);

        let (_, err) = run(&relay, conversation()).await;

        assert!(matches!(err, Some(RelayError::ContinuationDepthExceeded(0))));
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_function_ends_stream() {
        let gateway = FakeGateway::new(vec![vec![
            text("Hmm. "),
            call(Some("transferOwnership"), r#"{"contractCode":"C"}"#),
        ]]);
        let relay = relay(gateway.clone(), 4);

        let (out, err) = run(&relay, conversation()).await;

        assert_eq!(out, "Hmm. ");
        assert!(matches!(err, Some(RelayError::UnknownFunction(name)) if name == "transferOwnership"));
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_contract_code_ends_stream() {
        let gateway = FakeGateway::new(vec![vec![call(Some("analyseContract"), "{}")]]);
        let relay = relay(gateway.clone(), 4);

        let (_, err) = run(&relay, conversation()).await;

        assert!(matches!(err, Some(RelayError::MissingContractCode(_))));
    }

    #[tokio::test]
    async fn test_mid_stream_error_ends_stream() {
        let gateway = FakeGateway::new(vec![vec![
            text("partial"),
            Err(GatewayError::Status {
                status: 502,
                body: String::from("upstream reset"),
            }),
            text("unreachable"),
        ]]);
        let relay = relay(gateway, 4);

        let (out, err) = run(&relay, conversation()).await;

        assert_eq!(out, "partial");
        assert!(matches!(err, Some(RelayError::Gateway(_))));
    }

    #[tokio::test]
    async fn test_failed_continuation_request_ends_stream() {
        let gateway = FakeGateway::new(vec![vec![call(
            Some("findVulnerabilities"),
            r#"{"contractCode":"C"}"#,
        )]]);
        let relay = relay(gateway.clone(), 4);

        let (_, err) = run(&relay, conversation()).await;

        assert!(matches!(
            err,
            Some(RelayError::Gateway(GatewayError::Status { status: 500, .. }))
        ));
        assert_eq!(gateway.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_start_surfaces_gateway_error() {
        let gateway = FakeGateway::new(vec![]);
        let relay = relay(gateway, 4);
        assert!(relay.start(conversation()).await.is_err());
    }

    #[tokio::test]
    async fn test_output_is_deterministic() {
        let script = || {
            vec![
                vec![
                    text("Checking. "),
                    call(Some("analyseContract"), r#"{"contractCode":"X"}"#),
                ],
                vec![text("<p>"), text("All good"), text("</p>")],
            ]
        };

        let (first, _) = run(&relay(FakeGateway::new(script()), 4), conversation()).await;
        let (second, _) = run(&relay(FakeGateway::new(script()), 4), conversation()).await;

        assert_eq!(first, second);
        assert_eq!(first, "Checking. <p>All good</p>");
    }

    #[test]
    fn test_builder_defaults() {
        let relay = Relay::builder(FakeGateway::new(vec![]), "gpt-4").build();
        assert_eq!(relay.max_depth(), DEFAULT_MAX_DEPTH);
        assert!(relay.options().functions.is_none());
        assert!(relay.options().stream);
    }
}
